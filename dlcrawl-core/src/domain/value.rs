//! Cell values and the key types derived from them.

use std::fmt;

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use super::DATE_FORMAT;
use crate::schema::ColumnType;

/// A single stored cell. Mirrors SQLite's storage classes minus BLOB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Convert a JSON scalar from an API payload into a cell value.
    ///
    /// Booleans become 0/1, integral numbers stay integers, nested arrays and
    /// objects are kept as their compact JSON text.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map_or(Value::Null, Value::Real),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a TEXT cell as a `YYYY-MM-DD` date.
    pub fn as_date(&self) -> Option<NaiveDate> {
        self.as_text()
            .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
    }

    /// Project this value onto a key component.
    ///
    /// Only non-empty text and integers (including integral reals, which JSON
    /// producers emit for counts like `30.0`) are valid key material.
    pub fn key_part(&self) -> Option<KeyPart> {
        match self {
            Value::Text(s) if !s.trim().is_empty() => Some(KeyPart::Text(s.clone())),
            Value::Integer(i) => Some(KeyPart::Integer(*i)),
            Value::Real(r) if r.fract() == 0.0 && r.is_finite() => {
                Some(KeyPart::Integer(*r as i64))
            }
            _ => None,
        }
    }

    /// Key component as SQLite stores it in a column of type `dtype`.
    ///
    /// TEXT columns hold integers as their decimal text and INTEGER columns
    /// hold integral text as integers, so keys built from incoming rows and
    /// keys read back from the table compare equal.
    pub fn key_part_as(&self, dtype: ColumnType) -> Option<KeyPart> {
        let part = self.key_part()?;
        Some(match (dtype, part) {
            (ColumnType::Text, KeyPart::Integer(i)) => match self {
                Value::Real(_) => KeyPart::Text(format!("{i}.0")),
                _ => KeyPart::Text(i.to_string()),
            },
            (ColumnType::Integer, KeyPart::Text(s)) => match s.parse::<i64>() {
                Ok(i) => KeyPart::Integer(i),
                Err(_) => KeyPart::Text(s),
            },
            (_, part) => part,
        })
    }

    /// JSON representation used by the export projector.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Real(r) => serde_json::Number::from_f64(*r)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Plain-text rendering used for CSV cells (NULL becomes an empty cell).
    pub fn to_csv_field(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => r.to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Text(v.format(DATE_FORMAT).to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Value::Null),
            ValueRef::Integer(i) => Ok(Value::Integer(i)),
            ValueRef::Real(r) => Ok(Value::Real(r)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| Value::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

/// One component of a row key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Integer(i64),
    Text(String),
}

impl KeyPart {
    pub fn to_value(&self) -> Value {
        match self {
            KeyPart::Integer(i) => Value::Integer(*i),
            KeyPart::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Integer(i) => write!(f, "{i}"),
            KeyPart::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Full key tuple of a row, in the table's key-column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub Vec<KeyPart>);

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "({})", parts.join(", "))
    }
}
