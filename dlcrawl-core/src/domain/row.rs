use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::value::{Key, Value};
use crate::schema::TableDef;

/// One record destined for a single table, as a column-name to value map.
///
/// Columns absent from the map are stored as NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.cells.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.cells.get(column).unwrap_or(&NULL)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Extract the row's key for `def`.
    ///
    /// Fails with a readable reason when a key column is missing, NULL,
    /// blank text, or of a non-key type.
    pub fn key(&self, def: &TableDef) -> Result<Key, String> {
        def.key
            .iter()
            .map(|column| {
                let value = self.get(column);
                let part = match def.column_type(column) {
                    Some(dtype) => value.key_part_as(dtype),
                    None => value.key_part(),
                };
                part.ok_or_else(|| match value {
                    Value::Null => format!("key column '{column}' is null"),
                    other => format!("key column '{column}' has invalid value {other:?}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Key)
    }

    /// The row's value in the table's date column, if the table has one.
    ///
    /// `Ok(None)` means the table is not date-keyed; `Err` means the column
    /// exists but holds no parseable date.
    pub fn date(&self, def: &TableDef) -> Result<Option<NaiveDate>, String> {
        let Some(column) = def.date_column else {
            return Ok(None);
        };
        match self.get(column).as_date() {
            Some(date) => Ok(Some(date)),
            None => Err(format!(
                "date column '{column}' has unparseable value {:?}",
                self.get(column)
            )),
        }
    }
}
