//! SQLite-backed durable store.
//!
//! The store owns every persisted row. Reads are open to the planner, the
//! status report and the exporter; writes to data tables only happen through
//! [`StoreTx`], which the merge engine obtains for the duration of one fetch
//! unit.

mod metadata;

pub use metadata::{OutcomeRecord, OutcomeStatus, ResourceStatus, RunRecord, RunStatus};

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use thiserror::Error;

use crate::domain::{Key, Row, Value, DATE_FORMAT};
use crate::schema::{self, TableDef, DATA_TABLES, METADATA_SQL, METADATA_TABLES};

/// Current on-disk schema version, tracked in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },

    #[error("invalid timestamp or date in store: {0}")]
    InvalidTimestamp(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("crawl run {0} is not running")]
    RunNotRunning(i64),
}

/// Column names plus raw cells of a table, in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDump {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the store at `path`, enable WAL and migrate.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let mut sql = String::new();
            for def in DATA_TABLES {
                sql.push_str(&def.create_sql());
                sql.push_str(";\n");
            }
            sql.push_str(METADATA_SQL);
            sql.push_str("PRAGMA user_version = 1;\n");
            self.conn
                .execute_batch(&format!("BEGIN;\n{sql}COMMIT;"))?;
            tracing::debug!(version = SCHEMA_VERSION, "store schema created");
        }
        Ok(())
    }

    /// Latest stored date across `def`'s date column, if it has one and any rows.
    pub fn last_stored_date(&self, def: &TableDef) -> Result<Option<NaiveDate>, StoreError> {
        let Some(column) = def.date_column else {
            return Ok(None);
        };
        let max: Option<String> = self.conn.query_row(
            &format!("SELECT MAX({column}) FROM {}", def.name),
            [],
            |row| row.get(0),
        )?;
        max.map(|s| parse_date(&s)).transpose()
    }

    /// Number of rows in a data or metadata table.
    pub fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        check_table_name(table)?;
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Rows of `def`, ordered by key. With `since`, only rows dated on or after it.
    pub fn table_rows(
        &self,
        def: &TableDef,
        since: Option<NaiveDate>,
    ) -> Result<Vec<Row>, StoreError> {
        let columns: Vec<&str> = def.column_names().collect();
        let dump = self.select(def.name, &columns, def.key, since_filter(def, since))?;
        Ok(dump
            .rows
            .into_iter()
            .map(|cells| {
                let mut row = Row::new();
                for (column, value) in columns.iter().zip(cells) {
                    row.set(column, value);
                }
                row
            })
            .collect())
    }

    /// Raw dump of any data or metadata table, for export.
    ///
    /// `since` applies to data tables with a date column and is ignored elsewhere.
    pub fn dump_table(
        &self,
        table: &str,
        since: Option<NaiveDate>,
    ) -> Result<TableDump, StoreError> {
        if let Some(def) = schema::table(table) {
            let columns: Vec<&str> = def.column_names().collect();
            return self.select(def.name, &columns, def.key, since_filter(def, since));
        }
        check_table_name(table)?;
        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {table} ORDER BY rowid"))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TableDump { columns, rows })
    }

    /// Entity identifiers (tickers) known from the stored ticker-sector map, sorted.
    pub fn entities(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT ticker FROM ticker_sector_map ORDER BY ticker")?;
        let tickers = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tickers)
    }

    /// Every stored key of `def`.
    pub fn keys(&self, def: &TableDef) -> Result<HashSet<Key>, StoreError> {
        read_keys(&self.conn, def)
    }

    pub(crate) fn begin(&mut self) -> Result<StoreTx<'_>, StoreError> {
        Ok(StoreTx {
            tx: self.conn.transaction()?,
        })
    }

    fn select(
        &self,
        table: &str,
        columns: &[&str],
        order_by: &[&str],
        since: Option<(&str, String)>,
    ) -> Result<TableDump, StoreError> {
        let mut sql = format!("SELECT {} FROM {table}", columns.join(", "));
        let mut args: Vec<String> = Vec::new();
        if let Some((column, date)) = since {
            sql.push_str(&format!(" WHERE {column} >= ?1"));
            args.push(date);
        }
        sql.push_str(&format!(" ORDER BY {}", order_by.join(", ")));

        let mut stmt = self.conn.prepare(&sql)?;
        let width = columns.len();
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TableDump {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        })
    }
}

/// Write access to the data tables for the span of one fetch unit.
///
/// Dropping a `StoreTx` without calling [`StoreTx::commit`] rolls back every
/// write made through it.
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
}

impl StoreTx<'_> {
    pub fn existing_keys(&self, def: &TableDef) -> Result<HashSet<Key>, StoreError> {
        read_keys(&self.tx, def)
    }

    /// Insert rows, overwriting the non-key columns of rows whose key exists.
    pub fn upsert(&self, def: &TableDef, rows: &[Row]) -> Result<usize, StoreError> {
        let columns: Vec<&str> = def.column_names().collect();
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !def.is_key_column(c))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        let conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {conflict}",
            def.name,
            columns.join(", "),
            placeholders(columns.len()),
            def.key.join(", "),
        );
        self.write_rows(&sql, &columns, rows)
    }

    /// Plain insert. A key collision surfaces as a SQLite constraint error.
    pub fn insert(&self, def: &TableDef, rows: &[Row]) -> Result<usize, StoreError> {
        let columns: Vec<&str> = def.column_names().collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            def.name,
            columns.join(", "),
            placeholders(columns.len()),
        );
        self.write_rows(&sql, &columns, rows)
    }

    pub fn delete_keys(&self, def: &TableDef, keys: &[Key]) -> Result<usize, StoreError> {
        let predicate: Vec<String> = def
            .key
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c} = ?{}", i + 1))
            .collect();
        let sql = format!("DELETE FROM {} WHERE {}", def.name, predicate.join(" AND "));
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let mut deleted = 0;
        for key in keys {
            let values: Vec<Value> = key.0.iter().map(|p| p.to_value()).collect();
            deleted += stmt.execute(params_from_iter(values.iter()))?;
        }
        Ok(deleted)
    }

    /// Record that an entity's fundamentals were refreshed on `date`.
    pub fn mark_refreshed(
        &self,
        ticker: &str,
        date: NaiveDate,
        run_id: Option<i64>,
    ) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO entity_refresh (ticker, refreshed_on, run_id) VALUES (?1, ?2, ?3)
             ON CONFLICT (ticker) DO UPDATE SET refreshed_on = excluded.refreshed_on,
                                                run_id = excluded.run_id",
            params![ticker, date.format(DATE_FORMAT).to_string(), run_id],
        )?;
        Ok(())
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }

    fn write_rows(&self, sql: &str, columns: &[&str], rows: &[Row]) -> Result<usize, StoreError> {
        let mut stmt = self.tx.prepare_cached(sql)?;
        let mut written = 0;
        for row in rows {
            written += stmt.execute(params_from_iter(columns.iter().map(|c| row.get(c))))?;
        }
        Ok(written)
    }
}

fn read_keys(conn: &Connection, def: &TableDef) -> Result<HashSet<Key>, StoreError> {
    let sql = format!("SELECT {} FROM {}", def.key.join(", "), def.name);
    let mut stmt = conn.prepare(&sql)?;
    let width = def.key.len();
    let rows = stmt.query_map([], |row| {
        (0..width)
            .map(|i| row.get::<_, Value>(i))
            .collect::<Result<Vec<_>, _>>()
    })?;
    let mut keys = HashSet::new();
    for values in rows {
        let parts: Option<Vec<_>> = values?
            .iter()
            .zip(def.key)
            .map(|(value, column)| match def.column_type(column) {
                Some(dtype) => value.key_part_as(dtype),
                None => value.key_part(),
            })
            .collect();
        if let Some(parts) = parts {
            keys.insert(Key(parts));
        }
    }
    Ok(keys)
}

fn check_table_name(table: &str) -> Result<(), StoreError> {
    if schema::table(table).is_some() || METADATA_TABLES.contains(&table) {
        Ok(())
    } else {
        Err(StoreError::UnknownTable(table.to_string()))
    }
}

fn since_filter(def: &TableDef, since: Option<NaiveDate>) -> Option<(&'static str, String)> {
    match (def.date_column, since) {
        (Some(column), Some(date)) => Some((column, date.format(DATE_FORMAT).to_string())),
        _ => None,
    }
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|_| StoreError::InvalidTimestamp(s.to_string()))
}

/// Used by the metadata queries for nullable single-row lookups.
pub(crate) fn optional<T>(result: rusqlite::Result<T>) -> Result<Option<T>, StoreError> {
    Ok(result.optional()?)
}
