//! `status` report: per-resource crawl history and table sizes.

use std::path::Path;

use chrono::NaiveDateTime;
use dlcrawl_core::schema::{DATA_TABLES, METADATA_TABLES};
use dlcrawl_core::store::{ResourceStatus, RunRecord};
use dlcrawl_core::{Store, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCount {
    pub table: String,
    pub rows: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub last_run: Option<RunRecord>,
    pub resources: Vec<ResourceStatus>,
    pub tables: Vec<TableCount>,
    pub db_size_bytes: Option<u64>,
}

impl StatusReport {
    pub fn collect(store: &Store) -> Result<Self, StoreError> {
        let names = DATA_TABLES
            .iter()
            .map(|def| def.name)
            .chain(METADATA_TABLES.iter().copied());
        let tables = names
            .map(|table| {
                Ok(TableCount {
                    table: table.to_string(),
                    rows: store.row_count(table)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(Self {
            last_run: store.last_finished_run()?,
            resources: store.resource_status()?,
            tables,
            db_size_bytes: None,
        })
    }

    /// Attach the on-disk size of the database file, if it can be read.
    pub fn with_db_size(mut self, path: &Path) -> Self {
        self.db_size_bytes = std::fs::metadata(path).ok().map(|m| m.len());
        self
    }

    pub fn rows_in(&self, table: &str) -> Option<u64> {
        self.tables.iter().find(|t| t.table == table).map(|t| t.rows)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        match &self.last_run {
            Some(run) => out.push_str(&format!(
                "  Last run #{} ({}) started {} finished {}: {}\n\n",
                run.run_id,
                run.mode,
                ts(Some(run.started_at)),
                ts(run.finished_at),
                run.status
            )),
            None => out.push_str("  No crawl history found. Run 'crawl' first.\n\n"),
        }

        if !self.resources.is_empty() {
            out.push_str(&format!(
                "  {:<22} {:<8} {:<20} {:<20} {:<10}\n",
                "Resource", "Status", "Last attempt", "Last write", "Data date"
            ));
            out.push_str(&format!(
                "  {} {} {} {} {}\n",
                "─".repeat(22),
                "─".repeat(8),
                "─".repeat(20),
                "─".repeat(20),
                "─".repeat(10)
            ));
            for r in &self.resources {
                out.push_str(&format!(
                    "  {:<22} {:<8} {:<20} {:<20} {:<10}\n",
                    r.resource,
                    r.last_status.as_str(),
                    ts(r.last_attempt_at),
                    ts(r.last_success_write_at),
                    r.last_date.map_or_else(|| "-".to_string(), |d| d.to_string()),
                ));
                if let Some(err) = &r.last_error {
                    out.push_str(&format!("      last error: {err}\n"));
                }
            }
            out.push('\n');
        }

        out.push_str(&format!("  {:<22} {:>10}\n", "Table", "Rows"));
        out.push_str(&format!("  {} {}\n", "─".repeat(22), "─".repeat(10)));
        for t in &self.tables {
            out.push_str(&format!("  {:<22} {:>10}\n", t.table, t.rows));
        }
        if let Some(bytes) = self.db_size_bytes {
            out.push_str(&format!(
                "\n  Database size: {:.1} MB\n",
                bytes as f64 / (1024.0 * 1024.0)
            ));
        }
        out
    }
}

fn ts(value: Option<NaiveDateTime>) -> String {
    value.map_or_else(
        || "-".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_reports_every_table_empty() {
        let store = Store::open_in_memory().unwrap();
        let report = StatusReport::collect(&store).unwrap();
        assert!(report.last_run.is_none());
        assert!(report.resources.is_empty());
        assert_eq!(report.tables.len(), DATA_TABLES.len() + METADATA_TABLES.len());
        assert!(report.tables.iter().all(|t| t.rows == 0));
        assert_eq!(report.rows_in("vn_ta"), Some(0));
        assert!(report.render().contains("No crawl history"));
    }
}
