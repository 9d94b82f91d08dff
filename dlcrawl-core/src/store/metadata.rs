//! Crawl-run metadata: one row per run, one outcome row per resource attempted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::params;
use serde::Serialize;

use super::{optional, parse_date, Store, StoreError};
use crate::domain::{DATE_FORMAT, TIMESTAMP_FORMAT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    PartialFailure,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial_failure",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "partial_failure" => Ok(RunStatus::PartialFailure),
            other => Err(StoreError::InvalidTimestamp(format!("run status '{other}'"))),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-resource result of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every unit of the resource completed.
    Success,
    /// Some units completed, some failed.
    Partial,
    /// No unit of the resource completed.
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Partial => "partial",
            OutcomeStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "success" => Ok(OutcomeStatus::Success),
            "partial" => Ok(OutcomeStatus::Partial),
            "failed" => Ok(OutcomeStatus::Failed),
            other => Err(StoreError::InvalidTimestamp(format!(
                "outcome status '{other}'"
            ))),
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: i64,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub mode: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub resource: String,
    pub status: OutcomeStatus,
    pub units: u64,
    pub failed_units: u64,
    pub fetched: u64,
    pub written: u64,
    pub skipped: u64,
    pub replaced: u64,
    pub last_date: Option<NaiveDate>,
    pub error: Option<String>,
}

/// What `status` reports for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStatus {
    pub resource: String,
    pub last_status: OutcomeStatus,
    pub last_attempt_at: Option<NaiveDateTime>,
    pub last_success_write_at: Option<NaiveDateTime>,
    pub last_date: Option<NaiveDate>,
    pub last_error: Option<String>,
}

impl Store {
    /// Create a run row with status `running` and return its id.
    pub fn begin_run(&self, mode: &str, started_at: NaiveDateTime) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO crawl_runs (started_at, mode, status) VALUES (?1, ?2, ?3)",
            params![fmt_ts(started_at), mode, RunStatus::Running.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Finalize a running run and record its per-resource outcomes, atomically.
    ///
    /// A run can be finalized exactly once.
    pub fn finish_run(
        &mut self,
        run_id: i64,
        finished_at: NaiveDateTime,
        status: RunStatus,
        outcomes: &[OutcomeRecord],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE crawl_runs SET finished_at = ?1, status = ?2
             WHERE run_id = ?3 AND status = 'running'",
            params![fmt_ts(finished_at), status.as_str(), run_id],
        )?;
        if updated == 0 {
            return Err(StoreError::RunNotRunning(run_id));
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO crawl_outcomes
                 (run_id, resource, status, units, failed_units, fetched, written,
                  skipped, replaced, last_date, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for o in outcomes {
                stmt.execute(params![
                    run_id,
                    o.resource,
                    o.status.as_str(),
                    o.units as i64,
                    o.failed_units as i64,
                    o.fetched as i64,
                    o.written as i64,
                    o.skipped as i64,
                    o.replaced as i64,
                    o.last_date.map(|d| d.format(DATE_FORMAT).to_string()),
                    o.error,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The most recent run that reached a final status.
    pub fn last_finished_run(&self) -> Result<Option<RunRecord>, StoreError> {
        let raw = optional(self.conn.query_row(
            "SELECT run_id, started_at, finished_at, mode, status FROM crawl_runs
             WHERE status != 'running' ORDER BY run_id DESC LIMIT 1",
            [],
            raw_run,
        ))?;
        raw.map(RawRun::into_record).transpose()
    }

    /// Most recent runs first, at most `limit`.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, started_at, finished_at, mode, status FROM crawl_runs
             ORDER BY run_id DESC LIMIT ?1",
        )?;
        let raws = stmt
            .query_map(params![limit as i64], raw_run)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRun::into_record).collect()
    }

    /// Outcome rows recorded for one run, in insertion order.
    pub fn run_outcomes(&self, run_id: i64) -> Result<Vec<OutcomeRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT resource, status, units, failed_units, fetched, written, skipped,
                    replaced, last_date, error
             FROM crawl_outcomes WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let raws = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    [
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                    ],
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter()
            .map(|(resource, status, counts, last_date, error)| {
                Ok(OutcomeRecord {
                    resource,
                    status: OutcomeStatus::parse(&status)?,
                    units: counts[0] as u64,
                    failed_units: counts[1] as u64,
                    fetched: counts[2] as u64,
                    written: counts[3] as u64,
                    skipped: counts[4] as u64,
                    replaced: counts[5] as u64,
                    last_date: last_date.as_deref().map(parse_date).transpose()?,
                    error,
                })
            })
            .collect()
    }

    /// Per-resource last attempt and last successful write, sorted by resource name.
    pub fn resource_status(&self) -> Result<Vec<ResourceStatus>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT o.resource, o.status, r.finished_at, o.last_date, o.error,
                    (SELECT MAX(r2.finished_at)
                     FROM crawl_outcomes o2 JOIN crawl_runs r2 ON r2.run_id = o2.run_id
                     WHERE o2.resource = o.resource AND o2.status != 'failed'
                       AND (o2.written > 0 OR o2.replaced > 0))
             FROM crawl_outcomes o JOIN crawl_runs r ON r.run_id = o.run_id
             WHERE o.run_id = (SELECT MAX(run_id) FROM crawl_outcomes
                               WHERE resource = o.resource)
             ORDER BY o.resource",
        )?;
        let raws = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter()
            .map(|(resource, status, attempted, last_date, error, success)| {
                Ok(ResourceStatus {
                    resource,
                    last_status: OutcomeStatus::parse(&status)?,
                    last_attempt_at: attempted.as_deref().map(parse_ts).transpose()?,
                    last_success_write_at: success.as_deref().map(parse_ts).transpose()?,
                    last_date: last_date.as_deref().map(parse_date).transpose()?,
                    last_error: error,
                })
            })
            .collect()
    }

    /// Date each entity's fundamentals were last refreshed.
    pub fn entity_refresh_dates(&self) -> Result<BTreeMap<String, NaiveDate>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT ticker, refreshed_on FROM entity_refresh")?;
        let raws = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter()
            .map(|(ticker, date)| Ok((ticker, parse_date(&date)?)))
            .collect()
    }
}

struct RawRun {
    run_id: i64,
    started_at: String,
    finished_at: Option<String>,
    mode: String,
    status: String,
}

impl RawRun {
    fn into_record(self) -> Result<RunRecord, StoreError> {
        Ok(RunRecord {
            run_id: self.run_id,
            started_at: parse_ts(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_ts).transpose()?,
            mode: self.mode,
            status: RunStatus::parse(&self.status)?,
        })
    }
}

fn raw_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRun> {
    Ok(RawRun {
        run_id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        mode: row.get(3)?,
        status: row.get(4)?,
    })
}

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_ts(s: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|_| StoreError::InvalidTimestamp(s.to_string()))
}
