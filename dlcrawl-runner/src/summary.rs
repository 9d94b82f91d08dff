//! Aggregated results of one crawl run.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use dlcrawl_core::store::{OutcomeRecord, OutcomeStatus, RunStatus};
use dlcrawl_core::{FetchUnit, MergeOutcome, Resource, UnitError};

/// A unit that ended in `FetchFailed` or `MergeFailed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: String,
    pub error: UnitError,
}

/// Per-resource totals over every unit the run processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSummary {
    pub units: u64,
    pub failed_units: u64,
    /// Rows returned by the remote, before merge.
    pub fetched: u64,
    pub written: u64,
    pub skipped: u64,
    pub replaced: u64,
    pub last_date: Option<NaiveDate>,
    pub failures: Vec<UnitFailure>,
}

impl ResourceSummary {
    pub fn record_success(&mut self, fetched: usize, outcome: MergeOutcome) {
        self.units += 1;
        self.fetched += fetched as u64;
        self.written += outcome.written;
        self.skipped += outcome.skipped;
        self.replaced += outcome.replaced;
        self.last_date = self.last_date.max(outcome.last_date);
    }

    pub fn record_failure(&mut self, unit: &FetchUnit, fetched: usize, error: UnitError) {
        self.units += 1;
        self.failed_units += 1;
        self.fetched += fetched as u64;
        self.failures.push(UnitFailure {
            unit: unit.to_string(),
            error,
        });
    }

    pub fn status(&self) -> OutcomeStatus {
        match self.failed_units {
            0 => OutcomeStatus::Success,
            n if n == self.units => OutcomeStatus::Failed,
            _ => OutcomeStatus::Partial,
        }
    }
}

/// Result of `Orchestrator::run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub run_id: i64,
    pub mode: String,
    /// Time-series resources that needed no fetch.
    pub up_to_date: Vec<Resource>,
    pub resources: BTreeMap<Resource, ResourceSummary>,
}

impl CrawlSummary {
    pub fn new(run_id: i64, mode: String) -> Self {
        Self {
            run_id,
            mode,
            up_to_date: Vec::new(),
            resources: BTreeMap::new(),
        }
    }

    pub fn entry(&mut self, resource: Resource) -> &mut ResourceSummary {
        self.resources.entry(resource).or_default()
    }

    pub fn get(&self, resource: Resource) -> Option<&ResourceSummary> {
        self.resources.get(&resource)
    }

    pub fn status(&self) -> RunStatus {
        if self.failed_units() == 0 {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Success
    }

    pub fn failed_units(&self) -> u64 {
        self.resources.values().map(|r| r.failed_units).sum()
    }

    pub fn total_units(&self) -> u64 {
        self.resources.values().map(|r| r.units).sum()
    }

    pub fn total_written(&self) -> u64 {
        self.resources.values().map(|r| r.written + r.replaced).sum()
    }

    /// Rows for the crawl-outcome table; the first failure's message is kept.
    pub fn outcome_records(&self) -> Vec<OutcomeRecord> {
        self.resources
            .iter()
            .map(|(resource, s)| OutcomeRecord {
                resource: resource.name().to_string(),
                status: s.status(),
                units: s.units,
                failed_units: s.failed_units,
                fetched: s.fetched,
                written: s.written,
                skipped: s.skipped,
                replaced: s.replaced,
                last_date: s.last_date,
                error: s
                    .failures
                    .first()
                    .map(|f| format!("{} [{}]: {}", f.unit, f.error.kind(), f.error)),
            })
            .collect()
    }

    /// Human-readable table printed by `crawl`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "  Run #{} ({}): {}\n\n",
            self.run_id,
            self.mode,
            self.status()
        ));
        out.push_str(&format!(
            "  {:<22} {:<12} {:>6} {:>8} {:>8} {:>8} {:>8}  {:<10}\n",
            "Resource", "Category", "Units", "Fetched", "Written", "Skipped", "Replaced", "Last date"
        ));
        out.push_str(&format!(
            "  {} {} {} {} {} {} {}  {}\n",
            "─".repeat(22),
            "─".repeat(12),
            "─".repeat(6),
            "─".repeat(8),
            "─".repeat(8),
            "─".repeat(8),
            "─".repeat(8),
            "─".repeat(10)
        ));
        for (resource, s) in &self.resources {
            let units = if s.failed_units > 0 {
                format!("{}/{}!", s.units - s.failed_units, s.units)
            } else {
                s.units.to_string()
            };
            out.push_str(&format!(
                "  {:<22} {:<12} {:>6} {:>8} {:>8} {:>8} {:>8}  {:<10}\n",
                resource.name(),
                resource.category().as_str(),
                units,
                s.fetched,
                s.written,
                s.skipped,
                s.replaced,
                s.last_date.map_or_else(|| "-".to_string(), |d| d.to_string()),
            ));
        }
        if !self.up_to_date.is_empty() {
            let names: Vec<&str> = self.up_to_date.iter().map(|r| r.name()).collect();
            out.push_str(&format!("\n  Up to date: {}\n", names.join(", ")));
        }
        let failures: Vec<&UnitFailure> =
            self.resources.values().flat_map(|s| s.failures.iter()).collect();
        if !failures.is_empty() {
            out.push_str("\n  Failures:\n");
            for f in failures {
                out.push_str(&format!("    {} [{}] {}\n", f.unit, f.error.kind(), f.error));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlcrawl_core::FetchTarget;

    fn outcome(written: u64, last: Option<&str>) -> MergeOutcome {
        MergeOutcome {
            written,
            skipped: 1,
            replaced: 0,
            last_date: last.map(|s| s.parse().unwrap()),
        }
    }

    #[test]
    fn resource_status_follows_failed_units() {
        let unit = FetchUnit::new(Resource::VnTa, FetchTarget::Latest);
        let mut s = ResourceSummary::default();
        assert_eq!(s.status(), OutcomeStatus::Success);
        s.record_success(3, outcome(3, Some("2026-02-25")));
        s.record_failure(&unit, 0, UnitError::PermanentFetch { message: "403".into() });
        assert_eq!(s.status(), OutcomeStatus::Partial);

        let mut all_failed = ResourceSummary::default();
        all_failed.record_failure(&unit, 0, UnitError::Store("locked".into()));
        assert_eq!(all_failed.status(), OutcomeStatus::Failed);
    }

    #[test]
    fn success_totals_and_last_date() {
        let mut s = ResourceSummary::default();
        s.record_success(2, outcome(2, Some("2026-02-26")));
        s.record_success(4, outcome(1, Some("2026-02-25")));
        assert_eq!(s.units, 2);
        assert_eq!(s.fetched, 6);
        assert_eq!(s.written, 3);
        assert_eq!(s.skipped, 2);
        assert_eq!(s.last_date, Some("2026-02-26".parse().unwrap()));
    }

    #[test]
    fn run_status_is_partial_on_any_failure() {
        let mut summary = CrawlSummary::new(1, "incremental".into());
        summary.entry(Resource::VnTa).record_success(1, outcome(1, None));
        assert_eq!(summary.status(), RunStatus::Success);

        let unit = FetchUnit::new(Resource::PutThrough, FetchTarget::Latest);
        summary.entry(Resource::PutThrough).record_failure(
            &unit,
            0,
            UnitError::TransientFetch {
                attempts: 3,
                message: "HTTP 503".into(),
            },
        );
        assert_eq!(summary.status(), RunStatus::PartialFailure);

        let records = summary.outcome_records();
        let put = records.iter().find(|r| r.resource == "put_through").unwrap();
        assert_eq!(put.status, OutcomeStatus::Failed);
        assert!(put.error.as_deref().unwrap().contains("transient_fetch"));
        assert!(summary.render().contains("Failures:"));
    }
}
