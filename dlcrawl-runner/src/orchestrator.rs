//! Crawl orchestrator: drives one run from plan to persisted metadata.
//!
//! Units are processed sequentially. Each unit moves through
//! `Planned → Fetching → Merging → Done`, or stops at `FetchFailed` /
//! `MergeFailed`; a failed unit is recorded against its resource and the run
//! continues. Fundamentals are planned in a second phase, after the snapshot
//! units have refreshed the entity list.

use std::fmt;
use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime};
use dlcrawl_core::planner::{next_page, plan, plan_fundamentals, PageReport, SyncState};
use dlcrawl_core::store::StoreError;
use dlcrawl_core::{
    apply_unit, fetch_with_retry, Category, CrawlRequest, FetchClient, FetchUnit, MergeContext,
    MergeOutcome, PlanError, PlanOptions, RetryPolicy, Store, UnitError,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CrawlConfig;
use crate::summary::CrawlSummary;

/// Errors that abort a run. Unit-level failures never surface here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// Closing the run failed after the crawl itself had already aborted.
    #[error("store: {finish} (crawl had already failed: {crawl})")]
    FinishAfterFailure {
        finish: StoreError,
        crawl: StoreError,
    },
}

/// Source of "now" for planning and run timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    /// Noon on `date`.
    pub fn on(date: NaiveDate) -> Self {
        Self(date.and_hms_opt(12, 0, 0).unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub retry: RetryPolicy,
    pub plan: PlanOptions,
    /// Pause between consecutive fundamentals requests.
    pub request_delay: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            plan: config.plan_options(),
            request_delay: config.request_delay(),
        }
    }
}

/// Lifecycle of a single fetch unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Planned,
    Fetching,
    Merging,
    Done,
    FetchFailed,
    MergeFailed,
}

impl UnitState {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Planned => "planned",
            UnitState::Fetching => "fetching",
            UnitState::Merging => "merging",
            UnitState::Done => "done",
            UnitState::FetchFailed => "fetch_failed",
            UnitState::MergeFailed => "merge_failed",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What processing one unit produced.
struct UnitReport {
    fetched_rows: usize,
    has_more: bool,
    result: Result<MergeOutcome, UnitError>,
}

pub struct Orchestrator<'a> {
    store: &'a mut Store,
    client: &'a dyn FetchClient,
    settings: OrchestratorSettings,
    clock: Box<dyn Clock>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a mut Store, client: &'a dyn FetchClient, settings: OrchestratorSettings) -> Self {
        Self {
            store,
            client,
            settings,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Run one crawl. Returns the summary even when units failed; only
    /// planning errors and failures of the run bookkeeping itself are `Err`.
    pub fn run(&mut self, request: &CrawlRequest) -> Result<CrawlSummary, RunError> {
        let today = self.clock.today();
        let state = SyncState::load(self.store, today)?;
        let planned = plan(request, &state, &self.settings.plan)?;

        let mode = request.mode.to_string();
        let run_id = self.store.begin_run(&mode, self.clock.now())?;
        info!(
            run_id,
            mode = %mode,
            client = self.client.name(),
            units = planned.units.len(),
            up_to_date = planned.up_to_date.len(),
            "crawl started"
        );

        let mut summary = CrawlSummary::new(run_id, mode);
        summary.up_to_date = planned.up_to_date.clone();
        let ctx = MergeContext {
            today,
            run_id: Some(run_id),
        };

        let body = self.crawl(request, &state, planned.units, &ctx, &mut summary);

        let records = summary.outcome_records();
        let finished = self
            .store
            .finish_run(run_id, self.clock.now(), summary.status(), &records);
        settle(run_id, body, finished)?;

        info!(
            run_id,
            status = %summary.status(),
            units = summary.total_units(),
            failed = summary.failed_units(),
            written = summary.total_written(),
            "crawl finished"
        );
        Ok(summary)
    }

    fn crawl(
        &mut self,
        request: &CrawlRequest,
        state: &SyncState,
        units: Vec<FetchUnit>,
        ctx: &MergeContext,
        summary: &mut CrawlSummary,
    ) -> Result<(), StoreError> {
        for unit in units {
            if unit.resource.category() == Category::Event {
                self.run_pages(unit, ctx, summary);
            } else {
                self.run_single(&unit, ctx, summary);
            }
        }

        let entities = self.store.entities()?;
        let fundamentals = plan_fundamentals(request, state, &entities);
        if !request.skip_fundamentals {
            info!(
                entities = entities.len(),
                planned = fundamentals.len(),
                "fundamentals phase"
            );
        }
        for (i, unit) in fundamentals.iter().enumerate() {
            if i > 0 && !self.settings.request_delay.is_zero() {
                thread::sleep(self.settings.request_delay);
            }
            self.run_single(unit, ctx, summary);
        }
        Ok(())
    }

    fn run_single(&mut self, unit: &FetchUnit, ctx: &MergeContext, summary: &mut CrawlSummary) {
        let report = self.process(unit, ctx);
        let entry = summary.entry(unit.resource);
        match report.result {
            Ok(outcome) => entry.record_success(report.fetched_rows, outcome),
            Err(error) => entry.record_failure(unit, report.fetched_rows, error),
        }
    }

    /// Fetch event pages until the feed is exhausted, saturated, or capped.
    fn run_pages(&mut self, first: FetchUnit, ctx: &MergeContext, summary: &mut CrawlSummary) {
        let mut current = Some(first);
        while let Some(unit) = current.take() {
            let report = self.process(&unit, ctx);
            let entry = summary.entry(unit.resource);
            match report.result {
                Ok(outcome) => {
                    entry.record_success(report.fetched_rows, outcome);
                    let page = PageReport {
                        has_more: report.has_more,
                        written: outcome.written,
                        skipped: outcome.skipped,
                    };
                    current = next_page(&unit, &page, &self.settings.plan.paging);
                    if current.is_none() && report.has_more {
                        debug!(unit = %unit, written = outcome.written, "paging stopped");
                    }
                }
                Err(error) => entry.record_failure(&unit, report.fetched_rows, error),
            }
        }
    }

    fn process(&mut self, unit: &FetchUnit, ctx: &MergeContext) -> UnitReport {
        transition(unit, UnitState::Planned);
        transition(unit, UnitState::Fetching);
        let outcome = fetch_with_retry(self.client, unit, &self.settings.retry);
        let attempts = outcome.attempts();
        let fetched = match outcome.into_result() {
            Ok(fetched) => fetched,
            Err(error) => {
                transition(unit, UnitState::FetchFailed);
                warn!(unit = %unit, attempts, kind = error.kind(), error = %error, "fetch failed");
                return UnitReport {
                    fetched_rows: 0,
                    has_more: false,
                    result: Err(error),
                };
            }
        };

        let fetched_rows = fetched.row_count();
        let has_more = fetched.has_more;
        transition(unit, UnitState::Merging);
        let result = match apply_unit(self.store, unit, fetched, ctx) {
            Ok(merged) => {
                transition(unit, UnitState::Done);
                info!(
                    unit = %unit,
                    fetched = fetched_rows,
                    written = merged.written,
                    skipped = merged.skipped,
                    replaced = merged.replaced,
                    "unit done"
                );
                Ok(merged)
            }
            Err(err) => {
                transition(unit, UnitState::MergeFailed);
                let error = UnitError::from(err);
                warn!(unit = %unit, kind = error.kind(), error = %error, "merge failed");
                Err(error)
            }
        };
        UnitReport {
            fetched_rows,
            has_more,
            result,
        }
    }
}

/// Combine the crawl body's result with closing the run; neither error is dropped.
fn settle(
    run_id: i64,
    body: Result<(), StoreError>,
    finished: Result<(), StoreError>,
) -> Result<(), RunError> {
    match (body, finished) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(crawl), Ok(())) => Err(RunError::Store(crawl)),
        (Ok(()), Err(finish)) => Err(RunError::Store(finish)),
        (Err(crawl), Err(finish)) => {
            error!(run_id, error = %crawl, "crawl aborted");
            error!(run_id, error = %finish, "could not close crawl run");
            Err(RunError::FinishAfterFailure { finish, crawl })
        }
    }
}

fn transition(unit: &FetchUnit, state: UnitState) {
    debug!(resource = unit.resource.name(), unit = %unit, state = %state, "unit state");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_its_date() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 27).unwrap();
        let clock = FixedClock::on(date);
        assert_eq!(clock.today(), date);
        assert_eq!(clock.now().date(), date);
    }

    #[test]
    fn settings_follow_config() {
        let mut config = CrawlConfig::default();
        config.remote.request_delay_ms = 250;
        config.crawl.full_lookback_days = 30;
        config.paging.max_pages = 2;
        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.request_delay, Duration::from_millis(250));
        assert_eq!(settings.plan.full_lookback_days, 30);
        assert_eq!(settings.plan.paging.max_pages, 2);
        assert_eq!(settings.retry, config.retry);
    }

    #[test]
    fn finish_failure_keeps_the_crawl_error() {
        let err = settle(
            7,
            Err(StoreError::UnknownTable("vn_ta_old".into())),
            Err(StoreError::RunNotRunning(7)),
        )
        .unwrap_err();
        match &err {
            RunError::FinishAfterFailure { finish, crawl } => {
                assert!(matches!(finish, StoreError::RunNotRunning(7)));
                assert!(matches!(crawl, StoreError::UnknownTable(_)));
            }
            other => panic!("expected FinishAfterFailure, got {other:?}"),
        }
        assert!(err.to_string().contains("vn_ta_old"));

        assert!(matches!(
            settle(7, Err(StoreError::RunNotRunning(7)), Ok(())),
            Err(RunError::Store(StoreError::RunNotRunning(7)))
        ));
        assert!(settle(7, Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn unit_state_names() {
        assert_eq!(UnitState::FetchFailed.to_string(), "fetch_failed");
        assert_eq!(UnitState::Done.as_str(), "done");
    }
}
