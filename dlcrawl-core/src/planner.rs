//! Sync planner.
//!
//! A pure function of the crawl request and an explicit snapshot of store
//! state. It never reads the store itself: [`SyncState::load`] takes the
//! snapshot once, and planning is deterministic given that snapshot.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Category, FetchTarget, FetchUnit, Resource, DATE_FORMAT};
use crate::store::{RunRecord, Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// Fetch only what is missing since the last stored date.
    Incremental,
    /// Fetch the full lookback window and every fundamentals entity.
    Full,
    /// Fetch exactly one date for time-series resources.
    Date(NaiveDate),
    /// Fetch every date of an inclusive range for time-series resources.
    Range { from: NaiveDate, to: NaiveDate },
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlMode::Incremental => f.write_str("incremental"),
            CrawlMode::Full => f.write_str("full"),
            CrawlMode::Date(d) => write!(f, "date {}", d.format(DATE_FORMAT)),
            CrawlMode::Range { from, to } => write!(
                f,
                "range {}..{}",
                from.format(DATE_FORMAT),
                to.format(DATE_FORMAT)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlRequest {
    pub mode: CrawlMode,
    pub skip_fundamentals: bool,
}

impl CrawlRequest {
    pub fn incremental() -> Self {
        Self {
            mode: CrawlMode::Incremental,
            skip_fundamentals: false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.mode == CrawlMode::Full
    }
}

/// Store state the planner needs, captured once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub today: NaiveDate,
    /// Latest stored date per time-series resource (max across its tables).
    pub last_dates: BTreeMap<Resource, NaiveDate>,
    /// Date each fundamentals entity was last refreshed.
    pub refreshed: BTreeMap<String, NaiveDate>,
    pub last_run: Option<RunRecord>,
}

impl SyncState {
    pub fn empty(today: NaiveDate) -> Self {
        Self {
            today,
            last_dates: BTreeMap::new(),
            refreshed: BTreeMap::new(),
            last_run: None,
        }
    }

    pub fn load(store: &Store, today: NaiveDate) -> Result<Self, StoreError> {
        let mut last_dates = BTreeMap::new();
        for resource in Resource::of_category(Category::TimeSeries) {
            let mut latest: Option<NaiveDate> = None;
            for def in resource.tables() {
                latest = latest.max(store.last_stored_date(def)?);
            }
            if let Some(date) = latest {
                last_dates.insert(resource, date);
            }
        }
        Ok(Self {
            today,
            last_dates,
            refreshed: store.entity_refresh_dates()?,
            last_run: store.last_finished_run()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PagingConfig {
    pub max_pages: u32,
    /// Stop paging once a page merges without writing any new record.
    pub stop_on_saturation: bool,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            max_pages: 5,
            stop_on_saturation: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    pub full_lookback_days: u32,
    pub paging: PagingConfig,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            full_lookback_days: 365,
            paging: PagingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("invalid range: {from} is after {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },

    #[error("lookback of {0} days does not fit the calendar")]
    InvalidLookback(u32),
}

/// Ordered fetch units for one run, excluding fundamentals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub units: Vec<FetchUnit>,
    /// Time-series resources with nothing missing.
    pub up_to_date: Vec<Resource>,
}

/// Plan time-series, event and snapshot units.
///
/// Units come out in crawl order: time-series, then events, then snapshots.
pub fn plan(
    request: &CrawlRequest,
    state: &SyncState,
    options: &PlanOptions,
) -> Result<Plan, PlanError> {
    let today = state.today;
    let full_window = || -> Result<FetchTarget, PlanError> {
        let back = options.full_lookback_days.saturating_sub(1);
        let from = today
            .checked_sub_days(Days::new(u64::from(back)))
            .ok_or(PlanError::InvalidLookback(options.full_lookback_days))?;
        Ok(FetchTarget::Range { from, to: today })
    };

    if let CrawlMode::Range { from, to } = request.mode {
        if from > to {
            return Err(PlanError::InvalidRange { from, to });
        }
    }

    let mut out = Plan::default();
    for resource in Resource::of_category(Category::TimeSeries) {
        match request.mode {
            CrawlMode::Full => out.units.push(FetchUnit::new(resource, full_window()?)),
            CrawlMode::Date(d) => out.units.push(FetchUnit::new(resource, FetchTarget::Date(d))),
            CrawlMode::Range { from, to } => {
                let span = FetchTarget::Range { from, to };
                out.units.extend(
                    span.dates()
                        .into_iter()
                        .map(|d| FetchUnit::new(resource, FetchTarget::Date(d))),
                );
            }
            CrawlMode::Incremental => match state.last_dates.get(&resource) {
                None => out.units.push(FetchUnit::new(resource, full_window()?)),
                Some(last) => match last.checked_add_days(Days::new(1)) {
                    Some(start) if start <= today => out.units.push(FetchUnit::new(
                        resource,
                        FetchTarget::Range { from: start, to: today },
                    )),
                    _ => out.up_to_date.push(resource),
                },
            },
        }
    }

    for resource in Resource::of_category(Category::Event) {
        out.units.push(FetchUnit::new(resource, FetchTarget::Page(1)));
    }
    for resource in Resource::of_category(Category::Snapshot) {
        out.units.push(FetchUnit::new(resource, FetchTarget::Latest));
    }
    Ok(out)
}

/// Plan one fundamentals unit per entity, applying the daily freshness gate.
///
/// Entities already refreshed today are skipped unless the request is full.
pub fn plan_fundamentals(
    request: &CrawlRequest,
    state: &SyncState,
    entities: &[String],
) -> Vec<FetchUnit> {
    if request.skip_fundamentals {
        return Vec::new();
    }
    entities
        .iter()
        .filter(|e| request.is_full() || state.refreshed.get(*e) != Some(&state.today))
        .map(|e| FetchUnit::new(Resource::Fundamentals, FetchTarget::Entity(e.clone())))
        .collect()
}

/// What the orchestrator learned from fetching and merging one event page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageReport {
    pub has_more: bool,
    pub written: u64,
    pub skipped: u64,
}

/// The unit for the following page, if paging should continue.
pub fn next_page(unit: &FetchUnit, report: &PageReport, paging: &PagingConfig) -> Option<FetchUnit> {
    let FetchTarget::Page(page) = unit.target else {
        return None;
    };
    if !report.has_more || page >= paging.max_pages {
        return None;
    }
    if paging.stop_on_saturation && report.written == 0 {
        return None;
    }
    Some(FetchUnit::new(unit.resource, FetchTarget::Page(page + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn state(today: &str, last: &[(Resource, &str)]) -> SyncState {
        let mut s = SyncState::empty(d(today));
        for (r, date) in last {
            s.last_dates.insert(*r, d(date));
        }
        s
    }

    fn time_series_units(plan: &Plan) -> Vec<&FetchUnit> {
        plan.units
            .iter()
            .filter(|u| u.resource.category() == Category::TimeSeries)
            .collect()
    }

    fn all_current(date: &str) -> Vec<(Resource, &str)> {
        Resource::of_category(Category::TimeSeries)
            .map(|r| (r, date))
            .collect()
    }

    #[test]
    fn incremental_fetches_exactly_the_missing_dates() {
        let st = state("2026-02-27", &[(Resource::VnTa, "2026-02-24")]);
        let plan = plan(&CrawlRequest::incremental(), &st, &PlanOptions::default()).unwrap();
        let vn_ta = plan
            .units
            .iter()
            .find(|u| u.resource == Resource::VnTa)
            .unwrap();
        assert_eq!(
            vn_ta.target.dates(),
            vec![d("2026-02-25"), d("2026-02-26"), d("2026-02-27")]
        );
    }

    #[test]
    fn incremental_is_a_no_op_when_current() {
        let st = state("2026-02-27", &all_current("2026-02-27"));
        let plan = plan(&CrawlRequest::incremental(), &st, &PlanOptions::default()).unwrap();
        assert!(time_series_units(&plan).is_empty());
        assert_eq!(plan.up_to_date.len(), 5);
    }

    #[test]
    fn empty_store_degrades_to_full_lookback() {
        let st = SyncState::empty(d("2026-02-27"));
        let plan = plan(&CrawlRequest::incremental(), &st, &PlanOptions::default()).unwrap();
        let ts = time_series_units(&plan);
        assert_eq!(ts.len(), 5);
        for unit in ts {
            assert_eq!(
                unit.target,
                FetchTarget::Range {
                    from: d("2025-02-28"),
                    to: d("2026-02-27")
                }
            );
        }
    }

    #[test]
    fn full_mode_ignores_stored_dates() {
        let st = state("2026-02-27", &all_current("2026-02-27"));
        let request = CrawlRequest {
            mode: CrawlMode::Full,
            skip_fundamentals: false,
        };
        let options = PlanOptions {
            full_lookback_days: 30,
            ..PlanOptions::default()
        };
        let plan = plan(&request, &st, &options).unwrap();
        assert!(time_series_units(&plan)
            .iter()
            .all(|u| u.target.dates().len() == 30));
    }

    #[test]
    fn date_mode_plans_one_unit_per_time_series_resource() {
        let st = state("2026-02-27", &[]);
        let request = CrawlRequest {
            mode: CrawlMode::Date(d("2026-02-20")),
            skip_fundamentals: true,
        };
        let plan = plan(&request, &st, &PlanOptions::default()).unwrap();
        let ts = time_series_units(&plan);
        assert_eq!(ts.len(), 5);
        assert!(ts.iter().all(|u| u.target == FetchTarget::Date(d("2026-02-20"))));
    }

    #[test]
    fn range_mode_plans_one_unit_per_date() {
        let st = state("2026-02-27", &[]);
        let request = CrawlRequest {
            mode: CrawlMode::Range {
                from: d("2026-02-20"),
                to: d("2026-02-22"),
            },
            skip_fundamentals: false,
        };
        let plan = plan(&request, &st, &PlanOptions::default()).unwrap();
        assert_eq!(time_series_units(&plan).len(), 15);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let st = state("2026-02-27", &[]);
        let request = CrawlRequest {
            mode: CrawlMode::Range {
                from: d("2026-02-22"),
                to: d("2026-02-20"),
            },
            skip_fundamentals: false,
        };
        assert!(matches!(
            plan(&request, &st, &PlanOptions::default()),
            Err(PlanError::InvalidRange { .. })
        ));
    }

    #[test]
    fn events_and_snapshots_follow_time_series() {
        let st = state("2026-02-27", &[]);
        let plan = plan(&CrawlRequest::incremental(), &st, &PlanOptions::default()).unwrap();
        let categories: Vec<Category> = plan.units.iter().map(|u| u.resource.category()).collect();
        let mut sorted = categories.clone();
        sorted.sort();
        assert_eq!(categories, sorted);
        assert!(plan
            .units
            .iter()
            .any(|u| u.resource == Resource::TickerNews && u.target == FetchTarget::Page(1)));
        assert!(plan
            .units
            .iter()
            .any(|u| u.resource == Resource::PutThrough && u.target == FetchTarget::Latest));
    }

    #[test]
    fn fundamentals_gate_skips_entities_refreshed_today() {
        let mut st = state("2026-02-27", &[]);
        st.refreshed.insert("FPT".into(), d("2026-02-27"));
        st.refreshed.insert("VNM".into(), d("2026-02-26"));
        let entities = vec!["FPT".to_string(), "HPG".to_string(), "VNM".to_string()];

        let units = plan_fundamentals(&CrawlRequest::incremental(), &st, &entities);
        let names: Vec<String> = units.iter().map(|u| u.target.to_string()).collect();
        assert_eq!(names, vec!["HPG", "VNM"]);

        let full = CrawlRequest {
            mode: CrawlMode::Full,
            skip_fundamentals: false,
        };
        assert_eq!(plan_fundamentals(&full, &st, &entities).len(), 3);

        let skip = CrawlRequest {
            mode: CrawlMode::Full,
            skip_fundamentals: true,
        };
        assert!(plan_fundamentals(&skip, &st, &entities).is_empty());
    }

    #[test]
    fn paging_stops_on_last_page_limit_or_saturation() {
        let unit = FetchUnit::new(Resource::TickerNews, FetchTarget::Page(1));
        let paging = PagingConfig::default();
        let fresh = PageReport {
            has_more: true,
            written: 10,
            skipped: 0,
        };
        assert_eq!(
            next_page(&unit, &fresh, &paging).map(|u| u.target),
            Some(FetchTarget::Page(2))
        );

        let last = PageReport {
            has_more: false,
            ..fresh
        };
        assert!(next_page(&unit, &last, &paging).is_none());

        let saturated = PageReport {
            has_more: true,
            written: 0,
            skipped: 10,
        };
        assert!(next_page(&unit, &saturated, &paging).is_none());
        let keep_going = PagingConfig {
            stop_on_saturation: false,
            ..paging
        };
        assert!(next_page(&unit, &saturated, &keep_going).is_some());

        let at_limit = FetchUnit::new(Resource::TickerNews, FetchTarget::Page(5));
        assert!(next_page(&at_limit, &fresh, &paging).is_none());
    }
}
