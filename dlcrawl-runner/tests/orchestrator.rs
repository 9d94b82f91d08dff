//! Integration tests for the crawl orchestrator, driven by a scripted client.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{Days, NaiveDate};
use dlcrawl_core::planner::{CrawlMode, CrawlRequest, PagingConfig, PlanOptions};
use dlcrawl_core::schema::TableDef;
use dlcrawl_core::store::{OutcomeStatus, RunStatus};
use dlcrawl_core::{
    Category, FetchClient, FetchError, FetchTarget, FetchUnit, Fetched, Resource, RetryPolicy,
    Row, Store, TableBatch, UnitError,
};
use dlcrawl_runner::{FixedClock, Orchestrator, OrchestratorSettings, StatusReport};

// ── Helpers ──────────────────────────────────────────────────────────

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

const TODAY: &str = "2026-02-27";

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        retry: RetryPolicy::immediate(3),
        plan: PlanOptions {
            full_lookback_days: 3,
            paging: PagingConfig::default(),
        },
        request_delay: std::time::Duration::ZERO,
    }
}

/// A row carrying every key column: dates for the date column, `tag` elsewhere.
fn keyed_row(def: &TableDef, date: NaiveDate, tag: &str) -> Row {
    let mut row = Row::new();
    for key in def.key {
        if Some(*key) == def.date_column {
            row.set(key, date);
        } else {
            row.set(key, tag);
        }
    }
    if let Some(column) = def.date_column {
        row.set(column, date);
    }
    row
}

/// Fake remote. Time-series answers cover a window one day wider than a
/// `Date` target on each side, the way the real lookback API does.
#[derive(Default)]
struct ScriptedClient {
    calls: Mutex<Vec<FetchUnit>>,
    transient: HashSet<Resource>,
    permanent: HashSet<Resource>,
    empty_snapshots: HashSet<Resource>,
    tickers: Vec<&'static str>,
    news_pages: Vec<Vec<&'static str>>,
    value: f64,
}

impl ScriptedClient {
    fn new() -> Self {
        Self {
            tickers: vec!["FPT", "VCB"],
            news_pages: vec![vec!["n1", "n2"], vec!["n3"]],
            value: 1.0,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<FetchUnit> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, resource: Resource) -> Vec<FetchUnit> {
        self.calls()
            .into_iter()
            .filter(|u| u.resource == resource)
            .collect()
    }

    fn time_series(&self, unit: &FetchUnit) -> Fetched {
        let dates = match &unit.target {
            FetchTarget::Date(day) => FetchTarget::Range {
                from: *day - Days::new(1),
                to: *day + Days::new(1),
            }
            .dates(),
            other => other.dates(),
        };
        let batches = unit
            .resource
            .tables()
            .iter()
            .map(|&def| {
                let rows = dates
                    .iter()
                    .map(|date| {
                        let mut row = keyed_row(def, *date, "x");
                        if def.name == "vn_ta" {
                            row.set("vnindex", self.value);
                        }
                        row
                    })
                    .collect();
                TableBatch::new(def, rows)
            })
            .collect();
        Fetched::new(batches)
    }

    fn event(&self, unit: &FetchUnit) -> Fetched {
        let def = unit.resource.tables()[0];
        let FetchTarget::Page(page) = unit.target else {
            return Fetched::single(def, Vec::new());
        };
        if unit.resource != Resource::TickerNews {
            return Fetched::single(def, vec![keyed_row(def, d("2026-02-20"), "e")]);
        }
        let index = page as usize - 1;
        let rows = self
            .news_pages
            .get(index)
            .map(|hashes| {
                hashes
                    .iter()
                    .map(|h| {
                        Row::new()
                            .with("content_hash", *h)
                            .with("ticker", "FPT")
                            .with("date", "2026-02-26")
                    })
                    .collect()
            })
            .unwrap_or_default();
        Fetched::single(def, rows).with_more(index + 1 < self.news_pages.len())
    }

    fn snapshot(&self, unit: &FetchUnit) -> Fetched {
        let def = unit.resource.tables()[0];
        if self.empty_snapshots.contains(&unit.resource) {
            return Fetched::single(def, Vec::new());
        }
        let rows = match unit.resource {
            Resource::TickerSectorMap => self
                .tickers
                .iter()
                .map(|t| Row::new().with("ticker", *t).with("sector", "Tech"))
                .collect(),
            Resource::SectorOverview => vec![Row::new()
                .with("sector", "Tech")
                .with("ticker_count", self.tickers.len() as i64)],
            _ => vec![1i64, 7, 30]
                .into_iter()
                .map(|p| {
                    Row::new()
                        .with("ticker", "FPT")
                        .with("period_days", p)
                        .with("crawl_date", TODAY)
                })
                .collect(),
        };
        Fetched::single(def, rows)
    }

    fn fundamentals(&self, unit: &FetchUnit) -> Fetched {
        let FetchTarget::Entity(ticker) = &unit.target else {
            return Fetched::default();
        };
        let tables = unit.resource.tables();
        Fetched::new(vec![
            TableBatch::new(tables[0], vec![Row::new().with("ticker", ticker.as_str())]),
            TableBatch::new(
                tables[1],
                vec![Row::new()
                    .with("ticker", ticker.as_str())
                    .with("quarter", "2025Q4")
                    .with("revenue", 10.0)],
            ),
        ])
    }
}

impl FetchClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(&self, unit: &FetchUnit) -> Result<Fetched, FetchError> {
        self.calls.lock().unwrap().push(unit.clone());
        if self.transient.contains(&unit.resource) {
            return Err(FetchError::Transient("HTTP 503".into()));
        }
        if self.permanent.contains(&unit.resource) {
            return Err(FetchError::Permanent("HTTP 403".into()));
        }
        Ok(match unit.resource.category() {
            Category::TimeSeries => self.time_series(unit),
            Category::Event => self.event(unit),
            Category::Snapshot => self.snapshot(unit),
            Category::Fundamentals => self.fundamentals(unit),
        })
    }
}

fn run(
    store: &mut Store,
    client: &ScriptedClient,
    request: CrawlRequest,
) -> dlcrawl_runner::CrawlSummary {
    Orchestrator::new(store, client, settings())
        .with_clock(FixedClock::on(d(TODAY)))
        .run(&request)
        .unwrap()
}

// ── Runs ─────────────────────────────────────────────────────────────

#[test]
fn first_run_fills_every_category() {
    let mut store = Store::open_in_memory().unwrap();
    let client = ScriptedClient::new();
    let summary = run(&mut store, &client, CrawlRequest::incremental());

    assert_eq!(summary.status(), RunStatus::Success);
    assert_eq!(store.row_count("vn_ta").unwrap(), 3);
    assert_eq!(store.row_count("economics_treasury").unwrap(), 3);
    assert_eq!(store.row_count("ticker_news").unwrap(), 3);
    assert_eq!(store.row_count("ticker_sector_map").unwrap(), 2);
    assert_eq!(store.row_count("put_through").unwrap(), 3);
    assert_eq!(store.row_count("stock_info").unwrap(), 2);
    assert_eq!(store.row_count("quarterly_financials").unwrap(), 2);

    let vn_ta = summary.get(Resource::VnTa).unwrap();
    assert_eq!(vn_ta.written, 3);
    assert_eq!(vn_ta.last_date, Some(d(TODAY)));

    let run = store.last_finished_run().unwrap().unwrap();
    assert_eq!(run.run_id, summary.run_id);
    assert_eq!(run.mode, "incremental");
    assert_eq!(store.run_outcomes(run.run_id).unwrap().len(), Resource::ALL.len());
}

#[test]
fn same_day_rerun_fetches_no_time_series() {
    let mut store = Store::open_in_memory().unwrap();
    run(&mut store, &ScriptedClient::new(), CrawlRequest::incremental());

    let client = ScriptedClient::new();
    let summary = run(&mut store, &client, CrawlRequest::incremental());
    assert!(client
        .calls()
        .iter()
        .all(|u| u.resource.category() != Category::TimeSeries));
    assert_eq!(summary.up_to_date.len(), 5);
    assert_eq!(store.row_count("vn_ta").unwrap(), 3);
}

#[test]
fn failing_resource_does_not_block_others() {
    let mut store = Store::open_in_memory().unwrap();
    let client = ScriptedClient {
        transient: [Resource::PutThrough].into_iter().collect(),
        permanent: [Resource::MacroResearch].into_iter().collect(),
        ..ScriptedClient::new()
    };
    let summary = run(&mut store, &client, CrawlRequest::incremental());

    assert_eq!(summary.status(), RunStatus::PartialFailure);
    assert!(!summary.is_success());

    // Transient failures are retried up to the limit, permanent ones are not.
    assert_eq!(client.calls_for(Resource::PutThrough).len(), 3);
    assert_eq!(client.calls_for(Resource::MacroResearch).len(), 1);

    let put = summary.get(Resource::PutThrough).unwrap();
    assert_eq!(put.failed_units, 1);
    assert!(matches!(
        put.failures[0].error,
        UnitError::TransientFetch { attempts: 3, .. }
    ));
    assert!(matches!(
        summary.get(Resource::MacroResearch).unwrap().failures[0].error,
        UnitError::PermanentFetch { .. }
    ));

    assert_eq!(store.row_count("put_through").unwrap(), 0);
    assert_eq!(store.row_count("vn_ta").unwrap(), 3);
    assert_eq!(store.row_count("stock_info").unwrap(), 2);

    let status = StatusReport::collect(&store).unwrap();
    let by_name = |name: &str| {
        status
            .resources
            .iter()
            .find(|r| r.resource == name)
            .unwrap()
            .clone()
    };
    assert_eq!(by_name("put_through").last_status, OutcomeStatus::Failed);
    assert_eq!(by_name("put_through").last_success_write_at, None);
    assert_eq!(by_name("vn_ta").last_status, OutcomeStatus::Success);
    assert!(by_name("vn_ta").last_success_write_at.is_some());
    assert_eq!(
        status.last_run.as_ref().unwrap().status,
        RunStatus::PartialFailure
    );
}

#[test]
fn fundamentals_gate_across_same_day_runs() {
    let mut store = Store::open_in_memory().unwrap();
    let first = ScriptedClient::new();
    run(&mut store, &first, CrawlRequest::incremental());
    assert_eq!(first.calls_for(Resource::Fundamentals).len(), 2);

    let second = ScriptedClient::new();
    run(&mut store, &second, CrawlRequest::incremental());
    assert!(second.calls_for(Resource::Fundamentals).is_empty());

    let full = ScriptedClient::new();
    let request = CrawlRequest {
        mode: CrawlMode::Full,
        skip_fundamentals: false,
    };
    run(&mut store, &full, request);
    assert_eq!(full.calls_for(Resource::Fundamentals).len(), 2);

    let skipped = ScriptedClient::new();
    let request = CrawlRequest {
        mode: CrawlMode::Full,
        skip_fundamentals: true,
    };
    let summary = run(&mut store, &skipped, request);
    assert!(skipped.calls_for(Resource::Fundamentals).is_empty());
    assert!(summary.get(Resource::Fundamentals).is_none());
}

#[test]
fn explicit_date_only_touches_that_date() {
    let mut store = Store::open_in_memory().unwrap();
    run(&mut store, &ScriptedClient::new(), CrawlRequest::incremental());

    let client = ScriptedClient {
        value: 2.0,
        ..ScriptedClient::new()
    };
    let request = CrawlRequest {
        mode: CrawlMode::Date(d("2026-02-26")),
        skip_fundamentals: true,
    };
    let summary = run(&mut store, &client, request);
    assert_eq!(summary.get(Resource::VnTa).unwrap().written, 1);

    let rows = store
        .table_rows(&dlcrawl_core::schema::VN_TA, None)
        .unwrap();
    let values: Vec<(String, String)> = rows
        .iter()
        .map(|r| {
            (
                r.get("date").as_text().unwrap().to_string(),
                r.get("vnindex").to_csv_field(),
            )
        })
        .collect();
    assert_eq!(
        values,
        vec![
            ("2026-02-25".to_string(), "1".to_string()),
            ("2026-02-26".to_string(), "2".to_string()),
            ("2026-02-27".to_string(), "1".to_string()),
        ]
    );
}

#[test]
fn inverted_range_is_rejected_before_any_fetch() {
    let mut store = Store::open_in_memory().unwrap();
    let client = ScriptedClient::new();
    let request = CrawlRequest {
        mode: CrawlMode::Range {
            from: d("2026-02-27"),
            to: d("2026-02-20"),
        },
        skip_fundamentals: true,
    };
    let result = Orchestrator::new(&mut store, &client, settings())
        .with_clock(FixedClock::on(d(TODAY)))
        .run(&request);
    assert!(result.is_err());
    assert!(client.calls().is_empty());
    assert!(store.last_finished_run().unwrap().is_none());
}

#[test]
fn ambiguous_empty_snapshot_keeps_previous_rows() {
    let mut store = Store::open_in_memory().unwrap();
    run(&mut store, &ScriptedClient::new(), CrawlRequest::incremental());
    assert_eq!(store.row_count("sector_overview").unwrap(), 1);

    let client = ScriptedClient {
        empty_snapshots: [Resource::SectorOverview].into_iter().collect(),
        ..ScriptedClient::new()
    };
    let summary = run(&mut store, &client, CrawlRequest::incremental());

    let overview = summary.get(Resource::SectorOverview).unwrap();
    assert!(matches!(
        overview.failures[0].error,
        UnitError::AmbiguousEmptyReplace { .. }
    ));
    assert_eq!(store.row_count("sector_overview").unwrap(), 1);
    assert_eq!(summary.status(), RunStatus::PartialFailure);
}

#[test]
fn event_paging_stops_once_saturated() {
    let mut store = Store::open_in_memory().unwrap();
    let first = ScriptedClient::new();
    let summary = run(&mut store, &first, CrawlRequest::incremental());
    assert_eq!(first.calls_for(Resource::TickerNews).len(), 2);
    let news = summary.get(Resource::TickerNews).unwrap();
    assert_eq!((news.units, news.written, news.skipped), (2, 3, 0));

    // Page 1 is fully known now, so page 2 is never requested.
    let second = ScriptedClient::new();
    let summary = run(&mut store, &second, CrawlRequest::incremental());
    assert_eq!(second.calls_for(Resource::TickerNews).len(), 1);
    let news = summary.get(Resource::TickerNews).unwrap();
    assert_eq!((news.written, news.skipped), (0, 2));
    assert_eq!(store.row_count("ticker_news").unwrap(), 3);
}
