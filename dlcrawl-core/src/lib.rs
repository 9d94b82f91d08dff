//! dlcrawl core: the incremental synchronization engine.
//!
//! This crate contains everything needed to keep the local store in step
//! with the DL Equity API:
//! - Domain types (resources, categories, cell values, rows, fetch units)
//! - Static table schema and the SQLite-backed store
//! - Merge engine with three tagged policies (append, dedupe-insert, replace-all)
//! - Sync planner that turns a crawl request plus store state into fetch units
//! - Fetch client trait, bounded-retry wrapper, and the HTTP client

pub mod domain;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod planner;
pub mod schema;
pub mod store;

pub use domain::{
    Category, FetchTarget, FetchUnit, Key, KeyPart, MergePolicy, Resource, Row, Value,
};
pub use error::UnitError;
pub use fetch::{
    fetch_with_retry, EmptySignal, FetchClient, FetchError, FetchErrorKind, FetchOutcome, Fetched,
    RetryPolicy, TableBatch,
};
pub use merge::{apply_unit, plan_merge, MergeContext, MergeError, MergeOutcome, MergePlan};
pub use planner::{
    next_page, plan, plan_fundamentals, CrawlMode, CrawlRequest, PageReport, PagingConfig, Plan,
    PlanError, PlanOptions, SyncState,
};
pub use schema::TableDef;
pub use store::{Store, StoreError};
