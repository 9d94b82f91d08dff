//! Fetch client trait and the types crossing the fetch/merge boundary.
//!
//! The `FetchClient` trait abstracts over the remote API so the orchestrator
//! can be driven by the real HTTP client or by a scripted client in tests.

pub mod circuit_breaker;
pub mod http;
pub mod parse;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, EndpointBreakers};
pub use http::{DlEquityClient, RemoteSettings};
pub use retry::{fetch_with_retry, Backoff, FetchOutcome, RetryPolicy};

use thiserror::Error;

use crate::domain::{FetchUnit, Row};
use crate::schema::TableDef;

/// Rows fetched for one table.
#[derive(Debug, Clone)]
pub struct TableBatch {
    pub table: &'static TableDef,
    pub rows: Vec<Row>,
}

impl TableBatch {
    pub fn new(table: &'static TableDef, rows: Vec<Row>) -> Self {
        Self { table, rows }
    }
}

/// Whether an empty result is the remote's genuine answer.
///
/// Snapshot replacement only proceeds on zero rows when the remote has
/// explicitly confirmed that the set is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptySignal {
    #[default]
    Ambiguous,
    Confirmed,
}

/// Result of one successful fetch.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    pub batches: Vec<TableBatch>,
    /// Event feeds: the remote has further pages.
    pub has_more: bool,
    pub empty: EmptySignal,
}

impl Fetched {
    pub fn new(batches: Vec<TableBatch>) -> Self {
        Self {
            batches,
            ..Self::default()
        }
    }

    pub fn single(table: &'static TableDef, rows: Vec<Row>) -> Self {
        Self::new(vec![TableBatch::new(table, rows)])
    }

    pub fn with_more(mut self, has_more: bool) -> Self {
        self.has_more = has_more;
        self
    }

    pub fn confirmed_empty(mut self) -> Self {
        self.empty = EmptySignal::Confirmed;
        self
    }

    pub fn row_count(&self) -> usize {
        self.batches.iter().map(|b| b.rows.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Worth retrying: rate limiting, server errors, timeouts, lost session.
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying cannot help: auth refused, bad request, malformed payload.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Transient(_) => FetchErrorKind::Transient,
            FetchError::Permanent(_) => FetchErrorKind::Permanent,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            FetchError::Transient(m) | FetchError::Permanent(m) => m,
        }
    }
}

/// A source of remote data, one fetch unit at a time.
pub trait FetchClient: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self, unit: &FetchUnit) -> Result<Fetched, FetchError>;
}
