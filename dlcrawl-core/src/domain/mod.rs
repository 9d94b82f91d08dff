//! Domain types shared by the planner, the fetch client and the merge engine.

pub mod resource;
pub mod row;
pub mod unit;
pub mod value;

pub use resource::{Category, MergePolicy, Resource};
pub use row::Row;
pub use unit::{FetchTarget, FetchUnit};
pub use value::{Key, KeyPart, Value};

/// Date format used for every `date`-like TEXT column in the store.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Timestamp format used by the crawl-run metadata tables.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
