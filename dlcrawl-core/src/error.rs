//! The tagged failure recorded against a fetch unit.
//!
//! Unit failures never propagate past the run boundary: the orchestrator
//! converts every fetch or merge error into a `UnitError`, attaches it to the
//! owning resource's summary, and moves on to the next unit.

use thiserror::Error;

use crate::merge::MergeError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("transient fetch failure after {attempts} attempt(s): {message}")]
    TransientFetch { attempts: u32, message: String },

    #[error("permanent fetch failure: {message}")]
    PermanentFetch { message: String },

    #[error("merge conflict in {table}: {reason}")]
    MergeConflict { table: String, reason: String },

    #[error("refusing to replace {table} with an empty fetch not confirmed by the remote")]
    AmbiguousEmptyReplace { table: String },

    #[error("store error: {0}")]
    Store(String),
}

impl UnitError {
    /// Short tag used in logs and in the crawl-outcome table.
    pub fn kind(&self) -> &'static str {
        match self {
            UnitError::TransientFetch { .. } => "transient_fetch",
            UnitError::PermanentFetch { .. } => "permanent_fetch",
            UnitError::MergeConflict { .. } => "merge_conflict",
            UnitError::AmbiguousEmptyReplace { .. } => "ambiguous_empty_replace",
            UnitError::Store(_) => "store",
        }
    }
}

impl From<MergeError> for UnitError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::MergeConflict { table, reason } => UnitError::MergeConflict {
                table: table.to_string(),
                reason,
            },
            MergeError::AmbiguousEmptyReplace { table } => UnitError::AmbiguousEmptyReplace {
                table: table.to_string(),
            },
            MergeError::Store(e) => UnitError::Store(e.to_string()),
        }
    }
}
