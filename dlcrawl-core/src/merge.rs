//! Merge engine.
//!
//! Applies one fetch unit's rows to the store under the merge policy of the
//! resource's category. Planning is a pure function over the existing key set
//! and the fetched rows; application runs the plan inside a single store
//! transaction, so a failing unit leaves no trace.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{Category, FetchUnit, Key, MergePolicy, Row};
use crate::fetch::{EmptySignal, Fetched, TableBatch};
use crate::schema::TableDef;
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("merge conflict in {table}: {reason}")]
    MergeConflict { table: &'static str, reason: String },

    #[error("refusing to replace {table} with an unconfirmed empty fetch")]
    AmbiguousEmptyReplace { table: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a policy decided to do with a batch, before touching the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    /// Rows to write, at most one per key.
    pub writes: Vec<Row>,
    /// Keys of fetched rows that were skipped as already known.
    pub skipped: Vec<Key>,
    /// Existing keys to delete before writing.
    pub deletes: Vec<Key>,
}

/// Counts for one applied unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub written: u64,
    pub skipped: u64,
    pub replaced: u64,
    /// Latest record date written by the unit, for dated tables.
    pub last_date: Option<NaiveDate>,
}

impl MergeOutcome {
    pub fn absorb(&mut self, other: MergeOutcome) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.replaced += other.replaced;
        self.last_date = self.last_date.max(other.last_date);
    }
}

/// Per-run context the merge engine stamps onto bookkeeping rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeContext {
    pub today: NaiveDate,
    pub run_id: Option<i64>,
}

/// Decide how `rows` merge into a table whose current keys are `existing`.
pub fn plan_merge(
    policy: MergePolicy,
    def: &'static TableDef,
    existing: &HashSet<Key>,
    rows: Vec<Row>,
    empty: EmptySignal,
) -> Result<MergePlan, MergeError> {
    let keyed = rows
        .into_iter()
        .map(|row| {
            row.key(def)
                .map(|key| (key, row))
                .map_err(|reason| MergeError::MergeConflict {
                    table: def.name,
                    reason,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    match policy {
        MergePolicy::Append => Ok(MergePlan {
            writes: collapse_last_wins(keyed),
            ..MergePlan::default()
        }),
        MergePolicy::DedupeInsert => {
            let mut plan = MergePlan::default();
            let mut batch = HashSet::new();
            for (key, row) in keyed {
                if existing.contains(&key) || !batch.insert(key.clone()) {
                    plan.skipped.push(key);
                } else {
                    plan.writes.push(row);
                }
            }
            Ok(plan)
        }
        MergePolicy::ReplaceAll => {
            if keyed.is_empty() && empty != EmptySignal::Confirmed {
                return Err(MergeError::AmbiguousEmptyReplace { table: def.name });
            }
            let mut deletes: Vec<Key> = existing.iter().cloned().collect();
            deletes.sort();
            Ok(MergePlan {
                writes: collapse_last_wins(keyed),
                skipped: Vec::new(),
                deletes,
            })
        }
    }
}

/// One row per key; a later duplicate replaces an earlier one in place.
fn collapse_last_wins(keyed: Vec<(Key, Row)>) -> Vec<Row> {
    let mut index: HashMap<Key, usize> = HashMap::with_capacity(keyed.len());
    let mut out: Vec<Row> = Vec::with_capacity(keyed.len());
    for (key, row) in keyed {
        match index.get(&key) {
            Some(&i) => out[i] = row,
            None => {
                index.insert(key, out.len());
                out.push(row);
            }
        }
    }
    out
}

/// Drop time-series rows dated outside the unit's window.
///
/// A row whose date column is missing or unparseable is a conflict.
fn clip_to_window(
    def: &'static TableDef,
    unit: &FetchUnit,
    rows: Vec<Row>,
) -> Result<Vec<Row>, MergeError> {
    if unit.resource.category() != Category::TimeSeries {
        return Ok(rows);
    }
    let Some((from, to)) = unit.target.window() else {
        return Ok(rows);
    };
    let fetched = rows.len();
    let mut kept = Vec::with_capacity(fetched);
    for row in rows {
        let date = row
            .date(def)
            .map_err(|reason| MergeError::MergeConflict {
                table: def.name,
                reason,
            })?;
        match date {
            Some(d) if d < from || d > to => {}
            _ => kept.push(row),
        }
    }
    if kept.len() < fetched {
        tracing::debug!(
            table = def.name,
            dropped = fetched - kept.len(),
            "clipped rows outside {}",
            unit.target
        );
    }
    Ok(kept)
}

fn latest_date(def: &TableDef, rows: &[Row]) -> Option<NaiveDate> {
    let column = def.date_column?;
    rows.iter().filter_map(|r| r.get(column).as_date()).max()
}

/// Apply one fetched unit to the store in a single transaction.
pub fn apply_unit(
    store: &mut Store,
    unit: &FetchUnit,
    fetched: Fetched,
    ctx: &MergeContext,
) -> Result<MergeOutcome, MergeError> {
    let tables = unit.resource.tables();
    let policy = unit.resource.category().merge_policy();
    let empty = fetched.empty;

    let mut by_table: HashMap<&'static str, Vec<Row>> = HashMap::new();
    for TableBatch { table, rows } in fetched.batches {
        if !tables.iter().any(|t| t.name == table.name) {
            return Err(MergeError::MergeConflict {
                table: table.name,
                reason: format!("table does not belong to resource {}", unit.resource),
            });
        }
        by_table.entry(table.name).or_default().extend(rows);
    }

    let tx = store.begin()?;
    let mut outcome = MergeOutcome::default();

    for &def in tables {
        let rows = by_table.remove(def.name).unwrap_or_default();
        let rows = clip_to_window(def, unit, rows)?;
        let existing = match policy {
            MergePolicy::Append => HashSet::new(),
            MergePolicy::DedupeInsert | MergePolicy::ReplaceAll => tx.existing_keys(def)?,
        };
        let plan = plan_merge(policy, def, &existing, rows, empty)?;

        let replaced = if plan.deletes.is_empty() {
            0
        } else {
            tx.delete_keys(def, &plan.deletes)?
        };
        match policy {
            MergePolicy::Append => tx.upsert(def, &plan.writes)?,
            MergePolicy::DedupeInsert | MergePolicy::ReplaceAll => tx.insert(def, &plan.writes)?,
        };

        outcome.absorb(MergeOutcome {
            written: plan.writes.len() as u64,
            skipped: plan.skipped.len() as u64,
            replaced: replaced as u64,
            last_date: latest_date(def, &plan.writes),
        });
    }

    if unit.resource.category() == Category::Fundamentals {
        if let crate::domain::FetchTarget::Entity(ticker) = &unit.target {
            tx.mark_refreshed(ticker, ctx.today, ctx.run_id)?;
        }
    }

    tx.commit()?;
    tracing::debug!(
        unit = %unit,
        written = outcome.written,
        skipped = outcome.skipped,
        replaced = outcome.replaced,
        "unit merged"
    );
    Ok(outcome)
}
