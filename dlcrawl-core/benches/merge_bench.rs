//! Criterion benchmarks for the merge engine.
//!
//! Benchmarks:
//! 1. Merge planning per policy (append, dedupe-insert, replace-all)
//! 2. Applying a year of time-series rows to an in-memory store

use std::collections::HashSet;

use chrono::{Days, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use dlcrawl_core::fetch::EmptySignal;
use dlcrawl_core::schema::{SECTOR_LEADERSHIP, TICKER_NEWS, TICKER_SECTOR_MAP};
use dlcrawl_core::{
    apply_unit, plan_merge, FetchTarget, FetchUnit, Fetched, Key, MergeContext, MergePolicy,
    Resource, Row, Store,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn leadership_rows(days: u64) -> Vec<Row> {
    let sectors = ["Banks", "Steel", "Retail", "Energy", "Utilities"];
    (0..days)
        .flat_map(|i| {
            let date = base() + Days::new(i);
            sectors.iter().map(move |s| {
                Row::new()
                    .with("date", date)
                    .with("sector", *s)
                    .with("net_score", (i as f64 * 0.1).sin())
            })
        })
        .collect()
}

fn news_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            Row::new()
                .with("content_hash", format!("{i:016x}"))
                .with("ticker", "FPT")
                .with("date", "2026-02-25")
        })
        .collect()
}

fn keys_of(rows: &[Row], def: &dlcrawl_core::TableDef) -> HashSet<Key> {
    rows.iter().filter_map(|r| r.key(def).ok()).collect()
}

// ── 1. Merge Planning ────────────────────────────────────────────────

fn bench_plan_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_merge");

    for &days in &[30u64, 365] {
        let rows = leadership_rows(days);
        let existing = keys_of(&rows[..rows.len() / 2], &SECTOR_LEADERSHIP);
        group.bench_with_input(BenchmarkId::new("append", days), &days, |b, _| {
            b.iter(|| {
                plan_merge(
                    MergePolicy::Append,
                    &SECTOR_LEADERSHIP,
                    black_box(&existing),
                    rows.clone(),
                    EmptySignal::Ambiguous,
                )
            })
        });
    }

    for &n in &[100usize, 1000] {
        let rows = news_rows(n);
        let existing = keys_of(&rows[..n / 2], &TICKER_NEWS);
        group.bench_with_input(BenchmarkId::new("dedupe_insert", n), &n, |b, _| {
            b.iter(|| {
                plan_merge(
                    MergePolicy::DedupeInsert,
                    &TICKER_NEWS,
                    black_box(&existing),
                    rows.clone(),
                    EmptySignal::Ambiguous,
                )
            })
        });
    }

    let map: Vec<Row> = (0..1600)
        .map(|i| {
            Row::new()
                .with("ticker", format!("T{i:04}"))
                .with("sector", "S")
        })
        .collect();
    let existing = keys_of(&map, &TICKER_SECTOR_MAP);
    group.bench_function("replace_all_1600", |b| {
        b.iter(|| {
            plan_merge(
                MergePolicy::ReplaceAll,
                &TICKER_SECTOR_MAP,
                black_box(&existing),
                map.clone(),
                EmptySignal::Ambiguous,
            )
        })
    });

    group.finish();
}

// ── 2. Store Application ─────────────────────────────────────────────

fn bench_apply_unit(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_unit");
    let rows = leadership_rows(365);
    let unit = FetchUnit::new(
        Resource::SectorLeadership,
        FetchTarget::Range {
            from: base(),
            to: base() + Days::new(364),
        },
    );
    let ctx = MergeContext {
        today: base() + Days::new(364),
        run_id: None,
    };

    group.bench_function("sector_leadership_365_days", |b| {
        b.iter(|| {
            let mut store = Store::open_in_memory().unwrap();
            apply_unit(
                &mut store,
                &unit,
                Fetched::single(&SECTOR_LEADERSHIP, rows.clone()),
                &ctx,
            )
            .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_plan_merge, bench_apply_unit);
criterion_main!(benches);
