//! Export projector: CSV and JSON artifacts re-derived from the store.
//!
//! - **CSV**: one file per table under `<dir>/csv/`, metadata tables included
//! - **JSON**: four consolidated files under `<dir>/json/`
//!   (`market`, `economics`, `research`, `fundamentals`)
//!
//! The store is read only through whole-table and rows-since queries. `since`
//! restricts time-series tables; event, snapshot and fundamentals tables are
//! always exported in full.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use dlcrawl_core::schema::{self, DATA_TABLES, METADATA_TABLES};
use dlcrawl_core::store::TableDump;
use dlcrawl_core::{Category, Store};
use serde_json::{json, Map, Value as Json};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    Csv,
    Json,
    #[default]
    All,
}

impl ExportFormat {
    pub fn includes_csv(self) -> bool {
        matches!(self, ExportFormat::Csv | ExportFormat::All)
    }

    pub fn includes_json(self) -> bool {
        matches!(self, ExportFormat::Json | ExportFormat::All)
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "all" => Ok(ExportFormat::All),
            other => Err(format!("unknown export format '{other}' (csv, json, all)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub since: Option<NaiveDate>,
}

/// One written artifact and how many records it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub records: usize,
}

/// Export the store into `dir` according to `options`.
pub fn export(store: &Store, dir: &Path, options: &ExportOptions) -> Result<Vec<ExportedFile>> {
    let mut files = Vec::new();
    if options.format.includes_csv() {
        files.extend(export_csv(store, &dir.join("csv"), options.since)?);
    }
    if options.format.includes_json() {
        files.extend(export_json(store, &dir.join("json"), options.since)?);
    }
    Ok(files)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Write `<table>.csv` for every data and metadata table.
pub fn export_csv(store: &Store, dir: &Path, since: Option<NaiveDate>) -> Result<Vec<ExportedFile>> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let names = DATA_TABLES
        .iter()
        .map(|def| def.name)
        .chain(METADATA_TABLES.iter().copied());

    let mut files = Vec::new();
    for table in names {
        let dump = store
            .dump_table(table, since_for(table, since))
            .with_context(|| format!("read table {table}"))?;
        let path = dir.join(format!("{table}.csv"));
        fs::write(&path, dump_to_csv(&dump)?)
            .with_context(|| format!("write {}", path.display()))?;
        info!(table, rows = dump.rows.len(), "exported csv");
        files.push(ExportedFile {
            path,
            records: dump.rows.len(),
        });
    }
    Ok(files)
}

/// Render a table dump as CSV: header row, then one line per row.
pub fn dump_to_csv(dump: &TableDump) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(&dump.columns)?;
    for row in &dump.rows {
        wtr.write_record(row.iter().map(|v| v.to_csv_field()))?;
    }
    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

// ─── JSON export ────────────────────────────────────────────────────

/// Write the four consolidated JSON files.
pub fn export_json(store: &Store, dir: &Path, since: Option<NaiveDate>) -> Result<Vec<ExportedFile>> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let list = |table: &str| -> Result<Vec<Json>> {
        let dump = store
            .dump_table(table, since_for(table, since))
            .with_context(|| format!("read table {table}"))?;
        Ok(records(&dump))
    };

    let groups: [(&str, Vec<(&str, &str)>); 3] = [
        (
            "market.json",
            vec![
                ("vn_index", "vn_ta"),
                ("sector_leadership", "sector_leadership"),
                ("derivatives_prop", "derivatives_prop"),
                ("dc_cash_ratio", "dc_cash_ratio"),
                ("put_through", "put_through"),
            ],
        ),
        (
            "economics.json",
            vec![
                ("deposit", "economics_deposit"),
                ("interbank", "economics_interbank"),
                ("treasury", "economics_treasury"),
            ],
        ),
        (
            "research.json",
            vec![
                ("ticker_news", "ticker_news"),
                ("macro_research", "macro_research"),
                ("weekly_calls", "weekly_calls"),
            ],
        ),
    ];

    let mut files = Vec::new();
    for (file, sections) in groups {
        let mut doc = Map::new();
        let mut total = 0;
        for (key, table) in sections {
            let rows = list(table)?;
            total += rows.len();
            doc.insert(key.to_string(), Json::Array(rows));
        }
        files.push(write_json(&dir.join(file), &Json::Object(doc), total)?);
    }

    let fundamentals = fundamentals_doc(
        list("sector_overview")?,
        list("ticker_sector_map")?,
        list("stock_info")?,
        list("quarterly_financials")?,
    );
    let tickers = fundamentals["tickers"].as_object().map_or(0, |m| m.len());
    files.push(write_json(&dir.join("fundamentals.json"), &fundamentals, tickers)?);
    Ok(files)
}

/// Nest stock info and quarterly financials under each ticker, with the
/// ticker's mapped sector alongside.
fn fundamentals_doc(
    sector_overview: Vec<Json>,
    sector_map: Vec<Json>,
    stock_info: Vec<Json>,
    financials: Vec<Json>,
) -> Json {
    let sectors: BTreeMap<String, Json> = sector_map
        .into_iter()
        .filter_map(|row| {
            let ticker = row.get("ticker")?.as_str()?.to_string();
            Some((ticker, row.get("sector").cloned().unwrap_or(Json::Null)))
        })
        .collect();

    let mut quarters: BTreeMap<String, Vec<Json>> = BTreeMap::new();
    for mut row in financials {
        let Some(obj) = row.as_object_mut() else { continue };
        let Some(Json::String(ticker)) = obj.remove("ticker") else { continue };
        quarters.entry(ticker).or_default().push(row);
    }

    let mut tickers = Map::new();
    for mut row in stock_info {
        let Some(obj) = row.as_object_mut() else { continue };
        let Some(Json::String(ticker)) = obj.remove("ticker") else { continue };
        obj.insert(
            "sector".into(),
            sectors.get(&ticker).cloned().unwrap_or(Json::Null),
        );
        obj.insert(
            "quarterly_financials".into(),
            Json::Array(quarters.remove(&ticker).unwrap_or_default()),
        );
        tickers.insert(ticker, row);
    }

    json!({
        "sector_overview": sector_overview,
        "tickers": tickers,
    })
}

fn write_json(path: &Path, doc: &Json, records: usize) -> Result<ExportedFile> {
    let text = serde_json::to_string_pretty(doc).context("failed to serialize JSON export")?;
    fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), records, "exported json");
    Ok(ExportedFile {
        path: path.to_path_buf(),
        records,
    })
}

fn records(dump: &TableDump) -> Vec<Json> {
    dump.rows
        .iter()
        .map(|row| {
            let obj: Map<String, Json> = dump
                .columns
                .iter()
                .zip(row)
                .map(|(column, value)| (column.clone(), value.to_json()))
                .collect();
            Json::Object(obj)
        })
        .collect()
}

/// `since` only narrows time-series tables.
fn since_for(table: &str, since: Option<NaiveDate>) -> Option<NaiveDate> {
    match schema::table(table) {
        Some(def) if def.resource.category() == Category::TimeSeries => since,
        _ => None,
    }
}
