//! Table contract: the boundary between the fetch client and the store.
//!
//! Every data table is described by a static [`TableDef`]: its columns and
//! their storage classes, its key columns, the resource that owns it, and
//! (for date-keyed tables) the column carrying the record date. DDL and the
//! merge engine's statements are derived from these definitions, so the
//! fetch client, the store and the exporter cannot drift apart.

use serde::Serialize;

use crate::domain::Resource;

/// SQLite storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

/// A single column of a data table.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Column {
    pub name: &'static str,
    pub dtype: ColumnType,
}

const fn col(name: &'static str, dtype: ColumnType) -> Column {
    Column { name, dtype }
}

use ColumnType::{Integer, Real, Text};

/// Static description of one data table.
#[derive(Debug, Serialize)]
pub struct TableDef {
    pub name: &'static str,
    pub resource: Resource,
    pub columns: &'static [Column],
    /// Key columns, in key-tuple order. Never empty.
    pub key: &'static [&'static str],
    /// Column holding the record date, for tables whose rows belong to a date.
    pub date_column: Option<&'static str>,
}

impl TableDef {
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.dtype)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.key.iter().any(|k| *k == name)
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if self.is_key_column(c.name) {
                    format!("{} {} NOT NULL", c.name, c.dtype.sql())
                } else {
                    format!("{} {}", c.name, c.dtype.sql())
                }
            })
            .collect();
        parts.push(format!("PRIMARY KEY ({})", self.key.join(", ")));
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            parts.join(",\n    ")
        )
    }
}

// ── Time-series tables ──────────────────────────────────────────

pub static VN_TA: TableDef = TableDef {
    name: "vn_ta",
    resource: Resource::VnTa,
    columns: &[
        col("date", Text),
        col("vnindex", Real),
        col("vnindex_change_pct", Real),
        col("rsi_21", Real),
        col("breadth_above_ma50", Real),
        col("pct_outperform_vni_7d", Real),
        col("foreign_net_value", Real),
        col("foreign_buy_value", Real),
        col("foreign_sell_value", Real),
        col("dc_foreign_flow", Real),
        col("advances", Integer),
        col("declines", Integer),
    ],
    key: &["date"],
    date_column: Some("date"),
};

pub static SECTOR_LEADERSHIP: TableDef = TableDef {
    name: "sector_leadership",
    resource: Resource::SectorLeadership,
    columns: &[
        col("date", Text),
        col("sector", Text),
        col("net_score", Real),
        col("ret_5d", Real),
    ],
    key: &["date", "sector"],
    date_column: Some("date"),
};

pub static DERIVATIVES_PROP: TableDef = TableDef {
    name: "derivatives_prop",
    resource: Resource::DerivativesProp,
    columns: &[
        col("date", Text),
        col("total_net_today", Real),
        col("total_outstanding", Real),
        col("outstanding_balance_bn", Real),
        col("vn30_close", Real),
        col("f1_code", Text),
    ],
    key: &["date"],
    date_column: Some("date"),
};

pub static DC_CASH_RATIO: TableDef = TableDef {
    name: "dc_cash_ratio",
    resource: Resource::DcCashRatio,
    columns: &[
        col("date", Text),
        col("veil", Real),
        col("veil_net", Real),
        col("tsk", Real),
        col("tsk_net", Real),
        col("dcds", Real),
        col("dcds_net", Real),
        col("nbim", Real),
        col("nbim_net", Real),
    ],
    key: &["date"],
    date_column: Some("date"),
};

pub static ECONOMICS_DEPOSIT: TableDef = TableDef {
    name: "economics_deposit",
    resource: Resource::Economics,
    columns: &[
        col("date", Text),
        col("bank", Text),
        col("tenor", Text),
        col("rate", Real),
    ],
    key: &["date", "bank", "tenor"],
    date_column: Some("date"),
};

pub static ECONOMICS_INTERBANK: TableDef = TableDef {
    name: "economics_interbank",
    resource: Resource::Economics,
    columns: &[col("date", Text), col("tenor", Text), col("rate", Real)],
    key: &["date", "tenor"],
    date_column: Some("date"),
};

pub static ECONOMICS_TREASURY: TableDef = TableDef {
    name: "economics_treasury",
    resource: Resource::Economics,
    columns: &[col("date", Text), col("instrument", Text), col("rate", Real)],
    key: &["date", "instrument"],
    date_column: Some("date"),
};

// ── Event tables ────────────────────────────────────────────────

pub static TICKER_NEWS: TableDef = TableDef {
    name: "ticker_news",
    resource: Resource::TickerNews,
    columns: &[
        col("content_hash", Text),
        col("ticker", Text),
        col("broker", Text),
        col("sentiment", Text),
        col("news_type", Text),
        col("snippet", Text),
        col("body", Text),
        col("date", Text),
    ],
    key: &["content_hash"],
    date_column: Some("date"),
};

pub static MACRO_RESEARCH: TableDef = TableDef {
    name: "macro_research",
    resource: Resource::MacroResearch,
    columns: &[
        col("url", Text),
        col("source", Text),
        col("title", Text),
        col("summary", Text),
        col("date", Text),
    ],
    key: &["url"],
    date_column: Some("date"),
};

pub static WEEKLY_CALLS: TableDef = TableDef {
    name: "weekly_calls",
    resource: Resource::WeeklyCalls,
    columns: &[
        col("week_ending", Text),
        col("ticker", Text),
        col("broker", Text),
        col("report_date", Text),
        col("shift", Text),
    ],
    key: &["week_ending", "ticker", "broker"],
    date_column: Some("week_ending"),
};

// ── Snapshot tables ─────────────────────────────────────────────

pub static TICKER_SECTOR_MAP: TableDef = TableDef {
    name: "ticker_sector_map",
    resource: Resource::TickerSectorMap,
    columns: &[col("ticker", Text), col("sector", Text)],
    key: &["ticker"],
    date_column: None,
};

pub static SECTOR_OVERVIEW: TableDef = TableDef {
    name: "sector_overview",
    resource: Resource::SectorOverview,
    columns: &[col("sector", Text), col("ticker_count", Integer)],
    key: &["sector"],
    date_column: None,
};

pub static PUT_THROUGH: TableDef = TableDef {
    name: "put_through",
    resource: Resource::PutThrough,
    columns: &[
        col("ticker", Text),
        col("sector", Text),
        col("pt_volume", Integer),
        col("outstanding_shares", Integer),
        col("pt_os_pct", Real),
        col("last_price", Real),
        col("period_days", Integer),
        col("crawl_date", Text),
    ],
    key: &["ticker", "period_days"],
    date_column: None,
};

// ── Fundamentals tables ─────────────────────────────────────────

pub static STOCK_INFO: TableDef = TableDef {
    name: "stock_info",
    resource: Resource::Fundamentals,
    columns: &[
        col("ticker", Text),
        col("sector_l1", Text),
        col("sector_l2", Text),
        col("sector_l3", Text),
        col("mcap_class", Text),
        col("mkt_cap", Real),
        col("shares", Real),
        col("earnings_score", Real),
        col("earnings_quarter", Text),
    ],
    key: &["ticker"],
    date_column: None,
};

pub static QUARTERLY_FINANCIALS: TableDef = TableDef {
    name: "quarterly_financials",
    resource: Resource::Fundamentals,
    columns: &[
        col("ticker", Text),
        col("quarter", Text),
        col("revenue", Real),
        col("revenue_ma4", Real),
        col("gross_profit", Real),
        col("gross_profit_ma4", Real),
        col("ebit", Real),
        col("ebit_ma4", Real),
        col("npatmi", Real),
        col("npatmi_ma4", Real),
    ],
    key: &["ticker", "quarter"],
    date_column: None,
};

// ── Resource → tables ───────────────────────────────────────────

pub static VN_TA_TABLES: &[&TableDef] = &[&VN_TA];
pub static SECTOR_LEADERSHIP_TABLES: &[&TableDef] = &[&SECTOR_LEADERSHIP];
pub static DERIVATIVES_PROP_TABLES: &[&TableDef] = &[&DERIVATIVES_PROP];
pub static DC_CASH_RATIO_TABLES: &[&TableDef] = &[&DC_CASH_RATIO];
pub static ECONOMICS_TABLES: &[&TableDef] = &[&ECONOMICS_DEPOSIT, &ECONOMICS_INTERBANK, &ECONOMICS_TREASURY];
pub static TICKER_NEWS_TABLES: &[&TableDef] = &[&TICKER_NEWS];
pub static MACRO_RESEARCH_TABLES: &[&TableDef] = &[&MACRO_RESEARCH];
pub static WEEKLY_CALLS_TABLES: &[&TableDef] = &[&WEEKLY_CALLS];
pub static TICKER_SECTOR_MAP_TABLES: &[&TableDef] = &[&TICKER_SECTOR_MAP];
pub static SECTOR_OVERVIEW_TABLES: &[&TableDef] = &[&SECTOR_OVERVIEW];
pub static PUT_THROUGH_TABLES: &[&TableDef] = &[&PUT_THROUGH];
pub static FUNDAMENTALS_TABLES: &[&TableDef] = &[&STOCK_INFO, &QUARTERLY_FINANCIALS];

/// Every data table, in crawl order.
pub static DATA_TABLES: &[&TableDef] = &[
    &VN_TA,
    &SECTOR_LEADERSHIP,
    &DERIVATIVES_PROP,
    &DC_CASH_RATIO,
    &ECONOMICS_DEPOSIT,
    &ECONOMICS_INTERBANK,
    &ECONOMICS_TREASURY,
    &TICKER_NEWS,
    &MACRO_RESEARCH,
    &WEEKLY_CALLS,
    &TICKER_SECTOR_MAP,
    &SECTOR_OVERVIEW,
    &PUT_THROUGH,
    &STOCK_INFO,
    &QUARTERLY_FINANCIALS,
];

/// Look up a data table by name.
pub fn table(name: &str) -> Option<&'static TableDef> {
    DATA_TABLES.iter().copied().find(|t| t.name == name)
}

// ── Crawl-run metadata ──────────────────────────────────────────

/// Metadata tables owned by the store, in export order.
pub const METADATA_TABLES: [&str; 3] = ["crawl_runs", "crawl_outcomes", "entity_refresh"];

pub const METADATA_SQL: &str = "
CREATE TABLE IF NOT EXISTS crawl_runs (
    run_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    mode        TEXT NOT NULL,
    status      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS crawl_outcomes (
    run_id       INTEGER NOT NULL REFERENCES crawl_runs(run_id),
    resource     TEXT NOT NULL,
    status       TEXT NOT NULL,
    units        INTEGER NOT NULL,
    failed_units INTEGER NOT NULL,
    fetched      INTEGER NOT NULL,
    written      INTEGER NOT NULL,
    skipped      INTEGER NOT NULL,
    replaced     INTEGER NOT NULL,
    last_date    TEXT,
    error        TEXT,
    PRIMARY KEY (run_id, resource)
);

CREATE TABLE IF NOT EXISTS entity_refresh (
    ticker       TEXT PRIMARY KEY,
    refreshed_on TEXT NOT NULL,
    run_id       INTEGER
);
";
