//! Remote resources, their data categories, and the merge policy each category uses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::schema::{self, TableDef};

/// Consistency contract of a data shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Keyed by date (plus dimensions); rows are never mutated once written.
    TimeSeries,
    /// Keyed by a content-derived identity; already-seen identities are skipped.
    Event,
    /// Current state as of this crawl; every sync replaces the whole table.
    Snapshot,
    /// Per-entity quarterly data, upserted by key and refreshed at most daily.
    Fundamentals,
}

impl Category {
    pub fn merge_policy(self) -> MergePolicy {
        match self {
            Category::TimeSeries | Category::Fundamentals => MergePolicy::Append,
            Category::Event => MergePolicy::DedupeInsert,
            Category::Snapshot => MergePolicy::ReplaceAll,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::TimeSeries => "time_series",
            Category::Event => "event",
            Category::Snapshot => "snapshot",
            Category::Fundamentals => "fundamentals",
        }
    }
}

/// The closed set of ways a fetched batch is applied to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Insert, or overwrite non-key fields of the row with the same full key.
    Append,
    /// Insert unless the identity key is already present.
    DedupeInsert,
    /// Delete every existing row, then insert the fetched rows.
    ReplaceAll,
}

/// One logical endpoint of the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    VnTa,
    SectorLeadership,
    DerivativesProp,
    DcCashRatio,
    Economics,
    TickerNews,
    MacroResearch,
    WeeklyCalls,
    TickerSectorMap,
    SectorOverview,
    PutThrough,
    Fundamentals,
}

impl Resource {
    /// Every resource, in crawl order: time-series, events, snapshots, fundamentals.
    pub const ALL: [Resource; 12] = [
        Resource::VnTa,
        Resource::SectorLeadership,
        Resource::DerivativesProp,
        Resource::DcCashRatio,
        Resource::Economics,
        Resource::TickerNews,
        Resource::MacroResearch,
        Resource::WeeklyCalls,
        Resource::TickerSectorMap,
        Resource::SectorOverview,
        Resource::PutThrough,
        Resource::Fundamentals,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Resource::VnTa => "vn_ta",
            Resource::SectorLeadership => "sector_leadership",
            Resource::DerivativesProp => "derivatives_prop",
            Resource::DcCashRatio => "dc_cash_ratio",
            Resource::Economics => "economics",
            Resource::TickerNews => "ticker_news",
            Resource::MacroResearch => "macro_research",
            Resource::WeeklyCalls => "weekly_calls",
            Resource::TickerSectorMap => "ticker_sector_map",
            Resource::SectorOverview => "sector_overview",
            Resource::PutThrough => "put_through",
            Resource::Fundamentals => "fundamentals",
        }
    }

    pub fn category(self) -> Category {
        match self {
            Resource::VnTa
            | Resource::SectorLeadership
            | Resource::DerivativesProp
            | Resource::DcCashRatio
            | Resource::Economics => Category::TimeSeries,
            Resource::TickerNews | Resource::MacroResearch | Resource::WeeklyCalls => {
                Category::Event
            }
            Resource::TickerSectorMap | Resource::SectorOverview | Resource::PutThrough => {
                Category::Snapshot
            }
            Resource::Fundamentals => Category::Fundamentals,
        }
    }

    /// Tables this resource writes to. All of them share the resource's category.
    pub fn tables(self) -> &'static [&'static TableDef] {
        match self {
            Resource::VnTa => schema::VN_TA_TABLES,
            Resource::SectorLeadership => schema::SECTOR_LEADERSHIP_TABLES,
            Resource::DerivativesProp => schema::DERIVATIVES_PROP_TABLES,
            Resource::DcCashRatio => schema::DC_CASH_RATIO_TABLES,
            Resource::Economics => schema::ECONOMICS_TABLES,
            Resource::TickerNews => schema::TICKER_NEWS_TABLES,
            Resource::MacroResearch => schema::MACRO_RESEARCH_TABLES,
            Resource::WeeklyCalls => schema::WEEKLY_CALLS_TABLES,
            Resource::TickerSectorMap => schema::TICKER_SECTOR_MAP_TABLES,
            Resource::SectorOverview => schema::SECTOR_OVERVIEW_TABLES,
            Resource::PutThrough => schema::PUT_THROUGH_TABLES,
            Resource::Fundamentals => schema::FUNDAMENTALS_TABLES,
        }
    }

    /// Resources of a given category, in crawl order.
    pub fn of_category(category: Category) -> impl Iterator<Item = Resource> {
        Self::ALL
            .into_iter()
            .filter(move |r| r.category() == category)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.name() == s)
            .ok_or_else(|| format!("unknown resource '{s}'"))
    }
}
