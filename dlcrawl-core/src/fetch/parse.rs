//! Payload parsing: remote JSON shapes into table rows.
//!
//! Each endpoint has its own shape (flat record lists, per-day nested maps,
//! column-oriented rate matrices, plain key/value objects). Everything here is
//! pure so it can be tested against captured payloads without a network.

use chrono::NaiveDate;
use serde_json::{Map, Value as Json};

use super::{FetchError, Fetched, TableBatch};
use crate::domain::{Resource, Row, Value};
use crate::schema::{self, TableDef};

type Object = Map<String, Json>;

fn malformed(what: impl std::fmt::Display) -> FetchError {
    FetchError::Permanent(format!("malformed payload: {what}"))
}

fn field<'a>(payload: &'a Json, key: &str) -> Result<&'a Json, FetchError> {
    payload
        .get(key)
        .ok_or_else(|| malformed(format!("missing '{key}'")))
}

fn array<'a>(payload: &'a Json, key: &str) -> Result<&'a Vec<Json>, FetchError> {
    field(payload, key)?
        .as_array()
        .ok_or_else(|| malformed(format!("'{key}' is not an array")))
}

fn object<'a>(value: &'a Json, what: &str) -> Result<&'a Object, FetchError> {
    value
        .as_object()
        .ok_or_else(|| malformed(format!("{what} is not an object")))
}

fn has_more(payload: &Json) -> bool {
    payload
        .get("has_more")
        .and_then(Json::as_bool)
        .unwrap_or(false)
}

/// Map an object onto `def`'s columns. `aliases` maps column name to JSON key
/// where they differ.
fn row_from_object(obj: &Object, def: &TableDef, aliases: &[(&str, &str)]) -> Row {
    let mut row = Row::new();
    for column in def.column_names() {
        let key = aliases
            .iter()
            .find(|(c, _)| *c == column)
            .map_or(column, |(_, k)| *k);
        if let Some(value) = obj.get(key) {
            row.set(column, Value::from_json(value));
        }
    }
    row
}

fn record_list(
    payload: &Json,
    list_key: &str,
    def: &'static TableDef,
    aliases: &[(&str, &str)],
) -> Result<Vec<Row>, FetchError> {
    array(payload, list_key)?
        .iter()
        .map(|item| Ok(row_from_object(object(item, "record")?, def, aliases)))
        .collect()
}

/// Parse the payload of a single-request resource.
///
/// `put_through` and `fundamentals` need extra context and have their own
/// entry points.
pub fn parse_payload(resource: Resource, payload: &Json) -> Result<Fetched, FetchError> {
    match resource {
        Resource::VnTa => Ok(Fetched::single(
            &schema::VN_TA,
            record_list(payload, "data", &schema::VN_TA, &[])?,
        )),
        Resource::SectorLeadership => sector_leadership(payload),
        Resource::DerivativesProp => Ok(Fetched::single(
            &schema::DERIVATIVES_PROP,
            record_list(payload, "data", &schema::DERIVATIVES_PROP, &[])?,
        )),
        Resource::DcCashRatio => Ok(Fetched::single(
            &schema::DC_CASH_RATIO,
            record_list(
                payload,
                "data",
                &schema::DC_CASH_RATIO,
                &[
                    ("veil", "VEIL"),
                    ("veil_net", "VEIL_net"),
                    ("tsk", "TSK"),
                    ("tsk_net", "TSK_net"),
                    ("dcds", "DCDS"),
                    ("dcds_net", "DCDS_net"),
                    ("nbim", "NBIM"),
                    ("nbim_net", "NBIM_net"),
                ],
            )?,
        )),
        Resource::Economics => economics(payload),
        Resource::TickerNews => ticker_news(payload),
        Resource::MacroResearch => Ok(Fetched::single(
            &schema::MACRO_RESEARCH,
            record_list(payload, "articles", &schema::MACRO_RESEARCH, &[])?,
        )
        .with_more(has_more(payload))),
        Resource::WeeklyCalls => weekly_calls(payload),
        Resource::TickerSectorMap => ticker_sector_map(payload),
        Resource::SectorOverview => Ok(Fetched::single(
            &schema::SECTOR_OVERVIEW,
            record_list(
                payload,
                "sectors",
                &schema::SECTOR_OVERVIEW,
                &[("ticker_count", "count")],
            )?,
        )),
        Resource::PutThrough | Resource::Fundamentals => Err(FetchError::Permanent(format!(
            "{resource} payloads need request context"
        ))),
    }
}

/// `{"data": [{"date": D, "sectors": {name: {"net": x, "ret5d": y}}}]}`
fn sector_leadership(payload: &Json) -> Result<Fetched, FetchError> {
    let mut rows = Vec::new();
    for day in array(payload, "data")? {
        let date = field(day, "date")?;
        let Some(sectors) = day.get("sectors") else {
            continue;
        };
        for (sector, values) in object(sectors, "sectors")? {
            rows.push(
                Row::new()
                    .with("date", Value::from_json(date))
                    .with("sector", sector.as_str())
                    .with("net_score", values.get("net").map_or(Value::Null, Value::from_json))
                    .with("ret_5d", values.get("ret5d").map_or(Value::Null, Value::from_json)),
            );
        }
    }
    Ok(Fetched::single(&schema::SECTOR_LEADERSHIP, rows))
}

/// Column-oriented rate matrices: each block carries a `dates` axis and one
/// rate series per dimension (nested one level deeper for deposit rates).
fn economics(payload: &Json) -> Result<Fetched, FetchError> {
    object(payload, "economics payload")?;
    let mut deposit = Vec::new();
    let mut interbank = Vec::new();
    let mut treasury = Vec::new();

    if let Some(block) = payload.get("deposit") {
        let dates = rate_dates(block)?;
        for (bank, tenors) in object(block, "deposit")? {
            if bank == "dates" {
                continue;
            }
            let Some(tenors) = tenors.as_object() else {
                continue;
            };
            for (tenor, series) in tenors {
                for (date, rate) in rate_points(&dates, series) {
                    deposit.push(
                        Row::new()
                            .with("date", date)
                            .with("bank", bank.as_str())
                            .with("tenor", tenor.as_str())
                            .with("rate", rate),
                    );
                }
            }
        }
    }

    for (block_key, dim, rows) in [
        ("interbank", "tenor", &mut interbank),
        ("treasury", "instrument", &mut treasury),
    ] {
        let Some(block) = payload.get(block_key) else {
            continue;
        };
        let dates = rate_dates(block)?;
        for (name, series) in object(block, block_key)? {
            if name == "dates" {
                continue;
            }
            for (date, rate) in rate_points(&dates, series) {
                rows.push(
                    Row::new()
                        .with("date", date)
                        .with(dim, name.as_str())
                        .with("rate", rate),
                );
            }
        }
    }

    Ok(Fetched::new(vec![
        TableBatch::new(&schema::ECONOMICS_DEPOSIT, deposit),
        TableBatch::new(&schema::ECONOMICS_INTERBANK, interbank),
        TableBatch::new(&schema::ECONOMICS_TREASURY, treasury),
    ]))
}

fn rate_dates(block: &Json) -> Result<Vec<String>, FetchError> {
    let Some(dates) = block.get("dates") else {
        return Ok(Vec::new());
    };
    dates
        .as_array()
        .ok_or_else(|| malformed("'dates' is not an array"))?
        .iter()
        .map(|d| {
            d.as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed("non-string entry in 'dates'"))
        })
        .collect()
}

/// Pair a rate series with the date axis, dropping nulls and overhang.
fn rate_points<'a>(dates: &'a [String], series: &'a Json) -> impl Iterator<Item = (&'a str, Value)> {
    series
        .as_array()
        .into_iter()
        .flatten()
        .zip(dates)
        .filter(|(rate, _)| !rate.is_null())
        .map(|(rate, date)| (date.as_str(), Value::from_json(rate)))
}

/// Identity of a news item: BLAKE3 over `ticker|date|first 100 chars of snippet`.
pub fn news_content_hash(ticker: &str, date: &str, snippet: &str) -> String {
    let head: String = snippet.chars().take(100).collect();
    blake3::hash(format!("{ticker}|{date}|{head}").as_bytes())
        .to_hex()
        .to_string()
}

fn ticker_news(payload: &Json) -> Result<Fetched, FetchError> {
    let mut rows = Vec::new();
    for item in array(payload, "news")? {
        let obj = object(item, "news item")?;
        let text = |k: &str| obj.get(k).and_then(Json::as_str).unwrap_or("");
        let hash = news_content_hash(text("ticker"), text("date"), text("snippet"));
        let mut row = row_from_object(obj, &schema::TICKER_NEWS, &[]);
        row.set("content_hash", hash);
        rows.push(row);
    }
    Ok(Fetched::single(&schema::TICKER_NEWS, rows).with_more(has_more(payload)))
}

fn weekly_calls(payload: &Json) -> Result<Fetched, FetchError> {
    let week = payload
        .get("week_ending")
        .map_or(Value::Null, Value::from_json);
    let rows = array(payload, "reports_analyzed")?
        .iter()
        .map(|item| {
            let mut row = row_from_object(object(item, "report")?, &schema::WEEKLY_CALLS, &[]);
            row.set("week_ending", week.clone());
            Ok(row)
        })
        .collect::<Result<Vec<_>, FetchError>>()?;
    Ok(Fetched::single(&schema::WEEKLY_CALLS, rows).with_more(has_more(payload)))
}

/// `{ticker: sector, ...}`
fn ticker_sector_map(payload: &Json) -> Result<Fetched, FetchError> {
    let rows = object(payload, "ticker-sector map")?
        .iter()
        .map(|(ticker, sector)| {
            Row::new()
                .with("ticker", ticker.as_str())
                .with("sector", Value::from_json(sector))
        })
        .collect();
    Ok(Fetched::single(&schema::TICKER_SECTOR_MAP, rows))
}

/// Combine the put-through payloads of several lookback windows into one snapshot.
pub fn parse_put_through(
    periods: &[(u32, Json)],
    crawl_date: NaiveDate,
) -> Result<Fetched, FetchError> {
    let mut rows = Vec::new();
    for (period, payload) in periods {
        for mut row in record_list(payload, "data", &schema::PUT_THROUGH, &[])? {
            row.set("period_days", i64::from(*period));
            row.set("crawl_date", crawl_date);
            rows.push(row);
        }
    }
    Ok(Fetched::single(&schema::PUT_THROUGH, rows))
}

/// `{"stock_info": {...}, "quarters": [{...}]}` for one ticker.
pub fn parse_fundamentals(ticker: &str, payload: &Json) -> Result<Fetched, FetchError> {
    object(payload, "company financials")?;
    let mut info = Vec::new();
    if let Some(obj) = payload.get("stock_info").and_then(Json::as_object) {
        if !obj.is_empty() {
            info.push(row_from_object(obj, &schema::STOCK_INFO, &[]).with("ticker", ticker));
        }
    }
    let quarters = match payload.get("quarters") {
        Some(_) => record_list(payload, "quarters", &schema::QUARTERLY_FINANCIALS, &[])?
            .into_iter()
            .map(|row| row.with("ticker", ticker))
            .collect(),
        None => Vec::new(),
    };
    Ok(Fetched::new(vec![
        TableBatch::new(&schema::STOCK_INFO, info),
        TableBatch::new(&schema::QUARTERLY_FINANCIALS, quarters),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows<'a>(fetched: &'a Fetched, table: &str) -> &'a [Row] {
        fetched
            .batches
            .iter()
            .find(|b| b.table.name == table)
            .map(|b| b.rows.as_slice())
            .unwrap()
    }

    #[test]
    fn vn_ta_records_map_column_for_column() {
        let payload = json!({"data": [
            {"date": "2026-02-25", "vnindex": 1250.5, "advances": 210, "declines": 150, "extra": 1}
        ]});
        let fetched = parse_payload(Resource::VnTa, &payload).unwrap();
        let r = &rows(&fetched, "vn_ta")[0];
        assert_eq!(r.get("vnindex"), &Value::Real(1250.5));
        assert_eq!(r.get("advances"), &Value::Integer(210));
        assert!(r.get("extra").is_null());
        assert!(r.get("rsi_21").is_null());
    }

    #[test]
    fn missing_list_is_a_permanent_error() {
        let err = parse_payload(Resource::VnTa, &json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
    }

    #[test]
    fn sector_leadership_flattens_nested_sectors() {
        let payload = json!({"data": [
            {"date": "2026-02-25", "sectors": {"Banks": {"net": 3, "ret5d": 1.2}, "Steel": {"net": -1}}}
        ]});
        let fetched = parse_payload(Resource::SectorLeadership, &payload).unwrap();
        let rows = rows(&fetched, "sector_leadership");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("sector"), &Value::from("Banks"));
        assert_eq!(rows[0].get("net_score"), &Value::Integer(3));
        assert!(rows[1].get("ret_5d").is_null());
    }

    #[test]
    fn dc_cash_ratio_lowercases_fund_columns() {
        let payload = json!({"data": [{"date": "2026-02-25", "VEIL": 0.05, "NBIM_net": -0.01}]});
        let fetched = parse_payload(Resource::DcCashRatio, &payload).unwrap();
        let r = &rows(&fetched, "dc_cash_ratio")[0];
        assert_eq!(r.get("veil"), &Value::Real(0.05));
        assert_eq!(r.get("nbim_net"), &Value::Real(-0.01));
    }

    #[test]
    fn economics_matrices_skip_nulls_and_overhang() {
        let payload = json!({
            "deposit": {"dates": ["2026-02-24", "2026-02-25"],
                        "VCB": {"12M": [4.7, null, 5.0]}},
            "interbank": {"dates": ["2026-02-25"], "ON": [3.1]},
            "treasury": {"dates": ["2026-02-25"], "10Y": [2.9], "label": "ignored"}
        });
        let fetched = parse_payload(Resource::Economics, &payload).unwrap();
        let deposit = rows(&fetched, "economics_deposit");
        assert_eq!(deposit.len(), 1);
        assert_eq!(deposit[0].get("bank"), &Value::from("VCB"));
        assert_eq!(deposit[0].get("date"), &Value::from("2026-02-24"));
        assert_eq!(rows(&fetched, "economics_interbank").len(), 1);
        assert_eq!(rows(&fetched, "economics_treasury").len(), 1);
    }

    #[test]
    fn news_hash_uses_first_hundred_chars_of_snippet() {
        let long = "x".repeat(150);
        let prefix = "x".repeat(100);
        assert_eq!(
            news_content_hash("FPT", "2026-02-25", &long),
            news_content_hash("FPT", "2026-02-25", &prefix)
        );
        assert_ne!(
            news_content_hash("FPT", "2026-02-25", "a"),
            news_content_hash("FPT", "2026-02-26", "a")
        );
    }

    #[test]
    fn ticker_news_carries_hash_and_has_more() {
        let payload = json!({"news": [
            {"ticker": "FPT", "date": "2026-02-25", "snippet": "Buy", "broker": "SSI"}
        ], "has_more": true});
        let fetched = parse_payload(Resource::TickerNews, &payload).unwrap();
        assert!(fetched.has_more);
        let r = &rows(&fetched, "ticker_news")[0];
        assert_eq!(
            r.get("content_hash"),
            &Value::Text(news_content_hash("FPT", "2026-02-25", "Buy"))
        );
    }

    #[test]
    fn weekly_calls_stamp_week_ending() {
        let payload = json!({"week_ending": "2026-02-27", "reports_analyzed": [
            {"ticker": "HPG", "broker": "VND", "report_date": "2026-02-26", "shift": "up"}
        ]});
        let fetched = parse_payload(Resource::WeeklyCalls, &payload).unwrap();
        assert!(!fetched.has_more);
        assert_eq!(
            rows(&fetched, "weekly_calls")[0].get("week_ending"),
            &Value::from("2026-02-27")
        );
    }

    #[test]
    fn snapshots_parse_maps_and_lists() {
        let map = parse_payload(Resource::TickerSectorMap, &json!({"FPT": "Tech", "VNM": "Food"}))
            .unwrap();
        assert_eq!(map.row_count(), 2);

        let overview = parse_payload(
            Resource::SectorOverview,
            &json!({"sectors": [{"sector": "Banks", "count": 27}]}),
        )
        .unwrap();
        assert_eq!(
            rows(&overview, "sector_overview")[0].get("ticker_count"),
            &Value::Integer(27)
        );
    }

    #[test]
    fn put_through_combines_periods() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 27).unwrap();
        let periods = vec![
            (1, json!({"data": [{"ticker": "FPT", "pt_volume": 100}]})),
            (7, json!({"data": [{"ticker": "FPT", "pt_volume": 700}]})),
            (30, json!({"data": []})),
        ];
        let fetched = parse_put_through(&periods, day).unwrap();
        let rows = rows(&fetched, "put_through");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("period_days"), &Value::Integer(7));
        assert_eq!(rows[1].get("crawl_date"), &Value::from("2026-02-27"));
    }

    #[test]
    fn fundamentals_attach_ticker_to_every_row() {
        let payload = json!({
            "stock_info": {"sector_l1": "Tech", "mkt_cap": 1.5e14},
            "quarters": [{"quarter": "2025Q4", "revenue": 1.0}, {"quarter": "2025Q3"}]
        });
        let fetched = parse_fundamentals("FPT", &payload).unwrap();
        assert_eq!(rows(&fetched, "stock_info")[0].get("ticker"), &Value::from("FPT"));
        let quarters = rows(&fetched, "quarterly_financials");
        assert_eq!(quarters.len(), 2);
        assert!(quarters.iter().all(|q| q.get("ticker") == &Value::from("FPT")));
    }
}
