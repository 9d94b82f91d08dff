//! DL Equity HTTP client.
//!
//! Blocking `reqwest` client with a cookie-backed session. The session is
//! established lazily on the first fetch (GET and form POST to `/login`, then
//! a probe of an authenticated endpoint) and re-established after the remote
//! expires it. Date-scoped targets map onto the API's `?days=N` lookback.
//! Each endpoint path has its own circuit breaker, so a blocked endpoint only
//! fails its own later requests.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::StatusCode;
use serde_json::Value as Json;

use super::circuit_breaker::EndpointBreakers;
use super::parse::{parse_fundamentals, parse_payload, parse_put_through};
use super::{FetchClient, FetchError, Fetched};
use crate::domain::{FetchTarget, FetchUnit, Resource};

/// Lookback windows (days) combined into one put-through snapshot.
pub const PUT_THROUGH_PERIODS: [u32; 3] = [1, 7, 30];

/// The remote rejects lookbacks shorter than this.
const MIN_LOOKBACK_DAYS: i64 = 2;

#[derive(Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub fundamentals_quarters: u32,
}

impl fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("fundamentals_quarters", &self.fundamentals_quarters)
            .finish()
    }
}

/// Path and query string for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub path: String,
    pub query: Vec<(&'static str, String)>,
}

impl Endpoint {
    fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    fn param(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }
}

/// `?days=N` needed for a window starting at `from` to be covered, seen from `today`.
pub fn lookback_days(from: NaiveDate, today: NaiveDate) -> i64 {
    ((today - from).num_days() + 1).max(MIN_LOOKBACK_DAYS)
}

/// Map a single-request unit onto its endpoint.
pub fn endpoint_for(unit: &FetchUnit, today: NaiveDate) -> Result<Endpoint, FetchError> {
    let unsupported = || {
        FetchError::Permanent(format!("unsupported target for {}: {}", unit.resource, unit.target))
    };
    let days = || {
        unit.target
            .window()
            .map(|(from, _)| lookback_days(from, today))
            .ok_or_else(unsupported)
    };
    let page = || match unit.target {
        FetchTarget::Page(p) => Ok(p),
        FetchTarget::Latest => Ok(1),
        _ => Err(unsupported()),
    };

    Ok(match unit.resource {
        Resource::VnTa => Endpoint::new("/api/vn-ta").param("days", days()?),
        Resource::SectorLeadership => Endpoint::new("/api/sector-leadership").param("days", days()?),
        Resource::DerivativesProp => Endpoint::new("/api/derivatives-prop").param("days", days()?),
        Resource::DcCashRatio => Endpoint::new("/api/dc-cash-ratio").param("days", days()?),
        Resource::Economics => Endpoint::new("/api/economics-data").param("days", days()?),
        Resource::TickerNews => Endpoint::new("/api/ticker-news").param("page", page()?),
        Resource::MacroResearch => Endpoint::new("/api/macro-research")
            .param("days", 90)
            .param("limit", 100)
            .param("page", page()?),
        Resource::WeeklyCalls => {
            page()?;
            Endpoint::new("/api/weekly-calls/latest")
        }
        Resource::TickerSectorMap => Endpoint::new("/api/ticker-sector-map"),
        Resource::SectorOverview => Endpoint::new("/api/sector-overview"),
        Resource::PutThrough | Resource::Fundamentals => return Err(unsupported()),
    })
}

/// Transient/permanent split for a non-success HTTP status.
pub fn classify_status(status: StatusCode, path: &str) -> FetchError {
    let message = format!("HTTP {status} for {path}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FetchError::Transient(message)
    } else {
        FetchError::Permanent(message)
    }
}

pub struct DlEquityClient {
    client: reqwest::blocking::Client,
    settings: RemoteSettings,
    breakers: EndpointBreakers,
    authenticated: Mutex<bool>,
}

impl DlEquityClient {
    pub fn new(settings: RemoteSettings) -> Result<Self, FetchError> {
        Self::with_breakers(settings, EndpointBreakers::default_remote())
    }

    pub fn with_breakers(
        settings: RemoteSettings,
        breakers: EndpointBreakers,
    ) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .cookie_store(true)
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36")
            .build()
            .map_err(|e| FetchError::Permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            settings,
            breakers,
            authenticated: Mutex::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.settings.base_url.trim_end_matches('/'))
    }

    fn set_authenticated(&self, value: bool) {
        *self
            .authenticated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
    }

    fn is_authenticated(&self) -> bool {
        *self
            .authenticated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_session(&self) -> Result<(), FetchError> {
        if self.is_authenticated() {
            return Ok(());
        }
        self.login()?;
        self.set_authenticated(true);
        Ok(())
    }

    fn login(&self) -> Result<(), FetchError> {
        tracing::info!(user = %self.settings.username, "authenticating");
        let login_url = self.url("/login");
        // Primes the session cookie; the page body is irrelevant.
        self.client.get(&login_url).send().map_err(transport_error)?;

        let resp = self
            .client
            .post(&login_url)
            .form(&[
                ("username", self.settings.username.as_str()),
                ("password", self.settings.password.as_str()),
            ])
            .send()
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(login_failure(resp.status(), "/login"));
        }

        let probe = self
            .client
            .get(self.url("/api/sector-overview"))
            .send()
            .map_err(transport_error)?;
        if !probe.status().is_success() {
            return Err(login_failure(probe.status(), "/api/sector-overview"));
        }
        tracing::info!("authenticated");
        Ok(())
    }

    /// Endpoints whose breaker is currently open.
    pub fn open_breakers(&self) -> Vec<String> {
        self.breakers.open_paths()
    }

    fn get_json(&self, endpoint: &Endpoint) -> Result<Json, FetchError> {
        let breaker = self.breakers.for_path(&endpoint.path);
        if !breaker.is_allowed() {
            return Err(FetchError::Permanent(format!(
                "circuit breaker open for {} for another {}s",
                endpoint.path,
                breaker.remaining_cooldown().as_secs()
            )));
        }

        tracing::debug!(path = %endpoint.path, query = ?endpoint.query, "GET");
        let resp = self
            .client
            .get(self.url(&endpoint.path))
            .query(&endpoint.query)
            .send()
            .map_err(|e| {
                let err = transport_error(e);
                if matches!(err, FetchError::Transient(_)) {
                    breaker.record_failure();
                }
                err
            })?;

        let status = resp.status();
        if status == StatusCode::FORBIDDEN {
            breaker.trip();
            return Err(FetchError::Permanent(format!(
                "HTTP 403 for {}: access blocked",
                endpoint.path
            )));
        }
        if status == StatusCode::UNAUTHORIZED {
            // Session expired mid-crawl; the retry will log in again.
            self.set_authenticated(false);
            return Err(FetchError::Transient(format!(
                "HTTP 401 for {}: session expired",
                endpoint.path
            )));
        }
        if !status.is_success() {
            let err = classify_status(status, &endpoint.path);
            if matches!(err, FetchError::Transient(_)) {
                breaker.record_failure();
            }
            return Err(err);
        }

        let payload = resp.json::<Json>().map_err(|e| {
            FetchError::Permanent(format!("malformed payload from {}: {e}", endpoint.path))
        })?;
        breaker.record_success();
        Ok(payload)
    }
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        FetchError::Transient(format!("network error: {e}"))
    } else {
        FetchError::Permanent(format!("request failed: {e}"))
    }
}

fn login_failure(status: StatusCode, path: &str) -> FetchError {
    match classify_status(status, path) {
        FetchError::Transient(m) => FetchError::Transient(format!("login: {m}")),
        FetchError::Permanent(m) => FetchError::Permanent(format!("authentication failed: {m}")),
    }
}

impl FetchClient for DlEquityClient {
    fn name(&self) -> &str {
        "dl_equity"
    }

    fn fetch(&self, unit: &FetchUnit) -> Result<Fetched, FetchError> {
        self.ensure_session()?;
        let today = chrono::Local::now().date_naive();

        match (&unit.resource, &unit.target) {
            (Resource::PutThrough, FetchTarget::Latest) => {
                let mut periods = Vec::with_capacity(PUT_THROUGH_PERIODS.len());
                for days in PUT_THROUGH_PERIODS {
                    let endpoint = Endpoint::new("/api/put-through").param("days", days);
                    periods.push((days, self.get_json(&endpoint)?));
                }
                parse_put_through(&periods, today)
            }
            (Resource::Fundamentals, FetchTarget::Entity(ticker)) => {
                let endpoint = Endpoint::new(format!("/api/company-financials/{ticker}"))
                    .param("quarters", self.settings.fundamentals_quarters);
                parse_fundamentals(ticker, &self.get_json(&endpoint)?)
            }
            (resource, _) => {
                let endpoint = endpoint_for(unit, today)?;
                parse_payload(*resource, &self.get_json(&endpoint)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn lookback_covers_window_start_with_minimum_of_two() {
        let today = d("2026-02-27");
        assert_eq!(lookback_days(d("2026-02-25"), today), 3);
        assert_eq!(lookback_days(d("2026-02-27"), today), 2);
        assert_eq!(lookback_days(d("2026-03-01"), today), 2);
        assert_eq!(lookback_days(d("2025-02-28"), today), 365);
    }

    #[test]
    fn time_series_units_map_to_days_param() {
        let unit = FetchUnit::new(
            Resource::VnTa,
            FetchTarget::Range {
                from: d("2026-02-25"),
                to: d("2026-02-27"),
            },
        );
        let ep = endpoint_for(&unit, d("2026-02-27")).unwrap();
        assert_eq!(ep.path, "/api/vn-ta");
        assert_eq!(ep.query, vec![("days", "3".to_string())]);
    }

    #[test]
    fn event_units_carry_page() {
        let unit = FetchUnit::new(Resource::MacroResearch, FetchTarget::Page(2));
        let ep = endpoint_for(&unit, d("2026-02-27")).unwrap();
        assert!(ep.query.contains(&("page", "2".to_string())));
        assert!(ep.query.contains(&("limit", "100".to_string())));
    }

    #[test]
    fn mismatched_target_is_permanent() {
        let unit = FetchUnit::new(Resource::VnTa, FetchTarget::Page(1));
        assert!(matches!(
            endpoint_for(&unit, d("2026-02-27")),
            Err(FetchError::Permanent(_))
        ));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "/x"),
            FetchError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "/x"),
            FetchError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "/x"),
            FetchError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "/x"),
            FetchError::Permanent(_)
        ));
    }

    #[test]
    fn debug_output_redacts_password() {
        let settings = RemoteSettings {
            base_url: "https://example.invalid".into(),
            username: "guest".into(),
            password: "hunter2".into(),
            timeout: Duration::from_secs(30),
            fundamentals_quarters: 8,
        };
        let text = format!("{settings:?}");
        assert!(!text.contains("hunter2"));
        assert!(text.contains("<redacted>"));
    }
}
