//! Crawler configuration loaded from TOML.
//!
//! Every section is optional; a missing file yields the defaults. The password
//! may be given inline or through an environment variable so the file can be
//! committed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dlcrawl_core::fetch::RemoteSettings;
use dlcrawl_core::{PagingConfig, PlanOptions, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "dlcrawl.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    pub store: StoreConfig,
    pub export: ExportConfig,
    pub remote: RemoteConfig,
    pub retry: RetryPolicy,
    pub paging: PagingConfig,
    pub crawl: CrawlSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/db/dl_equity.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub base_url: String,
    pub username: String,
    pub password: Option<String>,
    /// Environment variable consulted when `password` is unset.
    pub password_env: String,
    pub timeout_secs: u64,
    /// Pause between per-entity fundamentals requests.
    pub request_delay_ms: u64,
    pub fundamentals_quarters: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.dl-equity.com".into(),
            username: "Guest".into(),
            password: None,
            password_env: "DLCRAWL_PASSWORD".into(),
            timeout_secs: 30,
            request_delay_ms: 100,
            fundamentals_quarters: 8,
        }
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("password_env", &self.password_env)
            .field("timeout_secs", &self.timeout_secs)
            .field("request_delay_ms", &self.request_delay_ms)
            .field("fundamentals_quarters", &self.fundamentals_quarters)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlSection {
    /// Days covered by a full crawl, and by the first crawl of an empty store.
    pub full_lookback_days: u32,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            full_lookback_days: 365,
        }
    }
}

impl CrawlConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: CrawlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given. Without a path, load `dlcrawl.toml` when it exists
    /// and fall back to defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.paging.max_pages == 0 {
            return Err(ConfigError::Invalid("paging.max_pages must be at least 1".into()));
        }
        if self.crawl.full_lookback_days == 0 {
            return Err(ConfigError::Invalid(
                "crawl.full_lookback_days must be at least 1".into(),
            ));
        }
        if self.remote.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("remote.base_url must not be empty".into()));
        }
        Ok(())
    }

    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            full_lookback_days: self.crawl.full_lookback_days,
            paging: self.paging,
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.remote.request_delay_ms)
    }

    /// Resolve the HTTP client settings, reading the password from the
    /// environment when it is not set inline.
    pub fn remote_settings(&self) -> Result<RemoteSettings, ConfigError> {
        let password = match &self.remote.password {
            Some(p) => p.clone(),
            None => std::env::var(&self.remote.password_env).map_err(|_| {
                ConfigError::Invalid(format!(
                    "no remote.password set and ${} is not defined",
                    self.remote.password_env
                ))
            })?,
        };
        Ok(RemoteSettings {
            base_url: self.remote.base_url.trim_end_matches('/').to_string(),
            username: self.remote.username.clone(),
            password,
            timeout: Duration::from_secs(self.remote.timeout_secs),
            fundamentals_quarters: self.remote.fundamentals_quarters,
        })
    }
}
