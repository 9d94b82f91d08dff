//! dlcrawl runner: crawl orchestration, configuration, status and export.
//!
//! This crate builds on `dlcrawl-core` to provide:
//! - TOML configuration with defaults and validation
//! - The crawl orchestrator (plan, fetch with retry, merge, record outcomes)
//! - Crawl summaries and the `status` report
//! - CSV/JSON export projection

pub mod config;
pub mod export;
pub mod orchestrator;
pub mod status;
pub mod summary;

pub use config::{ConfigError, CrawlConfig};
pub use export::{export, ExportFormat, ExportOptions, ExportedFile};
pub use orchestrator::{
    Clock, FixedClock, Orchestrator, OrchestratorSettings, RunError, SystemClock, UnitState,
};
pub use status::{StatusReport, TableCount};
pub use summary::{CrawlSummary, ResourceSummary, UnitFailure};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<CrawlConfig>();
        assert_sync::<CrawlConfig>();
        assert_send::<OrchestratorSettings>();
        assert_sync::<OrchestratorSettings>();
    }

    #[test]
    fn summary_types_are_send_sync() {
        assert_send::<CrawlSummary>();
        assert_sync::<CrawlSummary>();
        assert_send::<StatusReport>();
        assert_sync::<StatusReport>();
    }
}
