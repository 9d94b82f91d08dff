//! dlcrawl CLI: incremental DL Equity market-data crawler.
//!
//! Commands:
//! - `init`: create the SQLite database and schema
//! - `crawl`: incremental by default; `--full`, `--date`, or `--from/--to`
//! - `status`: per-resource crawl history and table row counts
//! - `export`: CSV and/or JSON artifacts re-derived from the store

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use dlcrawl_core::fetch::DlEquityClient;
use dlcrawl_core::{CrawlMode, CrawlRequest, Store};
use dlcrawl_runner::{
    export, CrawlConfig, ExportFormat, ExportOptions, Orchestrator, OrchestratorSettings,
    StatusReport,
};

#[derive(Parser)]
#[command(name = "dlcrawl", about = "Incremental DL Equity market-data crawler")]
struct Cli {
    /// Path to a TOML config file. Defaults to ./dlcrawl.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file. Overrides `store.path` from the config.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and schema.
    Init,
    /// Crawl the remote API into the store (incremental by default).
    Crawl {
        /// Full re-crawl: whole lookback window, every fundamentals entity.
        #[arg(long, default_value_t = false, conflicts_with_all = ["date", "from", "to"])]
        full: bool,

        /// Crawl a single date (YYYY-MM-DD).
        #[arg(long, conflicts_with_all = ["from", "to"])]
        date: Option<NaiveDate>,

        /// Start of a date range (YYYY-MM-DD), inclusive.
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// End of a date range (YYYY-MM-DD), inclusive.
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Skip per-ticker fundamentals (faster daily runs).
        #[arg(long, default_value_t = false)]
        skip_fundamentals: bool,
    },
    /// Show crawl status and record counts.
    Status,
    /// Export tables to CSV and/or JSON.
    Export {
        #[arg(long, value_enum, default_value_t = FormatArg::All)]
        format: FormatArg,

        /// Only export time-series rows dated on or after this day.
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Output directory. Defaults to `export.dir` from the config.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
    All,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Json => ExportFormat::Json,
            FormatArg::All => ExportFormat::All,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = CrawlConfig::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.store.path = db;
    }

    match cli.command {
        Commands::Init => run_init(&config),
        Commands::Crawl {
            full,
            date,
            from,
            to,
            skip_fundamentals,
        } => {
            let mode = match (full, date, from, to) {
                (true, _, _, _) => CrawlMode::Full,
                (_, Some(day), _, _) => CrawlMode::Date(day),
                (_, _, Some(from), Some(to)) => CrawlMode::Range { from, to },
                _ => CrawlMode::Incremental,
            };
            run_crawl(
                &config,
                CrawlRequest {
                    mode,
                    skip_fundamentals,
                },
            )
        }
        Commands::Status => run_status(&config),
        Commands::Export { format, since, out } => {
            let dir = out.unwrap_or_else(|| config.export.dir.clone());
            run_export(
                &config,
                &dir,
                ExportOptions {
                    format: format.into(),
                    since,
                },
            )
        }
    }
}

fn run_init(config: &CrawlConfig) -> Result<()> {
    let path = &config.store.path;
    let store = Store::open(path).with_context(|| format!("open {}", path.display()))?;
    println!(
        "Database initialized: {} (schema version {})",
        path.display(),
        store.schema_version()?
    );
    Ok(())
}

fn run_crawl(config: &CrawlConfig, request: CrawlRequest) -> Result<()> {
    let settings = config.remote_settings()?;
    let client = DlEquityClient::new(settings).context("build HTTP client")?;
    let path = &config.store.path;
    let mut store = Store::open(path).with_context(|| format!("open {}", path.display()))?;

    let summary = Orchestrator::new(
        &mut store,
        &client,
        OrchestratorSettings::from_config(config),
    )
    .run(&request)?;

    println!();
    print!("{}", summary.render());
    println!("\n  Database: {}", path.display());

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_status(config: &CrawlConfig) -> Result<()> {
    let path = existing_db(config)?;
    let store = Store::open(path).with_context(|| format!("open {}", path.display()))?;
    let report = StatusReport::collect(&store)?.with_db_size(path);

    println!("\n  Crawl status: {}\n", path.display());
    print!("{}", report.render());
    Ok(())
}

fn run_export(config: &CrawlConfig, dir: &Path, options: ExportOptions) -> Result<()> {
    let path = existing_db(config)?;
    let store = Store::open(path).with_context(|| format!("open {}", path.display()))?;
    let files = export(&store, dir, &options)?;

    for file in &files {
        println!("  {} ({} records)", file.path.display(), file.records);
    }
    println!("\nExport complete: {} files in {}", files.len(), dir.display());
    Ok(())
}

fn existing_db(config: &CrawlConfig) -> Result<&Path> {
    let path = config.store.path.as_path();
    if !path.exists() {
        bail!(
            "database not found at {}; run 'dlcrawl init' first",
            path.display()
        );
    }
    Ok(path)
}
