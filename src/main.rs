//! CLI entry point for the transit segment collector.
//!
//! Provides subcommands for polling a SIRI Vehicle Monitoring feed into
//! stop-to-stop segments, replaying a saved response, rebuilding the cleaned
//! statistics tables, reporting coverage, and exporting tables to CSV.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_segments::analyzers::analyzer::{clean, coverage, log_coverage};
use transit_segments::collector::{Collector, process_payload};
use transit_segments::config::{self, CleanConfig, CollectorConfig, env_lookup};
use transit_segments::fetch::{BasicClient, fetch_bytes};
use transit_segments::infra::bustime::client::BusTimeClient;
use transit_segments::output::{print_json, write_csv};
use transit_segments::parser::parse_feed;
use transit_segments::store::SegmentStore;
use transit_segments::tracker::SegmentTracker;

#[derive(Parser)]
#[command(name = "transit_segments")]
#[command(about = "Collects and cleans stop-to-stop bus travel times", long_about = None)]
struct Cli {
    /// SQLite database path (overrides SEGMENTS_DB)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Table {
    /// Cleaned segments with outlier flags
    Clean,
    /// Per-group robust statistics
    Stats,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the Vehicle Monitoring feed and record segments
    Collect {
        /// Number of polls to run (0 = until stopped)
        #[arg(short = 'n', long, default_value_t = 0)]
        max_ticks: usize,
    },
    /// Process one saved Vehicle Monitoring response from a file or URL
    IngestFile {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,
    },
    /// Rebuild the cleaned segment and statistics tables
    Clean,
    /// Report coverage of the cleaned tables
    Report {
        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Export a cleaned table to CSV
    Export {
        /// Table to export
        #[arg(short, long, value_enum)]
        table: Table,

        /// CSV file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Gzip compress the CSV
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_segments.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_segments.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(|| config::db_path(&env_lookup));

    match cli.command {
        Commands::Collect { max_ticks } => {
            let mut config = CollectorConfig::from_env()?;
            config.db_path = db_path;
            collect(config, max_ticks).await?;
        }
        Commands::IngestFile { source } => {
            let bounds = config::segment_bounds(&env_lookup)?;
            let mut store = open_store(&db_path)?;
            let timeout = config::request_timeout(&env_lookup)?;
            let bytes = fetcher(&source, timeout).await?;
            let payload = parse_feed(&bytes)?;

            let summary =
                process_payload(&SegmentTracker::new(bounds), &mut store, &payload, Utc::now());
            info!(
                processed = summary.processed,
                skipped = summary.skipped,
                segments = summary.segments,
                discarded = summary.discarded,
                vehicles_seen = summary.vehicles_seen,
                "File ingested"
            );
        }
        Commands::Clean => {
            let mut config = CleanConfig::from_env()?;
            config.db_path = db_path;
            info!(
                db = %config.db_path.display(),
                min = config.bounds.min_seconds,
                max = config.bounds.max_seconds,
                cutoff = config.z_cutoff,
                "Cleaning segments"
            );

            let mut store = open_store(&config.db_path)?;
            clean(&mut store, &config)?;
            log_coverage(&coverage(&store)?);
        }
        Commands::Report { json } => {
            let store = open_store(&db_path)?;
            let report = coverage(&store)?;
            if json {
                print_json(&report)?;
            } else {
                log_coverage(&report);
            }
        }
        Commands::Export {
            table,
            output,
            gzip,
        } => {
            let store = open_store(&db_path)?;
            let written = match table {
                Table::Clean => write_csv(&output, &store.load_cleaned()?, gzip)?,
                Table::Stats => write_csv(&output, &store.load_group_stats()?, gzip)?,
            };
            info!(rows = written, path = %output.display(), "Export complete");
        }
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<SegmentStore> {
    SegmentStore::open(path).with_context(|| format!("Failed to open store {}", path.display()))
}

/// Loads a Vehicle Monitoring response from a local file path or fetches it over HTTP.
#[tracing::instrument]
async fn fetcher(url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let bytes = if url.starts_with("http") {
        let client = BasicClient::new(timeout)?;
        fetch_bytes(&client, url).await?
    } else {
        std::fs::read(url)?
    };
    Ok(bytes)
}

/// Runs the ingestion loop until `max_ticks` polls complete or Ctrl+C.
#[tracing::instrument(skip(config), fields(db = %config.db_path.display()))]
async fn collect(config: CollectorConfig, max_ticks: usize) -> Result<()> {
    info!(
        poll_seconds = config.poll_interval.as_secs(),
        detail_level = %config.feed.detail_level,
        min_segment = config.segment_bounds.min_seconds,
        max_segment = config.segment_bounds.max_seconds,
        "Collector starting"
    );

    match &config.feed.line_ref {
        Some(line) => info!(line = %line, "Filtering LineRef"),
        None => warn!("No LineRef filter set. This may be heavy. Consider setting LINE_REF."),
    }

    let store = open_store(&config.db_path)?;
    let feed = BusTimeClient::new(&config.feed)?;
    let mut collector = Collector::new(
        feed,
        store,
        SegmentTracker::new(config.segment_bounds),
        config.poll_interval,
    )
    .with_debug_sample(config.debug_sample);

    tokio::select! {
        result = collector.run(max_ticks) => result?,
        _ = tokio::signal::ctrl_c() => info!("Stopped by user (Ctrl+C)"),
    }

    Ok(())
}
