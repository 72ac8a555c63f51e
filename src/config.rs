//! Environment-driven settings.
//!
//! Everything is read through a lookup function so tests can supply values
//! without touching the process environment. [`from_env`](CollectorConfig::from_env)
//! variants read `std::env` after `dotenvy` has loaded any `.env` file.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::analyzers::aggregate::DEFAULT_CLEAN_BOUNDS;
use crate::analyzers::classify::DEFAULT_Z_CUTOFF;
use crate::model::DurationBounds;
use crate::tracker::DEFAULT_SEGMENT_BOUNDS;

pub const DEFAULT_BASE_URL: &str = "https://bustime.mta.info/api/siri/vehicle-monitoring.json";
pub const DEFAULT_DB_PATH: &str = "segments.sqlite";

/// Reads `key` from the process environment.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has invalid value {raw:?}")),
        None => Ok(default),
    }
}

fn bounds(
    lookup: &impl Fn(&str) -> Option<String>,
    min_key: &str,
    max_key: &str,
    default: DurationBounds,
) -> Result<DurationBounds> {
    let min = parsed(lookup, min_key, default.min_seconds)?;
    let max = parsed(lookup, max_key, default.max_seconds)?;
    if min > max {
        bail!("{min_key} ({min}) is greater than {max_key} ({max})");
    }
    Ok(DurationBounds::new(min, max))
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

/// Tracker bounds from `MIN_SEGMENT_SECONDS` / `MAX_SEGMENT_SECONDS`.
pub fn segment_bounds(lookup: &impl Fn(&str) -> Option<String>) -> Result<DurationBounds> {
    bounds(
        lookup,
        "MIN_SEGMENT_SECONDS",
        "MAX_SEGMENT_SECONDS",
        DEFAULT_SEGMENT_BOUNDS,
    )
}

/// Upstream request timeout from `REQUEST_TIMEOUT`, in seconds.
pub fn request_timeout(lookup: &impl Fn(&str) -> Option<String>) -> Result<Duration> {
    Ok(Duration::from_secs(parsed(lookup, "REQUEST_TIMEOUT", 60)?))
}

/// Path of the SQLite store (`SEGMENTS_DB`).
pub fn db_path(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    optional(lookup, "SEGMENTS_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

/// Upstream query parameters and timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub api_key: String,
    pub base_url: String,
    pub detail_level: String,
    pub line_ref: Option<String>,
    pub direction_ref: Option<String>,
    pub request_timeout: Duration,
}

/// Settings for the ingestion loop.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    pub feed: FeedConfig,
    pub poll_interval: Duration,
    pub db_path: PathBuf,
    pub segment_bounds: DurationBounds,
    pub debug_sample: bool,
}

impl CollectorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    /// Builds the config; a missing `MTA_API_KEY` is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = optional(&lookup, "MTA_API_KEY")
            .context("MTA_API_KEY is not set; export it or add it to .env")?;

        let feed = FeedConfig {
            api_key,
            base_url: optional(&lookup, "FEED_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            detail_level: optional(&lookup, "DETAIL_LEVEL")
                .unwrap_or_else(|| "normal".to_string()),
            line_ref: optional(&lookup, "LINE_REF"),
            direction_ref: optional(&lookup, "DIRECTION_REF"),
            request_timeout: request_timeout(&lookup)?,
        };

        Ok(Self {
            feed,
            poll_interval: Duration::from_secs(parsed(&lookup, "POLL_SECONDS", 30)?),
            db_path: db_path(&lookup),
            segment_bounds: segment_bounds(&lookup)?,
            debug_sample: optional(&lookup, "DEBUG_SAMPLE").as_deref() == Some("1"),
        })
    }
}

/// Settings for the batch cleaning run.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanConfig {
    pub db_path: PathBuf,
    pub bounds: DurationBounds,
    pub z_cutoff: f64,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            bounds: DEFAULT_CLEAN_BOUNDS,
            z_cutoff: DEFAULT_Z_CUTOFF,
        }
    }
}

impl CleanConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let z_cutoff: f64 = parsed(&lookup, "OUTLIER_Z_CUTOFF", DEFAULT_Z_CUTOFF)?;
        if !z_cutoff.is_finite() || z_cutoff < 0.0 {
            bail!("OUTLIER_Z_CUTOFF must be a non-negative number, got {z_cutoff}");
        }

        Ok(Self {
            db_path: db_path(&lookup),
            bounds: bounds(
                &lookup,
                "CLEAN_MIN_SECONDS",
                "CLEAN_MAX_SECONDS",
                DEFAULT_CLEAN_BOUNDS,
            )?,
            z_cutoff,
        })
    }
}
