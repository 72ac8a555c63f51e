use anyhow::{Context, Result};
use tracing::info;

use crate::analyzers::aggregate::{aggregate, key_within_bounds};
use crate::analyzers::classify::classify;
use crate::analyzers::types::{CleanSummary, CoverageReport, GroupStatsRow};
use crate::config::CleanConfig;
use crate::store::SegmentStore;

/// Groups shown in the low-coverage list have fewer samples than this.
pub const LOW_COVERAGE_SAMPLES: usize = 5;
const LOW_COVERAGE_LIMIT: usize = 20;
const TOP_ROUTES: usize = 15;

/// Rebuilds `segment_stats` and `segments_clean` from every raw segment.
///
/// Either both tables are replaced or neither is.
#[tracing::instrument(skip_all, fields(
    min = config.bounds.min_seconds,
    max = config.bounds.max_seconds,
    cutoff = config.z_cutoff,
))]
pub fn clean(store: &mut SegmentStore, config: &CleanConfig) -> Result<CleanSummary> {
    let segments = store
        .load_segments()
        .context("Failed to read raw segments")?;

    let keyed = key_within_bounds(&segments, config.bounds);
    let stats = aggregate(&keyed);
    let cleaned = classify(&keyed, &stats, config.z_cutoff);

    let rows: Vec<GroupStatsRow> = stats
        .iter()
        .map(|(key, s)| GroupStatsRow::new(key, s))
        .collect();

    store
        .replace_aggregates(&rows, &cleaned)
        .context("Failed to replace cleaned tables")?;

    let summary = CleanSummary {
        raw_segments: segments.len(),
        within_bounds: keyed.len(),
        groups: rows.len(),
        outliers: cleaned.iter().filter(|c| c.is_outlier).count(),
    };

    info!(
        raw = summary.raw_segments,
        within_bounds = summary.within_bounds,
        groups = summary.groups,
        outliers = summary.outliers,
        "Cleaning run complete"
    );

    Ok(summary)
}

/// Reads the coverage report for the current cleaned tables.
pub fn coverage(store: &SegmentStore) -> Result<CoverageReport> {
    store
        .coverage_report(TOP_ROUTES, LOW_COVERAGE_SAMPLES, LOW_COVERAGE_LIMIT)
        .context("Failed to build coverage report")
}

/// Logs a coverage report as structured lines.
pub fn log_coverage(report: &CoverageReport) {
    info!(raw = report.raw_segments, "Raw segments");
    info!(kept = report.kept_segments, "Clean kept (non-outliers)");
    info!(outliers = report.outlier_segments, "Outliers flagged");

    for route in &report.top_routes {
        info!(route = %route.route_id, samples = route.samples, "Top route by clean samples");
    }

    for row in &report.low_coverage {
        info!(
            route = %row.route_id,
            direction = %row.direction_id,
            from = %row.from_stop_id,
            to = %row.to_stop_id,
            bucket = %row.time_bucket,
            samples = row.sample_count,
            "Low-coverage stop pair"
        );
    }

    info!(
        pairs = report.unique_stop_pairs,
        "Unique (route, direction, from, to) pairs in clean data"
    );
}
