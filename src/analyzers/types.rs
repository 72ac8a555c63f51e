//! Data types used by the cleaning pipeline.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;

use crate::model::Segment;

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Route, direction, stop pair and UTC time-of-week bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub route_id: String,
    pub direction_id: String,
    pub from_stop_id: String,
    pub to_stop_id: String,
    /// 0 = Monday .. 6 = Sunday.
    pub day_of_week: u8,
    pub hour_of_day: u8,
}

impl GroupKey {
    /// Keys a segment by its arrival instant.
    pub fn for_segment(segment: &Segment) -> Self {
        let (day_of_week, hour_of_day) = time_of_week(segment.arrive_at);
        Self {
            route_id: segment.route_id.clone(),
            direction_id: segment.direction_id.clone(),
            from_stop_id: segment.from_stop_id.clone(),
            to_stop_id: segment.to_stop_id.clone(),
            day_of_week,
            hour_of_day,
        }
    }

    /// Display label such as `Mon-17`.
    pub fn time_bucket(&self) -> String {
        let day = WEEKDAYS
            .get(usize::from(self.day_of_week))
            .copied()
            .unwrap_or("???");
        format!("{}-{:02}", day, self.hour_of_day)
    }
}

/// UTC weekday (Monday = 0) and hour of `at`.
pub fn time_of_week(at: DateTime<Utc>) -> (u8, u8) {
    // both fit in u8: 0..7 and 0..24
    (
        at.weekday().num_days_from_monday() as u8,
        at.hour() as u8,
    )
}

/// Robust summary of one group's travel times, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupStats {
    pub sample_count: usize,
    pub median_seconds: f64,
    pub mad_seconds: f64,
    pub p10_seconds: f64,
    pub p90_seconds: f64,
}

/// A `segment_stats` row: key columns plus statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStatsRow {
    pub route_id: String,
    pub direction_id: String,
    pub from_stop_id: String,
    pub to_stop_id: String,
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub time_bucket: String,
    pub sample_count: usize,
    pub median_seconds: f64,
    pub mad_seconds: f64,
    pub p10_seconds: f64,
    pub p90_seconds: f64,
}

impl GroupStatsRow {
    pub fn new(key: &GroupKey, stats: &GroupStats) -> Self {
        Self {
            route_id: key.route_id.clone(),
            direction_id: key.direction_id.clone(),
            from_stop_id: key.from_stop_id.clone(),
            to_stop_id: key.to_stop_id.clone(),
            day_of_week: key.day_of_week,
            hour_of_day: key.hour_of_day,
            time_bucket: key.time_bucket(),
            sample_count: stats.sample_count,
            median_seconds: stats.median_seconds,
            mad_seconds: stats.mad_seconds,
            p10_seconds: stats.p10_seconds,
            p90_seconds: stats.p90_seconds,
        }
    }
}

/// A raw segment annotated with its group key and outlier flag.
///
/// `id` is the raw segment's row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanedSegment {
    pub id: i64,
    pub route_id: String,
    pub direction_id: String,
    pub vehicle_id: String,
    pub trip_id: String,
    pub from_stop_id: String,
    pub to_stop_id: String,
    pub depart_at: DateTime<Utc>,
    pub arrive_at: DateTime<Utc>,
    pub travel_time_seconds: i64,
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub time_bucket: String,
    pub is_outlier: bool,
}

/// Counts from one cleaning run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanSummary {
    pub raw_segments: usize,
    pub within_bounds: usize,
    pub groups: usize,
    pub outliers: usize,
}

/// Sample counts for one route among kept segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteCoverage {
    pub route_id: String,
    pub samples: usize,
}

/// Coverage overview of the cleaned tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub raw_segments: usize,
    pub kept_segments: usize,
    pub outlier_segments: usize,
    pub top_routes: Vec<RouteCoverage>,
    pub low_coverage: Vec<GroupStatsRow>,
    pub unique_stop_pairs: usize,
}
