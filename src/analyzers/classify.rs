use std::collections::BTreeMap;

use crate::analyzers::aggregate::KeyedSegment;
use crate::analyzers::types::{CleanedSegment, GroupKey, GroupStats};
use crate::analyzers::utility::modified_z_score;

/// Default modified z-score cutoff.
pub const DEFAULT_Z_CUTOFF: f64 = 6.0;

/// Whether `seconds` is an outlier for `stats`.
///
/// Groups without stats or with zero MAD never flag anything.
pub fn is_outlier(seconds: f64, stats: Option<&GroupStats>, cutoff: f64) -> bool {
    stats
        .and_then(|s| modified_z_score(seconds, s.median_seconds, s.mad_seconds))
        .is_some_and(|z| z.abs() > cutoff)
}

/// Builds the cleaned table, ordered by raw segment id.
pub fn classify(
    keyed: &[KeyedSegment<'_>],
    stats: &BTreeMap<GroupKey, GroupStats>,
    cutoff: f64,
) -> Vec<CleanedSegment> {
    let mut cleaned: Vec<CleanedSegment> = keyed
        .iter()
        .map(|k| {
            let seg = &k.stored.segment;
            CleanedSegment {
                id: k.stored.id,
                route_id: seg.route_id.clone(),
                direction_id: seg.direction_id.clone(),
                vehicle_id: seg.vehicle_id.clone(),
                trip_id: seg.trip_id.clone(),
                from_stop_id: seg.from_stop_id.clone(),
                to_stop_id: seg.to_stop_id.clone(),
                depart_at: seg.depart_at,
                arrive_at: seg.arrive_at,
                travel_time_seconds: seg.travel_time_seconds,
                day_of_week: k.key.day_of_week,
                hour_of_day: k.key.hour_of_day,
                time_bucket: k.key.time_bucket(),
                is_outlier: is_outlier(
                    seg.travel_time_seconds as f64,
                    stats.get(&k.key),
                    cutoff,
                ),
            }
        })
        .collect();
    cleaned.sort_by_key(|c| c.id);
    cleaned
}
