use std::collections::BTreeMap;

use crate::analyzers::types::{GroupKey, GroupStats};
use crate::analyzers::utility::{median, median_absolute_deviation, nearest_rank};
use crate::model::{DurationBounds, StoredSegment};

/// Default hard bounds applied before any statistics, in seconds.
pub const DEFAULT_CLEAN_BOUNDS: DurationBounds = DurationBounds::new(10, 1800);

/// A raw segment paired with its group key.
#[derive(Debug, Clone)]
pub struct KeyedSegment<'a> {
    pub key: GroupKey,
    pub stored: &'a StoredSegment,
}

/// Keys every segment whose travel time lies within `bounds`; the rest are dropped.
pub fn key_within_bounds(
    segments: &[StoredSegment],
    bounds: DurationBounds,
) -> Vec<KeyedSegment<'_>> {
    segments
        .iter()
        .filter(|s| bounds.contains(s.segment.travel_time_seconds))
        .map(|stored| KeyedSegment {
            key: GroupKey::for_segment(&stored.segment),
            stored,
        })
        .collect()
}

/// Partitions travel times by key, each series sorted ascending.
pub fn group_durations(keyed: &[KeyedSegment<'_>]) -> BTreeMap<GroupKey, Vec<f64>> {
    let mut groups: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();
    for k in keyed {
        groups
            .entry(k.key.clone())
            .or_default()
            .push(k.stored.segment.travel_time_seconds as f64);
    }
    for series in groups.values_mut() {
        series.sort_by(f64::total_cmp);
    }
    groups
}

/// Median, MAD and p10/p90 of one ascending series. `None` if empty.
pub fn summarize(sorted: &[f64]) -> Option<GroupStats> {
    let median_seconds = median(sorted)?;
    Some(GroupStats {
        sample_count: sorted.len(),
        median_seconds,
        mad_seconds: median_absolute_deviation(sorted, median_seconds)?,
        p10_seconds: nearest_rank(sorted, 10)?,
        p90_seconds: nearest_rank(sorted, 90)?,
    })
}

/// Robust statistics for every group present in `keyed`.
pub fn aggregate(keyed: &[KeyedSegment<'_>]) -> BTreeMap<GroupKey, GroupStats> {
    group_durations(keyed)
        .into_iter()
        .filter_map(|(key, series)| summarize(&series).map(|stats| (key, stats)))
        .collect()
}
