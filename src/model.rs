//! Core records shared by the collector and the cleaning pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One validated "vehicle is heading to stop X" report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleObservation {
    pub vehicle_id: String,
    pub route_id: String,
    pub direction_id: String,
    pub trip_id: String,
    pub next_stop_id: String,
    pub observed_at: DateTime<Utc>,
}

/// Last known pending stop for a vehicle.
///
/// `current_stop_first_seen_at` is `None` when the persisted anchor is missing
/// or could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleTrackingState {
    pub vehicle_id: String,
    pub route_id: String,
    pub direction_id: String,
    pub trip_id: String,
    pub current_stop_id: String,
    pub current_stop_first_seen_at: Option<DateTime<Utc>>,
}

impl VehicleTrackingState {
    /// State anchored at the observation's next stop and timestamp.
    pub fn anchored_at(obs: &VehicleObservation) -> Self {
        Self {
            vehicle_id: obs.vehicle_id.clone(),
            route_id: obs.route_id.clone(),
            direction_id: obs.direction_id.clone(),
            trip_id: obs.trip_id.clone(),
            current_stop_id: obs.next_stop_id.clone(),
            current_stop_first_seen_at: Some(obs.observed_at),
        }
    }
}

/// A completed stop-to-stop travel time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub route_id: String,
    pub direction_id: String,
    pub vehicle_id: String,
    pub trip_id: String,
    pub from_stop_id: String,
    pub to_stop_id: String,
    pub depart_at: DateTime<Utc>,
    pub arrive_at: DateTime<Utc>,
    pub travel_time_seconds: i64,
    pub recorded_at: DateTime<Utc>,
}

/// A [`Segment`] as read back from the store, with its row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSegment {
    pub id: i64,
    pub segment: Segment,
}

/// Inclusive travel-time bounds in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationBounds {
    pub min_seconds: i64,
    pub max_seconds: i64,
}

impl DurationBounds {
    pub const fn new(min_seconds: i64, max_seconds: i64) -> Self {
        Self {
            min_seconds,
            max_seconds,
        }
    }

    pub fn contains(&self, seconds: i64) -> bool {
        seconds >= self.min_seconds && seconds <= self.max_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_inclusive() {
        let bounds = DurationBounds::new(10, 3600);
        assert!(bounds.contains(10));
        assert!(bounds.contains(3600));
        assert!(!bounds.contains(9));
        assert!(!bounds.contains(3601));
        assert!(!bounds.contains(-5));
    }
}
