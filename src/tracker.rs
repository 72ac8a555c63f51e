//! Per-vehicle stop-to-stop segment detection.
//!
//! A vehicle is either unseen or tracking the stop it is heading toward
//! together with the instant that stop was first reported. When the reported
//! next stop changes, the elapsed time since that first report is one segment.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::model::{DurationBounds, Segment, VehicleObservation, VehicleTrackingState};
use crate::store::{StoreError, TrackingStore};

/// Default inclusive tracker bounds in seconds.
pub const DEFAULT_SEGMENT_BOUNDS: DurationBounds = DurationBounds::new(10, 3600);

/// What a single observation did to its vehicle's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// First sighting, or stored state had no stop.
    Started,
    /// Same pending stop; metadata refreshed, anchor kept.
    Refreshed,
    /// Stop changed within bounds.
    Emitted(Segment),
    /// Stop changed but the elapsed time was outside bounds.
    Discarded { travel_time_seconds: i64 },
    /// Stored anchor was missing, so the vehicle was re-anchored.
    Reset,
}

/// Result of applying one observation to a prior state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: VehicleTrackingState,
    pub outcome: Outcome,
}

impl Transition {
    pub fn segment(&self) -> Option<&Segment> {
        match &self.outcome {
            Outcome::Emitted(segment) => Some(segment),
            _ => None,
        }
    }
}

fn prefer(prior: &str, current: &str) -> String {
    if prior.is_empty() {
        current.to_string()
    } else {
        prior.to_string()
    }
}

/// Computes the next state for `obs` given the vehicle's `prior` state.
///
/// `recorded_at` stamps any emitted segment.
pub fn advance(
    prior: Option<&VehicleTrackingState>,
    obs: &VehicleObservation,
    bounds: DurationBounds,
    recorded_at: DateTime<Utc>,
) -> Transition {
    let prev = match prior {
        Some(prev) if !prev.current_stop_id.is_empty() => prev,
        _ => {
            return Transition {
                state: VehicleTrackingState::anchored_at(obs),
                outcome: Outcome::Started,
            };
        }
    };

    if obs.next_stop_id == prev.current_stop_id {
        let mut state = VehicleTrackingState::anchored_at(obs);
        state.current_stop_first_seen_at = prev.current_stop_first_seen_at;
        return Transition {
            state,
            outcome: Outcome::Refreshed,
        };
    }

    let state = VehicleTrackingState::anchored_at(obs);
    let Some(depart_at) = prev.current_stop_first_seen_at else {
        return Transition {
            state,
            outcome: Outcome::Reset,
        };
    };

    let travel_time_seconds = (obs.observed_at - depart_at).num_seconds();
    if !bounds.contains(travel_time_seconds) {
        return Transition {
            state,
            outcome: Outcome::Discarded {
                travel_time_seconds,
            },
        };
    }

    let segment = Segment {
        route_id: prefer(&prev.route_id, &obs.route_id),
        direction_id: prefer(&prev.direction_id, &obs.direction_id),
        vehicle_id: obs.vehicle_id.clone(),
        trip_id: prefer(&prev.trip_id, &obs.trip_id),
        from_stop_id: prev.current_stop_id.clone(),
        to_stop_id: obs.next_stop_id.clone(),
        depart_at,
        arrive_at: obs.observed_at,
        travel_time_seconds,
        recorded_at,
    };

    Transition {
        state,
        outcome: Outcome::Emitted(segment),
    }
}

/// Counts for one batch of observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub segments: usize,
    pub discarded: usize,
}

/// Applies observations against a [`TrackingStore`].
///
/// Holds only its bounds; all vehicle state lives in the store.
#[derive(Debug, Clone, Copy)]
pub struct SegmentTracker {
    bounds: DurationBounds,
}

impl Default for SegmentTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_BOUNDS)
    }
}

impl SegmentTracker {
    pub fn new(bounds: DurationBounds) -> Self {
        Self { bounds }
    }

    /// Loads, advances, and persists one vehicle's state.
    pub fn observe<S: TrackingStore>(
        &self,
        store: &mut S,
        obs: &VehicleObservation,
        recorded_at: DateTime<Utc>,
    ) -> Result<Outcome, StoreError> {
        let prior = store.load_state(&obs.vehicle_id)?;
        let transition = advance(prior.as_ref(), obs, self.bounds, recorded_at);
        store.commit_transition(&transition.state, transition.segment())?;
        Ok(transition.outcome)
    }

    /// Processes observations in order; a store failure skips only that one.
    pub fn process_batch<S: TrackingStore>(
        &self,
        store: &mut S,
        observations: &[VehicleObservation],
        recorded_at: DateTime<Utc>,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for obs in observations {
            match self.observe(store, obs, recorded_at) {
                Ok(outcome) => {
                    summary.processed += 1;
                    match outcome {
                        Outcome::Emitted(segment) => {
                            summary.segments += 1;
                            debug!(
                                vehicle = %segment.vehicle_id,
                                from = %segment.from_stop_id,
                                to = %segment.to_stop_id,
                                seconds = segment.travel_time_seconds,
                                "Segment recorded"
                            );
                        }
                        Outcome::Discarded {
                            travel_time_seconds,
                        } => {
                            summary.discarded += 1;
                            debug!(
                                vehicle = %obs.vehicle_id,
                                seconds = travel_time_seconds,
                                "Implausible segment dropped"
                            );
                        }
                        Outcome::Reset => {
                            debug!(vehicle = %obs.vehicle_id, "Vehicle state had no anchor, reset");
                        }
                        Outcome::Started | Outcome::Refreshed => {}
                    }
                }
                Err(e) => {
                    summary.skipped += 1;
                    warn!(vehicle = %obs.vehicle_id, error = %e, "Failed to store observation");
                }
            }
        }

        summary
    }
}
