//! The polling loop: fetch, normalize, track, persist.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::normalize::normalize;
use crate::parser::vehicle_activities;
use crate::services::vehicle_feed::VehicleFeed;
use crate::store::TrackingStore;
use crate::tracker::SegmentTracker;

/// Counts for one fetch-and-process cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub vehicles_seen: usize,
    pub processed: usize,
    /// Rejected records plus observations whose write failed.
    pub skipped: usize,
    pub segments: usize,
    pub discarded: usize,
}

/// Runs every activity of one decoded payload through the tracker.
pub fn process_payload<S: TrackingStore>(
    tracker: &SegmentTracker,
    store: &mut S,
    payload: &Value,
    recorded_at: DateTime<Utc>,
) -> TickSummary {
    let activities = vehicle_activities(payload);

    let mut rejected = 0;
    let observations: Vec<_> = activities
        .iter()
        .filter_map(|act| match normalize(act) {
            Ok(obs) => Some(obs),
            Err(reason) => {
                rejected += 1;
                debug!(%reason, "Activity rejected");
                None
            }
        })
        .collect();

    let batch = tracker.process_batch(store, &observations, recorded_at);

    TickSummary {
        vehicles_seen: activities.len(),
        processed: batch.processed,
        skipped: batch.skipped + rejected,
        segments: batch.segments,
        discarded: batch.discarded,
    }
}

fn log_sample(payload: &Value) {
    let Some(sample) = vehicle_activities(payload).first() else {
        return;
    };
    let keys = |v: &Value| -> Vec<String> {
        v.as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    };
    let journey = &sample["MonitoredVehicleJourney"];
    info!(keys = ?keys(sample), "Sample VehicleActivity keys");
    info!(keys = ?keys(journey), "Sample MonitoredVehicleJourney keys");
    info!(call = %journey["MonitoredCall"], "Sample MonitoredCall");
}

/// Drives a [`VehicleFeed`] into a [`TrackingStore`] on a fixed interval.
pub struct Collector<F, S> {
    feed: F,
    store: S,
    tracker: SegmentTracker,
    poll_interval: Duration,
    debug_sample: bool,
    sample_logged: bool,
}

impl<F: VehicleFeed, S: TrackingStore> Collector<F, S> {
    pub fn new(feed: F, store: S, tracker: SegmentTracker, poll_interval: Duration) -> Self {
        Self {
            feed,
            store,
            tracker,
            poll_interval,
            debug_sample: false,
            sample_logged: false,
        }
    }

    /// Logs the shape of the first activity once per run.
    pub fn with_debug_sample(mut self, enabled: bool) -> Self {
        self.debug_sample = enabled;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetches once and processes the result.
    ///
    /// # Errors
    ///
    /// Only fetch/decode failures; per-record problems are counted instead.
    pub async fn tick(&mut self) -> Result<TickSummary> {
        let payload = self.feed.fetch_payload().await?;

        if self.debug_sample && !self.sample_logged {
            log_sample(&payload);
            self.sample_logged = !vehicle_activities(&payload).is_empty();
        }

        Ok(process_payload(
            &self.tracker,
            &mut self.store,
            &payload,
            Utc::now(),
        ))
    }

    /// Ticks until `max_ticks` cycles have run (0 = forever).
    ///
    /// A failed fetch is logged and retried on the next tick.
    pub async fn run(&mut self, max_ticks: usize) -> Result<()> {
        let mut ticks = 0;

        loop {
            ticks += 1;

            match self.tick().await {
                Ok(summary) => info!(
                    processed = summary.processed,
                    skipped = summary.skipped,
                    segments = summary.segments,
                    discarded = summary.discarded,
                    vehicles_seen = summary.vehicles_seen,
                    "Tick"
                ),
                Err(e) => error!(error = %format!("{e:#}"), "Vehicle Monitoring fetch failed"),
            }

            if max_ticks > 0 && ticks >= max_ticks {
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        info!(ticks, "Collector finished");
        Ok(())
    }
}
