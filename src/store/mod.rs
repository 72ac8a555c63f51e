//! Persistence for tracking state, raw segments, and cleaned tables.
//!
//! [`TrackingStore`] is the keyed per-vehicle state the tracker reads and writes.
//! [`SegmentStore`] implements it on SQLite and also holds the batch tables.
//! [`MemoryStore`] keeps everything in process memory.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SegmentStore;

use thiserror::Error;

use crate::model::{Segment, VehicleTrackingState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
}

/// Keyed per-vehicle state plus the append-only segment log.
pub trait TrackingStore {
    /// Returns the stored state for `vehicle_id`, if any.
    fn load_state(&self, vehicle_id: &str) -> Result<Option<VehicleTrackingState>, StoreError>;

    /// Upserts `state` and appends `segment` as a single unit of work.
    fn commit_transition(
        &mut self,
        state: &VehicleTrackingState,
        segment: Option<&Segment>,
    ) -> Result<(), StoreError>;
}
