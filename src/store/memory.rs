use std::collections::HashMap;

use super::{StoreError, TrackingStore};
use crate::model::{Segment, VehicleTrackingState};

/// In-process [`TrackingStore`] keyed by vehicle id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: HashMap<String, VehicleTrackingState>,
    segments: Vec<Segment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or overwrites a vehicle's state directly.
    pub fn put_state(&mut self, state: VehicleTrackingState) {
        self.states.insert(state.vehicle_id.clone(), state);
    }

    pub fn state(&self, vehicle_id: &str) -> Option<&VehicleTrackingState> {
        self.states.get(vehicle_id)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn vehicle_count(&self) -> usize {
        self.states.len()
    }
}

impl TrackingStore for MemoryStore {
    fn load_state(&self, vehicle_id: &str) -> Result<Option<VehicleTrackingState>, StoreError> {
        Ok(self.states.get(vehicle_id).cloned())
    }

    fn commit_transition(
        &mut self,
        state: &VehicleTrackingState,
        segment: Option<&Segment>,
    ) -> Result<(), StoreError> {
        self.states.insert(state.vehicle_id.clone(), state.clone());
        if let Some(segment) = segment {
            self.segments.push(segment.clone());
        }
        Ok(())
    }
}
