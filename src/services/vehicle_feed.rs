//! Trait for sources of SIRI Vehicle Monitoring payloads.

use anyhow::Result;
use serde_json::Value;

/// Abstraction over a Vehicle Monitoring provider (e.g., MTA BusTime).
#[async_trait::async_trait]
pub trait VehicleFeed: Send + Sync {
    /// Fetches and decodes one Vehicle Monitoring response.
    ///
    /// # Errors
    ///
    /// Transport failures, non-2xx statuses, and undecodable bodies.
    async fn fetch_payload(&self) -> Result<Value>;
}
