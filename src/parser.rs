//! JSON parser for SIRI Vehicle Monitoring responses.

use anyhow::Result;
use serde_json::Value;

/// Decodes a Vehicle Monitoring response body.
///
/// # Errors
///
/// Returns an error if the bytes are not valid JSON.
pub fn parse_feed(bytes: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Returns the `VehicleActivity` records of a decoded response.
///
/// `VehicleMonitoringDelivery` may be an object or a list of objects; only the
/// first delivery of a list is read. Any other shape yields no activities.
pub fn vehicle_activities(payload: &Value) -> &[Value] {
    let delivery = &payload["Siri"]["ServiceDelivery"]["VehicleMonitoringDelivery"];
    let delivery = match delivery {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return &[],
        },
        other => other,
    };

    match &delivery["VehicleActivity"] {
        Value::Array(activities) => activities,
        _ => &[],
    }
}
