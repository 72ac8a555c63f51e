//! Turns raw `VehicleActivity` records into [`VehicleObservation`]s.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::model::VehicleObservation;

/// Why a record was not turned into an observation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing vehicle reference")]
    MissingVehicle,
    #[error("missing next stop reference")]
    MissingNextStop,
    #[error("missing recorded-at timestamp")]
    MissingTimestamp,
    #[error("unparseable timestamp {0:?}")]
    BadTimestamp(String),
}

/// Unwraps `{"value": x}` and other single-key containers down to a scalar.
///
/// Returns `None` for null, arrays, and containers that are neither.
pub fn unwrap_field(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Array(_) => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => {
            if let Some(inner) = map.get("value") {
                return unwrap_field(inner);
            }
            if map.len() == 1 {
                return map.values().next().and_then(unwrap_field);
            }
            None
        }
    }
}

/// Parses an ISO-8601 instant and converts it to UTC.
///
/// Accepts `Z` and numeric offsets; a timestamp with no offset is read as UTC.
/// Fractional seconds are truncated so stored instants subtract to whole seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()?
            .and_utc(),
    };
    Some(parsed.trunc_subsecs(0))
}

fn non_empty(value: &Value) -> Option<String> {
    unwrap_field(value).filter(|s| !s.is_empty())
}

/// Extracts a [`VehicleObservation`] from one `VehicleActivity` record.
pub fn normalize(activity: &Value) -> Result<VehicleObservation, Rejection> {
    let journey = &activity["MonitoredVehicleJourney"];

    let raw_time = non_empty(&activity["RecordedAtTime"]).ok_or(Rejection::MissingTimestamp)?;
    let observed_at =
        parse_timestamp(&raw_time).ok_or_else(|| Rejection::BadTimestamp(raw_time.clone()))?;

    let vehicle_id = non_empty(&journey["VehicleRef"]).ok_or(Rejection::MissingVehicle)?;
    let next_stop_id =
        non_empty(&journey["MonitoredCall"]["StopPointRef"]).ok_or(Rejection::MissingNextStop)?;

    let route_id = non_empty(&journey["LineRef"])
        .or_else(|| non_empty(&journey["PublishedLineName"]))
        .unwrap_or_default();
    let direction_id = unwrap_field(&journey["DirectionRef"]).unwrap_or_default();
    let trip_id = unwrap_field(&journey["FramedVehicleJourneyRef"]["DatedVehicleJourneyRef"])
        .unwrap_or_default();

    Ok(VehicleObservation {
        vehicle_id,
        route_id,
        direction_id,
        trip_id,
        next_stop_id,
        observed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_unwrap_field_forms() {
        assert_eq!(unwrap_field(&json!("M5")), Some("M5".to_string()));
        assert_eq!(unwrap_field(&json!({"value": "M5"})), Some("M5".to_string()));
        assert_eq!(unwrap_field(&json!({"other": "M5"})), Some("M5".to_string()));
        assert_eq!(unwrap_field(&json!(1)), Some("1".to_string()));
        assert_eq!(unwrap_field(&json!({})), None);
        assert_eq!(unwrap_field(&json!({"a": 1, "b": 2})), None);
        assert_eq!(unwrap_field(&json!(null)), None);
        assert_eq!(unwrap_field(&json!(["M5"])), None);
    }

    #[test]
    fn test_value_key_wins_over_siblings() {
        assert_eq!(
            unwrap_field(&json!({"value": "401", "lang": "en"})),
            Some("401".to_string())
        );
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 4, 17, 5, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-04T17:05:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-04T12:05:00-05:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-04T17:05:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-04T17:05:00.123Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-04T17:05:00.999"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_normalize_full_record() {
        let obs = normalize(&activity()).unwrap();
        assert_eq!(obs.vehicle_id, "MTA NYCT_7582");
        assert_eq!(obs.route_id, "MTA NYCT_M5");
        assert_eq!(obs.direction_id, "1");
        assert_eq!(obs.trip_id, "MV_B4-Weekday-053000_M5_101");
        assert_eq!(obs.next_stop_id, "MTA_401921");
        assert_eq!(
            obs.observed_at,
            Utc.with_ymd_and_hms(2024, 3, 4, 17, 5, 0).unwrap()
        );
    }

    #[test]
    fn test_route_falls_back_to_published_name() {
        let mut act = activity();
        act["MonitoredVehicleJourney"]["LineRef"] = json!(null);
        act["MonitoredVehicleJourney"]["PublishedLineName"] = json!({"value": "M5"});
        assert_eq!(normalize(&act).unwrap().route_id, "M5");

        act["MonitoredVehicleJourney"]["PublishedLineName"] = json!(null);
        assert_eq!(normalize(&act).unwrap().route_id, "");
    }

    #[test]
    fn test_optional_fields_default_to_empty() {
        let mut act = activity();
        let journey = act["MonitoredVehicleJourney"].as_object_mut().unwrap();
        journey.remove("DirectionRef");
        journey.remove("FramedVehicleJourneyRef");
        let obs = normalize(&act).unwrap();
        assert_eq!(obs.direction_id, "");
        assert_eq!(obs.trip_id, "");
    }

    #[test]
    fn test_missing_next_stop_is_rejected() {
        let mut act = activity();
        act["MonitoredVehicleJourney"]["MonitoredCall"] = json!({});
        assert_eq!(normalize(&act), Err(Rejection::MissingNextStop));
    }

    #[test]
    fn test_missing_vehicle_is_rejected() {
        let mut act = activity();
        act["MonitoredVehicleJourney"]["VehicleRef"] = json!("");
        assert_eq!(normalize(&act), Err(Rejection::MissingVehicle));
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let mut act = activity();
        act["RecordedAtTime"] = json!("not-a-time");
        assert_eq!(
            normalize(&act),
            Err(Rejection::BadTimestamp("not-a-time".to_string()))
        );

        act.as_object_mut().unwrap().remove("RecordedAtTime");
        assert_eq!(normalize(&act), Err(Rejection::MissingTimestamp));
    }

    fn activity() -> Value {
        json!({
            "RecordedAtTime": "2024-03-04T12:05:00-05:00",
            "MonitoredVehicleJourney": {
                "LineRef": "MTA NYCT_M5",
                "DirectionRef": 1,
                "FramedVehicleJourneyRef": {
                    "DataFrameRef": "2024-03-04",
                    "DatedVehicleJourneyRef": "MV_B4-Weekday-053000_M5_101"
                },
                "PublishedLineName": ["M5"],
                "VehicleRef": {"value": "MTA NYCT_7582"},
                "MonitoredCall": {"StopPointRef": "MTA_401921"}
            }
        })
    }
}
