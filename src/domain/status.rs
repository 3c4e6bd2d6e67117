//! Latest camera status derived from recent system events.
//!
//! The aggregator only sees the most recent window of events. A camera whose last report is
//! older than that window is absent from the report even when nothing newer exists for it.
//! This is a recency-windowed view, not a latest-state index.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::clock::parse_stored_timestamp;
use crate::domain::models::SystemEvent;

pub const DEFAULT_STATUS_WINDOW: u32 = 1000;

const CAMERA_KEY: &str = "camera";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraSnapshot {
    pub timestamp: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(skip)]
    observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatusReport {
    pub cameras: BTreeMap<String, BTreeMap<String, CameraSnapshot>>,
    pub station_last_seen: BTreeMap<String, String>,
}

/// Builds the report from events ordered newest first.
///
/// Stations interleave in the window, so last-seen is a running maximum rather than the first
/// row seen per station. A snapshot is only replaced by a strictly newer one.
pub fn aggregate_camera_status(events: &[SystemEvent]) -> CameraStatusReport {
    let mut cameras: BTreeMap<String, BTreeMap<String, CameraSnapshot>> = BTreeMap::new();
    let mut last_seen: BTreeMap<String, (DateTime<Utc>, String)> = BTreeMap::new();

    for event in events {
        let Some((camera_id, observed_at, payload)) = qualify(event) else {
            continue;
        };

        match last_seen.get(&event.station) {
            Some((seen, _)) if *seen >= observed_at => {}
            _ => {
                last_seen.insert(
                    event.station.clone(),
                    (observed_at, event.timestamp.clone()),
                );
            }
        }

        let station_cameras = cameras.entry(event.station.clone()).or_default();
        let is_newer = station_cameras
            .get(&camera_id)
            .is_none_or(|current| observed_at > current.observed_at);

        if is_newer {
            station_cameras.insert(
                camera_id,
                CameraSnapshot {
                    timestamp: event.timestamp.clone(),
                    payload,
                    observed_at,
                },
            );
        }
    }

    CameraStatusReport {
        cameras,
        station_last_seen: last_seen
            .into_iter()
            .map(|(station, (_, timestamp))| (station, timestamp))
            .collect(),
    }
}

fn qualify(event: &SystemEvent) -> Option<(String, DateTime<Utc>, Map<String, Value>)> {
    let Ok(Value::Object(mut payload)) = serde_json::from_str::<Value>(&event.message) else {
        return None;
    };
    let camera_id = payload.get(CAMERA_KEY).and_then(camera_key)?;
    let observed_at = parse_stored_timestamp(&event.timestamp)?;

    payload.remove("timestamp");

    Some((camera_id, observed_at, payload))
}

/// Missing or falsy identifiers (null, false, 0, empty string/array/object) do not name a
/// camera.
fn camera_key(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) if number.as_f64() != Some(0.0) => Some(number.to_string()),
        Value::Bool(true) => Some(value.to_string()),
        Value::Array(items) if !items.is_empty() => Some(value.to_string()),
        Value::Object(fields) if !fields.is_empty() => Some(value.to_string()),
        _ => None,
    }
}
