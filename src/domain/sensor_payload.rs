use serde_json::Value;
use thiserror::Error;

use crate::domain::models::NewSensorReading;
use crate::domain::sensor_value::SensorValue;

pub const TIME_KEY: &str = "time";
pub const RAW_FIELD: &str = "raw";

#[derive(Debug, Clone, PartialEq)]
pub struct SensorField {
    pub field: String,
    pub value: SensorValue,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload must be a JSON object")]
    InvalidPayloadType,
}

/// Decoded sensor message. A payload that is not a JSON object is carried verbatim so it can
/// be stored as a single `raw` reading instead of being dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorPayload {
    Fields(Vec<SensorField>),
    Raw { text: String, reason: PayloadError },
}

impl SensorPayload {
    pub fn decode(text: &str) -> Self {
        match parse_sensor_fields(text) {
            Ok(fields) => Self::Fields(fields),
            Err(reason) => Self::Raw {
                text: text.to_string(),
                reason,
            },
        }
    }

    pub fn into_readings(self, timestamp: &str, station: &str) -> Vec<NewSensorReading> {
        let reading = |field: String, value: SensorValue| NewSensorReading {
            timestamp: timestamp.to_string(),
            station: station.to_string(),
            field,
            value,
        };

        match self {
            Self::Fields(fields) => fields
                .into_iter()
                .map(|field| reading(field.field, field.value))
                .collect(),
            Self::Raw { text, .. } => vec![reading(RAW_FIELD.to_string(), SensorValue::Text(text))],
        }
    }
}

pub fn parse_sensor_fields(text: &str) -> Result<Vec<SensorField>, PayloadError> {
    let payload: Value =
        serde_json::from_str(text).map_err(|error| PayloadError::InvalidJson(error.to_string()))?;
    let object = payload.as_object().ok_or(PayloadError::InvalidPayloadType)?;

    Ok(object
        .iter()
        .filter(|(key, _)| key.as_str() != TIME_KEY)
        .map(|(key, value)| SensorField {
            field: key.clone(),
            value: SensorValue::from_json(value),
        })
        .collect())
}
