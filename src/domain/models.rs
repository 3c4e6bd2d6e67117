use crate::domain::clock::TimestampMs;
use crate::domain::sensor_value::SensorValue;

/// A message taken off the feed, stamped with the time this process received it.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: TimestampMs,
}

impl InboundMessage {
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub id: i64,
    pub timestamp: String,
    pub station: String,
    pub field: String,
    pub value: SensorValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSensorReading {
    pub timestamp: String,
    pub station: String,
    pub field: String,
    pub value: SensorValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemEvent {
    pub id: i64,
    pub timestamp: String,
    pub station: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSystemEvent {
    pub timestamp: String,
    pub station: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub id: i64,
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlertRecord {
    pub timestamp: String,
    pub message: String,
}
