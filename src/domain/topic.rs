//! Topic classification.
//!
//! Topics follow `<station>/<kind>[/<rest>...]`. Only the kind segment decides where a message
//! goes, so every topic lands in exactly one class.

const SENSORS_SEGMENT: &str = "sensors";
const ALERTS_SEGMENT: &str = "alerts";
const STATUS_SEGMENT: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Sensor,
    Alert,
    /// Requires at least one segment after `status`, e.g. `loft/status/cam1`.
    Status,
    Unrouted,
}

impl TopicKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::Alert => "alert",
            Self::Status => "status",
            Self::Unrouted => "unrouted",
        }
    }

    /// Alerts are persisted and also handed to the notifier.
    pub fn notifies(self) -> bool {
        matches!(self, Self::Alert)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route<'a> {
    pub station: &'a str,
    pub kind: TopicKind,
}

pub fn classify(topic: &str) -> Route<'_> {
    let mut segments = topic.split('/');
    let station = segments.next().unwrap_or_default();
    let kind_segment = segments.next();
    let has_rest = segments.next().is_some();

    let kind = match kind_segment {
        Some(segment) if segment.eq_ignore_ascii_case(SENSORS_SEGMENT) => TopicKind::Sensor,
        Some(segment) if segment.eq_ignore_ascii_case(ALERTS_SEGMENT) => TopicKind::Alert,
        Some(segment) if segment.eq_ignore_ascii_case(STATUS_SEGMENT) && has_rest => {
            TopicKind::Status
        }
        _ => TopicKind::Unrouted,
    };

    Route { station, kind }
}
