use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const HUMAN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampMs(pub i64);

pub trait Clock {
    fn now(&self) -> TimestampMs;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(Utc::now().timestamp_millis())
    }
}

/// Receipt timestamps are stored as UTC RFC 3339 with millisecond precision, which keeps
/// lexicographic and chronological order identical.
pub fn timestamp_to_iso8601(timestamp: TimestampMs) -> String {
    let datetime = DateTime::<Utc>::from_timestamp_millis(timestamp.0)
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a stored timestamp. Rows written before receipt times carried an offset use naive
/// ISO 8601 text, which is read as UTC.
pub fn parse_stored_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, LEGACY_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn format_human_timestamp(value: &str) -> String {
    parse_stored_timestamp(value)
        .map(|parsed| parsed.format(HUMAN_TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| value.to_string())
}
