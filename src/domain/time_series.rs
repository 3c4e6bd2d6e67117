use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::clock::parse_stored_timestamp;
use crate::domain::models::SensorReading;
use crate::domain::sensor_value::SensorValue;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: String,
    pub value: SensorValue,
}

/// field → points ordered ascending by timestamp.
pub type FieldSeries = BTreeMap<String, Vec<SeriesPoint>>;

/// station → field series.
pub type StationSeries = BTreeMap<String, FieldSeries>;

/// Groups one station's readings by field. Ordering is by parsed timestamp and stable, so
/// rows sharing a receipt time keep their insertion order. Unparseable timestamps sort first.
pub fn assemble_field_series(readings: Vec<SensorReading>) -> FieldSeries {
    let mut keyed: Vec<_> = readings
        .into_iter()
        .map(|reading| (parse_stored_timestamp(&reading.timestamp), reading))
        .collect();
    keyed.sort_by(|(left, _), (right, _)| left.cmp(right));

    let mut series = FieldSeries::new();
    for (_, reading) in keyed {
        series.entry(reading.field).or_default().push(SeriesPoint {
            timestamp: reading.timestamp,
            value: reading.value,
        });
    }

    series
}

#[cfg(test)]
mod tests {
    use super::assemble_field_series;
    use crate::domain::clock::parse_stored_timestamp;
    use crate::domain::models::SensorReading;
    use crate::domain::sensor_value::SensorValue;

    fn reading(id: i64, timestamp: &str, field: &str, value: f64) -> SensorReading {
        SensorReading {
            id,
            timestamp: timestamp.to_string(),
            station: "loft".to_string(),
            field: field.to_string(),
            value: SensorValue::Number(value),
        }
    }

    #[test]
    fn groups_by_field_in_ascending_time() {
        let series = assemble_field_series(vec![
            reading(3, "2026-02-20T10:02:00.000Z", "temperature", 22.0),
            reading(1, "2026-02-20T10:00:00.000Z", "temperature", 20.0),
            reading(2, "2026-02-20T10:01:00.000Z", "humidity", 40.0),
            reading(4, "2026-02-20T10:01:00", "temperature", 21.0),
        ]);

        assert_eq!(series.len(), 2);
        let temperature = &series["temperature"];
        assert_eq!(temperature.len(), 3);
        assert!(temperature.windows(2).all(|pair| {
            parse_stored_timestamp(&pair[0].timestamp) <= parse_stored_timestamp(&pair[1].timestamp)
        }));
        assert_eq!(temperature[1].value, SensorValue::Number(21.0));
    }

    #[test]
    fn keeps_insertion_order_for_equal_timestamps() {
        let series = assemble_field_series(vec![
            reading(1, "2026-02-20T10:00:00.000Z", "rain", 1.0),
            reading(2, "2026-02-20T10:00:00.000Z", "rain", 2.0),
        ]);

        let values: Vec<_> = series["rain"].iter().map(|point| &point.value).collect();
        assert_eq!(
            values,
            vec![&SensorValue::Number(1.0), &SensorValue::Number(2.0)]
        );
    }

    #[test]
    fn empty_input_yields_empty_series() {
        assert!(assemble_field_series(Vec::new()).is_empty());
    }
}
