use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use thiserror::Error;

use crate::domain::models::{
    AlertRecord, NewAlertRecord, NewSensorReading, NewSystemEvent, SensorReading, SystemEvent,
};
use crate::domain::sensor_value::SensorValue;

pub const LATEST_SCHEMA_VERSION: u32 = 2;

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        r#"
CREATE TABLE IF NOT EXISTS sensor_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT,
    station TEXT,
    field TEXT,
    value TEXT
);

CREATE TABLE IF NOT EXISTS system_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT,
    station TEXT,
    message TEXT
);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT,
    message TEXT
);
"#,
    ),
    (
        2,
        r#"
ALTER TABLE sensor_data ADD COLUMN value_kind TEXT;

CREATE INDEX IF NOT EXISTS idx_sensor_data_station_timestamp
ON sensor_data (station, timestamp);

CREATE INDEX IF NOT EXISTS idx_system_events_timestamp_desc
ON system_events (timestamp DESC);

CREATE INDEX IF NOT EXISTS idx_alerts_timestamp_desc
ON alerts (timestamp DESC);
"#,
    ),
];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

impl DbError {
    /// Lock contention with another connection, usually the other process.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(error, _)) => matches!(
                error.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedTable {
    SensorData,
    SystemEvents,
    Alerts,
}

impl FeedTable {
    fn table_name(self) -> &'static str {
        match self {
            Self::SensorData => "sensor_data",
            Self::SystemEvents => "system_events",
            Self::Alerts => "alerts",
        }
    }
}

/// Opens (creating if missing) the store in WAL mode so the ingest process and the query
/// process can share the file.
pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let connection = Connection::open(path)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
        row.get::<_, String>(0)
    })?;

    Ok(connection)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Writes every reading of one message in a single transaction.
pub fn insert_sensor_readings(
    connection: &mut Connection,
    readings: &[NewSensorReading],
) -> Result<usize, DbError> {
    let transaction = connection.transaction()?;

    {
        let mut statement = transaction.prepare_cached(
            "INSERT INTO sensor_data (timestamp, station, field, value, value_kind) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for reading in readings {
            statement.execute(params![
                reading.timestamp,
                reading.station,
                reading.field,
                reading.value.to_storage_text(),
                reading.value.kind().as_str(),
            ])?;
        }
    }

    transaction.commit()?;

    Ok(readings.len())
}

pub fn insert_system_event(
    connection: &Connection,
    new_event: &NewSystemEvent,
) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO system_events (timestamp, station, message) VALUES (?1, ?2, ?3)",
        params![new_event.timestamp, new_event.station, new_event.message],
    )?;

    Ok(connection.last_insert_rowid())
}

pub fn insert_alert(connection: &Connection, new_alert: &NewAlertRecord) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO alerts (timestamp, message) VALUES (?1, ?2)",
        params![new_alert.timestamp, new_alert.message],
    )?;

    Ok(connection.last_insert_rowid())
}

pub fn list_stations(connection: &Connection) -> Result<Vec<String>, DbError> {
    let mut statement = connection.prepare(
        "SELECT DISTINCT station FROM sensor_data WHERE station IS NOT NULL ORDER BY station",
    )?;

    let rows = statement.query_map([], |row| row.get::<_, String>(0))?;

    let mut stations = Vec::new();
    for row in rows {
        stations.push(row?);
    }

    Ok(stations)
}

/// Readings for one station in ascending time. With a limit, the most recent `limit` rows are
/// kept.
pub fn list_sensor_readings(
    connection: &Connection,
    station: &str,
    limit: Option<u32>,
) -> Result<Vec<SensorReading>, DbError> {
    let mut readings = Vec::new();

    match limit {
        Some(limit) => {
            let mut statement = connection.prepare(
                "SELECT id, timestamp, station, field, value, value_kind FROM (
                     SELECT id, timestamp, station, field, value, value_kind
                     FROM sensor_data
                     WHERE station = ?1
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?2
                 )
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = statement.query_map(params![station, i64::from(limit)], map_sensor_row)?;
            for row in rows {
                readings.push(row?);
            }
        }
        None => {
            let mut statement = connection.prepare(
                "SELECT id, timestamp, station, field, value, value_kind
                 FROM sensor_data
                 WHERE station = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = statement.query_map(params![station], map_sensor_row)?;
            for row in rows {
                readings.push(row?);
            }
        }
    }

    Ok(readings)
}

pub fn list_recent_alerts(connection: &Connection, limit: u32) -> Result<Vec<AlertRecord>, DbError> {
    let mut statement = connection.prepare(
        "SELECT id, timestamp, message
         FROM alerts
         ORDER BY timestamp DESC, id DESC
         LIMIT ?1",
    )?;

    let rows = statement.query_map(params![i64::from(limit)], |row| {
        Ok(AlertRecord {
            id: row.get(0)?,
            timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            message: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        })
    })?;

    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(row?);
    }

    Ok(alerts)
}

/// Newest-first window of status events whose message looks like a JSON object.
pub fn list_recent_status_events(
    connection: &Connection,
    limit: u32,
) -> Result<Vec<SystemEvent>, DbError> {
    let mut statement = connection.prepare(
        "SELECT id, timestamp, station, message
         FROM system_events
         WHERE message LIKE '{%'
         ORDER BY timestamp DESC, id DESC
         LIMIT ?1",
    )?;

    let rows = statement.query_map(params![i64::from(limit)], |row| {
        Ok(SystemEvent {
            id: row.get(0)?,
            timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            station: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            message: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }

    Ok(events)
}

pub fn count_rows(connection: &Connection, table: FeedTable) -> Result<i64, DbError> {
    let count = connection.query_row(
        &format!("SELECT COUNT(*) FROM {}", table.table_name()),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn latest_timestamp(connection: &Connection, table: FeedTable) -> Result<Option<String>, DbError> {
    let latest = connection
        .query_row(
            &format!("SELECT MAX(timestamp) FROM {}", table.table_name()),
            [],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten();
    Ok(latest)
}

fn map_sensor_row(row: &Row<'_>) -> rusqlite::Result<SensorReading> {
    let kind: Option<String> = row.get(5)?;
    Ok(SensorReading {
        id: row.get(0)?,
        timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        station: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        field: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        value: SensorValue::from_storage(kind.as_deref(), row.get(4)?),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rusqlite::params;

    use super::{
        FeedTable, LATEST_SCHEMA_VERSION, count_rows, insert_alert, insert_sensor_readings,
        insert_system_event, latest_timestamp, list_recent_alerts, list_recent_status_events,
        list_sensor_readings, list_stations, open_connection, run_migrations, schema_version,
    };
    use crate::domain::models::{NewAlertRecord, NewSensorReading, NewSystemEvent};
    use crate::domain::sensor_value::SensorValue;

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(name);
        std::mem::forget(dir);
        path
    }

    fn migrated(name: &str) -> rusqlite::Connection {
        let db_path = temp_db_path(name);
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        run_migrations(&mut connection).expect("migrations should succeed");
        connection
    }

    fn reading(timestamp: &str, station: &str, field: &str, value: SensorValue) -> NewSensorReading {
        NewSensorReading {
            timestamp: timestamp.to_string(),
            station: station.to_string(),
            field: field.to_string(),
            value,
        }
    }

    #[test]
    fn migrates_fresh_database_to_latest_version() {
        let connection = migrated("fresh.sqlite");

        let version = schema_version(&connection).expect("schema version should be queryable");
        assert_eq!(version, LATEST_SCHEMA_VERSION);

        for table in ["sensor_data", "system_events", "alerts"] {
            let table_exists: i64 = connection
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .expect("table check should work");
            assert_eq!(table_exists, 1, "{table} should exist");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let db_path = temp_db_path("idempotent.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");

        run_migrations(&mut connection).expect("first migration run should succeed");
        run_migrations(&mut connection).expect("second migration run should succeed");

        let version = schema_version(&connection).expect("schema version should be queryable");
        assert_eq!(version, LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn upgrades_legacy_tables_without_value_kind() {
        let db_path = temp_db_path("legacy.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        connection
            .execute_batch(
                "CREATE TABLE sensor_data (id INTEGER PRIMARY KEY AUTOINCREMENT, timestamp TEXT, station TEXT, field TEXT, value TEXT);
                 INSERT INTO sensor_data (timestamp, station, field, value) VALUES ('2025-06-01T12:00:00', 'loft', 'temp', '21.5');",
            )
            .expect("legacy schema should be created");

        run_migrations(&mut connection).expect("migrations should succeed");

        let readings = list_sensor_readings(&connection, "loft", None).expect("query should succeed");
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, SensorValue::Text("21.5".to_string()));
    }

    #[test]
    fn inserts_all_readings_of_a_message() {
        let mut connection = migrated("readings.sqlite");

        let written = insert_sensor_readings(
            &mut connection,
            &[
                reading("2026-02-20T10:00:00.000Z", "loft", "temperature", SensorValue::Number(21.5)),
                reading("2026-02-20T10:00:00.000Z", "loft", "raining", SensorValue::Boolean(false)),
                reading("2026-02-20T10:00:00.000Z", "loft", "gust", SensorValue::Absent),
            ],
        )
        .expect("insert should succeed");

        assert_eq!(written, 3);
        let readings = list_sensor_readings(&connection, "loft", None).expect("query should succeed");
        assert_eq!(readings.len(), 3);
        assert!(readings.iter().any(|r| r.value == SensorValue::Boolean(false)));
        assert!(readings.iter().any(|r| r.value == SensorValue::Absent));
    }

    #[test]
    fn failed_batch_commits_nothing() {
        let mut connection = migrated("atomic.sqlite");
        connection
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON sensor_data
                 WHEN NEW.field = 'bad' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .expect("trigger should be created");

        let result = insert_sensor_readings(
            &mut connection,
            &[
                reading("2026-02-20T10:00:00.000Z", "loft", "good", SensorValue::Number(1.0)),
                reading("2026-02-20T10:00:00.000Z", "loft", "bad", SensorValue::Number(2.0)),
            ],
        );

        assert!(result.is_err());
        assert_eq!(count_rows(&connection, FeedTable::SensorData).expect("count"), 0);
    }

    #[test]
    fn limited_readings_keep_most_recent_rows_in_ascending_order() {
        let mut connection = migrated("limited.sqlite");
        for minute in 0..5 {
            insert_sensor_readings(
                &mut connection,
                &[reading(
                    &format!("2026-02-20T10:0{minute}:00.000Z"),
                    "loft",
                    "temperature",
                    SensorValue::Number(f64::from(minute)),
                )],
            )
            .expect("insert should succeed");
        }

        let readings =
            list_sensor_readings(&connection, "loft", Some(2)).expect("query should succeed");

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].value, SensorValue::Number(3.0));
        assert_eq!(readings[1].value, SensorValue::Number(4.0));
    }

    #[test]
    fn lists_distinct_stations() {
        let mut connection = migrated("stations.sqlite");
        insert_sensor_readings(
            &mut connection,
            &[
                reading("2026-02-20T10:00:00.000Z", "shed", "t", SensorValue::Number(1.0)),
                reading("2026-02-20T10:00:00.000Z", "loft", "t", SensorValue::Number(1.0)),
                reading("2026-02-20T10:00:01.000Z", "loft", "t", SensorValue::Number(2.0)),
            ],
        )
        .expect("insert should succeed");

        let stations = list_stations(&connection).expect("query should succeed");
        assert_eq!(stations, vec!["loft".to_string(), "shed".to_string()]);
    }

    #[test]
    fn recent_alerts_are_newest_first_with_limit() {
        let connection = migrated("alerts.sqlite");
        for (idx, message) in ["first", "second", "third"].iter().enumerate() {
            insert_alert(
                &connection,
                &NewAlertRecord {
                    timestamp: format!("2026-02-20T10:00:0{idx}.000Z"),
                    message: message.to_string(),
                },
            )
            .expect("insert should succeed");
        }

        let alerts = list_recent_alerts(&connection, 2).expect("query should succeed");
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].message, "third");
        assert_eq!(alerts[1].message, "second");
        assert_eq!(
            latest_timestamp(&connection, FeedTable::Alerts).expect("max query"),
            Some("2026-02-20T10:00:02.000Z".to_string())
        );
    }

    #[test]
    fn status_window_only_returns_json_like_messages() {
        let connection = migrated("status.sqlite");
        for (idx, message) in [r#"{"camera":"c1"}"#, "rebooting", r#"{"camera":"c2"}"#]
            .iter()
            .enumerate()
        {
            insert_system_event(
                &connection,
                &NewSystemEvent {
                    timestamp: format!("2026-02-20T10:00:0{idx}.000Z"),
                    station: "loft".to_string(),
                    message: message.to_string(),
                },
            )
            .expect("insert should succeed");
        }

        let events = list_recent_status_events(&connection, 10).expect("query should succeed");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, r#"{"camera":"c2"}"#);
        assert_eq!(count_rows(&connection, FeedTable::SystemEvents).expect("count"), 3);
    }
}
