use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::{DbError, FeedTable};
use crate::app::backoff::RetryPolicy;
use crate::domain::models::{AlertRecord, NewAlertRecord, NewSensorReading, NewSystemEvent};
use crate::domain::status::{CameraStatusReport, aggregate_camera_status};
use crate::domain::time_series::{StationSeries, assemble_field_series};

pub const DEFAULT_BUSY_RETRY: RetryPolicy =
    RetryPolicy::new(5, Duration::from_millis(50), Duration::from_secs(1));

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
}

impl ServiceError {
    fn is_busy(&self) -> bool {
        matches!(self, Self::Database(error) if error.is_busy())
    }
}

pub trait FeedQueryHandler {
    fn list_stations(&self) -> Result<Vec<String>, ServiceError>;
    fn station_series(
        &self,
        stations: &[String],
        limit: Option<u32>,
    ) -> Result<StationSeries, ServiceError>;
    fn list_recent_alerts(&self, limit: u32) -> Result<Vec<AlertRecord>, ServiceError>;
    fn camera_status(&self, window: u32) -> Result<CameraStatusReport, ServiceError>;
    fn get_schema_version(&self) -> Result<u32, ServiceError>;
    fn count_rows(&self, table: FeedTable) -> Result<i64, ServiceError>;
    fn latest_timestamp(&self, table: FeedTable) -> Result<Option<String>, ServiceError>;
}

pub trait FeedCommandHandler {
    fn insert_sensor_readings(&self, readings: &[NewSensorReading])
    -> Result<usize, ServiceError>;
    fn insert_system_event(&self, new_event: &NewSystemEvent) -> Result<i64, ServiceError>;
    fn insert_alert(&self, new_alert: &NewAlertRecord) -> Result<i64, ServiceError>;
}

impl<T: FeedCommandHandler + ?Sized> FeedCommandHandler for &T {
    fn insert_sensor_readings(
        &self,
        readings: &[NewSensorReading],
    ) -> Result<usize, ServiceError> {
        (**self).insert_sensor_readings(readings)
    }

    fn insert_system_event(&self, new_event: &NewSystemEvent) -> Result<i64, ServiceError> {
        (**self).insert_system_event(new_event)
    }

    fn insert_alert(&self, new_alert: &NewAlertRecord) -> Result<i64, ServiceError> {
        (**self).insert_alert(new_alert)
    }
}

/// SQLite-backed store shared by the ingest pipeline and the query API.
///
/// Contention with a connection in another process surfaces as `SQLITE_BUSY`; those
/// operations are retried with backoff before the error is returned.
#[derive(Clone)]
pub struct SqliteFeedStore {
    connection: Arc<Mutex<Connection>>,
    busy_retry: RetryPolicy,
}

impl SqliteFeedStore {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self {
            connection,
            busy_retry: DEFAULT_BUSY_RETRY,
        }
    }

    pub fn with_busy_retry(mut self, busy_retry: RetryPolicy) -> Self {
        self.busy_retry = busy_retry;
        self
    }

    fn with_connection<T>(
        &self,
        mut op: impl FnMut(&mut Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        self.busy_retry.run(
            || {
                let mut connection = self
                    .connection
                    .lock()
                    .map_err(|_| ServiceError::DbLockPoisoned)?;
                op(&mut connection).map_err(ServiceError::from)
            },
            ServiceError::is_busy,
            |attempt, delay, error| {
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "database busy; retrying"
                );
            },
        )
    }
}

impl FeedQueryHandler for SqliteFeedStore {
    fn list_stations(&self) -> Result<Vec<String>, ServiceError> {
        self.with_connection(|connection| db::list_stations(connection))
    }

    fn station_series(
        &self,
        stations: &[String],
        limit: Option<u32>,
    ) -> Result<StationSeries, ServiceError> {
        let mut series = StationSeries::new();
        for station in stations {
            let readings = self.with_connection(|connection| {
                db::list_sensor_readings(connection, station, limit)
            })?;
            series.insert(station.clone(), assemble_field_series(readings));
        }
        Ok(series)
    }

    fn list_recent_alerts(&self, limit: u32) -> Result<Vec<AlertRecord>, ServiceError> {
        self.with_connection(|connection| db::list_recent_alerts(connection, limit))
    }

    fn camera_status(&self, window: u32) -> Result<CameraStatusReport, ServiceError> {
        let events =
            self.with_connection(|connection| db::list_recent_status_events(connection, window))?;
        Ok(aggregate_camera_status(&events))
    }

    fn get_schema_version(&self) -> Result<u32, ServiceError> {
        self.with_connection(|connection| db::schema_version(connection))
    }

    fn count_rows(&self, table: FeedTable) -> Result<i64, ServiceError> {
        self.with_connection(|connection| db::count_rows(connection, table))
    }

    fn latest_timestamp(&self, table: FeedTable) -> Result<Option<String>, ServiceError> {
        self.with_connection(|connection| db::latest_timestamp(connection, table))
    }
}

impl FeedCommandHandler for SqliteFeedStore {
    fn insert_sensor_readings(
        &self,
        readings: &[NewSensorReading],
    ) -> Result<usize, ServiceError> {
        self.with_connection(|connection| db::insert_sensor_readings(connection, readings))
    }

    fn insert_system_event(&self, new_event: &NewSystemEvent) -> Result<i64, ServiceError> {
        self.with_connection(|connection| db::insert_system_event(connection, new_event))
    }

    fn insert_alert(&self, new_alert: &NewAlertRecord) -> Result<i64, ServiceError> {
        self.with_connection(|connection| db::insert_alert(connection, new_alert))
    }
}
