use actix_web::{HttpResponse, Responder, get, web};
use serde::{Deserialize, Serialize};

use crate::adapters::db::FeedTable;
use crate::app::services::{FeedQueryHandler, ServiceError, SqliteFeedStore};
use crate::domain::clock::format_human_timestamp;
use crate::domain::models::AlertRecord;
use crate::domain::status::CameraStatusReport;
use crate::domain::time_series::StationSeries;

const DEFAULT_ALERT_LIMIT: u32 = 500;
const MAX_ALERT_LIMIT: u32 = 5000;

#[derive(Clone)]
pub struct ApiState {
    pub queries: SqliteFeedStore,
    pub status_window: u32,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

impl LimitQuery {
    /// A missing or zero limit means the full history. A positive limit keeps the newest
    /// points per station, not the oldest, so a capped chart still ends at the present.
    fn series_limit(&self) -> Option<u32> {
        self.limit.filter(|limit| *limit > 0)
    }

    fn alert_limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_ALERT_LIMIT)
            .clamp(1, MAX_ALERT_LIMIT)
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AlertResponse {
    pub id: i64,
    pub timestamp: String,
    pub message: String,
}

impl From<AlertRecord> for AlertResponse {
    fn from(alert: AlertRecord) -> Self {
        Self {
            id: alert.id,
            timestamp: format_human_timestamp(&alert.timestamp),
            message: alert.message,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub stations: Vec<String>,
    pub weather: StationSeries,
    pub alerts: Vec<AlertResponse>,
    pub camera_status: CameraStatusReport,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableDiagnostics {
    pub rows: i64,
    pub latest_timestamp: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsDbResponse {
    pub schema_version: u32,
    pub sensor_data: TableDiagnostics,
    pub system_events: TableDiagnostics,
    pub alerts: TableDiagnostics,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(list_stations_endpoint)
        .service(all_weather_endpoint)
        .service(station_weather_endpoint)
        .service(list_alerts_endpoint)
        .service(camera_status_endpoint)
        .service(dashboard_endpoint)
        .service(get_db_diagnostics_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/api/stations")]
async fn list_stations_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.queries.list_stations() {
        Ok(stations) => HttpResponse::Ok().json(stations),
        Err(error) => service_error_response(error),
    }
}

#[get("/api/weather")]
async fn all_weather_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<LimitQuery>,
) -> impl Responder {
    let stations = match state.queries.list_stations() {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };

    match state.queries.station_series(&stations, query.series_limit()) {
        Ok(series) => HttpResponse::Ok().json(series),
        Err(error) => service_error_response(error),
    }
}

#[get("/api/weather/{station}")]
async fn station_weather_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    query: web::Query<LimitQuery>,
) -> impl Responder {
    let station = path.into_inner();

    match state
        .queries
        .station_series(std::slice::from_ref(&station), query.series_limit())
    {
        Ok(mut series) => HttpResponse::Ok().json(series.remove(&station).unwrap_or_default()),
        Err(error) => service_error_response(error),
    }
}

#[get("/api/alerts")]
async fn list_alerts_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<LimitQuery>,
) -> impl Responder {
    match state.queries.list_recent_alerts(query.alert_limit()) {
        Ok(alerts) => {
            let mapped: Vec<AlertResponse> = alerts.into_iter().map(AlertResponse::from).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(error) => service_error_response(error),
    }
}

#[get("/api/camera_status")]
async fn camera_status_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.queries.camera_status(state.status_window) {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(error) => service_error_response(error),
    }
}

#[get("/api/dashboard")]
async fn dashboard_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let stations = match state.queries.list_stations() {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };
    let weather = match state.queries.station_series(&stations, None) {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };
    let alerts = match state.queries.list_recent_alerts(DEFAULT_ALERT_LIMIT) {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };
    let camera_status = match state.queries.camera_status(state.status_window) {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };

    HttpResponse::Ok().json(DashboardResponse {
        stations,
        weather,
        alerts: alerts.into_iter().map(AlertResponse::from).collect(),
        camera_status,
    })
}

#[get("/diagnostics/db")]
async fn get_db_diagnostics_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let schema_version = match state.queries.get_schema_version() {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };
    let sensor_data = match table_diagnostics(&state.queries, FeedTable::SensorData) {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };
    let system_events = match table_diagnostics(&state.queries, FeedTable::SystemEvents) {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };
    let alerts = match table_diagnostics(&state.queries, FeedTable::Alerts) {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };

    HttpResponse::Ok().json(DiagnosticsDbResponse {
        schema_version,
        sensor_data,
        system_events,
        alerts,
    })
}

fn table_diagnostics<Q: FeedQueryHandler>(
    queries: &Q,
    table: FeedTable,
) -> Result<TableDiagnostics, ServiceError> {
    Ok(TableDiagnostics {
        rows: queries.count_rows(table)?,
        latest_timestamp: queries.latest_timestamp(table)?,
    })
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    tracing::warn!(error = %error, "query failed");

    match error {
        ServiceError::DbLockPoisoned => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "database lock poisoned"
            }))
        }
        ServiceError::Database(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("database query failed: {error}")
            }))
        }
    }
}
