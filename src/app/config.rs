use crate::app::AppError;
use crate::domain::status::DEFAULT_STATUS_WINDOW;

const DEFAULT_DB_PATH: &str = "./data/station_feed.db";
/// Largest packet the broker may send before the session is dropped.
const DEFAULT_MAX_PACKET_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub credentials: Option<(String, String)>,
    pub topic_filter: String,
    pub ca_cert_path: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub reconnect_max_attempts: u32,
    pub max_packet_bytes: usize,
    pub queue_capacity: usize,
    pub db_path: String,
    pub write_retry_attempts: u32,
    pub dead_letter_path: String,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub http_bind: String,
    pub db_path: String,
    pub status_window: u32,
    pub query_retry_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            feed: FeedConfig::from_lookup(&lookup)?,
            api: ApiConfig::from_lookup(&lookup)?,
        })
    }
}

impl FeedConfig {
    pub fn from_env() -> Result<Self, AppError> {
        load_dotenv();
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: &F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let broker_host = non_empty(lookup, "MQTT_BROKER")
            .ok_or_else(|| AppError::config("MQTT_BROKER is required"))?;

        let credentials = match (
            non_empty(lookup, "MQTT_USERNAME"),
            non_empty(lookup, "MQTT_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some((username, password)),
            (None, None) => None,
            _ => {
                return Err(AppError::config(
                    "MQTT_USERNAME and MQTT_PASSWORD must be set together",
                ));
            }
        };

        let max_packet_bytes =
            parse_or_default(lookup, "MQTT_MAX_PACKET_BYTES", DEFAULT_MAX_PACKET_BYTES)?;
        if max_packet_bytes == 0 {
            return Err(AppError::config(
                "MQTT_MAX_PACKET_BYTES must be greater than zero",
            ));
        }

        let queue_capacity = parse_or_default(lookup, "QUEUE_CAPACITY", 256_usize)?;
        if queue_capacity == 0 {
            return Err(AppError::config("QUEUE_CAPACITY must be greater than zero"));
        }

        Ok(Self {
            broker_host,
            broker_port: parse_or_default(lookup, "MQTT_PORT", 8883_u16)?,
            credentials,
            topic_filter: non_empty(lookup, "MQTT_TOPIC").unwrap_or_else(|| "#".to_string()),
            ca_cert_path: non_empty(lookup, "MQTT_CA_CERT")
                .unwrap_or_else(|| "./mycert.crt".to_string()),
            client_id: non_empty(lookup, "MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("station-feed-{}", uuid::Uuid::new_v4())),
            keep_alive_secs: parse_or_default(lookup, "MQTT_KEEP_ALIVE_SECS", 60_u64)?,
            reconnect_max_attempts: parse_or_default(lookup, "MQTT_RECONNECT_MAX_ATTEMPTS", 10_u32)?,
            max_packet_bytes,
            queue_capacity,
            db_path: db_path(lookup),
            write_retry_attempts: parse_or_default(lookup, "WRITE_RETRY_ATTEMPTS", 3_u32)?,
            dead_letter_path: non_empty(lookup, "DEAD_LETTER_PATH")
                .unwrap_or_else(|| "./data/dead_letters.jsonl".to_string()),
            notifier: NotifierConfig::from_lookup(lookup)?,
        })
    }
}

impl NotifierConfig {
    pub fn from_env() -> Result<Self, AppError> {
        load_dotenv();
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: &F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            enabled: parse_bool_or_default(lookup, "NOTIFICATIONS_ENABLED", true)?,
            webhook_url: non_empty(lookup, "NOTIFY_WEBHOOK_URL"),
            timeout_ms: parse_or_default(lookup, "NOTIFY_TIMEOUT_MS", 5000_u64)?,
        })
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, AppError> {
        load_dotenv();
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: &F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            http_bind: non_empty(lookup, "HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            db_path: db_path(lookup),
            status_window: parse_or_default(lookup, "STATUS_WINDOW", DEFAULT_STATUS_WINDOW)?,
            query_retry_attempts: parse_or_default(lookup, "QUERY_RETRY_ATTEMPTS", 5_u32)?,
        })
    }
}

fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }
}

fn db_path<F>(lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, "DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

fn parse_bool_or_default<F>(lookup: &F, key: &str, default: bool) -> Result<bool, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = non_empty(lookup, key) else {
        return Ok(default);
    };

    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::config(format!("{key} must be a valid boolean"))),
    }
}
