use tracing_subscriber::{EnvFilter, fmt};

use crate::app::AppError;

// rumqttc logs every reconnect at info; the subscriber reports those itself.
const DEFAULT_FILTER: &str = "info,rumqttc=warn";

pub fn init() -> Result<(), AppError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(AppError::logging_init)
}
