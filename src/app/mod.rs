pub mod backoff;
pub mod config;
mod error;
mod logging;
pub mod pipeline;
mod runtime;
pub mod services;

pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        broker = %config.feed.broker_host,
        broker_port = config.feed.broker_port,
        topic = %config.feed.topic_filter,
        client_id = %config.feed.client_id,
        db_path = %config.feed.db_path,
        http_bind = %config.api.http_bind,
        queue_capacity = config.feed.queue_capacity,
        notifications_enabled = config.feed.notifier.enabled,
        "application bootstrap initialized"
    );

    runtime::run(config)
}

pub fn run_service() -> Result<(), AppError> {
    logging::init()?;

    let config = config::FeedConfig::from_env()?;

    tracing::info!(
        broker = %config.broker_host,
        broker_port = config.broker_port,
        topic = %config.topic_filter,
        client_id = %config.client_id,
        db_path = %config.db_path,
        queue_capacity = config.queue_capacity,
        notifications_enabled = config.notifier.enabled,
        "service bootstrap initialized"
    );

    runtime::run_service(config)
}

pub fn run_api() -> Result<(), AppError> {
    logging::init()?;

    let config = config::ApiConfig::from_env()?;

    tracing::info!(
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        status_window = config.status_window,
        "api bootstrap initialized"
    );

    runtime::run_api(config)
}

pub fn send_test_notification() -> Result<(), AppError> {
    logging::init()?;

    runtime::send_test_notification(config::NotifierConfig::from_env()?)
}
