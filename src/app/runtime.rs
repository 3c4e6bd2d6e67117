use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::dev::{Server, ServerHandle};
use actix_web::{App, HttpServer, web};

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::db;
use crate::adapters::dead_letter::DeadLetterLog;
use crate::adapters::mqtt::{FeedError, FeedSubscriber};
use crate::adapters::notifier::{BackgroundNotifier, LogNotifier, Notifier, WebhookNotifier};
use crate::app::backoff::RetryPolicy;
use crate::app::config::{ApiConfig, AppConfig, FeedConfig, NotifierConfig};
use crate::app::error::AppError;
use crate::app::pipeline::{MessageProcessor, start_consumer};
use crate::app::services::{DEFAULT_BUSY_RETRY, SqliteFeedStore};
use crate::domain::clock::SystemClock;

const NOTIFIER_QUEUE_CAPACITY: usize = 32;
const SERVER_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
const TEST_NOTIFICATION_SUBJECT: &str = "Test notification";
const TEST_NOTIFICATION_BODY: &str = "This is a test notification from station-feed.";

/// Threads of a running ingestion pipeline.
///
/// Shutdown cascades: the subscriber returns and drops the queue sender, the consumer drains
/// what is left and drops its notifier handle, then the notifier worker finishes.
pub struct IngestHandles {
    subscriber: JoinHandle<Result<(), FeedError>>,
    consumer: JoinHandle<()>,
    notifier: BackgroundNotifier,
}

impl IngestHandles {
    pub fn join(self) -> Result<(), AppError> {
        let feed_result = self.subscriber.join();
        let consumer_result = self.consumer.join();
        self.notifier.shutdown();

        if consumer_result.is_err() {
            return Err(AppError::runtime("pipeline thread panicked"));
        }

        match feed_result {
            Ok(result) => result.map_err(AppError::feed),
            Err(_) => Err(AppError::runtime("feed subscriber thread panicked")),
        }
    }
}

pub fn open_store(db_path: &str, busy_retry: RetryPolicy) -> Result<SqliteFeedStore, AppError> {
    let mut connection = db::open_connection(db_path).map_err(AppError::database_init)?;
    db::run_migrations(&mut connection).map_err(AppError::database_init)?;
    let schema_version = db::schema_version(&connection).map_err(AppError::database_init)?;

    tracing::info!(db_path, schema_version, "database ready");

    Ok(SqliteFeedStore::new(Arc::new(Mutex::new(connection))).with_busy_retry(busy_retry))
}

pub fn start_ingestion(
    config: &FeedConfig,
    store: SqliteFeedStore,
    stop_flag: Arc<AtomicBool>,
) -> Result<IngestHandles, AppError> {
    let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity);
    let subscriber = FeedSubscriber::new(config, sender, SystemClock).map_err(AppError::feed)?;

    let notifier = spawn_notifier(&config.notifier)?;
    let processor = MessageProcessor::new(
        store,
        notifier.handle(),
        config.notifier.enabled,
        write_retry_policy(config),
        DeadLetterLog::new(&config.dead_letter_path),
    );
    let consumer = start_consumer(processor, receiver).map_err(AppError::runtime)?;

    let subscriber = std::thread::Builder::new()
        .name("station-feed::subscriber".to_string())
        .spawn(move || subscriber.run(stop_flag))
        .map_err(AppError::runtime)?;

    Ok(IngestHandles {
        subscriber,
        consumer,
        notifier,
    })
}

fn write_retry_policy(config: &FeedConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.write_retry_attempts,
        Duration::from_millis(100),
        Duration::from_secs(2),
    )
}

fn query_retry_policy(config: &ApiConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.query_retry_attempts,
        ..DEFAULT_BUSY_RETRY
    }
}

fn spawn_notifier(config: &NotifierConfig) -> Result<BackgroundNotifier, AppError> {
    let spawned = match &config.webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(url, Duration::from_millis(config.timeout_ms))
                .map_err(AppError::runtime)?;
            BackgroundNotifier::spawn(webhook, NOTIFIER_QUEUE_CAPACITY)
        }
        None => {
            if config.enabled {
                tracing::warn!("NOTIFY_WEBHOOK_URL not set; alert notifications are only logged");
            }
            BackgroundNotifier::spawn(LogNotifier, NOTIFIER_QUEUE_CAPACITY)
        }
    };

    spawned.map_err(AppError::runtime)
}

fn build_server(state: ApiState, bind: &str) -> Result<Server, AppError> {
    tracing::info!(bind, "http server starting");

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    })
    .shutdown_timeout(SERVER_SHUTDOWN_TIMEOUT_SECS)
    .bind(bind)
    .map_err(AppError::runtime)?
    .run();

    Ok(server)
}

/// Ingestion only. Runs until interrupted or until the broker is given up on.
pub fn run_service(config: FeedConfig) -> Result<(), AppError> {
    let store = open_store(&config.db_path, DEFAULT_BUSY_RETRY)?;
    let stop_flag = Arc::new(AtomicBool::new(false));

    let signal_flag = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        signal_flag.store(true, Ordering::Relaxed);
    })
    .map_err(AppError::runtime)?;

    start_ingestion(&config, store, stop_flag)?.join()
}

/// Query API only.
pub fn run_api(config: ApiConfig) -> Result<(), AppError> {
    let state = ApiState {
        queries: open_store(&config.db_path, query_retry_policy(&config))?,
        status_window: config.status_window,
    };

    actix_web::rt::System::new().block_on(async move {
        build_server(state, &config.http_bind)?
            .await
            .map_err(AppError::runtime)
    })
}

/// Ingestion and query API in one process. The API keeps its own connection. A fatal feed
/// error stops the server; stopping the server stops the feed.
pub fn run(config: AppConfig) -> Result<(), AppError> {
    let feed_store = open_store(&config.feed.db_path, DEFAULT_BUSY_RETRY)?;
    let state = ApiState {
        queries: open_store(&config.api.db_path, query_retry_policy(&config.api))?,
        status_window: config.api.status_window,
    };

    let stop_flag = Arc::new(AtomicBool::new(false));
    let ingest = start_ingestion(&config.feed, feed_store, Arc::clone(&stop_flag))?;

    let server_result = actix_web::rt::System::new().block_on(async move {
        let server = build_server(state, &config.api.http_bind)?;
        let supervisor = spawn_supervisor(ingest, server.handle())?;

        let server_result = server.await.map_err(AppError::runtime);

        stop_flag.store(true, Ordering::Relaxed);
        let feed_result = supervisor
            .join()
            .unwrap_or_else(|_| Err(AppError::runtime("supervisor thread panicked")));

        server_result.and(feed_result)
    });

    tracing::info!("application stopped");

    server_result
}

fn spawn_supervisor(
    ingest: IngestHandles,
    server: ServerHandle,
) -> Result<JoinHandle<Result<(), AppError>>, AppError> {
    std::thread::Builder::new()
        .name("station-feed::supervisor".to_string())
        .spawn(move || {
            let result = ingest.join();
            if let Err(error) = &result {
                tracing::error!(error = %error, "ingestion stopped; shutting down http server");
                actix_web::rt::System::new().block_on(server.stop(true));
            }
            result
        })
        .map_err(AppError::runtime)
}

pub fn send_test_notification(config: NotifierConfig) -> Result<(), AppError> {
    match &config.webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(url, Duration::from_millis(config.timeout_ms))
                .map_err(AppError::runtime)?;
            webhook
                .deliver(TEST_NOTIFICATION_SUBJECT, TEST_NOTIFICATION_BODY)
                .map_err(AppError::runtime)?;
            tracing::info!(url = %url, "test notification delivered");
        }
        None => {
            tracing::warn!("NOTIFY_WEBHOOK_URL not set; logging the test notification instead");
            LogNotifier.notify(TEST_NOTIFICATION_SUBJECT, TEST_NOTIFICATION_BODY);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use crate::adapters::db::FeedTable;
    use crate::adapters::mqtt::FeedError;
    use crate::adapters::notifier::{BackgroundNotifier, LogNotifier};
    use crate::app::config::{FeedConfig, NotifierConfig};
    use crate::app::error::AppError;
    use crate::app::services::{DEFAULT_BUSY_RETRY, FeedQueryHandler};

    use super::{IngestHandles, open_store, send_test_notification, start_ingestion};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(name);
        std::mem::forget(dir);
        path
    }

    fn feed_config(db_path: &str) -> FeedConfig {
        FeedConfig {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 8883,
            credentials: None,
            topic_filter: "#".to_string(),
            ca_cert_path: "/nonexistent/ca.crt".to_string(),
            client_id: "station-feed-test".to_string(),
            keep_alive_secs: 30,
            reconnect_max_attempts: 0,
            max_packet_bytes: 1024 * 1024,
            queue_capacity: 4,
            db_path: db_path.to_string(),
            write_retry_attempts: 1,
            dead_letter_path: "./target/testdb/dead_letters.jsonl".to_string(),
            notifier: NotifierConfig {
                enabled: false,
                webhook_url: None,
                timeout_ms: 100,
            },
        }
    }

    #[test]
    fn open_store_creates_and_migrates_database() {
        let path = temp_db_path("nested/runtime.sqlite");

        let store = open_store(path.to_string_lossy().as_ref(), DEFAULT_BUSY_RETRY)
            .expect("store should open");

        assert_eq!(store.get_schema_version().expect("version"), 2);
        assert_eq!(store.count_rows(FeedTable::SensorData).expect("count"), 0);
    }

    #[test]
    fn missing_ca_certificate_fails_ingestion_startup() {
        let path = temp_db_path("runtime-ca.sqlite");
        let store = open_store(path.to_string_lossy().as_ref(), DEFAULT_BUSY_RETRY)
            .expect("store should open");

        let result = start_ingestion(
            &feed_config(path.to_string_lossy().as_ref()),
            store,
            Arc::new(AtomicBool::new(false)),
        );

        assert!(matches!(result, Err(AppError::Feed(_))));
    }

    #[test]
    fn join_reports_fatal_feed_error_after_draining() {
        let handles = IngestHandles {
            subscriber: std::thread::spawn(|| {
                Err(FeedError::ConnectionExhausted {
                    attempts: 11,
                    last_error: "connection refused".to_string(),
                })
            }),
            consumer: std::thread::spawn(|| {}),
            notifier: BackgroundNotifier::spawn(LogNotifier, 1).expect("worker should spawn"),
        };

        let error = handles.join().expect_err("feed failure should surface");

        assert_eq!(
            error.to_string(),
            "feed subscriber failed: broker connection failed after 11 attempts: connection refused"
        );
    }

    #[test]
    fn test_notification_without_webhook_only_logs() {
        let result = send_test_notification(NotifierConfig {
            enabled: true,
            webhook_url: None,
            timeout_ms: 100,
        });

        assert!(result.is_ok());
    }

    #[test]
    fn test_notification_reports_unreachable_webhook() {
        let result = send_test_notification(NotifierConfig {
            enabled: true,
            webhook_url: Some("http://127.0.0.1:9/hook".to_string()),
            timeout_ms: 200,
        });

        assert!(matches!(result, Err(AppError::Runtime(_))));
    }
}
