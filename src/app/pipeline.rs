use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use crate::adapters::dead_letter::{DeadLetter, DeadLetterLog};
use crate::adapters::notifier::Notifier;
use crate::app::backoff::RetryPolicy;
use crate::app::services::{FeedCommandHandler, ServiceError};
use crate::domain::clock::timestamp_to_iso8601;
use crate::domain::models::{InboundMessage, NewAlertRecord, NewSystemEvent};
use crate::domain::sensor_payload::SensorPayload;
use crate::domain::topic::{TopicKind, classify};

pub const ALERT_SUBJECT: &str = "ALERT: Weather Station Message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Sensor { rows: usize, raw_fallback: bool },
    Alert { id: i64 },
    Status { id: i64 },
    Observed,
    DeadLettered { kind: TopicKind },
}

/// Routes one message at a time to its ingestor. Persistence failures are retried and then
/// dead-lettered, so a single bad write never stops the stream.
pub struct MessageProcessor<S, N> {
    store: S,
    notifier: N,
    notifications_enabled: bool,
    write_retry: RetryPolicy,
    dead_letters: DeadLetterLog,
}

impl<S, N> MessageProcessor<S, N>
where
    S: FeedCommandHandler,
    N: Notifier,
{
    pub fn new(
        store: S,
        notifier: N,
        notifications_enabled: bool,
        write_retry: RetryPolicy,
        dead_letters: DeadLetterLog,
    ) -> Self {
        Self {
            store,
            notifier,
            notifications_enabled,
            write_retry,
            dead_letters,
        }
    }

    pub fn process(&self, message: &InboundMessage) -> IngestOutcome {
        let route = classify(&message.topic);
        let payload = message.payload_text();
        let timestamp = timestamp_to_iso8601(message.received_at);

        tracing::info!(
            topic = %message.topic,
            kind = route.kind.as_str(),
            payload = %payload,
            "message received"
        );

        if route.kind.notifies() && self.notifications_enabled {
            self.notifier.notify(
                ALERT_SUBJECT,
                &format!("Topic: {}\nMessage: {}", message.topic, payload),
            );
        }

        let result = match route.kind {
            TopicKind::Sensor => self.ingest_sensor(route.station, &timestamp, &payload),
            TopicKind::Alert => self
                .write(|store| {
                    store.insert_alert(&NewAlertRecord {
                        timestamp: timestamp.clone(),
                        message: payload.clone(),
                    })
                })
                .map(|id| IngestOutcome::Alert { id }),
            TopicKind::Status => self
                .write(|store| {
                    store.insert_system_event(&NewSystemEvent {
                        timestamp: timestamp.clone(),
                        station: route.station.to_string(),
                        message: payload.clone(),
                    })
                })
                .map(|id| IngestOutcome::Status { id }),
            TopicKind::Unrouted => {
                tracing::debug!(topic = %message.topic, "message observed without persistence");
                return IngestOutcome::Observed;
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(error) => self.dead_letter(message, route.kind, &timestamp, &payload, &error),
        }
    }

    fn ingest_sensor(
        &self,
        station: &str,
        timestamp: &str,
        payload: &str,
    ) -> Result<IngestOutcome, ServiceError> {
        let decoded = SensorPayload::decode(payload);
        let raw_fallback = match &decoded {
            SensorPayload::Fields(_) => false,
            SensorPayload::Raw { reason, .. } => {
                tracing::warn!(station, reason = %reason, payload, "non-JSON sensor message received");
                true
            }
        };

        let readings = decoded.into_readings(timestamp, station);
        let rows = self.write(|store| store.insert_sensor_readings(&readings))?;

        tracing::debug!(station, rows, raw_fallback, "sensor readings persisted");

        Ok(IngestOutcome::Sensor { rows, raw_fallback })
    }

    fn write<T>(
        &self,
        op: impl Fn(&S) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        self.write_retry.run(
            || op(&self.store),
            |_| true,
            |attempt, delay, error| {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "persistence write failed; retrying"
                );
            },
        )
    }

    fn dead_letter(
        &self,
        message: &InboundMessage,
        kind: TopicKind,
        timestamp: &str,
        payload: &str,
        error: &ServiceError,
    ) -> IngestOutcome {
        tracing::error!(
            topic = %message.topic,
            kind = kind.as_str(),
            error = %error,
            "persistence failed after retries; dead-lettering message"
        );

        let letter = DeadLetter {
            topic: message.topic.clone(),
            payload: payload.to_string(),
            received_at: timestamp.to_string(),
            kind: kind.as_str().to_string(),
            error: error.to_string(),
        };

        if let Err(dead_letter_error) = self.dead_letters.append(&letter) {
            tracing::error!(
                topic = %message.topic,
                path = %self.dead_letters.path().display(),
                error = %dead_letter_error,
                "failed to record dead letter; message lost"
            );
        }

        IngestOutcome::DeadLettered { kind }
    }
}

/// Drains the queue on one thread, finishing each message before taking the next. Returns
/// once every sender has been dropped and the queue is empty.
pub fn start_consumer<S, N>(
    processor: MessageProcessor<S, N>,
    receiver: Receiver<InboundMessage>,
) -> std::io::Result<JoinHandle<()>>
where
    S: FeedCommandHandler + Send + 'static,
    N: Notifier + Send + 'static,
{
    std::thread::Builder::new()
        .name("station-feed::pipeline".to_string())
        .spawn(move || {
            let mut processed = 0_u64;
            for message in receiver {
                processor.process(&message);
                processed += 1;
            }
            tracing::info!(processed, "message pipeline drained");
        })
}
