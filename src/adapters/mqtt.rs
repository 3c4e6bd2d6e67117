use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use rumqttc::{
    Client, ConnectionError, Event, MqttOptions, NetworkOptions, Packet, Publish, QoS,
    RecvTimeoutError, StateError, TlsConfiguration, Transport, mqttbytes,
};
use thiserror::Error;

use crate::app::backoff::backoff_delay;
use crate::app::config::FeedConfig;
use crate::domain::clock::Clock;
use crate::domain::models::InboundMessage;

const CLIENT_REQUEST_CAPACITY: usize = 64;
const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
// Must outlast CONNECT_TIMEOUT so a slow TCP/TLS/CONNACK handshake is never cut short.
const POLL_INTERVAL: Duration = Duration::from_secs(6);
const STOP_CHECK_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to read CA certificate {path}: {source}")]
    CaCertificate {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("broker connection failed after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },
    #[error("message queue closed")]
    QueueClosed,
}

pub fn build_mqtt_options(config: &FeedConfig) -> Result<MqttOptions, FeedError> {
    let ca = std::fs::read(&config.ca_cert_path).map_err(|source| FeedError::CaCertificate {
        path: config.ca_cert_path.clone(),
        source,
    })?;

    let mut options = MqttOptions::new(
        config.client_id.clone(),
        config.broker_host.clone(),
        config.broker_port,
    );
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_max_packet_size(config.max_packet_bytes, config.max_packet_bytes);
    if let Some((username, password)) = &config.credentials {
        options.set_credentials(username.clone(), password.clone());
    }
    options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth: None,
    }));

    Ok(options)
}

/// Owns the broker connection and feeds received messages into the pipeline queue.
pub struct FeedSubscriber<Cl> {
    options: MqttOptions,
    topic_filter: String,
    max_reconnect_attempts: u32,
    max_packet_bytes: usize,
    sender: Sender<InboundMessage>,
    clock: Cl,
}

impl<Cl: Clock> FeedSubscriber<Cl> {
    pub fn new(
        config: &FeedConfig,
        sender: Sender<InboundMessage>,
        clock: Cl,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            options: build_mqtt_options(config)?,
            topic_filter: config.topic_filter.clone(),
            max_reconnect_attempts: config.reconnect_max_attempts,
            max_packet_bytes: config.max_packet_bytes,
            sender,
            clock,
        })
    }

    /// Runs until `stop_flag` is set, the queue closes, or the broker stays unreachable for
    /// more than the allowed number of consecutive attempts.
    ///
    /// The stop flag is checked between events and during reconnect backoff, so shutdown takes
    /// at most one poll interval.
    pub fn run(self, stop_flag: Arc<AtomicBool>) -> Result<(), FeedError> {
        let (client, mut connection) = Client::new(self.options.clone(), CLIENT_REQUEST_CAPACITY);
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(CONNECT_TIMEOUT.as_secs());
        connection.eventloop.set_network_options(network_options);
        let mut failures = 0_u32;

        tracing::info!(
            broker = ?self.options.broker_address(),
            topic = %self.topic_filter,
            "connecting to broker"
        );

        while !stop_flag.load(Ordering::Relaxed) {
            let notification = match connection.recv_timeout(POLL_INTERVAL) {
                Ok(notification) => notification,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            match notification {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    failures = 0;
                    tracing::info!("connected to broker");
                    if let Err(error) = client.try_subscribe(&self.topic_filter, QoS::AtMostOnce) {
                        tracing::warn!(error = %error, topic = %self.topic_filter, "subscribe request failed");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    tracing::info!(topic = %self.topic_filter, "subscribed to topic");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = inbound_from_publish(&publish, &self.clock);
                    enqueue(&self.sender, message)?;
                }
                Ok(_) => {}
                Err(error) => {
                    if let Some(size) = oversized_packet_size(&error) {
                        tracing::error!(
                            size,
                            max_packet_bytes = self.max_packet_bytes,
                            "dropped message larger than MQTT_MAX_PACKET_BYTES; reconnecting"
                        );
                        continue;
                    }

                    failures += 1;
                    self.on_connection_error(failures, &error, &stop_flag)?;
                }
            }
        }

        if let Err(error) = client.try_disconnect() {
            tracing::debug!(error = %error, "disconnect request failed");
        }
        tracing::info!("feed subscriber stopped");

        Ok(())
    }

    fn on_connection_error(
        &self,
        failures: u32,
        error: &ConnectionError,
        stop_flag: &AtomicBool,
    ) -> Result<(), FeedError> {
        if failures > self.max_reconnect_attempts {
            tracing::error!(failures, error = %error, "broker connection failed; giving up");
            return Err(FeedError::ConnectionExhausted {
                attempts: failures,
                last_error: error.to_string(),
            });
        }

        let delay = backoff_delay(failures - 1, RECONNECT_INITIAL_DELAY, RECONNECT_MAX_DELAY);
        tracing::warn!(
            failures,
            max_attempts = self.max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "broker connection failed; reconnecting"
        );
        sleep_unless_stopped(delay, stop_flag);

        Ok(())
    }
}

fn oversized_packet_size(error: &ConnectionError) -> Option<usize> {
    match error {
        ConnectionError::MqttState(StateError::Deserialization(
            mqttbytes::Error::PayloadSizeLimitExceeded(size),
        )) => Some(*size),
        _ => None,
    }
}

fn sleep_unless_stopped(delay: Duration, stop_flag: &AtomicBool) {
    let mut remaining = delay;
    while !remaining.is_zero() && !stop_flag.load(Ordering::Relaxed) {
        let slice = remaining.min(STOP_CHECK_SLICE);
        std::thread::sleep(slice);
        remaining -= slice;
    }
}

pub fn inbound_from_publish<Cl: Clock>(publish: &Publish, clock: &Cl) -> InboundMessage {
    InboundMessage {
        topic: publish.topic.clone(),
        payload: publish.payload.to_vec(),
        received_at: clock.now(),
    }
}

/// Pushes onto the bounded queue. A full queue blocks the subscriber instead of buffering
/// without limit.
pub fn enqueue(sender: &Sender<InboundMessage>, message: InboundMessage) -> Result<(), FeedError> {
    match sender.try_send(message) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(message)) => {
            tracing::warn!(
                capacity = ?sender.capacity(),
                "message queue full; applying backpressure"
            );
            sender.send(message).map_err(|_| FeedError::QueueClosed)
        }
        Err(TrySendError::Disconnected(_)) => Err(FeedError::QueueClosed),
    }
}
