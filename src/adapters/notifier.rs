use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use thiserror::Error;

/// Best-effort delivery of alert text. Outcomes are only logged, never returned.
pub trait Notifier {
    fn notify(&self, subject: &str, body: &str);
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn notify(&self, subject: &str, body: &str) {
        (**self).notify(subject, body);
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification endpoint responded with status {0}")]
    Status(u16),
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// Posts `{"subject", "body"}` JSON to a webhook. Every attempt is bounded by the client
/// timeout.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn deliver(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { subject, body })
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, subject: &str, body: &str) {
        match self.deliver(subject, body) {
            Ok(()) => tracing::info!(subject, "notification delivered"),
            Err(error) => tracing::warn!(subject, error = %error, "notification delivery failed"),
        }
    }
}

/// Used when no delivery transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, body: &str) {
        tracing::info!(subject, body, "notification (no transport configured)");
    }
}

#[derive(Debug)]
struct Notification {
    subject: String,
    body: String,
}

/// Runs a notifier on its own thread behind a bounded queue, so a slow delivery never holds up
/// the caller. Notifications that do not fit in the queue are dropped and logged.
pub struct BackgroundNotifier {
    sender: Sender<Notification>,
    worker: JoinHandle<()>,
}

#[derive(Debug, Clone)]
pub struct NotifierHandle {
    sender: Sender<Notification>,
}

impl BackgroundNotifier {
    pub fn spawn<N>(inner: N, capacity: usize) -> std::io::Result<Self>
    where
        N: Notifier + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        let worker = std::thread::Builder::new()
            .name("station-feed::notifier".to_string())
            .spawn(move || drain(inner, receiver))?;

        Ok(Self { sender, worker })
    }

    pub fn handle(&self) -> NotifierHandle {
        NotifierHandle {
            sender: self.sender.clone(),
        }
    }

    /// Waits for queued notifications to be attempted. Outstanding handles must be dropped
    /// first or this blocks until they are.
    pub fn shutdown(self) {
        let Self { sender, worker } = self;
        drop(sender);
        if worker.join().is_err() {
            tracing::error!("notifier worker panicked");
        }
    }
}

impl Notifier for NotifierHandle {
    fn notify(&self, subject: &str, body: &str) {
        let notification = Notification {
            subject: subject.to_string(),
            body: body.to_string(),
        };

        match self.sender.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(subject = %dropped.subject, "notification queue full; dropping");
            }
            Err(TrySendError::Disconnected(dropped)) => {
                tracing::warn!(subject = %dropped.subject, "notifier stopped; dropping");
            }
        }
    }
}

fn drain<N: Notifier>(inner: N, receiver: Receiver<Notification>) {
    for notification in receiver {
        inner.notify(&notification.subject, &notification.body);
    }
}
