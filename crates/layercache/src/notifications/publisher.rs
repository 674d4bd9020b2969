//! Outbound side of the invalidation bus.

use layercache_core::DynPubSub;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::command::{Notification, NotificationAction};
use crate::handlers::PublisherErrorHandler;
use crate::metrics;

/// Publishes invalidation commands in the order they were issued.
///
/// Publishing is fire-and-forget: commands are queued and a single worker
/// task sends them one after another, so cache operations never wait on the
/// channel. Failures go to the publisher error handler.
pub struct NotificationPublisher<V> {
    origin_uuid: Uuid,
    channel: String,
    mailbox: Mutex<Option<mpsc::UnboundedSender<Notification<V>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<V> NotificationPublisher<V>
where
    V: Serialize + Send + Sync + 'static,
{
    /// Starts the publishing worker. Must be called within a Tokio runtime.
    pub fn new(
        pubsub: DynPubSub,
        channel: impl Into<String>,
        origin_uuid: Uuid,
        on_error: PublisherErrorHandler,
    ) -> Self {
        let channel = channel.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_publisher(pubsub, channel.clone(), rx, on_error));
        Self {
            origin_uuid,
            channel,
            mailbox: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn origin_uuid(&self) -> Uuid {
        self.origin_uuid
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn send(&self, action: NotificationAction<V>) {
        let notification = Notification::new(self.origin_uuid, action);
        let sent = self
            .mailbox
            .lock()
            .as_ref()
            .is_some_and(|mailbox| mailbox.send(notification).is_ok());
        if !sent {
            tracing::debug!(channel = %self.channel, "Publisher closed, dropping notification");
        }
    }

    pub fn clear(&self) {
        self.send(NotificationAction::Clear);
    }

    pub fn delete(&self, key: &str) {
        self.send(NotificationAction::Delete {
            key: key.to_string(),
        });
    }

    pub fn delete_many(&self, keys: &[String]) {
        self.send(NotificationAction::DeleteMany {
            keys: keys.to_vec(),
        });
    }

    pub fn set(&self, key: &str, group: Option<&str>, value: Option<V>) {
        self.send(NotificationAction::Set {
            key: key.to_string(),
            group: group.map(str::to_string),
            value,
        });
    }

    pub fn delete_group(&self, group: &str) {
        self.send(NotificationAction::DeleteGroup {
            group: group.to_string(),
        });
    }

    pub fn delete_from_group(&self, key: &str, group: &str) {
        self.send(NotificationAction::DeleteFromGroup {
            key: key.to_string(),
            group: group.to_string(),
        });
    }

    /// Stops accepting commands and waits until the queued ones are sent.
    pub async fn close(&self) {
        self.mailbox.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Notification publisher task failed");
            }
        }
    }
}

async fn run_publisher<V: Serialize>(
    pubsub: DynPubSub,
    channel: String,
    mut mailbox: mpsc::UnboundedReceiver<Notification<V>>,
    on_error: PublisherErrorHandler,
) {
    while let Some(notification) = mailbox.recv().await {
        let action_id = notification.action.action_id();
        let payload = match notification.encode() {
            Ok(payload) => payload,
            Err(e) => {
                on_error(&e, &channel);
                continue;
            }
        };
        match pubsub.publish(&channel, &payload).await {
            Ok(()) => {
                tracing::debug!(channel = %channel, action = action_id, "Published invalidation");
                metrics::record_notification_published(action_id);
            }
            Err(e) => on_error(&e, &channel),
        }
    }
    tracing::debug!(channel = %channel, "Notification publisher stopped");
}

impl<V> Drop for NotificationPublisher<V> {
    fn drop(&mut self) {
        // Dropping the sender lets the worker drain the queue and exit.
        self.mailbox.get_mut().take();
    }
}
