//! Inbound side of the invalidation bus.

use std::sync::{Arc, OnceLock};

use layercache_core::{
    CacheError, CacheResult, DynPubSub, LocalStore, Subscription,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::command::{Notification, NotificationAction};
use crate::CacheValue;
use crate::metrics;

/// Lifecycle of a [`NotificationConsumer`].
///
/// ```text
/// Unsubscribed -> Subscribing -> Subscribed -> Closed
/// ```
///
/// A failed subscription attempt returns to `Unsubscribed`. `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Closed,
}

/// Applies invalidation commands published by other instances to a local
/// store.
///
/// A dedicated task owns the subscription and applies commands one at a time
/// in arrival order. Commands stamped with this instance's origin are
/// ignored: the publishing instance already applied them.
pub struct NotificationConsumer<V> {
    origin_uuid: Uuid,
    channel: String,
    pubsub: DynPubSub,
    target: OnceLock<Arc<dyn LocalStore<V>>>,
    state: Mutex<SubscriptionState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<V: CacheValue> NotificationConsumer<V> {
    pub fn new(pubsub: DynPubSub, channel: impl Into<String>, origin_uuid: Uuid) -> Self {
        Self {
            origin_uuid,
            channel: channel.into(),
            pubsub,
            target: OnceLock::new(),
            state: Mutex::new(SubscriptionState::Unsubscribed),
            worker: Mutex::new(None),
        }
    }

    pub fn origin_uuid(&self) -> Uuid {
        self.origin_uuid
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// Sets the store commands are applied to. Can only be done once.
    pub fn set_target_cache(&self, target: Arc<dyn LocalStore<V>>) -> CacheResult<()> {
        self.target.set(target).map_err(|_| {
            CacheError::configuration("notification consumer target cache is already set")
        })
    }

    /// Subscribes to the channel and starts applying commands.
    ///
    /// Subscribing again while subscribed is a no-op.
    pub async fn subscribe(&self) -> CacheResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                SubscriptionState::Unsubscribed => *state = SubscriptionState::Subscribing,
                SubscriptionState::Subscribing | SubscriptionState::Subscribed => return Ok(()),
                SubscriptionState::Closed => {
                    return Err(CacheError::configuration(
                        "notification consumer is closed",
                    ));
                }
            }
        }

        let Some(target) = self.target.get().cloned() else {
            *self.state.lock() = SubscriptionState::Unsubscribed;
            return Err(CacheError::configuration(
                "notification consumer needs a target cache before subscribing",
            ));
        };

        let subscription = match self.pubsub.subscribe(&self.channel).await {
            Ok(subscription) => subscription,
            Err(e) => {
                *self.state.lock() = SubscriptionState::Unsubscribed;
                return Err(e);
            }
        };

        let mut state = self.state.lock();
        if *state == SubscriptionState::Closed {
            tracing::debug!(channel = %self.channel, "Consumer closed while subscribing");
            return Ok(());
        }
        let worker = tokio::spawn(run_consumer(subscription, target, self.origin_uuid));
        *self.worker.lock() = Some(worker);
        *state = SubscriptionState::Subscribed;
        tracing::info!(channel = %self.channel, origin = %self.origin_uuid, "Subscribed to invalidation channel");
        Ok(())
    }

    /// Applies one command to the target store. Returns `false` when the
    /// command originated from this instance and was skipped.
    pub fn apply(&self, notification: Notification<V>) -> CacheResult<bool> {
        let target = self.target.get().ok_or_else(|| {
            CacheError::configuration("notification consumer has no target cache")
        })?;
        Ok(apply_notification(target.as_ref(), self.origin_uuid, notification))
    }

    /// Stops consuming. The subscription ends with the worker task.
    pub fn close(&self) {
        *self.state.lock() = SubscriptionState::Closed;
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

impl<V> Drop for NotificationConsumer<V> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
    }
}

fn apply_notification<V>(target: &dyn LocalStore<V>, origin_uuid: Uuid, notification: Notification<V>) -> bool {
    if notification.origin_uuid == origin_uuid {
        tracing::trace!(action = notification.action.action_id(), "Skipping own notification");
        return false;
    }

    let action_id = notification.action.action_id();
    match notification.action {
        NotificationAction::Clear => target.clear(),
        NotificationAction::Delete { key } => target.delete(&key),
        NotificationAction::DeleteMany { keys } => target.delete_many(&keys),
        NotificationAction::Set {
            key,
            group: Some(group),
            value,
        } => target.set_for_group(&key, value, &group),
        NotificationAction::Set {
            key,
            group: None,
            value,
        } => target.set(&key, value),
        NotificationAction::DeleteGroup { group } => target.delete_group(&group),
        NotificationAction::DeleteFromGroup { key, group } => {
            target.delete_from_group(&key, &group)
        }
    }
    tracing::debug!(action = action_id, origin = %notification.origin_uuid, "Applied remote invalidation");
    metrics::record_notification_applied(action_id);
    true
}

async fn run_consumer<V: CacheValue>(
    mut subscription: Subscription,
    target: Arc<dyn LocalStore<V>>,
    origin_uuid: Uuid,
) {
    while let Some(payload) = subscription.next_message().await {
        match Notification::<V>::decode(&payload) {
            Ok(notification) => {
                apply_notification(target.as_ref(), origin_uuid, notification);
            }
            Err(e) => {
                tracing::warn!(error = %e, channel = %subscription.channel(), "Failed to decode invalidation message");
            }
        }
    }
    tracing::debug!(channel = %subscription.channel(), "Invalidation subscription ended");
}
