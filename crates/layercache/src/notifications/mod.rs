//! Cross-process invalidation bus.
//!
//! Every loader with notifications enabled owns a publisher and a consumer
//! sharing one origin id. Local mutations are applied first, then announced;
//! other instances apply the announced command to their local tier only.
//! The remote tier is shared, so it never needs to be told.
//!
//! ```text
//! Instance A: loader.invalidate_cache_for("u1")
//!   -> local delete, remote delete
//!   -> PUBLISH {"originUuid":A,"actionId":"DELETE","key":"u1"}
//! Instance A consumer: origin A == A -> skipped
//! Instance B consumer: local delete "u1"
//! ```

mod command;
mod consumer;
mod publisher;

pub use command::{Notification, NotificationAction};
pub use consumer::{NotificationConsumer, SubscriptionState};
pub use publisher::NotificationPublisher;

use layercache_core::DynPubSub;
use uuid::Uuid;

use crate::CacheValue;
use crate::handlers::PublisherErrorHandler;

/// Builds a publisher and a consumer on `channel` sharing a fresh origin id.
///
/// The consumer still needs a target cache and a call to `subscribe`. Must be
/// called within a Tokio runtime.
pub fn invalidation_bus<V: CacheValue>(
    pubsub: DynPubSub,
    channel: &str,
    on_error: PublisherErrorHandler,
) -> (NotificationPublisher<V>, NotificationConsumer<V>) {
    let origin_uuid = Uuid::new_v4();
    let publisher = NotificationPublisher::new(pubsub.clone(), channel, origin_uuid, on_error);
    let consumer = NotificationConsumer::new(pubsub, channel, origin_uuid);
    (publisher, consumer)
}
