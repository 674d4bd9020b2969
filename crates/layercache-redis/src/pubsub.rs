//! Redis Pub/Sub channel for cross-instance invalidation.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use futures_util::StreamExt;
use layercache_core::{CacheError, PubSub, Subscription};
use redis::AsyncCommands;
use tokio::sync::mpsc;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// [`PubSub`] over Redis `PUBLISH` / `SUBSCRIBE`.
///
/// Publishing borrows a pooled connection. Every subscription owns a
/// dedicated connection (a subscribed connection cannot run other
/// commands) and a feeder task that forwards payloads into the
/// [`Subscription`].
///
/// ## Reconnects
///
/// ```text
/// connection lost → sleep(backoff) → SUBSCRIBE again
///                        ↑ doubles up to 5 minutes, resets on success
/// ```
///
/// Messages published while the connection is down are lost, as with any
/// Redis Pub/Sub client.
#[derive(Clone)]
pub struct RedisPubSub {
    pool: Pool,
    client: redis::Client,
}

impl RedisPubSub {
    pub fn new(pool: Pool, client: redis::Client) -> Self {
        Self { pool, client }
    }
}

async fn connect(client: &redis::Client, channel: &str) -> redis::RedisResult<redis::aio::PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Forwards messages until the subscription handle is gone, reconnecting
/// with exponential backoff whenever the connection drops.
async fn feed(
    client: redis::Client,
    channel: String,
    mut pubsub: redis::aio::PubSub,
    sender: mpsc::UnboundedSender<String>,
) {
    loop {
        {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                match message.get_payload::<String>() {
                    Ok(payload) => {
                        if sender.send(payload).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "failed to parse pub/sub message payload");
                    }
                }
            }
        }

        let mut backoff = INITIAL_BACKOFF;
        loop {
            if sender.is_closed() {
                return;
            }
            tracing::error!(
                channel = %channel,
                backoff_secs = backoff.as_secs(),
                "Pub/sub connection closed, reconnecting..."
            );
            tokio::time::sleep(backoff).await;
            match connect(&client, &channel).await {
                Ok(reconnected) => {
                    tracing::info!(channel = %channel, "Resubscribed to invalidation channel");
                    pubsub = reconnected;
                    break;
                }
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Redis SUBSCRIBE error");
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, channel: &str, message: &str) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::remote(format!("failed to get Redis connection: {e}")))?;

        conn.publish::<_, _, ()>(channel, message)
            .await
            .map_err(|e| CacheError::remote(format!("failed to publish to {channel}: {e}")))?;

        tracing::debug!(channel = %channel, "published cache notification");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CacheError> {
        // The first SUBSCRIBE happens here so that messages published after
        // this call returns are delivered.
        let pubsub = connect(&self.client, channel)
            .await
            .map_err(|e| CacheError::remote(format!("failed to subscribe to {channel}: {e}")))?;
        tracing::info!(channel = %channel, "Subscribed to invalidation channel");

        let (sender, messages) = mpsc::unbounded_channel();
        let feeder = tokio::spawn(feed(
            self.client.clone(),
            channel.to_string(),
            pubsub,
            sender,
        ));
        Ok(Subscription::with_feeder(
            channel,
            messages,
            feeder.abort_handle(),
        ))
    }
}

impl std::fmt::Debug for RedisPubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPubSub")
            .field("pool", &self.pool.status())
            .finish()
    }
}
