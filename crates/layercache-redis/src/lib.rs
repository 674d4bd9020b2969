//! # layercache-redis
//!
//! Redis implementations of the layercache remote tier:
//!
//! - [`RedisRemoteStore`]: shared key-value tier and generation counters
//! - [`RedisPubSub`]: invalidation notification channel
//!
//! Both share one deadpool connection pool; see [`create_redis_backend`].

mod pubsub;
mod store;

use std::sync::Arc;
use std::time::Duration;

use layercache_core::{CacheError, CacheResult, RedisConfig};

pub use pubsub::RedisPubSub;
pub use store::RedisRemoteStore;

/// A connected Redis tier: the store and its notification channel.
#[derive(Debug, Clone)]
pub struct RedisBackend {
    pub store: Arc<RedisRemoteStore>,
    pub pubsub: Arc<RedisPubSub>,
}

/// Connects to Redis and builds the remote tier.
///
/// ## Graceful Degradation
///
/// An unreachable server is reported as an error rather than a panic, so
/// callers can fall back to an in-process remote (or run local-only).
///
/// # Errors
///
/// `Configuration` for an invalid URL or pool settings, `Remote` when no
/// connection can be established.
pub async fn create_redis_backend(config: &RedisConfig) -> CacheResult<RedisBackend> {
    tracing::info!(url = %config.url, "Connecting to Redis");

    let timeout = Duration::from_millis(config.timeout_ms);
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| CacheError::configuration(format!("failed to create Redis pool: {e}")))?;
    let client = redis::Client::open(config.url.as_str())
        .map_err(|e| CacheError::configuration(format!("invalid Redis URL: {e}")))?;

    // Fail fast instead of on the first cache operation.
    pool.get().await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to connect to Redis");
        CacheError::remote(format!("failed to connect to Redis: {e}"))
    })?;
    tracing::info!("Connected to Redis");

    Ok(RedisBackend {
        store: Arc::new(RedisRemoteStore::new(pool.clone())),
        pubsub: Arc::new(RedisPubSub::new(pool, client)),
    })
}
