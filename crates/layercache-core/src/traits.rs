//! Tier traits for the layercache abstraction layer.
//!
//! The engine composes three kinds of collaborators, leaves first:
//!
//! - [`LocalStore`]: an in-process bounded map, synchronous and never blocking
//! - [`RemoteStore`] + [`PubSub`]: a shared asynchronous key-value store and
//!   its notification channel
//! - [`DataSource`] / [`GroupDataSource`]: the authoritative origins
//!
//! Implementations must be thread-safe (`Send + Sync`). Expiration times are
//! expressed as Unix epoch milliseconds (see [`crate::clock`]).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::lookup::{BatchLookup, Lookup};
use crate::subscription::Subscription;

/// Free-form parameters forwarded to data sources on a load.
pub type LoadParams = serde_json::Value;

/// An in-process key-value map with capacity eviction and per-entry TTL.
///
/// Values are stored as `Option<V>` so that a confirmed null (`None`) stays
/// distinct from an absent entry. Eviction policy is the implementation's
/// concern.
pub trait LocalStore<V>: Send + Sync {
    // ==================== Flat keys ====================

    /// Reads a key.
    fn get(&self, key: &str) -> Lookup<V>;

    /// Reads several keys at once.
    fn get_many(&self, keys: &[String]) -> BatchLookup<V> {
        let mut batch = BatchLookup::new();
        for key in keys {
            batch.push(key.clone(), self.get(key));
        }
        batch
    }

    /// Stores a value (or a confirmed null) with the store's TTL.
    fn set(&self, key: &str, value: Option<V>);

    /// Removes a key.
    fn delete(&self, key: &str);

    /// Removes several keys.
    fn delete_many(&self, keys: &[String]) {
        for key in keys {
            self.delete(key);
        }
    }

    /// Removes every flat and grouped entry.
    fn clear(&self);

    /// Expiration time of an entry, `None` if absent or never expiring.
    fn get_expiration_time(&self, key: &str) -> Option<u64>;

    // ==================== Grouped keys ====================

    /// Reads a key scoped within a group.
    fn get_from_group(&self, key: &str, group: &str) -> Lookup<V>;

    /// Reads several keys of one group.
    fn get_many_from_group(&self, keys: &[String], group: &str) -> BatchLookup<V> {
        let mut batch = BatchLookup::new();
        for key in keys {
            batch.push(key.clone(), self.get_from_group(key, group));
        }
        batch
    }

    /// Stores a value within a group.
    fn set_for_group(&self, key: &str, value: Option<V>, group: &str);

    /// Removes one key of a group.
    fn delete_from_group(&self, key: &str, group: &str);

    /// Removes a whole group bucket.
    fn delete_group(&self, group: &str);

    /// Expiration time of a grouped entry.
    fn get_expiration_time_from_group(&self, key: &str, group: &str) -> Option<u64>;

    // ==================== Metadata ====================

    /// Returns the name of this store for logging/debugging.
    fn store_name(&self) -> &'static str {
        "local"
    }
}

/// A shared asynchronous key-value store (typically Redis).
///
/// Payloads are opaque strings; the engine owns the codec. Keys are already
/// fully qualified (prefix, group and generation applied) when they reach
/// the store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    // ==================== Key-value ====================

    /// Reads a payload, `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Reads several payloads; the result is positional.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    /// Writes a payload, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Writes several payloads with the same TTL.
    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Removes a key.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Removes several keys.
    async fn delete_many(&self, keys: &[String]) -> Result<(), CacheError>;

    /// Removes every key starting with `prefix`.
    async fn clear(&self, prefix: &str) -> Result<(), CacheError>;

    /// Expiration time of a key, `None` if absent or without TTL.
    async fn get_expiration_time(&self, key: &str) -> Result<Option<u64>, CacheError>;

    // ==================== Atomic counters ====================

    /// Reads a counter without creating it.
    async fn read_counter(&self, key: &str) -> Result<Option<i64>, CacheError>;

    /// Atomically returns the counter, creating it at `0` when absent.
    ///
    /// Concurrent first callers across processes must all observe the same
    /// initial value.
    async fn read_or_init_counter(&self, key: &str, ttl: Option<Duration>)
    -> Result<i64, CacheError>;

    /// Atomically increments the counter (creating it at `1`), optionally
    /// resetting its TTL, and returns the new value.
    async fn increment_counter(&self, key: &str, ttl: Option<Duration>)
    -> Result<i64, CacheError>;

    // ==================== Metadata ====================

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// The notification channel of a remote store.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publishes a message to every current subscriber of `channel`.
    async fn publish(&self, channel: &str, message: &str) -> Result<(), CacheError>;

    /// Subscribes to `channel`. Dropping (or unsubscribing) the returned
    /// handle ends the subscription.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, CacheError>;
}

/// An origin loader for flat keys.
///
/// Returning `Lookup::Miss` means "not found here, ask the next source";
/// `Lookup::Null` is a terminal, cacheable answer.
#[async_trait]
pub trait DataSource<V: Send + Sync + 'static>: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Resolves a single key.
    async fn get(&self, key: &str, params: Option<&LoadParams>) -> anyhow::Result<Lookup<V>>;

    /// Resolves a batch. Keys missing from the returned map are unresolved.
    ///
    /// The default implementation resolves keys one by one.
    async fn get_many(
        &self,
        keys: &[String],
        params: Option<&LoadParams>,
    ) -> anyhow::Result<HashMap<String, Option<V>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(stored) = self.get(key, params).await?.into_stored() {
                found.insert(key.clone(), stored);
            }
        }
        Ok(found)
    }
}

/// An origin loader for keys scoped within a group.
#[async_trait]
pub trait GroupDataSource<V: Send + Sync + 'static>: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Resolves a single key of a group.
    async fn get_from_group(
        &self,
        key: &str,
        group: &str,
        params: Option<&LoadParams>,
    ) -> anyhow::Result<Lookup<V>>;

    /// Resolves a batch of keys of one group.
    async fn get_many_from_group(
        &self,
        keys: &[String],
        group: &str,
        params: Option<&LoadParams>,
    ) -> anyhow::Result<HashMap<String, Option<V>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(stored) = self.get_from_group(key, group, params).await?.into_stored() {
                found.insert(key.clone(), stored);
            }
        }
        Ok(found)
    }
}
