//! In-memory remote store and notification channel.
//!
//! `InMemoryRemote` stands in for Redis in single-node deployments and in
//! tests: clones share one keyspace and one set of channels, so several
//! loaders built over clones behave like processes sharing a Redis instance.
//! It can simulate outages and latency to exercise the engine's failure
//! handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use layercache_core::clock::{expires_after, now_millis};
use layercache_core::{CacheError, PubSub, RemoteStore, Subscription};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct RemoteEntry {
    payload: String,
    expires_at: Option<u64>,
}

impl RemoteEntry {
    fn new(payload: String, ttl: Option<Duration>) -> Self {
        Self {
            payload,
            expires_at: ttl.map(expires_after),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Default)]
struct Shared {
    entries: DashMap<String, RemoteEntry>,
    channels: DashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    published: AtomicU64,
}

/// Shared in-memory key-value store with pub/sub.
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    shared: Arc<Shared>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with a remote error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delays every subsequent operation.
    pub fn set_latency(&self, latency: Duration) {
        self.shared
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Whether a key is physically present, ignoring expiry.
    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.entries.contains_key(key)
    }

    /// Number of physically present keys.
    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.entries.is_empty()
    }

    /// Number of messages published so far.
    pub fn published_count(&self) -> u64 {
        self.shared.published.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), CacheError> {
        let latency = self.shared.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::remote("in-memory remote is unavailable"));
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Option<String> {
        let now = now_millis();
        let entry = self.shared.entries.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.shared
                .entries
                .remove_if(key, |_, entry| entry.is_expired(now));
            return None;
        }
        Some(entry.payload.clone())
    }

    fn parse_counter(key: &str, payload: &str) -> Result<i64, CacheError> {
        payload
            .parse::<i64>()
            .map_err(|e| CacheError::remote(format!("counter {key} is not an integer: {e}")))
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.enter().await?;
        Ok(self.read(key))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.enter().await?;
        Ok(keys.iter().map(|key| self.read(key)).collect())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.enter().await?;
        self.shared
            .entries
            .insert(key.to_string(), RemoteEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.enter().await?;
        for (key, value) in entries {
            self.shared
                .entries
                .insert(key.clone(), RemoteEntry::new(value.clone(), ttl));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.enter().await?;
        self.shared.entries.remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), CacheError> {
        self.enter().await?;
        for key in keys {
            self.shared.entries.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<(), CacheError> {
        self.enter().await?;
        self.shared
            .entries
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn get_expiration_time(&self, key: &str) -> Result<Option<u64>, CacheError> {
        self.enter().await?;
        let now = now_millis();
        Ok(self
            .shared
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at))
    }

    async fn read_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        self.enter().await?;
        self.read(key)
            .map(|payload| Self::parse_counter(key, &payload))
            .transpose()
    }

    async fn read_or_init_counter(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.enter().await?;
        let now = now_millis();
        // The entry guard holds the shard lock, making read-or-init atomic.
        let mut entry = self
            .shared
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RemoteEntry::new("0".to_string(), ttl));
        if entry.is_expired(now) {
            *entry = RemoteEntry::new("0".to_string(), ttl);
        }
        Self::parse_counter(key, &entry.payload)
    }

    async fn increment_counter(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.enter().await?;
        let now = now_millis();
        let mut entry = self
            .shared
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RemoteEntry::new("0".to_string(), None));
        let current = if entry.is_expired(now) {
            0
        } else {
            Self::parse_counter(key, &entry.payload)?
        };
        let next = current + 1;
        let expires_at = match ttl {
            Some(ttl) => Some(expires_after(ttl)),
            None if entry.is_expired(now) => None,
            None => entry.expires_at,
        };
        *entry = RemoteEntry {
            payload: next.to_string(),
            expires_at,
        };
        Ok(next)
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

#[async_trait]
impl PubSub for InMemoryRemote {
    async fn publish(&self, channel: &str, message: &str) -> Result<(), CacheError> {
        self.enter().await?;
        if let Some(mut subscribers) = self.shared.channels.get_mut(channel) {
            subscribers.retain(|subscriber| subscriber.send(message.to_string()).is_ok());
        }
        self.shared.published.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(channel = %channel, "published in-memory message");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CacheError> {
        self.enter().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(channel, rx))
    }
}

impl std::fmt::Debug for InMemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRemote")
            .field("entries", &self.shared.entries.len())
            .field("channels", &self.shared.channels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[tokio::test]
    async fn test_get_set_delete() {
        let remote = InMemoryRemote::new();
        remote.set("k", "\"v\"", None).await.unwrap();
        assert_eq!(remote.get("k").await.unwrap().as_deref(), Some("\"v\""));

        remote.delete("k").await.unwrap();
        assert_eq!(remote.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expires_entries() {
        let remote = InMemoryRemote::new();
        remote
            .set("k", "1", Some(Duration::from_millis(40)))
            .await
            .unwrap();
        let expires_at = remote.get_expiration_time("k").await.unwrap().unwrap();
        assert!(expires_at > now_millis());

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(remote.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_by_prefix() {
        let remote = InMemoryRemote::new();
        remote.set("users:1", "1", None).await.unwrap();
        remote.set("orders:1", "1", None).await.unwrap();

        remote.clear("users:").await.unwrap();

        assert!(!remote.contains_key("users:1"));
        assert!(remote.contains_key("orders:1"));
    }

    #[tokio::test]
    async fn test_counter_init_is_idempotent() {
        let remote = InMemoryRemote::new();
        assert_eq!(remote.read_counter("c").await.unwrap(), None);
        assert_eq!(remote.read_or_init_counter("c", None).await.unwrap(), 0);
        assert_eq!(remote.read_or_init_counter("c", None).await.unwrap(), 0);
        assert_eq!(remote.increment_counter("c", None).await.unwrap(), 1);
        assert_eq!(remote.read_or_init_counter("c", None).await.unwrap(), 1);
        assert_eq!(remote.read_counter("c").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let remote = InMemoryRemote::new();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let remote = remote.clone();
            handles.push(tokio::spawn(async move {
                remote.increment_counter("c", None).await.unwrap()
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();

        assert_eq!(seen, (1..=50).collect::<Vec<_>>());
        assert_eq!(remote.read_counter("c").await.unwrap(), Some(50));
    }

    #[test]
    fn test_unavailable_fails_operations() {
        let remote = InMemoryRemote::new();
        block_on(async {
            remote.set_unavailable(true);
            assert!(remote.get("k").await.is_err());
            assert!(remote.publish("c", "m").await.is_err());

            remote.set_unavailable(false);
            assert!(remote.get("k").await.is_ok());
        });
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let remote = InMemoryRemote::new();
        let mut first = remote.subscribe("invalidate").await.unwrap();
        let mut second = remote.clone().subscribe("invalidate").await.unwrap();

        remote.publish("invalidate", "hello").await.unwrap();

        assert_eq!(first.next_message().await.as_deref(), Some("hello"));
        assert_eq!(second.next_message().await.as_deref(), Some("hello"));
        assert_eq!(remote.published_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let remote = InMemoryRemote::new();
        let subscription = remote.subscribe("invalidate").await.unwrap();
        subscription.unsubscribe();

        remote.publish("invalidate", "hello").await.unwrap();

        assert!(
            remote
                .shared
                .channels
                .get("invalidate")
                .is_some_and(|subscribers| subscribers.is_empty())
        );
    }
}
