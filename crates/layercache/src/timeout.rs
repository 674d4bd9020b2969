//! Deadline decorator for remote stores.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use layercache_core::{CacheError, CacheResult, DynRemoteStore, RemoteStore};

/// Wraps a remote store so that every operation fails with
/// [`CacheError::RemoteTimeout`] once `timeout` elapses.
pub struct TimeoutRemote {
    inner: DynRemoteStore,
    timeout: Duration,
}

impl TimeoutRemote {
    pub fn new(inner: DynRemoteStore, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = CacheResult<T>>,
    ) -> CacheResult<T> {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                tracing::warn!(
                    backend = self.inner.backend_name(),
                    operation,
                    timeout_ms,
                    "Remote operation timed out"
                );
                Err(CacheError::remote_timeout(operation, timeout_ms))
            }
        }
    }
}

#[async_trait]
impl RemoteStore for TimeoutRemote {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.timed("get", self.inner.get(key)).await
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        self.timed("get_many", self.inner.get_many(keys)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.timed("set", self.inner.set(key, value, ttl)).await
    }

    async fn set_many(&self, entries: &[(String, String)], ttl: Option<Duration>) -> CacheResult<()> {
        self.timed("set_many", self.inner.set_many(entries, ttl)).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.timed("delete", self.inner.delete(key)).await
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<()> {
        self.timed("delete_many", self.inner.delete_many(keys)).await
    }

    async fn clear(&self, prefix: &str) -> CacheResult<()> {
        self.timed("clear", self.inner.clear(prefix)).await
    }

    async fn get_expiration_time(&self, key: &str) -> CacheResult<Option<u64>> {
        self.timed("get_expiration_time", self.inner.get_expiration_time(key))
            .await
    }

    async fn read_counter(&self, key: &str) -> CacheResult<Option<i64>> {
        self.timed("read_counter", self.inner.read_counter(key)).await
    }

    async fn read_or_init_counter(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64> {
        self.timed("read_or_init_counter", self.inner.read_or_init_counter(key, ttl))
            .await
    }

    async fn increment_counter(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64> {
        self.timed("increment_counter", self.inner.increment_counter(key, ttl))
            .await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layercache_memory::InMemoryRemote;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_slow_operation_times_out() {
        let remote = InMemoryRemote::new();
        remote.set_latency(Duration::from_millis(200));
        let timed = TimeoutRemote::new(Arc::new(remote), Duration::from_millis(20));

        let err = timed.get("k").await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "Remote operation \"get\" timed out after 20ms"
        );
    }

    #[tokio::test]
    async fn test_fast_operation_passes_through() {
        let remote = InMemoryRemote::new();
        let timed = TimeoutRemote::new(Arc::new(remote.clone()), Duration::from_millis(500));

        timed.set("k", "1", None).await.unwrap();

        assert_eq!(timed.get("k").await.unwrap().as_deref(), Some("1"));
        assert_eq!(timed.backend_name(), "in-memory");
    }
}
