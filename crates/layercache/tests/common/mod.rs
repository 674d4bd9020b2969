//! Shared fixtures for loader tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use layercache::{
    BatchLookup, CacheConfig, CacheError, DataSource, GroupDataSource, InMemoryRemote, LoadParams,
    LocalStore, Lookup, MemoryStore, RemoteStore,
};
use parking_lot::Mutex;

/// In-memory data source that counts how often it is asked.
///
/// Flat values are keyed by key, grouped values by `group/key`.
pub struct CountingSource {
    name: String,
    values: Mutex<HashMap<String, Option<String>>>,
    calls: AtomicUsize,
    batch_calls: AtomicUsize,
    batch_keys: Mutex<Vec<Vec<String>>>,
    last_params: Mutex<Option<LoadParams>>,
    failing: AtomicBool,
    delay: Duration,
}

impl CountingSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            batch_keys: Mutex::new(Vec::new()),
            last_params: Mutex::new(None),
            failing: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_value(self, key: &str, value: Option<&str>) -> Self {
        self.put(key, value);
        self
    }

    pub fn with_group_value(self, key: &str, group: &str, value: Option<&str>) -> Self {
        self.put(&format!("{group}/{key}"), value);
        self
    }

    pub fn put(&self, key: &str, value: Option<&str>) {
        self.values
            .lock()
            .insert(key.to_string(), value.map(str::to_string));
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn batch_keys(&self) -> Vec<Vec<String>> {
        self.batch_keys.lock().clone()
    }

    pub fn last_params(&self) -> Option<LoadParams> {
        self.last_params.lock().clone()
    }

    async fn lookup(&self, key: &str, params: Option<&LoadParams>) -> anyhow::Result<Lookup<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock() = params.cloned();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("{} is unavailable", self.name);
        }
        Ok(self
            .values
            .lock()
            .get(key)
            .cloned()
            .map(Lookup::from_stored)
            .unwrap_or(Lookup::Miss))
    }

    async fn lookup_many(&self, keys: Vec<String>) -> anyhow::Result<HashMap<String, Option<String>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.batch_keys.lock().push(keys.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("{} is unavailable", self.name);
        }
        let values = self.values.lock();
        Ok(keys
            .into_iter()
            .filter_map(|key| values.get(&key).cloned().map(|value| (key, value)))
            .collect())
    }
}

#[async_trait]
impl DataSource<String> for CountingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str, params: Option<&LoadParams>) -> anyhow::Result<Lookup<String>> {
        self.lookup(key, params).await
    }

    async fn get_many(
        &self,
        keys: &[String],
        _params: Option<&LoadParams>,
    ) -> anyhow::Result<HashMap<String, Option<String>>> {
        self.lookup_many(keys.to_vec()).await
    }
}

#[async_trait]
impl GroupDataSource<String> for CountingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_from_group(
        &self,
        key: &str,
        group: &str,
        params: Option<&LoadParams>,
    ) -> anyhow::Result<Lookup<String>> {
        self.lookup(&format!("{group}/{key}"), params).await
    }

    async fn get_many_from_group(
        &self,
        keys: &[String],
        group: &str,
        _params: Option<&LoadParams>,
    ) -> anyhow::Result<HashMap<String, Option<String>>> {
        let scoped = keys.iter().map(|key| format!("{group}/{key}")).collect();
        let prefix = format!("{group}/");
        Ok(self
            .lookup_many(scoped)
            .await?
            .into_iter()
            .map(|(key, value)| (key.trim_start_matches(&prefix).to_string(), value))
            .collect())
    }
}

/// Local store that counts removals.
pub struct CountingLocalStore {
    inner: MemoryStore<String>,
    deletes: AtomicUsize,
}

impl CountingLocalStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: MemoryStore::new(ttl, 1000),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.deletes.fetch_add(1, Ordering::SeqCst);
    }
}

impl LocalStore<String> for CountingLocalStore {
    fn get(&self, key: &str) -> Lookup<String> {
        self.inner.get(key)
    }

    fn get_many(&self, keys: &[String]) -> BatchLookup<String> {
        self.inner.get_many(keys)
    }

    fn set(&self, key: &str, value: Option<String>) {
        self.inner.set(key, value);
    }

    fn delete(&self, key: &str) {
        self.count();
        self.inner.delete(key);
    }

    fn delete_many(&self, keys: &[String]) {
        self.count();
        self.inner.delete_many(keys);
    }

    fn clear(&self) {
        self.count();
        self.inner.clear();
    }

    fn get_expiration_time(&self, key: &str) -> Option<u64> {
        self.inner.get_expiration_time(key)
    }

    fn get_from_group(&self, key: &str, group: &str) -> Lookup<String> {
        self.inner.get_from_group(key, group)
    }

    fn set_for_group(&self, key: &str, value: Option<String>, group: &str) {
        self.inner.set_for_group(key, value, group);
    }

    fn delete_from_group(&self, key: &str, group: &str) {
        self.count();
        self.inner.delete_from_group(key, group);
    }

    fn delete_group(&self, group: &str) {
        self.count();
        self.inner.delete_group(group);
    }

    fn get_expiration_time_from_group(&self, key: &str, group: &str) -> Option<u64> {
        self.inner.get_expiration_time_from_group(key, group)
    }

    fn store_name(&self) -> &'static str {
        "counting"
    }
}

/// Remote store that counts expiration lookups.
#[derive(Clone)]
pub struct CountingRemote {
    inner: InMemoryRemote,
    expiration_lookups: Arc<AtomicUsize>,
}

impl CountingRemote {
    pub fn new(inner: InMemoryRemote) -> Self {
        Self {
            inner,
            expiration_lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn expiration_lookups(&self) -> usize {
        self.expiration_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for CountingRemote {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.inner.get_many(keys).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl).await
    }

    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.inner.set_many(entries, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), CacheError> {
        self.inner.delete_many(keys).await
    }

    async fn clear(&self, prefix: &str) -> Result<(), CacheError> {
        self.inner.clear(prefix).await
    }

    async fn get_expiration_time(&self, key: &str) -> Result<Option<u64>, CacheError> {
        self.expiration_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_expiration_time(key).await
    }

    async fn read_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        self.inner.read_counter(key).await
    }

    async fn read_or_init_counter(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.inner.read_or_init_counter(key, ttl).await
    }

    async fn increment_counter(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.inner.increment_counter(key, ttl).await
    }

    fn backend_name(&self) -> &'static str {
        "counting"
    }
}

/// Collects errors passed to a handler.
#[derive(Clone, Default)]
pub struct ErrorLog {
    errors: Arc<Mutex<Vec<CacheError>>>,
}

impl ErrorLog {
    pub fn load_handler(&self) -> layercache::handlers::LoadErrorHandler {
        let errors = Arc::clone(&self.errors);
        Arc::new(move |err: &CacheError, _: &str, _: &str| errors.lock().push(err.clone()))
    }

    pub fn update_handler(&self) -> layercache::handlers::CacheUpdateErrorHandler {
        let errors = Arc::clone(&self.errors);
        Arc::new(move |err: &CacheError, _: &str| errors.lock().push(err.clone()))
    }

    pub fn publisher_handler(&self) -> layercache::handlers::PublisherErrorHandler {
        let errors = Arc::clone(&self.errors);
        Arc::new(move |err: &CacheError, _: &str| errors.lock().push(err.clone()))
    }

    pub fn errors(&self) -> Vec<CacheError> {
        self.errors.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }
}

pub fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|key| key.to_string()).collect()
}

/// Config with the remote tier enabled.
pub fn remote_config() -> CacheConfig {
    let mut config = CacheConfig::default();
    config.remote.enabled = true;
    config
}

/// Polls `check` for up to a second.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
