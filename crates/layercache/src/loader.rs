//! Flat-key loader.

use std::sync::Arc;

use indexmap::IndexMap;
use layercache_core::{BatchLookup, CacheResult, LoadParams, Lookup};

use crate::CacheValue;
use crate::builder::LoaderBuilder;
use crate::engine::{Engine, LoaderStats};
use crate::key::EntryKey;

/// Read-through cache over flat keys.
///
/// Cloning is cheap; clones share tiers, in-flight loads and the
/// notification bus.
///
/// ```ignore
/// let users = Loader::<User>::builder()
///     .with_config(config)
///     .with_remote_store(redis)
///     .with_data_source(Arc::new(UserTable::new(pool)))
///     .build()
///     .await?;
///
/// match users.get("u1").await? {
///     Lookup::Hit(user) => println!("{}", user.name),
///     Lookup::Null => println!("no such user"),
///     Lookup::Miss => println!("nobody knows"),
/// }
/// ```
pub struct Loader<V> {
    engine: Arc<Engine<V>>,
}

impl<V> Clone for Loader<V> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<V: CacheValue> Loader<V> {
    pub fn builder() -> LoaderBuilder<V> {
        LoaderBuilder::new()
    }

    pub(crate) fn from_engine(engine: Arc<Engine<V>>) -> Self {
        Self { engine }
    }

    /// Resolves a key through every tier.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing resolves the key and `throw_if_unresolved` is
    /// set; `Load` when a data source fails and `throw_if_load_error` is set.
    pub async fn get(&self, key: &str) -> CacheResult<Lookup<V>> {
        self.engine.get(&EntryKey::flat(key), None).await
    }

    /// Like [`Loader::get`], forwarding `params` to the data sources.
    pub async fn get_with_params(&self, key: &str, params: &LoadParams) -> CacheResult<Lookup<V>> {
        self.engine.get(&EntryKey::flat(key), Some(params)).await
    }

    /// Reads the local tier only. Never blocks on I/O.
    pub fn get_in_memory_only(&self, key: &str) -> Lookup<V> {
        self.engine.get_in_memory_only(&EntryKey::flat(key))
    }

    /// Skips the local tier and resolves through the remote tier and the
    /// data sources.
    pub async fn get_async_only(&self, key: &str, params: Option<&LoadParams>) -> CacheResult<Lookup<V>> {
        self.engine.get_async_only(&EntryKey::flat(key), params).await
    }

    /// Resolves several keys. The result holds resolved keys only, in request
    /// order; a confirmed null maps to `None`.
    ///
    /// Batch loads are not coalesced with concurrent single-key loads.
    pub async fn get_many(
        &self,
        keys: &[String],
        params: Option<&LoadParams>,
    ) -> CacheResult<IndexMap<String, Option<V>>> {
        self.engine.get_many(keys, None, params).await
    }

    pub fn get_many_in_memory_only(&self, keys: &[String]) -> BatchLookup<V> {
        self.engine.get_many_in_memory_only(keys, None)
    }

    /// Stores a value (`None` for a confirmed null) in every tier.
    pub async fn set(&self, key: &str, value: Option<V>) {
        self.engine.set(&EntryKey::flat(key), value).await;
    }

    /// Drops every entry from every tier.
    pub async fn invalidate_cache(&self) {
        self.engine.invalidate_all().await;
    }

    pub async fn invalidate_cache_for(&self, key: &str) {
        self.engine.invalidate(&EntryKey::flat(key)).await;
    }

    pub async fn invalidate_cache_for_many(&self, keys: &[String]) {
        self.engine.invalidate_many(keys).await;
    }

    /// Stops consuming notifications and flushes pending ones.
    pub async fn close(&self) {
        self.engine.close().await;
    }

    pub fn stats(&self) -> LoaderStats {
        self.engine.stats()
    }
}
