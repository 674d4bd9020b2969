//! Group-scoped loader.

use std::sync::Arc;

use indexmap::IndexMap;
use layercache_core::{BatchLookup, CacheResult, LoadParams, Lookup};

use crate::CacheValue;
use crate::builder::LoaderBuilder;
use crate::engine::{Engine, LoaderStats};
use crate::key::EntryKey;

/// Read-through cache over keys scoped within groups.
///
/// A whole group can be invalidated in constant time: the remote tier moves
/// the group to a new generation instead of deleting its keys.
pub struct GroupLoader<V> {
    engine: Arc<Engine<V>>,
}

impl<V> Clone for GroupLoader<V> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<V: CacheValue> GroupLoader<V> {
    pub fn builder() -> LoaderBuilder<V> {
        LoaderBuilder::new()
    }

    pub(crate) fn from_engine(engine: Arc<Engine<V>>) -> Self {
        Self { engine }
    }

    pub async fn get(&self, key: &str, group: &str) -> CacheResult<Lookup<V>> {
        self.engine.get(&EntryKey::grouped(key, group), None).await
    }

    pub async fn get_with_params(
        &self,
        key: &str,
        group: &str,
        params: &LoadParams,
    ) -> CacheResult<Lookup<V>> {
        self.engine
            .get(&EntryKey::grouped(key, group), Some(params))
            .await
    }

    pub fn get_in_memory_only(&self, key: &str, group: &str) -> Lookup<V> {
        self.engine.get_in_memory_only(&EntryKey::grouped(key, group))
    }

    pub async fn get_async_only(
        &self,
        key: &str,
        group: &str,
        params: Option<&LoadParams>,
    ) -> CacheResult<Lookup<V>> {
        self.engine
            .get_async_only(&EntryKey::grouped(key, group), params)
            .await
    }

    pub async fn get_many(
        &self,
        keys: &[String],
        group: &str,
        params: Option<&LoadParams>,
    ) -> CacheResult<IndexMap<String, Option<V>>> {
        self.engine.get_many(keys, Some(group), params).await
    }

    pub fn get_many_in_memory_only(&self, keys: &[String], group: &str) -> BatchLookup<V> {
        self.engine.get_many_in_memory_only(keys, Some(group))
    }

    pub async fn set(&self, key: &str, group: &str, value: Option<V>) {
        self.engine.set(&EntryKey::grouped(key, group), value).await;
    }

    pub async fn invalidate_cache(&self) {
        self.engine.invalidate_all().await;
    }

    /// Invalidates every key of `group`.
    pub async fn invalidate_cache_for_group(&self, group: &str) {
        self.engine.invalidate_group(group).await;
    }

    pub async fn invalidate_cache_from_group(&self, key: &str, group: &str) {
        self.engine.invalidate(&EntryKey::grouped(key, group)).await;
    }

    pub async fn close(&self) {
        self.engine.close().await;
    }

    pub fn stats(&self) -> LoaderStats {
        self.engine.stats()
    }
}
