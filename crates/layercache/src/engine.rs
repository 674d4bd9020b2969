//! Resolution engine shared by [`crate::Loader`] and [`crate::GroupLoader`].
//!
//! Reads go local tier, then remote tier, then the data source chain. Only
//! the first two steps are cheap: everything past the local tier runs inside
//! a single-flight load so concurrent callers for one entry share one
//! resolution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use indexmap::{IndexMap, IndexSet};
use layercache_core::clock::millis_left;
use layercache_core::{
    BatchLookup, CacheError, CacheResult, LoadParams, LoadingConfig, LocalStore, Lookup,
};

use crate::CacheValue;
use crate::handlers::ErrorHandlers;
use crate::key::EntryKey;
use crate::metrics;
use crate::notifications::{NotificationConsumer, NotificationPublisher, SubscriptionState};
use crate::refresh::{ExpirationLookupCache, RefreshTracker};
use crate::registry::LoadRegistry;
use crate::remote::RemoteCache;
use crate::sources::{LoadPolicy, SourceChain};

/// Remote tier background refresh settings.
pub(crate) struct RemoteRefresh {
    pub threshold_ms: u64,
    pub expirations: Option<ExpirationLookupCache>,
}

/// Point-in-time view of a loader's internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderStats {
    /// Loads currently registered for coalescing
    pub running_loads: usize,
    /// Local tier refreshes in flight
    pub local_refreshes: usize,
    /// Remote tier refreshes in flight
    pub remote_refreshes: usize,
    pub local_store: Option<&'static str>,
    pub remote_backend: Option<&'static str>,
    pub data_sources: usize,
    pub subscription: Option<SubscriptionState>,
}

pub(crate) struct Engine<V> {
    pub local: Option<Arc<dyn LocalStore<V>>>,
    pub remote: Option<RemoteCache<V>>,
    pub sources: SourceChain<V>,
    pub loads: LoadRegistry<V>,
    pub local_refreshes: RefreshTracker,
    pub remote_refreshes: RefreshTracker,
    pub local_refresh_threshold: Option<u64>,
    pub remote_refresh: Option<RemoteRefresh>,
    pub loading: LoadingConfig,
    pub handlers: ErrorHandlers,
    pub publisher: Option<NotificationPublisher<V>>,
    pub consumer: Option<NotificationConsumer<V>>,
}

/// Unregisters a load when its task ends, panics included.
struct LoadGuard<'a, V> {
    loads: &'a LoadRegistry<V>,
    entry: &'a EntryKey,
    id: u64,
}

impl<V> Drop for LoadGuard<'_, V> {
    fn drop(&mut self) {
        self.loads.finish(self.entry, self.id);
    }
}

/// Spawns on the ambient runtime; `false` when there is none.
fn spawn_background<F>(future: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(future);
            true
        }
        Err(_) => false,
    }
}

impl<V: CacheValue> Engine<V> {
    fn entry_for(key: &str, group: Option<&str>) -> EntryKey {
        match group {
            Some(group) => EntryKey::grouped(key, group),
            None => EntryKey::flat(key),
        }
    }

    fn policy(&self) -> LoadPolicy<'_> {
        LoadPolicy {
            throw_if_load_error: self.loading.throw_if_load_error,
            on_error: &self.handlers.load,
        }
    }

    fn report(&self, err: &CacheError, target: &str) {
        (self.handlers.cache_update)(err, target);
    }

    // ==================== Local tier ====================

    fn local_get(&self, entry: &EntryKey) -> Lookup<V> {
        match (&self.local, entry.group()) {
            (Some(local), None) => local.get(entry.key()),
            (Some(local), Some(group)) => local.get_from_group(entry.key(), group),
            (None, _) => Lookup::Miss,
        }
    }

    fn local_set(&self, entry: &EntryKey, value: Option<V>) {
        match (&self.local, entry.group()) {
            (Some(local), None) => local.set(entry.key(), value),
            (Some(local), Some(group)) => local.set_for_group(entry.key(), value, group),
            (None, _) => {}
        }
    }

    fn local_delete(&self, entry: &EntryKey) {
        match (&self.local, entry.group()) {
            (Some(local), None) => local.delete(entry.key()),
            (Some(local), Some(group)) => local.delete_from_group(entry.key(), group),
            (None, _) => {}
        }
    }

    fn local_expiration(&self, entry: &EntryKey) -> Option<u64> {
        match (&self.local, entry.group()) {
            (Some(local), None) => local.get_expiration_time(entry.key()),
            (Some(local), Some(group)) => local.get_expiration_time_from_group(entry.key(), group),
            (None, _) => None,
        }
    }

    fn local_batch(&self, keys: &[String], group: Option<&str>) -> Option<BatchLookup<V>> {
        let local = self.local.as_ref()?;
        Some(match group {
            Some(group) => local.get_many_from_group(keys, group),
            None => local.get_many(keys),
        })
    }

    // ==================== Reads ====================

    /// Reads the local tier only, scheduling a background refresh when the
    /// entry is about to expire.
    pub fn get_in_memory_only(self: &Arc<Self>, entry: &EntryKey) -> Lookup<V> {
        self.local_lookup(entry, None)
    }

    /// Local read whose background refresh reloads with `params`.
    fn local_lookup(self: &Arc<Self>, entry: &EntryKey, params: Option<&LoadParams>) -> Lookup<V> {
        let found = self.local_get(entry);
        if found.is_resolved() {
            metrics::record_hit("local");
            self.maybe_refresh_local(entry, params);
        }
        found
    }

    pub fn get_many_in_memory_only(self: &Arc<Self>, keys: &[String], group: Option<&str>) -> BatchLookup<V> {
        let Some(batch) = self.local_batch(keys, group) else {
            let mut batch = BatchLookup::new();
            for key in keys {
                batch.push(key.clone(), Lookup::Miss);
            }
            return batch;
        };
        for key in batch.resolved.keys() {
            metrics::record_hit("local");
            self.maybe_refresh_local(&Self::entry_for(key, group), None);
        }
        batch
    }

    pub async fn get(self: &Arc<Self>, entry: &EntryKey, params: Option<&LoadParams>) -> CacheResult<Lookup<V>> {
        let found = self.local_lookup(entry, params);
        if found.is_resolved() {
            return Ok(found);
        }
        self.get_async_only(entry, params).await
    }

    /// Resolves past the local tier through a shared load.
    pub async fn get_async_only(
        self: &Arc<Self>,
        entry: &EntryKey,
        params: Option<&LoadParams>,
    ) -> CacheResult<Lookup<V>> {
        let found = self.load_shared(entry, params.cloned()).await?;
        if found.is_miss() && self.loading.throw_if_unresolved {
            return Err(CacheError::not_found(entry.to_string()));
        }
        Ok(found)
    }

    async fn load_shared(self: &Arc<Self>, entry: &EntryKey, params: Option<LoadParams>) -> CacheResult<Lookup<V>> {
        let joined = self.loads.join_or_start(entry, |id| {
            let engine = Arc::clone(self);
            let entry = entry.clone();
            let task = tokio::spawn(async move {
                let _guard = LoadGuard {
                    loads: &engine.loads,
                    entry: &entry,
                    id,
                };
                engine.resolve(&entry, params.as_ref(), Some(id)).await
            });
            async move {
                task.await
                    .unwrap_or_else(|e| Err(CacheError::internal(format!("load task failed: {e}"))))
            }
            .boxed()
        });
        if !joined.started {
            metrics::record_coalesced();
            tracing::trace!(key = %entry, "Attached to running load");
        }
        joined.future.await
    }

    /// Whether the load `load_id` may still write its result back. An
    /// invalidation issued while it ran unregisters it.
    fn still_current(&self, entry: &EntryKey, load_id: Option<u64>) -> bool {
        load_id.is_none_or(|id| self.loads.is_current(entry, id))
    }

    async fn resolve(
        self: &Arc<Self>,
        entry: &EntryKey,
        params: Option<&LoadParams>,
        load_id: Option<u64>,
    ) -> CacheResult<Lookup<V>> {
        if let Some(remote) = &self.remote {
            match remote.get(entry).await {
                Ok(Lookup::Miss) => {}
                Ok(found) => {
                    metrics::record_hit("remote");
                    if self.still_current(entry, load_id) {
                        if let Some(stored) = found.clone().into_stored() {
                            self.local_set(entry, stored);
                        }
                    }
                    self.schedule_remote_refresh(entry, params);
                    return Ok(found);
                }
                Err(e) => self.report(&e, &entry.to_string()),
            }
        }

        metrics::record_miss();
        let found = self.sources.load(entry, params, &self.policy()).await?;
        if let Some(stored) = found.clone().into_stored() {
            if self.still_current(entry, load_id) {
                self.write_back(entry, stored, load_id).await;
            } else {
                tracing::debug!(key = %entry, "Entry invalidated during load, not caching result");
            }
        }
        Ok(found)
    }

    /// Writes remote then local. The local write is skipped when the load
    /// `load_id` was invalidated while the remote write was in flight.
    async fn write_back(&self, entry: &EntryKey, value: Option<V>, load_id: Option<u64>) {
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set(entry, &value).await {
                self.report(&e, &entry.to_string());
            }
        }
        if self.still_current(entry, load_id) {
            self.local_set(entry, value);
        } else {
            tracing::debug!(key = %entry, "Entry invalidated during write-back, not caching locally");
        }
    }

    pub async fn get_many(
        self: &Arc<Self>,
        keys: &[String],
        group: Option<&str>,
        params: Option<&LoadParams>,
    ) -> CacheResult<IndexMap<String, Option<V>>> {
        let requested: IndexSet<String> = keys.iter().cloned().collect();
        let unique: Vec<String> = requested.iter().cloned().collect();
        let mut resolved: HashMap<String, Option<V>> = HashMap::with_capacity(unique.len());

        let mut pending = match self.local_batch(&unique, group) {
            Some(batch) => {
                for key in batch.resolved.keys() {
                    metrics::record_hit("local");
                    self.maybe_refresh_local(&Self::entry_for(key, group), params);
                }
                resolved.extend(batch.resolved);
                batch.unresolved
            }
            None => unique,
        };

        if !pending.is_empty() {
            if let Some(remote) = &self.remote {
                match remote.get_many(&pending, group).await {
                    Ok(batch) => {
                        for (key, value) in &batch.resolved {
                            metrics::record_hit("remote");
                            self.local_set(&Self::entry_for(key, group), value.clone());
                        }
                        resolved.extend(batch.resolved);
                        pending = batch.unresolved;
                    }
                    Err(e) => self.report(&e, "get_many"),
                }
            }
        }

        if !pending.is_empty() {
            metrics::record_miss();
            let loaded = self
                .sources
                .load_many(&pending, group, params, &self.policy())
                .await?;
            if !loaded.is_empty() {
                let entries: Vec<(String, Option<V>)> = loaded
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                if let Some(remote) = &self.remote {
                    if let Err(e) = remote.set_many(&entries, group).await {
                        self.report(&e, "set_many");
                    }
                }
                for (key, value) in entries {
                    self.local_set(&Self::entry_for(&key, group), value);
                }
            }
            pending.retain(|key| !loaded.contains_key(key));
            resolved.extend(loaded);
        }

        if !pending.is_empty() && self.loading.throw_if_unresolved {
            return Err(CacheError::not_found_many(pending));
        }

        Ok(requested
            .into_iter()
            .filter_map(|key| resolved.remove(&key).map(|value| (key, value)))
            .collect())
    }

    // ==================== Background refresh ====================

    fn maybe_refresh_local(self: &Arc<Self>, entry: &EntryKey, params: Option<&LoadParams>) {
        let Some(threshold_ms) = self.local_refresh_threshold else {
            return;
        };
        if self.loads.contains(entry) {
            return;
        }
        let Some(expires_at) = self.local_expiration(entry) else {
            return;
        };
        if millis_left(expires_at) >= threshold_ms {
            return;
        }
        let Some(guard) = self.local_refreshes.try_begin(entry) else {
            return;
        };

        let engine = Arc::clone(self);
        let key = entry.clone();
        let params = params.cloned();
        let spawned = spawn_background(async move {
            let _guard = guard;
            metrics::record_refresh("local");
            tracing::debug!(key = %key, "Refreshing local entry in background");
            if let Err(e) = engine.load_shared(&key, params).await {
                tracing::warn!(key = %key, error = %e, "Background refresh failed");
            }
        });
        if !spawned {
            tracing::debug!(key = %entry, "No async runtime, skipping background refresh");
        }
    }

    /// Spawns a remote refresh check unless the memoised expiration already
    /// shows the entry is not close to expiry.
    fn schedule_remote_refresh(self: &Arc<Self>, entry: &EntryKey, params: Option<&LoadParams>) {
        let Some(refresh) = &self.remote_refresh else {
            return;
        };
        if self.remote_refreshes.contains(entry) {
            return;
        }
        let memoised = refresh
            .expirations
            .as_ref()
            .and_then(|expirations| expirations.get(entry));
        if memoised.is_some_and(|expires_at| millis_left(expires_at) >= refresh.threshold_ms) {
            return;
        }

        let engine = Arc::clone(self);
        let entry = entry.clone();
        let params = params.cloned();
        spawn_background(async move {
            engine
                .refresh_remote_if_expiring(&entry, memoised, params.as_ref())
                .await;
        });
    }

    async fn refresh_remote_if_expiring(
        &self,
        entry: &EntryKey,
        memoised: Option<u64>,
        params: Option<&LoadParams>,
    ) {
        let (Some(refresh), Some(remote)) = (&self.remote_refresh, &self.remote) else {
            return;
        };

        let expires_at = match memoised {
            Some(expires_at) => expires_at,
            None => match remote.get_expiration_time(entry).await {
                Ok(Some(expires_at)) => {
                    if let Some(expirations) = &refresh.expirations {
                        expirations.insert(entry.clone(), expires_at);
                    }
                    expires_at
                }
                Ok(None) => return,
                Err(e) => {
                    self.report(&e, &entry.to_string());
                    return;
                }
            },
        };
        if millis_left(expires_at) >= refresh.threshold_ms {
            return;
        }
        let Some(_guard) = self.remote_refreshes.try_begin(entry) else {
            return;
        };

        metrics::record_refresh("remote");
        tracing::debug!(key = %entry, "Refreshing remote entry in background");
        match self.sources.load(entry, params, &self.policy()).await {
            Ok(found) => {
                if let Some(stored) = found.into_stored() {
                    self.write_back(entry, stored, None).await;
                    if let Some(expirations) = &refresh.expirations {
                        expirations.invalidate(entry);
                    }
                }
            }
            Err(e) => tracing::warn!(key = %entry, error = %e, "Remote refresh failed"),
        }
    }

    // ==================== Writes and invalidation ====================

    fn expirations(&self) -> Option<&ExpirationLookupCache> {
        self.remote_refresh
            .as_ref()
            .and_then(|refresh| refresh.expirations.as_ref())
    }

    fn forget_expiration(&self, entry: &EntryKey) {
        if let Some(expirations) = self.expirations() {
            expirations.invalidate(entry);
        }
    }

    /// Stores a value in every tier and announces it.
    pub async fn set(&self, entry: &EntryKey, value: Option<V>) {
        self.loads.remove(entry);
        self.forget_expiration(entry);
        self.local_set(entry, value.clone());
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set(entry, &value).await {
                self.report(&e, &entry.to_string());
            }
        }
        if let Some(publisher) = &self.publisher {
            publisher.set(entry.key(), entry.group(), value);
        }
    }

    pub async fn invalidate(&self, entry: &EntryKey) {
        self.loads.remove(entry);
        self.forget_expiration(entry);
        self.local_delete(entry);
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(entry).await {
                self.report(&e, &entry.to_string());
            }
        }
        if let Some(publisher) = &self.publisher {
            match entry.group() {
                Some(group) => publisher.delete_from_group(entry.key(), group),
                None => publisher.delete(entry.key()),
            }
        }
    }

    pub async fn invalidate_many(&self, keys: &[String]) {
        for key in keys {
            let entry = EntryKey::flat(key.as_str());
            self.loads.remove(&entry);
            self.forget_expiration(&entry);
        }
        if let Some(local) = &self.local {
            local.delete_many(keys);
        }
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete_many(keys).await {
                self.report(&e, "delete_many");
            }
        }
        if let Some(publisher) = &self.publisher {
            publisher.delete_many(keys);
        }
    }

    pub async fn invalidate_group(&self, group: &str) {
        self.loads.remove_group(group);
        if let Some(expirations) = self.expirations() {
            expirations.invalidate_group(group);
        }
        if let Some(local) = &self.local {
            local.delete_group(group);
        }
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete_group(group).await {
                self.report(&e, group);
            }
        }
        if let Some(publisher) = &self.publisher {
            publisher.delete_group(group);
        }
    }

    pub async fn invalidate_all(&self) {
        self.loads.clear();
        if let Some(expirations) = self.expirations() {
            expirations.invalidate_all();
        }
        if let Some(local) = &self.local {
            local.clear();
        }
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.clear().await {
                self.report(&e, "clear");
            }
        }
        if let Some(publisher) = &self.publisher {
            publisher.clear();
        }
    }

    // ==================== Lifecycle ====================

    pub async fn close(&self) {
        if let Some(consumer) = &self.consumer {
            consumer.close();
        }
        if let Some(publisher) = &self.publisher {
            publisher.close().await;
        }
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            running_loads: self.loads.len(),
            local_refreshes: self.local_refreshes.len(),
            remote_refreshes: self.remote_refreshes.len(),
            local_store: self.local.as_ref().map(|local| local.store_name()),
            remote_backend: self.remote.as_ref().map(|remote| remote.backend_name()),
            data_sources: self.sources.len(),
            subscription: self.consumer.as_ref().map(|consumer| consumer.state()),
        }
    }
}
