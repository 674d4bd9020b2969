//! Loader construction.

use std::sync::Arc;
use std::time::Duration;

use layercache_core::{
    CacheConfig, CacheError, CacheResult, DataSource, DynPubSub, DynRemoteStore,
    GroupDataSource, LocalStore,
};
use layercache_memory::MemoryStore;

use crate::CacheValue;
use crate::engine::{Engine, RemoteRefresh};
use crate::group::GroupLoader;
use crate::handlers::{
    CacheUpdateErrorHandler, ErrorHandlers, LoadErrorHandler, PublisherErrorHandler,
    default_publisher_error_handler,
};
use crate::loader::Loader;
use crate::notifications::invalidation_bus;
use crate::refresh::{ExpirationLookupCache, RefreshTracker};
use crate::registry::LoadRegistry;
use crate::remote::RemoteCache;
use crate::sources::SourceChain;
use crate::timeout::TimeoutRemote;

/// Builder for [`Loader`] and [`GroupLoader`].
///
/// The local tier defaults to a [`MemoryStore`] sized from the configuration.
/// The remote tier is used when a remote store is supplied; notifications
/// when they are enabled in the configuration, which requires a pub/sub
/// channel and a local tier.
pub struct LoaderBuilder<V> {
    config: CacheConfig,
    local: Option<Arc<dyn LocalStore<V>>>,
    remote: Option<DynRemoteStore>,
    pubsub: Option<DynPubSub>,
    sources: Vec<Arc<dyn DataSource<V>>>,
    group_sources: Vec<Arc<dyn GroupDataSource<V>>>,
    load_error_handler: Option<LoadErrorHandler>,
    cache_update_error_handler: Option<CacheUpdateErrorHandler>,
    publisher_error_handler: Option<PublisherErrorHandler>,
}

impl<V: CacheValue> Default for LoaderBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: CacheValue> LoaderBuilder<V> {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            local: None,
            remote: None,
            pubsub: None,
            sources: Vec::new(),
            group_sources: Vec::new(),
            load_error_handler: None,
            cache_update_error_handler: None,
            publisher_error_handler: None,
        }
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default in-memory local tier.
    pub fn with_local_store(mut self, local: Arc<dyn LocalStore<V>>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_remote_store(mut self, remote: DynRemoteStore) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Channel used for invalidation notifications.
    pub fn with_pubsub(mut self, pubsub: DynPubSub) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Appends a data source; sources are consulted in insertion order.
    pub fn with_data_source(mut self, source: Arc<dyn DataSource<V>>) -> Self {
        self.sources.push(source);
        self
    }

    /// Appends a group data source; sources are consulted in insertion order.
    pub fn with_group_data_source(mut self, source: Arc<dyn GroupDataSource<V>>) -> Self {
        self.group_sources.push(source);
        self
    }

    pub fn with_load_error_handler(mut self, handler: LoadErrorHandler) -> Self {
        self.load_error_handler = Some(handler);
        self
    }

    pub fn with_cache_update_error_handler(mut self, handler: CacheUpdateErrorHandler) -> Self {
        self.cache_update_error_handler = Some(handler);
        self
    }

    pub fn with_publisher_error_handler(mut self, handler: PublisherErrorHandler) -> Self {
        self.publisher_error_handler = Some(handler);
        self
    }

    /// Builds a flat-key loader.
    ///
    /// # Errors
    ///
    /// `Configuration` for an invalid configuration, for group data sources,
    /// or when a required collaborator is missing. Errors from subscribing to
    /// the notification channel are returned as is.
    pub async fn build(mut self) -> CacheResult<Loader<V>> {
        if !self.group_sources.is_empty() {
            return Err(CacheError::configuration(
                "group data sources require build_group()",
            ));
        }
        let chain = SourceChain::Flat(std::mem::take(&mut self.sources));
        Ok(Loader::from_engine(self.build_engine(chain).await?))
    }

    /// Builds a group loader.
    ///
    /// # Errors
    ///
    /// Same as [`LoaderBuilder::build`], with flat data sources rejected.
    pub async fn build_group(mut self) -> CacheResult<GroupLoader<V>> {
        if !self.sources.is_empty() {
            return Err(CacheError::configuration(
                "flat data sources require build()",
            ));
        }
        let chain = SourceChain::Grouped(std::mem::take(&mut self.group_sources));
        Ok(GroupLoader::from_engine(self.build_engine(chain).await?))
    }

    async fn build_engine(self, sources: SourceChain<V>) -> CacheResult<Arc<Engine<V>>> {
        let config = self.config;
        config.validate()?;

        let local: Option<Arc<dyn LocalStore<V>>> = match self.local {
            Some(local) => Some(local),
            None if config.local.enabled => Some(Arc::new(MemoryStore::from_config(&config.local))),
            None => None,
        };

        let remote = match self.remote {
            Some(store) => {
                let store: DynRemoteStore = match config.remote.timeout() {
                    Some(timeout) => Arc::new(TimeoutRemote::new(store, timeout)),
                    None => store,
                };
                Some(RemoteCache::new(store, &config.remote))
            }
            None if config.remote.enabled => {
                return Err(CacheError::configuration(
                    "remote.enabled is set but no remote store was supplied",
                ));
            }
            None => None,
        };

        let remote_refresh = match (&remote, config.remote.ttl_left_before_refresh_ms) {
            (Some(_), Some(threshold_ms)) => Some(RemoteRefresh {
                threshold_ms,
                expirations: config.remote.ttl_cache_ttl_ms.map(|ttl_ms| {
                    ExpirationLookupCache::new(
                        Duration::from_millis(ttl_ms),
                        config.remote.ttl_cache_size,
                    )
                }),
            }),
            _ => None,
        };

        let (publisher, consumer) = if config.notifications.enabled {
            let pubsub = self.pubsub.ok_or_else(|| {
                CacheError::configuration("notifications are enabled but no pub/sub was supplied")
            })?;
            let target = local.clone().ok_or_else(|| {
                CacheError::configuration("notifications require a local tier")
            })?;
            let on_error = self
                .publisher_error_handler
                .unwrap_or_else(default_publisher_error_handler);
            let (publisher, consumer) =
                invalidation_bus(pubsub, &config.notifications.channel, on_error);
            consumer.set_target_cache(target)?;
            consumer.subscribe().await?;
            (Some(publisher), Some(consumer))
        } else {
            (None, None)
        };

        let defaults = ErrorHandlers::default();
        let handlers = ErrorHandlers {
            load: self.load_error_handler.unwrap_or(defaults.load),
            cache_update: self
                .cache_update_error_handler
                .unwrap_or(defaults.cache_update),
        };

        tracing::debug!(
            local = local.as_ref().map(|local| local.store_name()),
            remote = remote.as_ref().map(|remote| remote.backend_name()),
            sources = sources.len(),
            notifications = config.notifications.enabled,
            "Built cache loader"
        );

        Ok(Arc::new(Engine {
            local,
            remote,
            sources,
            loads: LoadRegistry::new(config.loading.max_batched_operations_per_load),
            local_refreshes: RefreshTracker::new(),
            remote_refreshes: RefreshTracker::new(),
            local_refresh_threshold: config.local.ttl_left_before_refresh_ms,
            remote_refresh,
            loading: config.loading,
            handlers,
            publisher,
            consumer,
        }))
    }
}
