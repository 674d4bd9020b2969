//! Error handlers.
//!
//! Failures that do not fail the caller (loader errors when the chain keeps
//! going, tier write-backs, invalidation publishing) are routed to these
//! closures. The defaults log through `tracing`.

use std::sync::Arc;

use layercache_core::CacheError;

/// Called with the error, the entry (rendered as `group/key` or `key`) and the
/// name of the failing data source.
pub type LoadErrorHandler = Arc<dyn Fn(&CacheError, &str, &str) + Send + Sync>;

/// Called with the error and the entry or operation that failed.
pub type CacheUpdateErrorHandler = Arc<dyn Fn(&CacheError, &str) + Send + Sync>;

/// Called with the error and the notification channel.
pub type PublisherErrorHandler = Arc<dyn Fn(&CacheError, &str) + Send + Sync>;

pub fn default_load_error_handler() -> LoadErrorHandler {
    Arc::new(|err: &CacheError, key: &str, loader: &str| {
        tracing::error!(error = %err, key = %key, loader = %loader, "Data source failed");
    })
}

pub fn default_cache_update_error_handler() -> CacheUpdateErrorHandler {
    Arc::new(|err: &CacheError, target: &str| {
        tracing::warn!(error = %err, target = %target, "Cache update failed");
    })
}

pub fn default_publisher_error_handler() -> PublisherErrorHandler {
    Arc::new(|err: &CacheError, channel: &str| {
        tracing::warn!(error = %err, channel = %channel, "Failed to publish invalidation");
    })
}

/// Handlers used by the engine.
#[derive(Clone)]
pub(crate) struct ErrorHandlers {
    pub load: LoadErrorHandler,
    pub cache_update: CacheUpdateErrorHandler,
}

impl Default for ErrorHandlers {
    fn default() -> Self {
        Self {
            load: default_load_error_handler(),
            cache_update: default_cache_update_error_handler(),
        }
    }
}
