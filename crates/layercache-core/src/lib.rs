//! # layercache-core
//!
//! Shared vocabulary for the layercache tiers.
//!
//! This crate defines the traits and types every tier implementation and the
//! orchestrating engine agree on. It contains no tier implementations; those
//! live in `layercache-memory` and `layercache-redis`.
//!
//! ## Overview
//!
//! - [`Lookup`]: the three-state read result (`Hit`, `Null`, `Miss`)
//! - [`LocalStore`], [`RemoteStore`], [`PubSub`]: cache tiers
//! - [`DataSource`], [`GroupDataSource`]: authoritative origins
//! - [`CacheError`]: the error taxonomy
//! - [`CacheConfig`]: file/env backed configuration
//!
//! ## Example
//!
//! ```ignore
//! use async_trait::async_trait;
//! use layercache_core::{DataSource, LoadParams, Lookup};
//!
//! struct UserTable { /* ... */ }
//!
//! #[async_trait]
//! impl DataSource<User> for UserTable {
//!     fn name(&self) -> &str {
//!         "users-table"
//!     }
//!
//!     async fn get(&self, key: &str, _params: Option<&LoadParams>) -> anyhow::Result<Lookup<User>> {
//!         Ok(match self.find(key).await? {
//!             Some(user) => Lookup::Hit(user),
//!             None => Lookup::Null,
//!         })
//!     }
//! }
//! ```

pub mod clock;
pub mod config;
mod error;
mod lookup;
mod subscription;
mod traits;

pub use config::{
    CacheConfig, LoadingConfig, LocalTierConfig, NotificationConfig, RedisConfig,
    RemoteTierConfig,
};
pub use error::{CacheError, ErrorCategory};
pub use lookup::{BatchLookup, Lookup};
pub use subscription::Subscription;
pub use traits::{DataSource, GroupDataSource, LoadParams, LocalStore, PubSub, RemoteStore};

/// Type alias for a cache result.
pub type CacheResult<T> = Result<T, CacheError>;

/// Type alias for a shareable remote store.
pub type DynRemoteStore = std::sync::Arc<dyn RemoteStore>;

/// Type alias for a shareable notification channel.
pub type DynPubSub = std::sync::Arc<dyn PubSub>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use layercache_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::CacheConfig;
    pub use crate::error::{CacheError, ErrorCategory};
    pub use crate::lookup::{BatchLookup, Lookup};
    pub use crate::subscription::Subscription;
    pub use crate::traits::{
        DataSource, GroupDataSource, LoadParams, LocalStore, PubSub, RemoteStore,
    };
    pub use crate::{CacheResult, DynPubSub, DynRemoteStore};
}
