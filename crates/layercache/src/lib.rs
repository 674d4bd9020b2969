//! # layercache
//!
//! Layered read-through cache engine.
//!
//! A [`Loader`] resolves a key through up to three layers, in order:
//!
//! 1. the local tier, an in-process bounded map (synchronous)
//! 2. the remote tier, a shared store such as Redis
//! 3. the data sources, consulted in insertion order
//!
//! A value found in a lower layer is written back to the layers above it.
//! Concurrent requests for one key share a single load. Entries about to
//! expire are served and refreshed in the background. With notifications
//! enabled, every mutation is announced on a pub/sub channel and applied to
//! the local tier of every other instance.
//!
//! [`GroupLoader`] scopes keys within groups and invalidates a whole group in
//! constant time through a per-group generation counter in the remote tier.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use layercache::{Loader, Lookup};
//! use layercache_core::config::loader::load_config;
//!
//! let config = load_config(None)?;
//! let users = Loader::<User>::builder()
//!     .with_config(config)
//!     .with_data_source(Arc::new(UserTable::new(pool)))
//!     .build()
//!     .await?;
//!
//! let alice = users.get("u1").await?;
//! users.invalidate_cache_for("u1").await;
//! ```

mod builder;
mod engine;
mod generation;
mod group;
pub mod handlers;
mod key;
mod loader;
pub mod metrics;
pub mod notifications;
mod refresh;
mod registry;
mod remote;
mod sources;
mod timeout;

pub use builder::LoaderBuilder;
pub use engine::LoaderStats;
pub use generation::GenerationIndex;
pub use group::GroupLoader;
pub use key::EntryKey;
pub use loader::Loader;
pub use timeout::TimeoutRemote;

pub use layercache_core::{
    BatchLookup, CacheConfig, CacheError, CacheResult, DataSource, GroupDataSource, LoadParams,
    LocalStore, Lookup, PubSub, RemoteStore,
};
pub use layercache_memory::{InMemoryRemote, MemoryStore};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Values a loader can cache: cloned into the local tier and serialised to
/// JSON for the remote tier and notifications.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}
