//! In-process tiers for layercache.
//!
//! - [`MemoryStore`]: the bounded local store every loader keeps in front of
//!   the remote tier
//! - [`InMemoryRemote`]: a shared remote store + pub/sub channel for
//!   single-node deployments and tests
//!
//! # Example
//!
//! ```ignore
//! use layercache_memory::{InMemoryRemote, MemoryStore};
//!
//! let local = MemoryStore::<String>::new(Duration::from_secs(60), 1_000);
//! let remote = InMemoryRemote::new();
//! ```

mod local;
mod remote;

pub use local::MemoryStore;
pub use remote::InMemoryRemote;
