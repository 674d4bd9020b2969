//! In-flight load registry.
//!
//! Concurrent requests for the same entry attach to one running load instead
//! of each hitting the remote tier and the data sources. Every load carries an
//! id; only the load currently registered for an entry may remove itself, so a
//! load that was superseded (by an invalidation or by the batching cap) never
//! evicts its successor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use layercache_core::{CacheError, Lookup};
use parking_lot::Mutex;

use crate::key::EntryKey;

pub(crate) type LoadOutcome<V> = Result<Lookup<V>, CacheError>;
pub(crate) type SharedLoad<V> = Shared<BoxFuture<'static, LoadOutcome<V>>>;

struct RunningLoad<V> {
    id: u64,
    future: SharedLoad<V>,
    attached: usize,
}

/// Result of [`LoadRegistry::join_or_start`].
pub(crate) struct Joined<V> {
    pub future: SharedLoad<V>,
    pub started: bool,
}

pub(crate) struct LoadRegistry<V> {
    loads: Mutex<HashMap<EntryKey, RunningLoad<V>>>,
    next_id: AtomicU64,
    max_attached: Option<usize>,
}

impl<V: Clone + Send + Sync + 'static> LoadRegistry<V> {
    /// `max_attached` caps how many callers share one load, the starter
    /// included. Unlimited when `None`.
    pub fn new(max_attached: Option<usize>) -> Self {
        Self {
            loads: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_attached,
        }
    }

    /// Attaches to the running load for `key`, or registers the load produced
    /// by `start`.
    ///
    /// `start` runs under the registry lock and must not block; it receives
    /// the id the new load is registered under.
    pub fn join_or_start<F>(&self, key: &EntryKey, start: F) -> Joined<V>
    where
        F: FnOnce(u64) -> BoxFuture<'static, LoadOutcome<V>>,
    {
        let mut loads = self.loads.lock();
        if let Some(running) = loads.get_mut(key) {
            if self.max_attached.is_none_or(|max| running.attached < max) {
                running.attached += 1;
                return Joined {
                    future: running.future.clone(),
                    started: false,
                };
            }
            tracing::trace!(key = %key, attached = running.attached, "load is full, starting another");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let future = start(id).shared();
        loads.insert(
            key.clone(),
            RunningLoad {
                id,
                future: future.clone(),
                attached: 1,
            },
        );
        Joined {
            future,
            started: true,
        }
    }
}

impl<V> LoadRegistry<V> {
    /// Removes the load `id` if it is still the one registered for `key`.
    pub fn finish(&self, key: &EntryKey, id: u64) {
        let mut loads = self.loads.lock();
        if loads.get(key).is_some_and(|running| running.id == id) {
            loads.remove(key);
        }
    }

    /// Whether load `id` is still the one registered for `key`.
    pub fn is_current(&self, key: &EntryKey, id: u64) -> bool {
        self.loads
            .lock()
            .get(key)
            .is_some_and(|running| running.id == id)
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.loads.lock().contains_key(key)
    }

    /// Forgets the load for `key`. Callers already attached still get its
    /// result; new callers start afresh.
    pub fn remove(&self, key: &EntryKey) {
        self.loads.lock().remove(key);
    }

    pub fn remove_group(&self, group: &str) {
        self.loads.lock().retain(|key, _| !key.in_group(group));
    }

    pub fn clear(&self) {
        self.loads.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.loads.lock().len()
    }
}
