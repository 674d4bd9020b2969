//! Background refresh bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use moka::sync::Cache;

use crate::key::EntryKey;

/// Entries with a background refresh in flight.
///
/// At most one refresh per entry and tier runs at a time; the flag is held by
/// a [`RefreshGuard`] and cleared when the guard drops, even if the refresh
/// task panics.
#[derive(Clone, Default)]
pub(crate) struct RefreshTracker {
    in_flight: Arc<DashSet<EntryKey>>,
}

impl RefreshTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as refreshing; `None` if it already is.
    pub fn try_begin(&self, key: &EntryKey) -> Option<RefreshGuard> {
        if !self.in_flight.insert(key.clone()) {
            return None;
        }
        Some(RefreshGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
        })
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.in_flight.contains(key)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }
}

pub(crate) struct RefreshGuard {
    in_flight: Arc<DashSet<EntryKey>>,
    key: EntryKey,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Memoised remote expiration times.
///
/// Checking whether a remote hit is close to expiry costs a round trip; this
/// cache bounds how often that happens per entry.
pub(crate) struct ExpirationLookupCache {
    expirations: Cache<EntryKey, u64>,
}

impl ExpirationLookupCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            expirations: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
        }
    }

    pub fn get(&self, key: &EntryKey) -> Option<u64> {
        self.expirations.get(key)
    }

    pub fn insert(&self, key: EntryKey, expires_at: u64) {
        self.expirations.insert(key, expires_at);
    }

    pub fn invalidate(&self, key: &EntryKey) {
        self.expirations.invalidate(key);
    }

    pub fn invalidate_group(&self, group: &str) {
        let group = group.to_string();
        if let Err(e) = self
            .expirations
            .invalidate_entries_if(move |key, _| key.in_group(&group))
        {
            tracing::debug!(error = %e, "Falling back to full expiration cache invalidation");
            self.expirations.invalidate_all();
        }
    }

    pub fn invalidate_all(&self) {
        self.expirations.invalidate_all();
    }
}
