//! Bounded in-process store with per-entry TTL.
//!
//! This is the default local tier. Eviction is deliberately simple: expired
//! entries go first, then the oldest insertion (FIFO). Flat keys share one
//! capacity budget, every group bucket has its own, and the number of
//! buckets is capped separately (least recently written bucket goes first).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use layercache_core::clock::{expires_after, now_millis};
use layercache_core::{LocalStore, LocalTierConfig, Lookup};

/// Entry with expiration time and insertion order.
#[derive(Debug, Clone)]
struct StoredEntry<V> {
    value: Option<V>,
    expires_at: u64,
    sequence: u64,
}

impl<V> StoredEntry<V> {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Entries of one group and the sequence of its latest write.
#[derive(Debug)]
struct GroupBucket<V> {
    entries: HashMap<String, StoredEntry<V>>,
    written: u64,
}

impl<V> Default for GroupBucket<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            written: 0,
        }
    }
}

/// Local in-memory store using DashMap.
///
/// Thread-safe and never blocking on I/O; safe to call from synchronous
/// read paths.
pub struct MemoryStore<V> {
    entries: DashMap<String, StoredEntry<V>>,
    groups: DashMap<String, GroupBucket<V>>,
    ttl: Duration,
    max_items: usize,
    max_groups: usize,
    sequence: AtomicU64,
}

impl<V: Clone + Send + Sync> MemoryStore<V> {
    /// Create a new store.
    ///
    /// # Arguments
    ///
    /// * `ttl` - Time-to-live for every entry
    /// * `max_items` - Capacity of the flat keyspace and of each group bucket
    ///
    /// The number of group buckets defaults to the same bound; see
    /// [`MemoryStore::with_max_groups`].
    pub fn new(ttl: Duration, max_items: usize) -> Self {
        let max_items = max_items.max(1);
        Self {
            entries: DashMap::new(),
            groups: DashMap::new(),
            ttl,
            max_items,
            max_groups: max_items,
            sequence: AtomicU64::new(0),
        }
    }

    /// Caps the number of group buckets.
    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = max_groups.max(1);
        self
    }

    pub fn from_config(config: &LocalTierConfig) -> Self {
        Self::new(config.ttl(), config.max_items).with_max_groups(config.max_groups)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of flat entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries in a group bucket.
    pub fn group_len(&self, group: &str) -> usize {
        self.groups
            .get(group)
            .map(|bucket| bucket.entries.len())
            .unwrap_or(0)
    }

    /// Number of live group buckets.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn new_entry(&self, value: Option<V>) -> StoredEntry<V> {
        StoredEntry {
            value,
            expires_at: expires_after(self.ttl),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn make_room_flat(&self, key: &str) {
        if self.entries.len() < self.max_items || self.entries.contains_key(key) {
            return;
        }

        let now = now_millis();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        if self.entries.len() < self.max_items {
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.sequence)
            .map(|entry| entry.key().clone());
        if let Some(oldest) = oldest {
            self.entries.remove(&oldest);
            tracing::trace!(key = %oldest, "evicted local entry");
        }
    }

    /// Called before a new group bucket is created.
    fn make_room_for_group(&self) {
        if self.groups.len() < self.max_groups {
            return;
        }

        let now = now_millis();
        self.groups.retain(|_, bucket| {
            bucket.entries.retain(|_, entry| !entry.is_expired(now));
            !bucket.entries.is_empty()
        });
        if self.groups.len() < self.max_groups {
            return;
        }

        let stalest = self
            .groups
            .iter()
            .min_by_key(|bucket| bucket.written)
            .map(|bucket| bucket.key().clone());
        if let Some(stalest) = stalest {
            self.groups.remove(&stalest);
            tracing::trace!(group = %stalest, "evicted local group");
        }
    }

    fn remove_expired_from_group(&self, key: &str, group: &str, now: u64) {
        if let Some(mut bucket) = self.groups.get_mut(group) {
            if bucket
                .entries
                .get(key)
                .is_some_and(|entry| entry.is_expired(now))
            {
                bucket.entries.remove(key);
            }
        }
        self.groups
            .remove_if(group, |_, bucket| bucket.entries.is_empty());
    }

    fn make_room_in_bucket(&self, bucket: &mut HashMap<String, StoredEntry<V>>, key: &str) {
        if bucket.len() < self.max_items || bucket.contains_key(key) {
            return;
        }

        let now = now_millis();
        bucket.retain(|_, entry| !entry.is_expired(now));
        if bucket.len() < self.max_items {
            return;
        }

        let oldest = bucket
            .iter()
            .min_by_key(|(_, entry)| entry.sequence)
            .map(|(key, _)| key.clone());
        if let Some(oldest) = oldest {
            bucket.remove(&oldest);
        }
    }
}

impl<V: Clone + Send + Sync> LocalStore<V> for MemoryStore<V> {
    fn get(&self, key: &str) -> Lookup<V> {
        let now = now_millis();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Lookup::from_stored(entry.value.clone());
            }
            drop(entry);
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Lookup::Miss
    }

    fn set(&self, key: &str, value: Option<V>) {
        self.make_room_flat(key);
        let entry = self.new_entry(value);
        self.entries.insert(key.to_string(), entry);
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
        self.groups.clear();
    }

    fn get_expiration_time(&self, key: &str) -> Option<u64> {
        let now = now_millis();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at)
    }

    fn get_from_group(&self, key: &str, group: &str) -> Lookup<V> {
        let now = now_millis();
        let expired = match self.groups.get(group) {
            Some(bucket) => match bucket.entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    return Lookup::from_stored(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            },
            None => false,
        };
        if expired {
            self.remove_expired_from_group(key, group, now);
        }
        Lookup::Miss
    }

    fn set_for_group(&self, key: &str, value: Option<V>, group: &str) {
        if !self.groups.contains_key(group) {
            self.make_room_for_group();
        }
        let entry = self.new_entry(value);
        let written = entry.sequence;
        let mut bucket = self.groups.entry(group.to_string()).or_default();
        self.make_room_in_bucket(&mut bucket.entries, key);
        bucket.entries.insert(key.to_string(), entry);
        bucket.written = written;
    }

    fn delete_from_group(&self, key: &str, group: &str) {
        if let Some(mut bucket) = self.groups.get_mut(group) {
            bucket.entries.remove(key);
        }
        self.groups
            .remove_if(group, |_, bucket| bucket.entries.is_empty());
    }

    fn delete_group(&self, group: &str) {
        self.groups.remove(group);
    }

    fn get_expiration_time_from_group(&self, key: &str, group: &str) -> Option<u64> {
        let now = now_millis();
        self.groups.get(group).and_then(|bucket| {
            bucket
                .entries
                .get(key)
                .filter(|entry| !entry.is_expired(now))
                .map(|entry| entry.expires_at)
        })
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
