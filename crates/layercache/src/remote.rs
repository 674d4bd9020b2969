//! Remote tier adapter.
//!
//! Maps entries to physical keys and values to JSON payloads. Flat entries
//! live under `{prefix}:{key}`, grouped entries under
//! `{prefix}:{group}:{generation}:{key}`. A confirmed null is stored as the
//! JSON `null` payload, which keeps it distinct from an absent key.

use std::marker::PhantomData;
use std::time::Duration;

use layercache_core::{
    BatchLookup, CacheResult, DynRemoteStore, Lookup, RemoteTierConfig,
};

use crate::CacheValue;
use crate::generation::GenerationIndex;
use crate::key::EntryKey;

pub(crate) struct RemoteCache<V> {
    store: DynRemoteStore,
    generations: GenerationIndex,
    prefix: String,
    ttl: Option<Duration>,
    _marker: PhantomData<fn() -> V>,
}

impl<V: CacheValue> RemoteCache<V> {
    pub fn new(store: DynRemoteStore, config: &RemoteTierConfig) -> Self {
        Self {
            generations: GenerationIndex::new(store.clone(), config.group_ttl()),
            store,
            prefix: config.prefix.clone(),
            ttl: config.ttl(),
            _marker: PhantomData,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    fn flat_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    /// Physical key for a read. `None` for a group that has no generation
    /// yet, which cannot hold any entry.
    async fn read_key(&self, entry: &EntryKey) -> CacheResult<Option<String>> {
        match entry.group() {
            None => Ok(Some(self.flat_key(entry.key()))),
            Some(group) => Ok(self
                .generations
                .current_generation(group)
                .await?
                .map(|generation| {
                    GenerationIndex::entry_key(&self.prefix, group, generation, entry.key())
                })),
        }
    }

    /// Physical key for a write, initialising the group's generation.
    async fn write_key(&self, entry: &EntryKey) -> CacheResult<String> {
        match entry.group() {
            None => Ok(self.flat_key(entry.key())),
            Some(group) => {
                let generation = self.generations.resolve_generation(group).await?;
                Ok(GenerationIndex::entry_key(
                    &self.prefix,
                    group,
                    generation,
                    entry.key(),
                ))
            }
        }
    }

    fn encode(value: &Option<V>) -> CacheResult<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode(payload: &str) -> CacheResult<Option<V>> {
        Ok(serde_json::from_str(payload)?)
    }

    pub async fn get(&self, entry: &EntryKey) -> CacheResult<Lookup<V>> {
        let Some(physical) = self.read_key(entry).await? else {
            return Ok(Lookup::Miss);
        };
        match self.store.get(&physical).await? {
            Some(payload) => Ok(Lookup::from_stored(Self::decode(&payload)?)),
            None => Ok(Lookup::Miss),
        }
    }

    pub async fn get_many(&self, keys: &[String], group: Option<&str>) -> CacheResult<BatchLookup<V>> {
        let mut batch = BatchLookup::new();
        let physical: Vec<String> = match group {
            None => keys.iter().map(|key| self.flat_key(key)).collect(),
            Some(group) => match self.generations.current_generation(group).await? {
                Some(generation) => keys
                    .iter()
                    .map(|key| GenerationIndex::entry_key(&self.prefix, group, generation, key))
                    .collect(),
                None => {
                    for key in keys {
                        batch.push(key.clone(), Lookup::Miss);
                    }
                    return Ok(batch);
                }
            },
        };

        let mut payloads = self.store.get_many(&physical).await?.into_iter();
        for key in keys {
            let lookup = match payloads.next().flatten() {
                Some(payload) => match Self::decode(&payload) {
                    Ok(value) => Lookup::from_stored(value),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Discarding undecodable remote payload");
                        Lookup::Miss
                    }
                },
                None => Lookup::Miss,
            };
            batch.push(key.clone(), lookup);
        }
        Ok(batch)
    }

    pub async fn set(&self, entry: &EntryKey, value: &Option<V>) -> CacheResult<()> {
        let payload = Self::encode(value)?;
        let physical = self.write_key(entry).await?;
        self.store.set(&physical, &payload, self.ttl).await
    }

    pub async fn set_many(&self, entries: &[(String, Option<V>)], group: Option<&str>) -> CacheResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let generation = match group {
            Some(group) => Some(self.generations.resolve_generation(group).await?),
            None => None,
        };
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let physical = match (group, generation) {
                (Some(group), Some(generation)) => {
                    GenerationIndex::entry_key(&self.prefix, group, generation, key)
                }
                _ => self.flat_key(key),
            };
            encoded.push((physical, Self::encode(value)?));
        }
        self.store.set_many(&encoded, self.ttl).await
    }

    pub async fn delete(&self, entry: &EntryKey) -> CacheResult<()> {
        match self.read_key(entry).await? {
            Some(physical) => self.store.delete(&physical).await,
            None => Ok(()),
        }
    }

    pub async fn delete_many(&self, keys: &[String]) -> CacheResult<()> {
        let physical: Vec<String> = keys.iter().map(|key| self.flat_key(key)).collect();
        self.store.delete_many(&physical).await
    }

    /// Invalidates a whole group by moving it to a new generation.
    pub async fn delete_group(&self, group: &str) -> CacheResult<i64> {
        self.generations.rotate(group).await
    }

    /// Removes every entry under this cache's prefix. Generation counters are
    /// kept so that groups never reuse a generation.
    pub async fn clear(&self) -> CacheResult<()> {
        self.store.clear(&format!("{}:", self.prefix)).await
    }

    pub async fn get_expiration_time(&self, entry: &EntryKey) -> CacheResult<Option<u64>> {
        match self.read_key(entry).await? {
            Some(physical) => self.store.get_expiration_time(&physical).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layercache_core::RemoteStore;
    use layercache_memory::InMemoryRemote;
    use std::sync::Arc;

    fn remote_cache(remote: &InMemoryRemote) -> RemoteCache<String> {
        let config = RemoteTierConfig {
            enabled: true,
            prefix: "users".to_string(),
            ..Default::default()
        };
        RemoteCache::new(Arc::new(remote.clone()), &config)
    }

    #[tokio::test]
    async fn test_null_round_trips_as_null() {
        let remote = InMemoryRemote::new();
        let cache = remote_cache(&remote);

        cache.set(&EntryKey::flat("gone"), &None).await.unwrap();
        cache
            .set(&EntryKey::flat("u1"), &Some("alice".to_string()))
            .await
            .unwrap();

        assert_eq!(cache.get(&EntryKey::flat("gone")).await.unwrap(), Lookup::Null);
        assert_eq!(
            cache.get(&EntryKey::flat("u1")).await.unwrap(),
            Lookup::Hit("alice".to_string())
        );
        assert_eq!(cache.get(&EntryKey::flat("u2")).await.unwrap(), Lookup::Miss);
        assert_eq!(remote.get("users:gone").await.unwrap().as_deref(), Some("null"));
    }

    #[tokio::test]
    async fn test_group_read_without_generation_is_miss() {
        let remote = InMemoryRemote::new();
        let cache = remote_cache(&remote);

        let found = cache.get(&EntryKey::grouped("u1", "co1")).await.unwrap();

        assert_eq!(found, Lookup::Miss);
        assert!(!remote.contains_key("group-index:co1"));
    }

    #[tokio::test]
    async fn test_delete_group_orphans_old_generation() {
        let remote = InMemoryRemote::new();
        let cache = remote_cache(&remote);
        let entry = EntryKey::grouped("u1", "co1");

        cache.set(&entry, &Some("alice".to_string())).await.unwrap();
        assert!(remote.contains_key("users:co1:0:u1"));

        assert_eq!(cache.delete_group("co1").await.unwrap(), 1);

        assert_eq!(cache.get(&entry).await.unwrap(), Lookup::Miss);
        assert!(remote.contains_key("users:co1:0:u1"));

        cache.set(&entry, &Some("bob".to_string())).await.unwrap();
        assert!(remote.contains_key("users:co1:1:u1"));
        assert_eq!(cache.get(&entry).await.unwrap(), Lookup::Hit("bob".to_string()));
    }

    #[tokio::test]
    async fn test_get_many_is_positional() {
        let remote = InMemoryRemote::new();
        let cache = remote_cache(&remote);
        cache
            .set_many(
                &[
                    ("u1".to_string(), Some("alice".to_string())),
                    ("u3".to_string(), None),
                ],
                Some("co1"),
            )
            .await
            .unwrap();

        let keys = vec!["u1".to_string(), "u2".to_string(), "u3".to_string()];
        let batch = cache.get_many(&keys, Some("co1")).await.unwrap();

        assert_eq!(batch.resolved.get("u1"), Some(&Some("alice".to_string())));
        assert_eq!(batch.resolved.get("u3"), Some(&None));
        assert_eq!(batch.unresolved, vec!["u2".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_keeps_generation_counters() {
        let remote = InMemoryRemote::new();
        let cache = remote_cache(&remote);
        cache
            .set(&EntryKey::grouped("u1", "co1"), &Some("alice".to_string()))
            .await
            .unwrap();
        cache.delete_group("co1").await.unwrap();

        cache.clear().await.unwrap();

        assert!(!remote.contains_key("users:co1:0:u1"));
        assert_eq!(remote.read_counter("group-index:co1").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_an_error() {
        let remote = InMemoryRemote::new();
        let cache = remote_cache(&remote);
        remote.set("users:u1", "{not json", None).await.unwrap();

        let err = cache.get(&EntryKey::flat("u1")).await.unwrap_err();

        assert!(matches!(err, layercache_core::CacheError::Serialization { .. }));
    }
}
