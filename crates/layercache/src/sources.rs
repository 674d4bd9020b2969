//! The ordered chain of data sources behind the cache tiers.

use std::collections::HashMap;
use std::sync::Arc;

use layercache_core::{
    CacheError, CacheResult, DataSource, GroupDataSource, LoadParams, Lookup,
};

use crate::CacheValue;
use crate::handlers::LoadErrorHandler;
use crate::key::EntryKey;
use crate::metrics;

/// Data sources in lookup order. A loader resolves either flat or grouped
/// entries, never both, so the chain kind is fixed at construction.
pub(crate) enum SourceChain<V> {
    Flat(Vec<Arc<dyn DataSource<V>>>),
    Grouped(Vec<Arc<dyn GroupDataSource<V>>>),
}

/// How the chain reacts to a failing source.
pub(crate) struct LoadPolicy<'a> {
    pub throw_if_load_error: bool,
    pub on_error: &'a LoadErrorHandler,
}

impl LoadPolicy<'_> {
    /// Reports a source failure; returns the error if the chain must stop.
    fn on_failure(&self, source: &str, target: &str, error: &anyhow::Error) -> Option<CacheError> {
        let err = CacheError::load(source, target, error);
        metrics::record_load_error(source);
        (self.on_error)(&err, target, source);
        self.throw_if_load_error.then_some(err)
    }
}

impl<V: CacheValue> SourceChain<V> {
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(sources) => sources.len(),
            Self::Grouped(sources) => sources.len(),
        }
    }

    fn mismatch(group: Option<&str>) -> CacheError {
        match group {
            Some(group) => CacheError::internal(format!(
                "grouped lookup in group {group} on a flat data source chain"
            )),
            None => CacheError::internal("flat lookup on a grouped data source chain"),
        }
    }

    async fn call(
        &self,
        index: usize,
        entry: &EntryKey,
        params: Option<&LoadParams>,
    ) -> CacheResult<(&str, anyhow::Result<Lookup<V>>)> {
        match (self, entry.group()) {
            (Self::Flat(sources), None) => {
                let source = &sources[index];
                Ok((source.name(), source.get(entry.key(), params).await))
            }
            (Self::Grouped(sources), Some(group)) => {
                let source = &sources[index];
                Ok((
                    source.name(),
                    source.get_from_group(entry.key(), group, params).await,
                ))
            }
            (_, group) => Err(Self::mismatch(group)),
        }
    }

    async fn call_many(
        &self,
        index: usize,
        keys: &[String],
        group: Option<&str>,
        params: Option<&LoadParams>,
    ) -> CacheResult<(&str, anyhow::Result<HashMap<String, Option<V>>>)> {
        match (self, group) {
            (Self::Flat(sources), None) => {
                let source = &sources[index];
                Ok((source.name(), source.get_many(keys, params).await))
            }
            (Self::Grouped(sources), Some(group)) => {
                let source = &sources[index];
                Ok((
                    source.name(),
                    source.get_many_from_group(keys, group, params).await,
                ))
            }
            (_, group) => Err(Self::mismatch(group)),
        }
    }

    /// Asks each source in turn until one resolves the entry.
    ///
    /// A failing source is reported and skipped; with `throw_if_load_error`
    /// the first failure aborts the chain. `Miss` means the whole chain came
    /// up empty.
    pub async fn load(
        &self,
        entry: &EntryKey,
        params: Option<&LoadParams>,
        policy: &LoadPolicy<'_>,
    ) -> CacheResult<Lookup<V>> {
        for index in 0..self.len() {
            let (name, result) = self.call(index, entry, params).await?;
            match result {
                Ok(Lookup::Miss) => {}
                Ok(found) => {
                    tracing::debug!(key = %entry, source = %name, null = found.is_null(), "Resolved from data source");
                    metrics::record_origin_load(name);
                    return Ok(found);
                }
                Err(e) => {
                    if let Some(err) = policy.on_failure(name, &entry.to_string(), &e) {
                        return Err(err);
                    }
                }
            }
        }
        Ok(Lookup::Miss)
    }

    /// Batch version of [`SourceChain::load`]: each source only sees the keys
    /// its predecessors left unresolved. Keys absent from the result are
    /// unresolved.
    pub async fn load_many(
        &self,
        keys: &[String],
        group: Option<&str>,
        params: Option<&LoadParams>,
        policy: &LoadPolicy<'_>,
    ) -> CacheResult<HashMap<String, Option<V>>> {
        let mut found = HashMap::with_capacity(keys.len());
        let mut remaining = keys.to_vec();

        for index in 0..self.len() {
            if remaining.is_empty() {
                break;
            }
            let (name, result) = self.call_many(index, &remaining, group, params).await?;
            match result {
                Ok(mut loaded) => {
                    let before = found.len();
                    remaining.retain(|key| match loaded.remove(key) {
                        Some(value) => {
                            found.insert(key.clone(), value);
                            false
                        }
                        None => true,
                    });
                    if found.len() > before {
                        metrics::record_origin_load(name);
                    }
                }
                Err(e) => {
                    let target = match group {
                        Some(group) => format!("{group}/[{}]", remaining.join(", ")),
                        None => format!("[{}]", remaining.join(", ")),
                    };
                    if let Some(err) = policy.on_failure(name, &target, &e) {
                        return Err(err);
                    }
                }
            }
        }
        Ok(found)
    }
}
