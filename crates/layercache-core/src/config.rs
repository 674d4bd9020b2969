//! Declarative configuration for the cache tiers.
//!
//! Error handlers are closures and therefore not part of this file-backed
//! configuration; they are passed to the loader builder directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Local (in-process) tier
    #[serde(default)]
    pub local: LocalTierConfig,
    /// Remote (shared) tier
    #[serde(default)]
    pub remote: RemoteTierConfig,
    /// Resolution behaviour
    #[serde(default)]
    pub loading: LoadingConfig,
    /// Cross-process invalidation
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisConfig,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        self.local.validate()?;
        self.remote.validate()?;
        self.loading.validate()?;
        if self.notifications.enabled && self.notifications.channel.is_empty() {
            return Err(CacheError::configuration(
                "notifications.channel must not be empty",
            ));
        }
        if self.redis.pool_size == 0 {
            return Err(CacheError::configuration("redis.pool_size must be > 0"));
        }
        Ok(())
    }
}

/// Local tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTierConfig {
    /// Keep a local tier at all
    #[serde(default = "default_local_enabled")]
    pub enabled: bool,

    /// Entry lifetime in milliseconds
    #[serde(default = "default_local_ttl_ms")]
    pub ttl_ms: u64,

    /// Capacity before eviction kicks in (flat keys, and each group bucket)
    #[serde(default = "default_local_max_items")]
    pub max_items: usize,

    /// Number of group buckets kept before the least recently written one
    /// is evicted
    #[serde(default = "default_local_max_groups")]
    pub max_groups: usize,

    /// When an entry has less than this many milliseconds left, a read serves
    /// it and refreshes it in the background. Disabled when unset.
    #[serde(default)]
    pub ttl_left_before_refresh_ms: Option<u64>,
}

fn default_local_enabled() -> bool {
    true
}

fn default_local_ttl_ms() -> u64 {
    60_000
}

fn default_local_max_items() -> usize {
    500
}

fn default_local_max_groups() -> usize {
    1000
}

impl Default for LocalTierConfig {
    fn default() -> Self {
        Self {
            enabled: default_local_enabled(),
            ttl_ms: default_local_ttl_ms(),
            max_items: default_local_max_items(),
            max_groups: default_local_max_groups(),
            ttl_left_before_refresh_ms: None,
        }
    }
}

impl LocalTierConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    fn validate(&self) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        if self.ttl_ms == 0 {
            return Err(CacheError::configuration("local.ttl_ms must be > 0"));
        }
        if self.max_items == 0 {
            return Err(CacheError::configuration("local.max_items must be > 0"));
        }
        if self.max_groups == 0 {
            return Err(CacheError::configuration("local.max_groups must be > 0"));
        }
        if let Some(threshold) = self.ttl_left_before_refresh_ms {
            if threshold >= self.ttl_ms {
                return Err(CacheError::configuration(
                    "local.ttl_left_before_refresh_ms must be lower than local.ttl_ms",
                ));
            }
        }
        Ok(())
    }
}

/// Remote tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTierConfig {
    /// Use the remote tier (gracefully degrades to local-only without it)
    #[serde(default)]
    pub enabled: bool,

    /// Namespace prepended to every remote key
    #[serde(default = "default_remote_prefix")]
    pub prefix: String,

    /// Entry lifetime in milliseconds; entries never expire when unset
    #[serde(default = "default_remote_ttl_ms")]
    pub ttl_ms: Option<u64>,

    /// Lifetime of group generation counters; counters never expire when unset
    #[serde(default)]
    pub group_ttl_ms: Option<u64>,

    /// Deadline for every remote operation
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Background refresh threshold for values served from the remote tier
    #[serde(default)]
    pub ttl_left_before_refresh_ms: Option<u64>,

    /// How long a looked-up remote expiration time is memoised
    #[serde(default)]
    pub ttl_cache_ttl_ms: Option<u64>,

    /// How many remote expiration times are memoised
    #[serde(default = "default_ttl_cache_size")]
    pub ttl_cache_size: u64,
}

fn default_remote_prefix() -> String {
    "layercache".to_string()
}

fn default_remote_ttl_ms() -> Option<u64> {
    Some(300_000)
}

fn default_ttl_cache_size() -> u64 {
    500
}

impl Default for RemoteTierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: default_remote_prefix(),
            ttl_ms: default_remote_ttl_ms(),
            group_ttl_ms: None,
            timeout_ms: None,
            ttl_left_before_refresh_ms: None,
            ttl_cache_ttl_ms: None,
            ttl_cache_size: default_ttl_cache_size(),
        }
    }
}

impl RemoteTierConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    pub fn group_ttl(&self) -> Option<Duration> {
        self.group_ttl_ms.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<(), CacheError> {
        if self.ttl_cache_ttl_ms.is_some() && self.ttl_left_before_refresh_ms.is_none() {
            return Err(CacheError::configuration(
                "remote.ttl_cache_ttl_ms requires remote.ttl_left_before_refresh_ms",
            ));
        }
        if self.ttl_cache_ttl_ms.is_some() && self.ttl_cache_size == 0 {
            return Err(CacheError::configuration(
                "remote.ttl_cache_size must be > 0",
            ));
        }
        if let (Some(threshold), Some(ttl)) = (self.ttl_left_before_refresh_ms, self.ttl_ms) {
            if threshold >= ttl {
                return Err(CacheError::configuration(
                    "remote.ttl_left_before_refresh_ms must be lower than remote.ttl_ms",
                ));
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(CacheError::configuration("remote.timeout_ms must be > 0"));
        }
        Ok(())
    }
}

/// Resolution behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadingConfig {
    /// Fail with `NotFound` when nothing resolves a key
    #[serde(default)]
    pub throw_if_unresolved: bool,

    /// Abort the data source chain on the first loader error
    #[serde(default)]
    pub throw_if_load_error: bool,

    /// Cap on callers attached to one in-flight load; unlimited when unset
    #[serde(default)]
    pub max_batched_operations_per_load: Option<usize>,
}

impl LoadingConfig {
    fn validate(&self) -> Result<(), CacheError> {
        if self.max_batched_operations_per_load == Some(0) {
            return Err(CacheError::configuration(
                "loading.max_batched_operations_per_load must be > 0",
            ));
        }
        Ok(())
    }
}

/// Cross-process invalidation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Publish and consume invalidation commands
    #[serde(default)]
    pub enabled: bool,

    /// Channel shared by every process of one logical cache
    #[serde(default = "default_notification_channel")]
    pub channel: String,
}

fn default_notification_channel() -> String {
    "layercache:invalidate".to_string()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: default_notification_channel(),
        }
    }
}

/// Redis configuration for multi-process deployments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

pub mod loader {
    use super::CacheConfig;
    use crate::error::CacheError;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Loads configuration from a TOML file (default `layercache.toml`, if it
    /// exists) overlaid with environment variables such as
    /// `LAYERCACHE__LOCAL__TTL_MS=1000`.
    pub fn load_config(path: Option<&str>) -> Result<CacheConfig, CacheError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("layercache.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(CacheError::configuration(format!(
                "config file not found: {}",
                pathbuf.display()
            )));
        }
        builder = builder.add_source(
            Environment::with_prefix("LAYERCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
        let merged: CacheConfig = cfg
            .try_deserialize()
            .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}
