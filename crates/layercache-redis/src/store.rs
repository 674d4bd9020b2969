//! Redis remote tier.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use layercache_core::clock::now_millis;
use layercache_core::{CacheError, RemoteStore};
use redis::{AsyncCommands, Script};

/// Keys fetched per SCAN round trip while clearing a prefix.
const SCAN_BATCH: usize = 500;

/// Returns the counter, creating it at 0 when absent.
const READ_OR_INIT_COUNTER: &str = r"
local current = redis.call('GET', KEYS[1])
if current then
    return tonumber(current)
end
redis.call('SET', KEYS[1], 0)
if tonumber(ARGV[1]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return 0
";

/// Increments the counter and refreshes its TTL in one step.
const INCREMENT_COUNTER: &str = r"
local value = redis.call('INCR', KEYS[1])
if tonumber(ARGV[1]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return value
";

/// [`RemoteStore`] backed by a deadpool Redis pool.
///
/// Payloads are stored as plain strings with millisecond TTLs (`SET .. PX`).
/// Generation counters are created and rotated through Lua scripts so that
/// concurrent first readers across processes agree on the initial value.
#[derive(Clone)]
pub struct RedisRemoteStore {
    pool: Pool,
    read_or_init: Script,
    increment: Script,
}

impl RedisRemoteStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            read_or_init: Script::new(READ_OR_INIT_COUNTER),
            increment: Script::new(INCREMENT_COUNTER),
        }
    }

    /// Check if Redis is reachable (for health checks).
    pub async fn is_available(&self) -> bool {
        self.pool.get().await.is_ok()
    }

    async fn connection(&self) -> Result<Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::remote(format!("failed to get Redis connection: {e}")))
    }
}

fn command_error(command: &str, key: &str, error: redis::RedisError) -> CacheError {
    tracing::warn!(key = %key, error = %error, "Redis {command} error");
    CacheError::remote(format!("{command} {key}: {error}"))
}

/// PX rejects zero, so sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Escapes glob metacharacters for `SCAN MATCH`.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl RemoteStore for RedisRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| command_error("GET", key, e))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        // Explicit MGET: a single key would otherwise be sent as GET.
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("MGET", &keys.join(","), e))?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let result = match ttl {
            Some(ttl) => conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl)).await,
            None => conn.set::<_, _, ()>(key, value).await,
        };
        result.map_err(|e| command_error("SET", key, e))?;
        tracing::debug!(key = %key, ttl_ms = ?ttl.map(ttl_millis), "remote set");
        Ok(())
    }

    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            match ttl {
                Some(ttl) => pipe.pset_ex(key, value, ttl_millis(ttl)).ignore(),
                None => pipe.set(key, value).ignore(),
            };
        }
        let mut conn = self.connection().await?;
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("SET", &format!("{} keys", entries.len()), e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| command_error("DEL", key, e))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(keys)
            .await
            .map_err(|e| command_error("DEL", &keys.join(","), e))
    }

    async fn clear(&self, prefix: &str) -> Result<(), CacheError> {
        let pattern = format!("{}*", glob_escape(prefix));
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error("SCAN", &pattern, e))?;
            if !keys.is_empty() {
                removed += keys.len();
                conn.del::<_, ()>(&keys)
                    .await
                    .map_err(|e| command_error("DEL", &pattern, e))?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        tracing::debug!(prefix = %prefix, removed, "remote cleared");
        Ok(())
    }

    async fn get_expiration_time(&self, key: &str) -> Result<Option<u64>, CacheError> {
        let mut conn = self.connection().await?;
        let left: i64 = conn
            .pttl(key)
            .await
            .map_err(|e| command_error("PTTL", key, e))?;
        // -2: no such key, -1: no TTL.
        Ok((left >= 0).then(|| now_millis().saturating_add(left as u64)))
    }

    async fn read_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<i64>>(key)
            .await
            .map_err(|e| command_error("GET", key, e))
    }

    async fn read_or_init_counter(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        let mut conn = self.connection().await?;
        self.read_or_init
            .key(key)
            .arg(ttl.map(ttl_millis).unwrap_or(0))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| command_error("EVALSHA", key, e))
    }

    async fn increment_counter(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        let mut conn = self.connection().await?;
        self.increment
            .key(key)
            .arg(ttl.map(ttl_millis).unwrap_or(0))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| command_error("EVALSHA", key, e))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRemoteStore")
            .field("pool", &self.pool.status())
            .finish()
    }
}
