//! Integration tests for the Redis remote tier.
//!
//! Tests use testcontainers to spin up a real Redis instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use layercache::{CacheConfig, DataSource, LoadParams, Loader, Lookup, RemoteStore};
use layercache_core::RedisConfig;
use layercache_core::clock::now_millis;
use layercache_redis::{RedisBackend, create_redis_backend};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn backend() -> RedisBackend {
    let config = RedisConfig {
        url: get_redis_url().await,
        pool_size: 5,
        timeout_ms: 5000,
    };
    create_redis_backend(&config).await.expect("connect to redis")
}

struct Users {
    calls: AtomicUsize,
}

#[async_trait]
impl DataSource<String> for Users {
    fn name(&self) -> &str {
        "users"
    }

    async fn get(&self, key: &str, _params: Option<&LoadParams>) -> anyhow::Result<Lookup<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Lookup::Hit(format!("user-{key}")))
    }
}

#[tokio::test]
async fn test_unreachable_redis_is_an_error() {
    let config = RedisConfig {
        url: "redis://127.0.0.1:1".to_string(),
        pool_size: 1,
        timeout_ms: 200,
    };

    assert!(create_redis_backend(&config).await.is_err());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_get_set_delete() {
    let redis = backend().await;
    let store = &redis.store;

    store.set("t1:k", "\"v\"", None).await.unwrap();
    assert_eq!(store.get("t1:k").await.unwrap().as_deref(), Some("\"v\""));
    assert_eq!(store.get_expiration_time("t1:k").await.unwrap(), None);

    store.delete("t1:k").await.unwrap();
    assert_eq!(store.get("t1:k").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_many_is_positional() {
    let redis = backend().await;
    let store = &redis.store;
    let entries = vec![
        ("t2:a".to_string(), "1".to_string()),
        ("t2:c".to_string(), "3".to_string()),
    ];

    store.set_many(&entries, Some(Duration::from_secs(60))).await.unwrap();

    let keys = vec!["t2:a".to_string(), "t2:b".to_string(), "t2:c".to_string()];
    let values = store.get_many(&keys).await.unwrap();
    assert_eq!(values, vec![Some("1".to_string()), None, Some("3".to_string())]);

    let single = store.get_many(&keys[..1]).await.unwrap();
    assert_eq!(single, vec![Some("1".to_string())]);

    store.delete_many(&keys).await.unwrap();
    assert_eq!(store.get("t2:c").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_expiration_time() {
    let redis = backend().await;
    let store = &redis.store;

    store.set("t3:k", "1", Some(Duration::from_secs(10))).await.unwrap();

    let expires_at = store.get_expiration_time("t3:k").await.unwrap().unwrap();
    let left = expires_at - now_millis();
    assert!(left > 8_000 && left <= 10_000);
    assert_eq!(store.get_expiration_time("t3:missing").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_clear_removes_only_prefix() {
    let redis = backend().await;
    let store = &redis.store;
    for i in 0..20 {
        store.set(&format!("t4:{i}"), "x", None).await.unwrap();
    }
    store.set("t4other", "y", None).await.unwrap();

    store.clear("t4:").await.unwrap();

    assert_eq!(store.get("t4:0").await.unwrap(), None);
    assert_eq!(store.get("t4:19").await.unwrap(), None);
    assert_eq!(store.get("t4other").await.unwrap().as_deref(), Some("y"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_counters() {
    let redis = backend().await;
    let store = &redis.store;

    assert_eq!(store.read_counter("t5:g").await.unwrap(), None);
    assert_eq!(store.read_or_init_counter("t5:g", None).await.unwrap(), 0);
    assert_eq!(store.read_counter("t5:g").await.unwrap(), Some(0));
    assert_eq!(store.increment_counter("t5:g", None).await.unwrap(), 1);
    assert_eq!(store.read_or_init_counter("t5:g", None).await.unwrap(), 1);

    assert_eq!(
        store
            .increment_counter("t5:fresh", Some(Duration::from_secs(30)))
            .await
            .unwrap(),
        1
    );
    assert!(store.get_expiration_time("t5:fresh").await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_init_agrees() {
    let redis = backend().await;
    let store = redis.store.clone();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.read_or_init_counter("t6:g", None).await.unwrap() })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 0);
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_invalidation_across_instances() {
    let redis = backend().await;
    let mut config = CacheConfig::default();
    config.remote.enabled = true;
    config.remote.prefix = "t7".to_string();
    config.notifications.enabled = true;
    config.notifications.channel = "t7:invalidate".to_string();

    let build = |source: Arc<Users>| {
        let config = config.clone();
        let redis = redis.clone();
        async move {
            Loader::<String>::builder()
                .with_config(config)
                .with_remote_store(redis.store)
                .with_pubsub(redis.pubsub)
                .with_data_source(source)
                .build()
                .await
                .unwrap()
        }
    };
    let source = Arc::new(Users {
        calls: AtomicUsize::new(0),
    });
    let first = build(source.clone()).await;
    let second = build(source.clone()).await;

    assert_eq!(first.get("1").await.unwrap(), Lookup::Hit("user-1".to_string()));
    assert_eq!(second.get("1").await.unwrap(), Lookup::Hit("user-1".to_string()));
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    first.invalidate_cache_for("1").await;

    let mut invalidated = false;
    for _ in 0..50 {
        if second.get_in_memory_only("1").is_miss() {
            invalidated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(invalidated);

    first.close().await;
    second.close().await;
}
