//! Cross-instance invalidation over a shared pub/sub channel.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CountingLocalStore, CountingSource, ErrorLog, eventually, keys, remote_config};
use layercache::notifications::SubscriptionState;
use layercache::{CacheConfig, CacheError, GroupLoader, InMemoryRemote, Loader, Lookup};

fn bus_config() -> CacheConfig {
    let mut config = remote_config();
    config.notifications.enabled = true;
    config.notifications.channel = "users:invalidate".to_string();
    config
}

async fn instance(remote: &InMemoryRemote) -> Loader<String> {
    Loader::<String>::builder()
        .with_config(bus_config())
        .with_remote_store(Arc::new(remote.clone()))
        .with_pubsub(Arc::new(remote.clone()))
        .with_data_source(Arc::new(CountingSource::new("users").with_value("k", Some("v"))))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_invalidation_reaches_other_instance() {
    let remote = InMemoryRemote::new();
    let first = instance(&remote).await;
    let second = instance(&remote).await;
    first.get("k").await.unwrap();
    second.get("k").await.unwrap();
    assert_eq!(second.get_in_memory_only("k"), Lookup::Hit("v".to_string()));

    first.invalidate_cache_for("k").await;

    assert!(eventually(|| second.get_in_memory_only("k").is_miss()).await);
    assert_eq!(second.stats().subscription, Some(SubscriptionState::Subscribed));
}

#[tokio::test]
async fn test_own_notifications_are_not_applied_twice() {
    let remote = InMemoryRemote::new();
    let store = Arc::new(CountingLocalStore::new(Duration::from_secs(60)));
    let loader = Loader::<String>::builder()
        .with_config(bus_config())
        .with_local_store(store.clone())
        .with_remote_store(Arc::new(remote.clone()))
        .with_pubsub(Arc::new(remote.clone()))
        .with_data_source(Arc::new(CountingSource::new("users").with_value("k", Some("v"))))
        .build()
        .await
        .unwrap();
    loader.get("k").await.unwrap();

    loader.invalidate_cache_for("k").await;

    assert!(eventually(|| remote.published_count() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.deletes(), 1);
}

#[tokio::test]
async fn test_set_propagates_value() {
    let remote = InMemoryRemote::new();
    let first = instance(&remote).await;
    let second = instance(&remote).await;

    first.set("k", Some("manual".to_string())).await;

    assert!(
        eventually(|| second.get_in_memory_only("k") == Lookup::Hit("manual".to_string())).await
    );
}

#[tokio::test]
async fn test_set_null_propagates() {
    let remote = InMemoryRemote::new();
    let first = instance(&remote).await;
    let second = instance(&remote).await;
    second.get("k").await.unwrap();

    first.set("k", None).await;

    assert!(eventually(|| second.get_in_memory_only("k").is_null()).await);
}

#[tokio::test]
async fn test_delete_many_and_clear_propagate() {
    let remote = InMemoryRemote::new();
    let first = instance(&remote).await;
    let second = instance(&remote).await;
    for key in ["a", "b", "c"] {
        second.set(key, Some(key.to_string())).await;
    }

    first.invalidate_cache_for_many(&keys(&["a", "b"])).await;
    assert!(eventually(|| second.get_in_memory_only("a").is_miss()).await);
    assert!(second.get_in_memory_only("b").is_miss());
    assert_eq!(second.get_in_memory_only("c"), Lookup::Hit("c".to_string()));

    first.invalidate_cache().await;
    assert!(eventually(|| second.get_in_memory_only("c").is_miss()).await);
}

#[tokio::test]
async fn test_group_invalidation_propagates() {
    let remote = InMemoryRemote::new();
    let build = || {
        let remote = remote.clone();
        async move {
            GroupLoader::<String>::builder()
                .with_config(bus_config())
                .with_remote_store(Arc::new(remote.clone()))
                .with_pubsub(Arc::new(remote.clone()))
                .with_group_data_source(Arc::new(
                    CountingSource::new("employees")
                        .with_group_value("u1", "co1", Some("alice"))
                        .with_group_value("u2", "co1", Some("bob")),
                ))
                .build_group()
                .await
                .unwrap()
        }
    };
    let first = build().await;
    let second = build().await;
    second.get("u1", "co1").await.unwrap();
    second.get("u2", "co1").await.unwrap();

    first.invalidate_cache_from_group("u2", "co1").await;
    assert!(eventually(|| second.get_in_memory_only("u2", "co1").is_miss()).await);
    assert!(second.get_in_memory_only("u1", "co1").is_resolved());

    first.invalidate_cache_for_group("co1").await;
    assert!(eventually(|| second.get_in_memory_only("u1", "co1").is_miss()).await);
}

#[tokio::test]
async fn test_remote_outage_still_invalidates_locally() {
    let remote = InMemoryRemote::new();
    let updates = ErrorLog::default();
    let publishes = ErrorLog::default();
    let loader = Loader::<String>::builder()
        .with_config(bus_config())
        .with_remote_store(Arc::new(remote.clone()))
        .with_pubsub(Arc::new(remote.clone()))
        .with_data_source(Arc::new(CountingSource::new("users").with_value("k", Some("v"))))
        .with_cache_update_error_handler(updates.update_handler())
        .with_publisher_error_handler(publishes.publisher_handler())
        .build()
        .await
        .unwrap();
    loader.get("k").await.unwrap();
    remote.set_unavailable(true);

    loader.invalidate_cache_for("k").await;

    assert_eq!(loader.get_in_memory_only("k"), Lookup::Miss);
    assert_eq!(updates.len(), 1);
    assert!(eventually(|| publishes.len() == 1).await);
}

#[tokio::test]
async fn test_closed_instance_stops_consuming() {
    let remote = InMemoryRemote::new();
    let first = instance(&remote).await;
    let second = instance(&remote).await;
    second.get("k").await.unwrap();

    second.close().await;
    first.invalidate_cache_for("k").await;

    assert!(eventually(|| remote.published_count() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(second.get_in_memory_only("k"), Lookup::Hit("v".to_string()));
    assert_eq!(second.stats().subscription, Some(SubscriptionState::Closed));
}

#[tokio::test]
async fn test_notifications_require_pubsub() {
    let remote = InMemoryRemote::new();
    let result = Loader::<String>::builder()
        .with_config(bus_config())
        .with_remote_store(Arc::new(remote))
        .build()
        .await;

    assert!(matches!(result, Err(CacheError::Configuration { .. })));
}

#[tokio::test]
async fn test_notifications_require_local_tier() {
    let remote = InMemoryRemote::new();
    let mut config = bus_config();
    config.local.enabled = false;
    let result = Loader::<String>::builder()
        .with_config(config)
        .with_remote_store(Arc::new(remote.clone()))
        .with_pubsub(Arc::new(remote))
        .build()
        .await;

    assert!(matches!(result, Err(CacheError::Configuration { .. })));
}
