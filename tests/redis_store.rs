//! RedisStore against a real Redis server started with testcontainers.
//!
//! Requires a local Docker daemon.

use std::time::Duration;

use halo_gate::ratelimit::{
    Bucket, ConsumeOutcome, CounterKey, CounterStore, RateLimitPolicy, RedisStore, KEY_PREFIX,
};
use redis::AsyncCommands;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

async fn redis_container() -> (ContainerAsync<GenericImage>, String) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start Redis container");

    let port = container
        .get_host_port_ipv4(6379.tcp())
        .await
        .expect("Failed to read Redis port");

    (container, format!("redis://127.0.0.1:{}", port))
}

async fn connect(url: &str) -> RedisStore {
    RedisStore::connect(url, Duration::from_secs(2))
        .await
        .expect("Failed to connect to Redis")
}

fn policy(points: u64, window_secs: u64) -> RateLimitPolicy {
    RateLimitPolicy::new(points, window_secs, window_secs, 60).unwrap()
}

#[tokio::test]
async fn test_rejects_after_points_are_spent() {
    let (_container, url) = redis_container().await;
    let store = connect(&url).await;
    let policy = policy(3, 60);
    let key = CounterKey::new(Bucket::Auth, "198.51.100.1");

    for _ in 0..3 {
        assert!(store.consume(&key, &policy).await.unwrap().is_allowed());
    }

    match store.consume(&key, &policy).await.unwrap() {
        ConsumeOutcome::Exceeded { retry_after_ms } => {
            assert!(retry_after_ms > 0 && retry_after_ms <= 60_000);
        }
        ConsumeOutcome::Allowed => panic!("fourth request within the window was admitted"),
    }

    // A rejected request does not count.
    let snapshot = store.inspect(&key, &policy).await.unwrap().unwrap();
    assert_eq!(snapshot.count, 3);
    assert_eq!(snapshot.remaining, 0);
}

#[tokio::test]
async fn test_window_renews_after_expiry() {
    let (_container, url) = redis_container().await;
    let store = connect(&url).await;
    let policy = policy(2, 1);
    let key = CounterKey::new(Bucket::Search, "198.51.100.2");

    assert!(store.consume(&key, &policy).await.unwrap().is_allowed());
    assert!(store.consume(&key, &policy).await.unwrap().is_allowed());

    let outcome = store.consume(&key, &policy).await.unwrap();
    assert_eq!(outcome.retry_after_secs(600), Some(1));

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert!(store.consume(&key, &policy).await.unwrap().is_allowed());
    let snapshot = store.inspect(&key, &policy).await.unwrap().unwrap();
    assert_eq!(snapshot.count, 1);
}

#[tokio::test]
async fn test_delete_gives_a_fresh_window() {
    let (_container, url) = redis_container().await;
    let store = connect(&url).await;
    let policy = policy(1, 60);
    let key = CounterKey::new(Bucket::Upload, "uploader");

    assert!(store.consume(&key, &policy).await.unwrap().is_allowed());
    assert!(!store.consume(&key, &policy).await.unwrap().is_allowed());

    store.delete(&key).await.unwrap();
    assert!(store.inspect(&key, &policy).await.unwrap().is_none());
    assert!(store.consume(&key, &policy).await.unwrap().is_allowed());

    // Deleting a missing counter is not an error.
    store.delete(&CounterKey::new(Bucket::Upload, "nobody")).await.unwrap();
}

#[tokio::test]
async fn test_identities_and_buckets_are_isolated() {
    let (_container, url) = redis_container().await;
    let store = connect(&url).await;
    let policy = policy(1, 60);
    let first = CounterKey::new(Bucket::General, "10.0.0.1");
    let second = CounterKey::new(Bucket::General, "10.0.0.2");
    let other_bucket = CounterKey::new(Bucket::Auth, "10.0.0.1");

    assert!(store.consume(&first, &policy).await.unwrap().is_allowed());
    assert!(!store.consume(&first, &policy).await.unwrap().is_allowed());

    assert!(store.consume(&second, &policy).await.unwrap().is_allowed());
    assert!(store.consume(&other_bucket, &policy).await.unwrap().is_allowed());
}

#[tokio::test]
async fn test_counter_without_expiry_is_restarted() {
    let (_container, url) = redis_container().await;
    let store = connect(&url).await;
    let policy = policy(2, 60);
    let key = CounterKey::new(Bucket::User, "42");

    // Simulate a counter that lost its TTL.
    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = conn.set(key.storage_key(KEY_PREFIX), 5).await.unwrap();

    assert!(store.consume(&key, &policy).await.unwrap().is_allowed());

    let snapshot = store.inspect(&key, &policy).await.unwrap().unwrap();
    assert_eq!(snapshot.count, 1);
    let ttl: i64 = conn.pttl(key.storage_key(KEY_PREFIX)).await.unwrap();
    assert!(ttl > 0 && ttl <= 60_000);
}
