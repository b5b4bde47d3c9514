//! Counter store trait for abstracting local and distributed implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::counter::{ConsumeOutcome, CounterSnapshot};
use super::distributed::RedisStore;
use super::key::CounterKey;
use super::memory::{spawn_purge_task, MemoryStore};
use super::rules::RateLimitPolicy;
use crate::error::StoreError;

/// Trait for counter store implementations.
///
/// Both the in-process [`MemoryStore`] and the Redis-backed [`RedisStore`]
/// implement this, so the admission path works with either.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one operation for `key` under `policy`.
    async fn consume(
        &self,
        key: &CounterKey,
        policy: &RateLimitPolicy,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// Drop the counter so the next consume opens a fresh window.
    async fn delete(&self, key: &CounterKey) -> Result<(), StoreError>;

    /// Current state of a live counter, or `None` if absent or expired.
    async fn inspect(
        &self,
        key: &CounterKey,
        policy: &RateLimitPolicy,
    ) -> Result<Option<CounterSnapshot>, StoreError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Pick the counter store at startup.
///
/// Redis is used when a URL is configured and answers a `PING` within
/// `timeout`; otherwise the process falls back to the in-memory store, whose
/// expired records are swept every `purge_every`.
pub async fn select_store(
    redis_url: Option<&str>,
    timeout: Duration,
    purge_every: Duration,
) -> Arc<dyn CounterStore> {
    let Some(url) = redis_url.filter(|u| !u.trim().is_empty()) else {
        info!("No Redis URL configured, using in-memory rate limiting");
        return memory_store(purge_every);
    };

    match RedisStore::connect(url, timeout).await {
        Ok(store) => {
            info!("Rate limiter connected to Redis");
            Arc::new(store)
        }
        Err(e) => {
            warn!(
                error = %e,
                "Redis unavailable for rate limiting, falling back to in-memory store; \
                 limits will not be shared across instances"
            );
            memory_store(purge_every)
        }
    }
}

fn memory_store(purge_every: Duration) -> Arc<dyn CounterStore> {
    let store = Arc::new(MemoryStore::new());
    spawn_purge_task(store.clone(), purge_every);
    store
}
