//! Redis-backed counter store.
//!
//! Every counter is a single Redis string holding the window's count, with a
//! millisecond expiry equal to the window length. The consume decision runs
//! server-side in a Lua script, so check-and-increment is atomic across all
//! instances sharing the Redis server.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, trace};

use super::backend::CounterStore;
use super::counter::{ConsumeOutcome, CounterSnapshot};
use super::key::CounterKey;
use super::rules::RateLimitPolicy;
use crate::error::StoreError;

/// Prefix applied to every counter key written to Redis.
pub const KEY_PREFIX: &str = "halo:ratelimit:";

/// KEYS[1] = counter key, ARGV[1] = points, ARGV[2] = window in ms.
/// Returns {allowed, remaining_ms}.
const CONSUME_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local window_ms = tonumber(ARGV[2])
if not current then
    redis.call('SET', KEYS[1], 1, 'PX', window_ms)
    return {1, window_ms}
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('SET', KEYS[1], 1, 'PX', window_ms)
    return {1, window_ms}
end
if tonumber(current) >= tonumber(ARGV[1]) then
    return {0, ttl}
end
redis.call('INCR', KEYS[1])
return {1, ttl}
"#;

/// Counter store shared by every process pointed at the same Redis server.
pub struct RedisStore {
    conn: ConnectionManager,
    script: Script,
    timeout: Duration,
}

impl RedisStore {
    /// Connect and verify the server answers `PING` within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(StoreError::Timeout(timeout)),
        };

        let store = Self {
            conn,
            script: Script::new(CONSUME_SCRIPT),
            timeout,
        };

        let mut conn = store.conn.clone();
        let pong: String = store.guard(redis::cmd("PING").query_async(&mut conn)).await?;
        if pong != "PONG" {
            return Err(StoreError::Unavailable(format!("unexpected PING reply: {}", pong)));
        }

        Ok(store)
    }

    /// Bound a Redis call by the configured command timeout.
    async fn guard<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

/// Decode the `{allowed, remaining_ms}` reply of the consume script.
fn outcome_from_reply(reply: &[i64]) -> Result<ConsumeOutcome, StoreError> {
    match reply {
        [1, _] => Ok(ConsumeOutcome::Allowed),
        [0, remaining_ms] => Ok(ConsumeOutcome::Exceeded {
            retry_after_ms: u64::try_from(*remaining_ms).unwrap_or(0),
        }),
        other => Err(StoreError::Unavailable(format!(
            "unexpected consume reply: {:?}",
            other
        ))),
    }
}

/// Turn a `GET` + `PTTL` pair into a snapshot. Missing keys and keys without
/// an expiry read as absent.
fn snapshot_from_reply(count: Option<u64>, pttl: i64, limit: u64) -> Option<CounterSnapshot> {
    let count = count?;
    let remaining_ms = u64::try_from(pttl).ok()?;
    Some(CounterSnapshot::new(count, limit, Duration::from_millis(remaining_ms)))
}

fn window_millis(policy: &RateLimitPolicy) -> u64 {
    policy.window_secs.saturating_mul(1000)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn consume(
        &self,
        key: &CounterKey,
        policy: &RateLimitPolicy,
    ) -> Result<ConsumeOutcome, StoreError> {
        let storage_key = key.storage_key(KEY_PREFIX);
        let mut conn = self.conn.clone();

        trace!(key = %storage_key, points = policy.points, "Consuming distributed counter");

        let reply: Vec<i64> = self
            .guard(
                self.script
                    .key(&storage_key)
                    .arg(policy.points)
                    .arg(window_millis(policy))
                    .invoke_async(&mut conn),
            )
            .await?;

        outcome_from_reply(&reply)
    }

    async fn delete(&self, key: &CounterKey) -> Result<(), StoreError> {
        let storage_key = key.storage_key(KEY_PREFIX);
        let mut conn = self.conn.clone();

        let removed: i64 = self.guard(conn.del(&storage_key)).await?;
        debug!(key = %storage_key, removed, "Distributed counter deleted");
        Ok(())
    }

    async fn inspect(
        &self,
        key: &CounterKey,
        policy: &RateLimitPolicy,
    ) -> Result<Option<CounterSnapshot>, StoreError> {
        let storage_key = key.storage_key(KEY_PREFIX);
        let mut conn = self.conn.clone();

        let (count, pttl): (Option<u64>, i64) = self
            .guard(
                redis::pipe()
                    .get(&storage_key)
                    .pttl(&storage_key)
                    .query_async(&mut conn),
            )
            .await?;

        Ok(snapshot_from_reply(count, pttl, policy.points))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
