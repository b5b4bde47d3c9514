//! Admission decisions over a counter store.

use std::sync::Arc;

use tracing::{debug, error, info, trace};

use super::backend::CounterStore;
use super::counter::{ConsumeOutcome, CounterSnapshot};
use super::key::CounterKey;
use super::memory::MemoryStore;
use super::rules::{Bucket, PolicyTable, RateLimitPolicy};
use crate::error::StoreError;

/// The rate limiter that maps buckets to policies and consults the store.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policies: Arc<PolicyTable>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, policies: PolicyTable) -> Self {
        Self {
            store,
            policies: Arc::new(policies),
        }
    }

    /// Limiter over a fresh in-memory store with default policies.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), PolicyTable::default())
    }

    pub fn policy(&self, bucket: Bucket) -> &RateLimitPolicy {
        self.policies.get(bucket)
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Count one request from `identity` against `bucket`.
    pub async fn check(&self, bucket: Bucket, identity: &str) -> Result<ConsumeOutcome, StoreError> {
        let key = CounterKey::new(bucket, identity);
        let policy = self.policies.get(bucket);

        trace!(key = %key, "Checking rate limit");

        let outcome = self.store.consume(&key, policy).await.map_err(|e| {
            error!(key = %key, backend = self.store.backend_name(), error = %e, "Rate limit check failed");
            e
        })?;

        if let ConsumeOutcome::Exceeded { retry_after_ms } = outcome {
            debug!(key = %key, limit = policy.points, retry_after_ms, "Rate limit exceeded");
        }

        Ok(outcome)
    }

    /// Clear the counter for `identity` in the named bucket.
    ///
    /// Unknown bucket names reset the general bucket.
    pub async fn reset_rate_limit(&self, identity: &str, bucket: &str) -> Result<(), StoreError> {
        let key = CounterKey::new(Bucket::from_name(bucket), identity);
        self.store.delete(&key).await.map_err(|e| {
            error!(key = %key, backend = self.store.backend_name(), error = %e, "Rate limit reset failed");
            e
        })?;
        info!(key = %key, "Rate limit reset");
        Ok(())
    }

    /// Current counter for `identity` in `bucket`, if one is live.
    pub async fn inspect(&self, bucket: Bucket, identity: &str) -> Result<Option<CounterSnapshot>, StoreError> {
        let key = CounterKey::new(bucket, identity);
        self.store.inspect(&key, self.policies.get(bucket)).await.map_err(|e| {
            error!(key = %key, backend = self.store.backend_name(), error = %e, "Rate limit inspect failed");
            e
        })
    }
}
