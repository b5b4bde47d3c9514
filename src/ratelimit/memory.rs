//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::CounterStore;
use super::clock::{Clock, SystemClock};
use super::counter::{ConsumeOutcome, CounterRecord, CounterSnapshot};
use super::key::CounterKey;
use super::rules::RateLimitPolicy;
use crate::error::StoreError;

/// Counter store holding every record in this process.
///
/// Limits are exact within one process but are not shared with other
/// instances and are lost on restart. Updates to a single key happen under
/// the map's shard lock, so concurrent requests from one client cannot race
/// past the limit.
pub struct MemoryStore<C: Clock = SystemClock> {
    records: DashMap<CounterKey, CounterRecord>,
    clock: Arc<C>,
}

impl MemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    pub fn with_clock(clock: Arc<C>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Number of records currently held, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove every record whose window has passed. Returns how many were
    /// dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }

    fn consume_sync(&self, key: &CounterKey, policy: &RateLimitPolicy) -> ConsumeOutcome {
        let now = self.clock.now();
        match self.records.entry(key.clone()) {
            Entry::Vacant(slot) => {
                trace!(key = %key, points = policy.points, "Creating counter record");
                slot.insert(CounterRecord::start(now, policy.window()));
                ConsumeOutcome::Allowed
            }
            Entry::Occupied(mut slot) => slot.get_mut().consume(now, policy),
        }
    }
}

#[async_trait]
impl<C: Clock + 'static> CounterStore for MemoryStore<C> {
    async fn consume(
        &self,
        key: &CounterKey,
        policy: &RateLimitPolicy,
    ) -> Result<ConsumeOutcome, StoreError> {
        Ok(self.consume_sync(key, policy))
    }

    async fn delete(&self, key: &CounterKey) -> Result<(), StoreError> {
        if self.records.remove(key).is_some() {
            debug!(key = %key, "Counter record removed");
        }
        Ok(())
    }

    async fn inspect(
        &self,
        key: &CounterKey,
        policy: &RateLimitPolicy,
    ) -> Result<Option<CounterSnapshot>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| CounterSnapshot::new(record.count(), policy.points, record.resets_in(now))))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Periodically purge expired records from `store`.
///
/// The task runs until the runtime shuts down.
pub fn spawn_purge_task<C: Clock + 'static>(
    store: Arc<MemoryStore<C>>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = store.len(), "Purged expired rate limit records");
            }
        }
    })
}
