//! Fixed-window counter records and consume outcomes.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::rules::RateLimitPolicy;

/// Result of a single consume against a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The operation fits in the current window
    Allowed,
    /// The window is exhausted; retry after the given number of milliseconds
    Exceeded { retry_after_ms: u64 },
}

impl ConsumeOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ConsumeOutcome::Allowed)
    }

    /// Whole seconds a rejected client should wait, rounded up.
    ///
    /// Falls back to `fallback_secs` when the store reported no remaining
    /// time. Returns `None` for allowed outcomes.
    pub fn retry_after_secs(&self, fallback_secs: u64) -> Option<u64> {
        match *self {
            ConsumeOutcome::Allowed => None,
            ConsumeOutcome::Exceeded { retry_after_ms: 0 } => Some(fallback_secs.max(1)),
            ConsumeOutcome::Exceeded { retry_after_ms } => Some(retry_after_ms.div_ceil(1000)),
        }
    }
}

/// One window's worth of consumption for a single counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    count: u64,
    reset_at: Instant,
}

impl CounterRecord {
    /// Open a new window with the first operation already counted.
    pub fn start(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            reset_at: now + window,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }

    /// Time left until the window resets.
    pub fn resets_in(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }

    /// Apply one operation to this record.
    pub fn consume(&mut self, now: Instant, policy: &RateLimitPolicy) -> ConsumeOutcome {
        if self.is_expired(now) {
            *self = Self::start(now, policy.window());
            return ConsumeOutcome::Allowed;
        }

        if self.count >= policy.points {
            // Round up: a sub-millisecond remainder must not read as "unknown".
            let remaining_ms = self.resets_in(now).as_nanos().div_ceil(1_000_000);
            return ConsumeOutcome::Exceeded {
                retry_after_ms: u64::try_from(remaining_ms).unwrap_or(u64::MAX),
            };
        }

        self.count += 1;
        ConsumeOutcome::Allowed
    }
}

/// Read-only view of a live counter, as returned by store inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl CounterSnapshot {
    pub fn new(count: u64, limit: u64, resets_in: Duration) -> Self {
        let resets_in = chrono::Duration::from_std(resets_in).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            count,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: Utc::now() + resets_in,
        }
    }
}
