//! Rate limit buckets and their policies.
//!
//! The bucket set is closed: every route class maps to one of the five
//! [`Bucket`] variants, and each bucket carries exactly one
//! [`RateLimitPolicy`]. Only the general bucket is tunable at startup.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HaloError, Result};

/// A named rate-limit policy class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    General,
    Auth,
    Upload,
    Search,
    User,
}

impl Bucket {
    pub const ALL: [Bucket; 5] = [
        Bucket::General,
        Bucket::Auth,
        Bucket::Upload,
        Bucket::Search,
        Bucket::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::General => "general",
            Bucket::Auth => "auth",
            Bucket::Upload => "upload",
            Bucket::Search => "search",
            Bucket::User => "user",
        }
    }

    /// Strict lookup by name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.as_str() == name)
    }

    /// Lenient lookup used by operator-facing paths.
    ///
    /// An unknown name resolves to [`Bucket::General`] rather than failing, so
    /// a typo in an admin call cannot take down the admission path.
    pub fn from_name(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            warn!(bucket = %name, "Unknown rate limit bucket, using general");
            Bucket::General
        })
    }

    /// Machine-readable code carried by a 429 rejection.
    pub fn error_code(&self) -> &'static str {
        match self {
            Bucket::General => "RATE_LIMIT_ERROR",
            Bucket::Auth => "AUTH_RATE_LIMIT_ERROR",
            Bucket::Upload => "UPLOAD_RATE_LIMIT_ERROR",
            Bucket::Search => "SEARCH_RATE_LIMIT_ERROR",
            Bucket::User => "USER_RATE_LIMIT_ERROR",
        }
    }

    /// Human-readable message carried by a 429 rejection.
    pub fn error_message(&self) -> &'static str {
        match self {
            Bucket::General => "Rate limit exceeded",
            Bucket::Auth => "Too many authentication attempts. Please try again later.",
            Bucket::Upload => "Upload rate limit exceeded. Please try again later.",
            Bucket::Search => "Search rate limit exceeded. Please try again later.",
            Bucket::User => "User rate limit exceeded. Please try again later.",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits applied to one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Maximum operations permitted per window
    pub points: u64,
    /// Fixed window length in seconds
    pub window_secs: u64,
    /// Block hint in seconds. Informational only; a client is released when
    /// its window expires.
    pub block_secs: u64,
    /// Retry-After sent when the store cannot report the remaining time
    pub fallback_retry_secs: u64,
}

impl RateLimitPolicy {
    /// Build a policy, rejecting zero points or a zero-length window.
    pub fn new(points: u64, window_secs: u64, block_secs: u64, fallback_retry_secs: u64) -> Result<Self> {
        if points == 0 {
            return Err(HaloError::Config("rate limit points must be positive".into()));
        }
        if window_secs == 0 {
            return Err(HaloError::Config("rate limit window must be positive".into()));
        }
        Ok(Self {
            points,
            window_secs,
            block_secs,
            fallback_retry_secs,
        })
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Default policy for a bucket.
    pub const fn default_for(bucket: Bucket) -> Self {
        let (points, window_secs, block_secs, fallback_retry_secs) = match bucket {
            Bucket::General => (100, 900, 900, 60),
            Bucket::Auth => (5, 900, 3600, 3600),
            Bucket::Upload => (10, 3600, 1800, 1800),
            Bucket::Search => (30, 300, 600, 600),
            Bucket::User => (1000, 3600, 1800, 1800),
        };
        Self {
            points,
            window_secs,
            block_secs,
            fallback_retry_secs,
        }
    }
}

/// The full bucket-to-policy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    general: RateLimitPolicy,
    auth: RateLimitPolicy,
    upload: RateLimitPolicy,
    search: RateLimitPolicy,
    user: RateLimitPolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            general: RateLimitPolicy::default_for(Bucket::General),
            auth: RateLimitPolicy::default_for(Bucket::Auth),
            upload: RateLimitPolicy::default_for(Bucket::Upload),
            search: RateLimitPolicy::default_for(Bucket::Search),
            user: RateLimitPolicy::default_for(Bucket::User),
        }
    }
}

impl PolicyTable {
    /// Default table with the general bucket's points and window overridden.
    pub fn with_general(points: u64, window_secs: u64) -> Result<Self> {
        let defaults = RateLimitPolicy::default_for(Bucket::General);
        let general = RateLimitPolicy::new(
            points,
            window_secs,
            defaults.block_secs,
            defaults.fallback_retry_secs,
        )?;
        Ok(Self {
            general,
            ..Self::default()
        })
    }

    /// Replace a single bucket's policy. Mostly useful for tests that need
    /// small limits on a fixed bucket.
    pub fn with_policy(mut self, bucket: Bucket, policy: RateLimitPolicy) -> Self {
        *self.slot_mut(bucket) = policy;
        self
    }

    pub fn get(&self, bucket: Bucket) -> &RateLimitPolicy {
        match bucket {
            Bucket::General => &self.general,
            Bucket::Auth => &self.auth,
            Bucket::Upload => &self.upload,
            Bucket::Search => &self.search,
            Bucket::User => &self.user,
        }
    }

    fn slot_mut(&mut self, bucket: Bucket) -> &mut RateLimitPolicy {
        match bucket {
            Bucket::General => &mut self.general,
            Bucket::Auth => &mut self.auth,
            Bucket::Upload => &mut self.upload,
            Bucket::Search => &mut self.search,
            Bucket::User => &mut self.user,
        }
    }
}
