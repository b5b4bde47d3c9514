//! Counter key generation.

use super::rules::Bucket;

/// Identifies one counter: a bucket paired with a client identity.
///
/// Counters in different buckets never share state, even for the same
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The bucket whose policy governs this counter
    pub bucket: Bucket,
    /// Client identity (IP address or user id)
    pub identity: String,
}

impl CounterKey {
    pub fn new(bucket: Bucket, identity: impl Into<String>) -> Self {
        Self {
            bucket,
            identity: identity.into(),
        }
    }

    /// Key string used in external stores, e.g. `halo:ratelimit:auth:10.0.0.1`.
    pub fn storage_key(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self)
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.bucket, self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_key_display() {
        let key = CounterKey::new(Bucket::User, "42");
        assert_eq!(key.to_string(), "user:42");
    }

    #[test]
    fn test_storage_key_prefix() {
        let key = CounterKey::new(Bucket::Auth, "10.0.0.1");
        assert_eq!(key.storage_key("halo:ratelimit:"), "halo:ratelimit:auth:10.0.0.1");
    }

    #[test]
    fn test_buckets_distinguish_keys() {
        let general = CounterKey::new(Bucket::General, "1.2.3.4");
        let search = CounterKey::new(Bucket::Search, "1.2.3.4");

        assert_ne!(general, search);
        assert_eq!(general, CounterKey::new(Bucket::General, "1.2.3.4"));
    }
}
