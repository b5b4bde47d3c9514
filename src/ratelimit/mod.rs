//! Rate limiting logic and counter storage.

mod backend;
mod clock;
mod counter;
mod distributed;
mod key;
mod limiter;
mod memory;
mod rules;

pub use backend::{select_store, CounterStore};
pub use clock::{Clock, MockClock, SystemClock};
pub use counter::{ConsumeOutcome, CounterRecord, CounterSnapshot};
pub use distributed::{RedisStore, KEY_PREFIX};
pub use key::CounterKey;
pub use limiter::RateLimiter;
pub use memory::{spawn_purge_task, MemoryStore};
pub use rules::{Bucket, PolicyTable, RateLimitPolicy};
