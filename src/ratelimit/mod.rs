//! Rate limiting logic and counter storage.

mod backend;
mod counter;
mod key;
mod limiter;
mod memory;
mod redis_store;

pub use backend::CounterStore;
pub use counter::CounterRecord;
pub use key::RateKey;
pub use limiter::{LimitSettings, RateLimiter};
pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreOptions};
