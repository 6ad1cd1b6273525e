//! Rate limiting logic and counter stores.

mod backend;
mod identity;
mod limiter;
mod memory;
mod redis_store;
mod rules;

pub use backend::{CounterStore, WindowHit};
pub use identity::{Identity, DEFAULT_IDENTITY, IDENTITY_HEADER, KEY_PREFIX};
pub use limiter::{Decision, RateLimiter, DEFAULT_STORE_TIMEOUT};
pub use memory::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use rules::{Policy, PolicyTable};
