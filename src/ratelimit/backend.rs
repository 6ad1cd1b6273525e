//! Counter store trait for abstracting the shared window counters.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Outcome of one window transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Counter value after this request's increment
    pub count: u64,
    /// Remaining time-to-live of the window in whole seconds
    pub ttl_secs: u64,
}

/// Trait for shared counter store implementations.
///
/// This trait abstracts over the Redis-backed store used in production and
/// the in-memory store used by tests and single-instance deployments.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Run the window transaction for `key` as one indivisible unit:
    ///
    /// 1. create the counter at 0 with expiry `window`, unless it exists;
    /// 2. increment the counter by one;
    /// 3. read the counter's remaining time-to-live.
    ///
    /// No other increment of the same key may interleave with these steps.
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, StoreError>;
}
