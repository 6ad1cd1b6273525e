//! Redis-backed counter store.
//!
//! The window transaction is sent as a single `MULTI`/`EXEC` block:
//!
//! ```text
//! SET <key> 0 NX PX <window_ms>
//! INCR <key>
//! TTL <key>
//! ```
//!
//! Redis executes the block without interleaving commands from other
//! clients, so concurrent requests for the same identity always observe
//! distinct, strictly increasing counts. The `NX` flag keeps an in-progress
//! window from being reset, and only the first request of a window sets its
//! expiry.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tracing::warn;

use super::backend::{CounterStore, WindowHit};
use crate::error::StoreError;

/// Counter store shared by every instance connected to the same Redis server.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    url: String,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1:6379/0")
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, StoreError> {
        let mut conn = self.connection.clone();

        let (count, ttl): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(0)
            .arg("NX")
            .arg("PX")
            .arg(window.as_millis() as u64)
            .ignore()
            .cmd("INCR")
            .arg(key)
            .cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        // -1 means the key has no expiry, which would lock the identity out
        // forever; report it so an operator can delete the key.
        if ttl < 0 {
            warn!(key = %key, ttl = ttl, "Counter has no expiry");
        }

        Ok(WindowHit {
            count,
            ttl_secs: ttl.max(0) as u64,
        })
    }
}
