//! In-process counter store.
//!
//! Keeps fixed-window counters in a [`DashMap`]. The map's per-entry lock is
//! held for the whole transaction, so the init/increment/ttl sequence is
//! atomic per key. Counters are only shared within one process; use the
//! Redis store when several instances must enforce one budget.
//!
//! Expired counters are dropped every [`PURGE_INTERVAL`] hits so that a
//! stream of distinct identities cannot grow the map without bound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::backend::{CounterStore, WindowHit};
use crate::error::StoreError;

/// Purge expired counters every N hits.
pub const PURGE_INTERVAL: u64 = 1000;

/// A counter with the instant its window expires.
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    expires_at: Instant,
}

impl WindowCounter {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            expires_at: now + window,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Counter store that lives in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, WindowCounter>,
    /// Hits since creation, drives periodic purging
    hits: AtomicU64,
}

impl InMemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of counters currently held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop every counter whose window has ended.
    ///
    /// Returns the number of counters removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now));
        before.saturating_sub(self.counters.len())
    }
}

/// Whole seconds, rounded to the nearest second the way Redis reports `TTL`.
fn ttl_secs(remaining: Duration) -> u64 {
    (remaining.as_millis() as u64 + 500) / 1000
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, StoreError> {
        let now = Instant::now();

        // The entry guard must be released before purging, which locks every shard.
        let hit = {
            let mut counter = self
                .counters
                .entry(key.to_string())
                .or_insert_with(|| WindowCounter::fresh(now, window));

            if counter.is_expired(now) {
                trace!(key = %key, "Window expired, starting a new one");
                *counter = WindowCounter::fresh(now, window);
            }

            counter.count += 1;

            WindowHit {
                count: counter.count,
                ttl_secs: ttl_secs(counter.expires_at.saturating_duration_since(now)),
            }
        };

        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        if hits % PURGE_INTERVAL == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged = purged, remaining = self.len(), "Purged expired counters");
            }
        }

        Ok(hit)
    }
}
