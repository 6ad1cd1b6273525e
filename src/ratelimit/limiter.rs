//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::backend::CounterStore;
use super::identity::{Identity, KEY_PREFIX};
use super::rules::{Policy, PolicyTable};
use crate::error::StoreError;

/// Default upper bound on one counter store transaction.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Outcome of a rate limit evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is within budget.
    Allow {
        /// Maximum requests in the window
        limit: u64,
        /// Requests left in the window after this one
        remaining: u64,
        /// When the window ends, in milliseconds since the Unix epoch
        reset_at_ms: i64,
    },
    /// The request exceeds the budget.
    Deny {
        /// Maximum requests in the window
        limit: u64,
        /// Seconds until the window ends
        retry_after_secs: u64,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// The rate decision engine.
///
/// Holds no mutable state of its own: every count lives in the counter store,
/// so one limiter can be shared across all in-flight requests.
pub struct RateLimiter<S: CounterStore> {
    /// Shared window counters
    store: Arc<S>,
    /// Per-identity budgets
    policies: PolicyTable,
    /// Prefix of every counter key
    key_prefix: String,
    /// Upper bound on one store transaction
    store_timeout: Duration,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a new rate limiter with the default key prefix and timeout.
    pub fn new(store: Arc<S>, policies: PolicyTable) -> Self {
        Self {
            store,
            policies,
            key_prefix: KEY_PREFIX.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the counter key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the upper bound on one store transaction.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Get the policy table.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Get the counter store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolve the identity's policy and evaluate the request against it.
    pub async fn check(&self, identity: &Identity) -> Result<Decision, StoreError> {
        let policy = *self.policies.lookup(identity.as_str());
        self.evaluate(identity, &policy).await
    }

    /// Count one request for `identity` and decide whether it is within `policy`.
    ///
    /// Fails with [`StoreError`] when the store transaction fails or does not
    /// finish within the store timeout; no decision is produced in that case.
    pub async fn evaluate(
        &self,
        identity: &Identity,
        policy: &Policy,
    ) -> Result<Decision, StoreError> {
        let key = identity.counter_key(&self.key_prefix);

        trace!(
            key = %key,
            window_ms = policy.window_ms,
            max_requests = policy.max_requests,
            "Checking rate limit"
        );

        let hit = tokio::time::timeout(self.store_timeout, self.store.hit(&key, policy.window()))
            .await
            .map_err(|_| StoreError::Timeout(self.store_timeout))??;

        if hit.count > policy.max_requests {
            info!(
                identity = %identity,
                requests = hit.count,
                limit = policy.max_requests,
                "Rate limit exceeded"
            );
            return Ok(Decision::Deny {
                limit: policy.max_requests,
                retry_after_secs: hit.ttl_secs,
            });
        }

        let reset_at_ms = chrono::Utc::now().timestamp_millis() + (hit.ttl_secs as i64) * 1000;

        debug!(
            identity = %identity,
            requests = hit.count,
            ttl = hit.ttl_secs,
            "Request within rate limit"
        );

        Ok(Decision::Allow {
            limit: policy.max_requests,
            remaining: policy.max_requests - hit.count,
            reset_at_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::backend::WindowHit;
    use crate::ratelimit::memory::InMemoryCounterStore;
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn hit(&self, _key: &str, _window: Duration) -> Result<WindowHit, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn hit(&self, _key: &str, _window: Duration) -> Result<WindowHit, StoreError> {
            std::future::pending().await
        }
    }

    fn policy(window_secs: u64, max_requests: u64) -> Policy {
        Policy::new(Duration::from_secs(window_secs), max_requests)
    }

    fn memory_limiter(policies: PolicyTable) -> RateLimiter<InMemoryCounterStore> {
        RateLimiter::new(Arc::new(InMemoryCounterStore::new()), policies)
    }

    #[tokio::test(start_paused = true)]
    async fn test_example_scenario() {
        let limiter = memory_limiter(PolicyTable::new(policy(60, 100)));
        let alice = Identity::new("alice");
        let budget = policy(60, 2);

        match assert_ok!(limiter.evaluate(&alice, &budget).await) {
            Decision::Allow { limit, remaining, .. } => {
                assert_eq!(limit, 2);
                assert_eq!(remaining, 1);
            }
            other => panic!("expected allow, got {:?}", other),
        }

        match assert_ok!(limiter.evaluate(&alice, &budget).await) {
            Decision::Allow { remaining, .. } => assert_eq!(remaining, 0),
            other => panic!("expected allow, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(15)).await;

        let decision = assert_ok!(limiter.evaluate(&alice, &budget).await);
        assert_eq!(
            decision,
            Decision::Deny {
                limit: 2,
                retry_after_secs: 45
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_in_window() {
        let limiter = memory_limiter(PolicyTable::new(policy(60, 10)));

        let decision = assert_ok!(limiter.check(&Identity::new("fresh")).await);
        match decision {
            Decision::Allow { limit, remaining, .. } => {
                assert_eq!(limit, 10);
                assert_eq!(remaining, 9);
            }
            other => panic!("expected allow, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_is_inclusive() {
        let limiter = memory_limiter(PolicyTable::new(policy(60, 5)));
        let identity = Identity::new("bob");

        let mut last_remaining = u64::MAX;
        for _ in 0..5 {
            match assert_ok!(limiter.check(&identity).await) {
                Decision::Allow { remaining, .. } => {
                    assert!(remaining < last_remaining);
                    last_remaining = remaining;
                }
                other => panic!("expected allow, got {:?}", other),
            }
        }
        assert_eq!(last_remaining, 0);

        let decision = assert_ok!(limiter.check(&identity).await);
        assert!(!decision.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_within_window() {
        let limiter = memory_limiter(PolicyTable::new(policy(30, 1)));
        let identity = Identity::new("carol");

        assert_ok!(limiter.check(&identity).await);
        tokio::time::advance(Duration::from_secs(10)).await;

        match assert_ok!(limiter.check(&identity).await) {
            Decision::Deny { retry_after_secs, .. } => {
                assert!(retry_after_secs <= 30);
                assert_eq!(retry_after_secs, 20);
            }
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_count() {
        let limiter = memory_limiter(PolicyTable::new(policy(60, 2)));
        let identity = Identity::new("dave");

        for _ in 0..6 {
            assert_ok!(limiter.check(&identity).await);
        }
        assert!(!assert_ok!(limiter.check(&identity).await).is_allowed());

        tokio::time::advance(Duration::from_secs(61)).await;

        match assert_ok!(limiter.check(&identity).await) {
            Decision::Allow { remaining, .. } => assert_eq!(remaining, 1),
            other => panic!("expected allow, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_uses_identity_policy() {
        let policies = PolicyTable::new(policy(60, 100)).with_policy("vip", policy(60, 1));
        let limiter = memory_limiter(policies);

        let vip = Identity::new("vip");
        assert!(assert_ok!(limiter.check(&vip).await).is_allowed());
        assert!(!assert_ok!(limiter.check(&vip).await).is_allowed());

        let other = Identity::new("someone");
        match assert_ok!(limiter.check(&other).await) {
            Decision::Allow { limit, .. } => assert_eq!(limit, 100),
            other => panic!("expected allow, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_identities_have_separate_counters() {
        let limiter = memory_limiter(PolicyTable::new(policy(60, 1)));

        assert!(assert_ok!(limiter.check(&Identity::new("a")).await).is_allowed());
        assert!(assert_ok!(limiter.check(&Identity::new("b")).await).is_allowed());
        assert!(assert_ok!(limiter.check(&Identity::default_bucket()).await).is_allowed());
        assert!(!assert_ok!(limiter.check(&Identity::new("a")).await).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_key_prefix() {
        let store = Arc::new(InMemoryCounterStore::new());
        let limiter = RateLimiter::new(store.clone(), PolicyTable::new(policy(60, 1)))
            .with_key_prefix("tenant-a:");

        assert_ok!(limiter.check(&Identity::new("alice")).await);

        let hit = store.hit("tenant-a:alice", Duration::from_secs(60)).await.unwrap();
        assert_eq!(hit.count, 2);
    }

    #[tokio::test]
    async fn test_reset_time_is_in_the_future() {
        let limiter = memory_limiter(PolicyTable::new(policy(60, 10)));

        let before = chrono::Utc::now().timestamp_millis();
        let decision = assert_ok!(limiter.check(&Identity::new("erin")).await);
        let after = chrono::Utc::now().timestamp_millis();

        match decision {
            Decision::Allow { reset_at_ms, .. } => {
                assert!(reset_at_ms >= before + 59_000);
                assert!(reset_at_ms <= after + 60_000);
            }
            other => panic!("expected allow, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_error() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), PolicyTable::default());

        let result = limiter.check(&Identity::new("alice")).await;
        assert!(matches!(assert_err!(result), StoreError::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_surfaces_error() {
        let limiter = RateLimiter::new(Arc::new(HangingStore), PolicyTable::default())
            .with_store_timeout(Duration::from_millis(250));

        let result = limiter.check(&Identity::new("alice")).await;
        match result {
            Err(StoreError::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(250)),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_respect_budget() {
        let limiter = Arc::new(memory_limiter(PolicyTable::new(policy(60, 10))));

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check(&Identity::new("burst")).await })
            })
            .collect();

        let mut allowed = 0;
        let mut remaining_seen = Vec::new();
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                Decision::Allow { remaining, .. } => {
                    allowed += 1;
                    remaining_seen.push(remaining);
                }
                Decision::Deny { .. } => {}
            }
        }

        remaining_seen.sort_unstable();
        assert_eq!(allowed, 10);
        assert_eq!(remaining_seen, (0..10).collect::<Vec<u64>>());
    }
}
