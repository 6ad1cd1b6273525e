//! Rate limiting middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, instrument};

use super::response::ApiError;
use crate::ratelimit::{CounterStore, Decision, Identity, RateLimiter};

/// Maximum requests in the current window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// End of the current window in milliseconds since the Unix epoch.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// State shared by every invocation of the middleware.
pub struct RateLimitState<S: CounterStore> {
    limiter: Arc<RateLimiter<S>>,
    identity_header: Arc<str>,
}

impl<S: CounterStore> RateLimitState<S> {
    /// Create middleware state reading identities from `identity_header`.
    pub fn new(limiter: Arc<RateLimiter<S>>, identity_header: &str) -> Self {
        Self {
            limiter,
            identity_header: Arc::from(identity_header),
        }
    }
}

impl<S: CounterStore> Clone for RateLimitState<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            identity_header: Arc::clone(&self.identity_header),
        }
    }
}

/// Enforce the caller's rate limit before running the rest of the stack.
///
/// Allowed requests get `X-RateLimit-*` headers on their response. Denied
/// requests get `429` with `Retry-After`. A counter store failure fails the
/// request with `500` rather than letting it through.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn enforce_rate_limit<S: CounterStore + 'static>(
    State(state): State<RateLimitState<S>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = Identity::from_headers(request.headers(), &state.identity_header);

    match state.limiter.check(&identity).await {
        Ok(Decision::Allow {
            limit,
            remaining,
            reset_at_ms,
        }) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at_ms));
            response
        }
        Ok(Decision::Deny {
            retry_after_secs, ..
        }) => ApiError::TooManyRequests { retry_after_secs }.into_response(),
        Err(err) => {
            error!(identity = %identity, error = %err, "Counter store transaction failed");
            ApiError::Internal.into_response()
        }
    }
}
