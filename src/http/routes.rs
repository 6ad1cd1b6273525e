//! Application routes.

use axum::{middleware, response::IntoResponse, routing::get, Router};

use super::middleware::{enforce_rate_limit, RateLimitState};
use super::response::ApiError;
use crate::ratelimit::CounterStore;

/// Body of the welcome route.
pub const WELCOME_MESSAGE: &str = "Welcome to the Tollgate rate limiter!";

/// Build the application router.
///
/// The rate limiter wraps every route, including the fallback, so unmatched
/// paths still count against the caller's budget.
pub fn router<S: CounterStore + 'static>(state: RateLimitState<S>) -> Router {
    Router::new()
        .route("/", get(welcome))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state, enforce_rate_limit::<S>))
}

async fn welcome() -> &'static str {
    WELCOME_MESSAGE
}

async fn not_found() -> impl IntoResponse {
    ApiError::NotFound
}
