//! HTTP adapter: routes, rate limiting middleware and server.

mod middleware;
mod response;
mod routes;
mod server;

pub use middleware::{
    enforce_rate_limit, RateLimitState, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use response::ApiError;
pub use routes::{router, WELCOME_MESSAGE};
pub use server::HttpServer;
