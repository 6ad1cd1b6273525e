//! Tollgate - HTTP Request Rate Limiting Service
//!
//! This crate implements fixed-window rate limiting for HTTP services. Each
//! request is attributed to an identity taken from a request header, counted
//! in a shared counter store (Redis in production) and either let through
//! with `X-RateLimit-*` headers or rejected with `429 Too Many Requests`.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
