//! Error types for the Tollgate service.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Failure of the atomic window transaction against the counter store.
///
/// Every variant is treated the same way by the HTTP layer: the request is
/// failed with an internal error instead of being allowed or denied.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The Redis transaction failed (connectivity, protocol or server error).
    #[error("Redis transaction failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// The transaction did not complete within the configured timeout.
    #[error("Counter store transaction timed out after {0:?}")]
    Timeout(Duration),

    /// The store could not serve the transaction for another reason.
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
