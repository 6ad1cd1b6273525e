//! Identity extraction and counter key generation.

use axum::http::HeaderMap;

/// Header carrying the caller's identity.
pub const IDENTITY_HEADER: &str = "x-user-id";

/// Identity used for requests that carry no identity header.
///
/// All such requests share one bucket.
pub const DEFAULT_IDENTITY: &str = "default";

/// Prefix of every counter key in the shared store.
pub const KEY_PREFIX: &str = "rate-limiter:";

/// The key whose request rate is tracked independently of other identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Create an identity from a raw value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The shared identity for unlabeled traffic.
    pub fn default_bucket() -> Self {
        Self(DEFAULT_IDENTITY.to_string())
    }

    /// Extract the identity from request headers.
    ///
    /// A missing or empty header value falls back to [`DEFAULT_IDENTITY`].
    /// Non-ASCII bytes are kept; invalid UTF-8 is replaced lossily.
    pub fn from_headers(headers: &HeaderMap, header_name: &str) -> Self {
        headers
            .get(header_name)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .filter(|value| !value.is_empty())
            .map(Self::new)
            .unwrap_or_else(Self::default_bucket)
    }

    /// Get the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the shared default bucket.
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_IDENTITY
    }

    /// Build the counter key for this identity.
    pub fn counter_key(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
