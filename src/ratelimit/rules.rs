//! Rate limit policies and per-identity policy lookup.
//!
//! A [`PolicyTable`] maps identities to their own [`Policy`] and falls back to
//! a single default policy for every identity it does not know about. The
//! table is built once at startup and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};

/// A request budget: at most `max_requests` within a window of `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Length of the counting window in milliseconds
    pub window_ms: u64,
    /// Maximum requests permitted in the window
    pub max_requests: u64,
}

impl Policy {
    /// Create a new policy.
    pub fn new(window: Duration, max_requests: u64) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            max_requests,
        }
    }

    /// Get the window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    fn validate(&self, owner: &str) -> Result<()> {
        if self.window_ms == 0 {
            return Err(TollgateError::Config(format!(
                "policy for {} has a zero window_ms",
                owner
            )));
        }
        if self.max_requests == 0 {
            return Err(TollgateError::Config(format!(
                "policy for {} has a zero max_requests",
                owner
            )));
        }
        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
        }
    }
}

fn default_window_ms() -> u64 {
    60 * 1000
}

fn default_max_requests() -> u64 {
    100
}

/// Mapping from identity to policy, with a default for unmapped identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Policy applied to every identity without its own entry
    #[serde(default)]
    pub default_policy: Policy,

    /// Identity-specific overrides
    #[serde(default)]
    pub user_policies: HashMap<String, Policy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut user_policies = HashMap::new();
        user_policies.insert(
            "user123".to_string(),
            Policy {
                window_ms: 60 * 1000,
                max_requests: 50,
            },
        );

        Self {
            default_policy: Policy::default(),
            user_policies,
        }
    }
}

impl PolicyTable {
    /// Create a table with only a default policy.
    pub fn new(default_policy: Policy) -> Self {
        Self {
            default_policy,
            user_policies: HashMap::new(),
        }
    }

    /// Add an identity-specific policy.
    pub fn with_policy(mut self, identity: impl Into<String>, policy: Policy) -> Self {
        self.user_policies.insert(identity.into(), policy);
        self
    }

    /// Load a policy table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: PolicyTable = serde_yaml::from_str(yaml).map_err(|e| {
            TollgateError::Config(format!("Failed to parse rate limit policies: {}", e))
        })?;
        table.validate()?;
        Ok(table)
    }

    /// Reject policies that could never admit a request or never expire.
    pub fn validate(&self) -> Result<()> {
        self.default_policy.validate("the default identity")?;
        for (identity, policy) in &self.user_policies {
            policy.validate(&format!("identity '{}'", identity))?;
        }
        Ok(())
    }

    /// Resolve the policy for an identity.
    pub fn lookup(&self, identity: &str) -> &Policy {
        self.user_policies
            .get(identity)
            .unwrap_or(&self.default_policy)
    }
}
