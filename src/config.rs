//! Configuration management for Tollgate.
//!
//! Configuration is read once at startup from an optional YAML file and then
//! overridden by `TOLLGATE__<SECTION>__<KEY>` environment variables, e.g.
//! `TOLLGATE__STORE__HOST=redis.internal`. It is never reloaded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{Policy, PolicyTable, IDENTITY_HEADER, KEY_PREFIX};

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    #[default]
    Redis,
    /// Process-local counters
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis host
    #[serde(default = "default_store_host")]
    pub host: String,

    /// Redis port
    #[serde(default = "default_store_port")]
    pub port: u16,

    /// Redis logical database
    #[serde(default)]
    pub db: u32,

    /// Upper bound on one counter transaction in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix of every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            host: default_store_host(),
            port: default_store_port(),
            db: 0,
            timeout_ms: default_store_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl StoreConfig {
    /// Redis connection URL for this configuration.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    /// Store transaction timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_host() -> String {
    "localhost".to_string()
}

fn default_store_port() -> u16 {
    6379
}

fn default_store_timeout_ms() -> u64 {
    1000
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Request header carrying the caller's identity
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// Path to a YAML policy table; replaces the inline policies when set
    #[serde(default)]
    pub policies_path: Option<String>,

    /// Policy for identities without an override
    #[serde(default)]
    pub default_policy: Policy,

    /// Identity-specific overrides
    #[serde(default)]
    pub user_policies: HashMap<String, Policy>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        let table = PolicyTable::default();
        Self {
            identity_header: default_identity_header(),
            policies_path: None,
            default_policy: table.default_policy,
            user_policies: table.user_policies,
        }
    }
}

impl RateLimitingConfig {
    /// Build the validated policy table.
    pub fn policy_table(&self) -> Result<PolicyTable> {
        if let Some(path) = &self.policies_path {
            return PolicyTable::from_file(path);
        }

        let table = PolicyTable {
            default_policy: self.default_policy,
            user_policies: self.user_policies.clone(),
        };
        table.validate()?;
        Ok(table)
    }
}

fn default_identity_header() -> String {
    IDENTITY_HEADER.to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Just the `rate_limiting.user_policies` section of a config file.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    rate_limiting: RawRateLimiting,
}

#[derive(Debug, Default, Deserialize)]
struct RawRateLimiting {
    #[serde(default)]
    user_policies: Option<HashMap<String, Policy>>,
}

/// Read the identity overrides of a config file with their keys untouched.
fn raw_user_policies(path: &str) -> Result<Option<HashMap<String, Policy>>> {
    let contents = std::fs::read_to_string(path)?;
    let raw: Option<RawConfig> =
        serde_yaml::from_str(&contents).map_err(|e| TollgateError::Config(e.to_string()))?;
    Ok(raw.and_then(|raw| raw.rate_limiting.user_policies))
}

impl TollgateConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: TollgateConfig = config.try_deserialize()?;

        // The config crate lowercases map keys; identities are case-sensitive.
        if let Some(path) = path.filter(|p| Path::new(p).is_file()) {
            if let Some(user_policies) = raw_user_policies(path)? {
                config.rate_limiting.user_policies = user_policies;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig =
            serde_yaml::from_str(yaml).map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.store.timeout_ms == 0 {
            return Err(TollgateError::Config(
                "store.timeout_ms must be positive".to_string(),
            ));
        }
        if self.rate_limiting.identity_header.is_empty() {
            return Err(TollgateError::Config(
                "rate_limiting.identity_header must not be empty".to_string(),
            ));
        }
        if self.rate_limiting.policies_path.is_none() {
            self.rate_limiting.policy_table()?;
        }
        Ok(())
    }
}
