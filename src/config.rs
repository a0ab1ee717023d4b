//! Client configuration.
//!
//! The client never reads ambient state: a [`ClientConfig`] is built once in
//! the composition root (defaults, then an optional JSON file, then
//! environment overrides) and handed to the constructor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rpc::{ClientError, Endpoint};

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default delay between reconnect attempts in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

const ENV_ENDPOINT: &str = "CLUSTER_RPC_ENDPOINT";
const ENV_TIMEOUT_MS: &str = "CLUSTER_RPC_TIMEOUT_MS";
const ENV_METHOD_PREFIX: &str = "CLUSTER_RPC_METHOD_PREFIX";
const ENV_RECONNECT_INTERVAL_MS: &str = "CLUSTER_RPC_RECONNECT_INTERVAL_MS";
const ENV_MAX_RECONNECT_ATTEMPTS: &str = "CLUSTER_RPC_MAX_RECONNECT_ATTEMPTS";

/// Connection settings consumed by [`JsonRpcClient`](crate::rpc::JsonRpcClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Target endpoint (`ws://`, `wss://`, `http(s)://`, or `unix://`).
    pub endpoint: String,

    /// Per-call timeout in milliseconds.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,

    /// Prepended to every outgoing method name.
    pub method_prefix: String,

    /// Fixed delay between reconnect attempts in milliseconds.
    #[serde(rename = "reconnectInterval")]
    pub reconnect_interval_ms: u64,

    /// Reconnect attempts before giving up; 0 disables reconnection.
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            method_prefix: String::new(),
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_method_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.method_prefix = prefix.into();
        self
    }

    pub fn with_reconnect(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Whether an endpoint has been set at all.
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }

    /// Check the settings and parse the endpoint.
    pub fn validate(&self) -> Result<Endpoint, ClientError> {
        if self.timeout_ms == 0 {
            return Err(ClientError::Config {
                reason: "timeout must be greater than zero".into(),
            });
        }
        Endpoint::parse(&self.endpoint)
    }

    /// Load a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ClientError::Config {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&contents).map_err(|e| ClientError::Config {
            reason: format!("failed to parse {}: {}", path.display(), e),
        })
    }

    /// Apply `CLUSTER_RPC_*` environment overrides.
    pub fn apply_env(self) -> Result<Self, ClientError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.endpoint = endpoint;
        }
        if let Some(prefix) = lookup(ENV_METHOD_PREFIX) {
            self.method_prefix = prefix;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_MS) {
            self.timeout_ms = parse_number(ENV_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_RECONNECT_INTERVAL_MS) {
            self.reconnect_interval_ms = parse_number(ENV_RECONNECT_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_RECONNECT_ATTEMPTS) {
            self.max_reconnect_attempts = parse_number(ENV_MAX_RECONNECT_ATTEMPTS, &value)?;
        }
        Ok(self)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ClientError> {
    value.trim().parse().map_err(|_| ClientError::Config {
        reason: format!("{} must be a non-negative integer, got '{}'", key, value),
    })
}

/// Resolve the default config file location.
///
/// `<config_dir>/cluster-rpc/config.json`, e.g. `~/.config/cluster-rpc/config.json`
/// on Linux. Returns `None` when the platform has no config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cluster-rpc").join("config.json"))
}
