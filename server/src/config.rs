//! Runtime configuration loaded from `config/runtime.json`.
//!
//! Every field has a default, so a missing file section (or an empty `{}`
//! document) yields the stock configuration. Command-line flags are applied
//! on top by the binary.

use crate::host::HostConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::net::lookup_host;

pub const DEFAULT_CONFIG_PATH: &str = "config/runtime.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to resolve host {host:?}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7777,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_connections: usize,
    pub max_msgs_per_sec: u32,
    pub max_bytes_per_sec: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            max_msgs_per_sec: 60,
            max_bytes_per_sec: 64 * 1024,
        }
    }
}

/// All values in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub handshake_ms: u64,
    pub idle_read_ms: u64,
    pub write_ms: u64,
    pub drain_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            handshake_ms: 2_000,
            idle_read_ms: 30_000,
            write_ms: 5_000,
            drain_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub snapshot_enabled: bool,
    pub snapshot_interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            snapshot_enabled: true,
            snapshot_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub network: NetworkConfig,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutsConfig,
    pub metrics: MetricsConfig,
}

impl RuntimeConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RuntimeConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.check_port()?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`RuntimeConfig::load`], but falls back to defaults when the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Checks values that have no sensible interpretation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.host.trim().is_empty() {
            return Err(ConfigError::Invalid("network.host must not be empty".to_string()));
        }

        if self.limits.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_connections must be at least 1".to_string(),
            ));
        }

        let timeouts = [
            ("timeouts.handshake_ms", self.timeouts.handshake_ms),
            ("timeouts.idle_read_ms", self.timeouts.idle_read_ms),
            ("timeouts.write_ms", self.timeouts.write_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }

        if self.metrics.snapshot_enabled && self.metrics.snapshot_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "metrics.snapshot_interval_ms must be positive when snapshots are enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Rejects port 0, which only makes sense for ephemeral test hosts.
    pub fn check_port(&self) -> Result<(), ConfigError> {
        if self.network.port == 0 {
            return Err(ConfigError::Invalid(
                "network.port must be within 1..=65535".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves `network.host` to a socket address.
    ///
    /// IP literals are used as is. Anything else goes through DNS, and an
    /// IPv4 result is preferred over IPv6.
    pub async fn resolve_bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = self.network.host.trim();
        let port = self.network.port;
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        let resolved: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|source| ConfigError::Resolve {
                host: host.to_string(),
                source,
            })?
            .collect();
        resolved
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| resolved.first())
            .copied()
            .ok_or_else(|| {
                ConfigError::Invalid(format!("network.host {:?} resolved to no address", host))
            })
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.metrics.snapshot_interval_ms)
    }

    pub async fn to_host_config(&self) -> Result<HostConfig, ConfigError> {
        Ok(HostConfig {
            bind_addr: self.resolve_bind_addr().await?,
            handshake_timeout: Duration::from_millis(self.timeouts.handshake_ms),
            idle_timeout: Duration::from_millis(self.timeouts.idle_read_ms),
            write_timeout: Duration::from_millis(self.timeouts.write_ms),
            drain_timeout: Duration::from_millis(self.timeouts.drain_ms),
            max_connections: self.limits.max_connections,
            max_msgs_per_sec: self.limits.max_msgs_per_sec,
            max_bytes_per_sec: self.limits.max_bytes_per_sec,
        })
    }
}
