//! Configuration loading and management

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default WebSocket endpoint; the subject id is appended as a path segment
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/api/v1/ws";

/// Largest tray or feed size accepted from configuration
pub const MAX_LIST_CAPACITY: usize = 10_000;

/// Rules governing automatic reconnection
///
/// The backoff is a fixed interval, not exponential. The running attempt
/// counter lives in the connection manager, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Retries allowed after a failure before the channel faults
    pub max_attempts: u32,

    /// Delay before each retry, in milliseconds
    pub interval_ms: u64,
}

impl ReconnectPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval_ms: 3_000,
        }
    }
}

/// Keep-alive settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Ping period while the connection is open, in milliseconds
    pub interval_ms: u64,

    /// If set, a ping left unanswered (no inbound frame at all) for this long
    /// is treated as an abnormal close. Off by default.
    pub pong_timeout_ms: Option<u64>,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn pong_timeout(&self) -> Option<Duration> {
        self.pong_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            pong_timeout_ms: None,
        }
    }
}

/// Complete configuration for the real-time channel
///
/// Every field has a default, so an empty YAML document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Base WebSocket endpoint (ws:// or wss://)
    pub endpoint: String,

    pub reconnect: ReconnectPolicy,

    pub heartbeat: HeartbeatConfig,

    /// Notifications kept by the tray
    pub tray_capacity: usize,

    /// Items kept by the activity feed
    pub feed_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            tray_capacity: 50,
            feed_capacity: 100,
        }
    }
}

impl ChannelConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty mapping
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and check the endpoint URL
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.endpoint).map_err(|e| ConfigError::Invalid {
            field: "endpoint",
            message: e.to_string(),
        })?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                message: format!("unsupported scheme '{}', expected ws or wss", url.scheme()),
            });
        }

        if url.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                message: "endpoint cannot take path segments".to_string(),
            });
        }

        Ok(url)
    }

    /// Validate every field
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_url()?;

        if self.reconnect.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reconnect.interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }

        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "heartbeat.interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }

        if self.heartbeat.pong_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "heartbeat.pong_timeout_ms",
                message: "must be greater than zero when set".to_string(),
            });
        }

        validate_capacity("tray_capacity", self.tray_capacity)?;
        validate_capacity("feed_capacity", self.feed_capacity)?;

        Ok(())
    }
}

fn validate_capacity(field: &'static str, capacity: usize) -> Result<(), ConfigError> {
    if capacity == 0 || capacity > MAX_LIST_CAPACITY {
        return Err(ConfigError::Invalid {
            field,
            message: format!("must be between 1 and {MAX_LIST_CAPACITY}, got {capacity}"),
        });
    }
    Ok(())
}
