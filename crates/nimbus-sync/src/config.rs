//! # Station Configuration
//!
//! Configuration for the station daemon.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     NIMBUS_CLOUD_URL=wss://telemetry.example.net/ingest                │
//! │     NIMBUS_BRIDGE_SOCKET=/run/nimbus/bridge.sock                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/nimbus-station/station.toml (Linux)                      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # station.toml
//! [device]
//! name = "Weather Station"
//!
//! [cloud]
//! url = "wss://telemetry.example.net/ingest"
//! connect_timeout_secs = 10
//! ack_timeout_secs = 30
//! report_lock_timeout_secs = 5
//!
//! [telemetry]
//! sample_interval_secs = 5
//!
//! [bridge]
//! socket_path = "/run/nimbus/bridge.sock"
//! reconnect_backoff_secs = 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::bridge::BridgeConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::TransportConfig;

// =============================================================================
// Device Settings
// =============================================================================

/// Settings describing this station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Human-readable station name.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Weather Station".to_string()
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Cloud Settings
// =============================================================================

/// Settings for the cloud telemetry endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    /// WebSocket URL of the telemetry endpoint.
    #[serde(default)]
    pub url: String,

    /// Connection + handshake timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long to wait for an Ack/Nack reply (seconds).
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,

    /// Bounded wait for the session slot on the configuration-report path
    /// (seconds). The telemetry path never waits at all.
    #[serde(default = "default_report_lock_timeout")]
    pub report_lock_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_ack_timeout() -> u64 {
    30
}
fn default_report_lock_timeout() -> u64 {
    5
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            url: String::new(),
            connect_timeout_secs: default_connect_timeout(),
            ack_timeout_secs: default_ack_timeout(),
            report_lock_timeout_secs: default_report_lock_timeout(),
        }
    }
}

// =============================================================================
// Telemetry Settings
// =============================================================================

/// Settings for the sampling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Interval between sensor samples (seconds).
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,
}

fn default_sample_interval() -> u64 {
    5
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        TelemetrySettings {
            sample_interval_secs: default_sample_interval(),
        }
    }
}

// =============================================================================
// Bridge Settings
// =============================================================================

/// Settings for the local bridge socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Path of the Unix domain socket the foreground process listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Fixed delay between reconnection attempts (seconds).
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/nimbus/bridge.sock")
}
fn default_reconnect_backoff() -> u64 {
    10
}

impl Default for BridgeSettings {
    fn default() -> Self {
        BridgeSettings {
            socket_path: default_socket_path(),
            reconnect_backoff_secs: default_reconnect_backoff(),
        }
    }
}

// =============================================================================
// Main Station Configuration
// =============================================================================

/// Complete station configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station identity settings.
    #[serde(default)]
    pub device: DeviceSettings,

    /// Cloud endpoint settings.
    #[serde(default)]
    pub cloud: CloudSettings,

    /// Sampling loop settings.
    #[serde(default)]
    pub telemetry: TelemetrySettings,

    /// Local bridge settings.
    #[serde(default)]
    pub bridge: BridgeSettings,
}

impl StationConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (station.toml)
    /// 3. Environment variables
    ///
    /// Validation is a separate step so the daemon can layer command-line
    /// overrides on top before calling [`StationConfig::validate`].
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "loading station config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.cloud.url.is_empty() {
            return Err(SyncError::InvalidConfig(
                "cloud.url must be set (or NIMBUS_CLOUD_URL exported)".into(),
            ));
        }

        let url = url::Url::parse(&self.cloud.url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(SyncError::InvalidConfig(format!(
                "cloud.url must use ws:// or wss://, got: {}",
                self.cloud.url
            )));
        }

        if self.telemetry.sample_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "telemetry.sample_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("NIMBUS_CLOUD_URL") {
            debug!(url = %url, "overriding cloud URL from environment");
            self.cloud.url = url;
        }

        if let Ok(path) = std::env::var("NIMBUS_BRIDGE_SOCKET") {
            debug!(path = %path, "overriding bridge socket from environment");
            self.bridge.socket_path = PathBuf::from(path);
        }

        if let Ok(interval) = std::env::var("NIMBUS_SAMPLE_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.telemetry.sample_interval_secs = secs;
            }
        }

        if let Ok(name) = std::env::var("NIMBUS_DEVICE_NAME") {
            self.device.name = name;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("net", "nimbus", "nimbus-station")
            .map(|dirs| dirs.config_dir().join("station.toml"))
    }

    // =========================================================================
    // Convenience Accessors
    // =========================================================================

    /// Transport configuration derived from the cloud settings.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            url: self.cloud.url.clone(),
            connect_timeout: Duration::from_secs(self.cloud.connect_timeout_secs),
            ack_timeout: Duration::from_secs(self.cloud.ack_timeout_secs),
        }
    }

    /// Bridge configuration derived from the bridge settings.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            socket_path: self.bridge.socket_path.clone(),
            reconnect_backoff: Duration::from_secs(self.bridge.reconnect_backoff_secs),
        }
    }

    /// Interval between sensor samples.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry.sample_interval_secs)
    }

    /// Bounded wait for the session slot when reporting configuration.
    pub fn report_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud.report_lock_timeout_secs)
    }
}
