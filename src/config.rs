//! Agent configuration loaded from TOML
//!
//! Broker address, device identity, topic root and timing all come from one
//! file. Credentials are never stored in the file itself: the file names the
//! environment variables that hold them, and they are resolved at connect time.

use crate::protocol::{validate_device_id, DEFAULT_TOPIC_ROOT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub camera: CameraSection,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// First topic level for every device topic
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
}

/// MQTT broker session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// MQTT keepalive in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// How long `connect` waits for the broker before reporting failure
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound for handing one publish to the session
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
    /// Exit at startup instead of running degraded when the broker is unreachable
    #[serde(default)]
    pub require_connection: bool,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Reconnection backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Delays for the first attempts, in milliseconds
    #[serde(default = "default_backoff")]
    pub backoff_ms: Vec<u64>,
    /// Delay used once `backoff_ms` is exhausted
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay_ms: u64,
    /// Give up after this many attempts (unset = retry forever)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff(),
            sustained_delay_ms: default_sustained_delay(),
            max_attempts: None,
        }
    }
}

/// Telemetry loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    /// Seconds between sensor publishes
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

/// Camera settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CameraSection {
    /// JPEG written by the camera tool; capture is unavailable when unset
    pub snapshot_path: Option<PathBuf>,
}

fn default_topic_root() -> String {
    DEFAULT_TOPIC_ROOT.to_string()
}

fn default_keepalive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_publish_timeout() -> u64 {
    2000
}

fn default_backoff() -> Vec<u64> {
    vec![500, 1000, 2000, 5000]
}

fn default_sustained_delay() -> u64 {
    5000
}

fn default_interval() -> u64 {
    5
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)
            .map_err(|e| ConfigError::InvalidDeviceId(format!("'{}': {e}", self.device.id)))?;

        if crate::protocol::canonicalize_topic(&self.device.topic_root).is_empty() {
            return Err(ConfigError::InvalidConfig(
                "device.topic_root must not be empty".to_string(),
            ));
        }
        if self
            .device
            .topic_root
            .chars()
            .any(|c| c == '+' || c == '#')
        {
            return Err(ConfigError::InvalidConfig(
                "device.topic_root must not contain MQTT wildcards".to_string(),
            ));
        }

        if self.telemetry.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "telemetry.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.keepalive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keepalive_secs must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.publish_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.publish_timeout_ms must be greater than 0".to_string(),
            ));
        }

        crate::transport::mqtt::HealthMonitor::validate_connection_config(
            &self.mqtt.reconnect_config(),
        )
        .map_err(ConfigError::InvalidConfig)?;

        Ok(())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        self.mqtt.username()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"

[mqtt]
broker_url = "mqtt://localhost:1883"

[telemetry]
interval_secs = 5
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

impl MqttSection {
    /// Resolve the username from its environment variable, if configured
    pub fn username(&self) -> Option<String> {
        self.username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    /// Resolve the password from its environment variable, if configured
    pub fn password(&self) -> Option<String> {
        self.password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    /// Reconnection policy derived from the `[mqtt.reconnect]` table
    pub fn reconnect_config(&self) -> crate::transport::mqtt::ReconnectConfig {
        crate::transport::mqtt::ReconnectConfig {
            max_attempts: self.reconnect.max_attempts,
            backoff_pattern: self.reconnect.backoff_ms.clone(),
            sustained_delay: self.reconnect.sustained_delay_ms,
        }
    }
}
