//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! option construction (including the last will) and reconnection backoff.

use crate::config::MqttSection;
use crate::protocol::{LifecycleStatus, TopicSet};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for MQTT client
///
/// Owned by the client; everything else only observes it.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No session, with the reason the last one ended
    Disconnected(String),
    /// Waiting for ConnAck (initial connect or a reconnection attempt)
    Connecting,
    /// Session established, control topic subscribed
    Connected,
    /// Clean shutdown in progress
    Disconnecting,
    /// Reconnection gave up; the supervisor has stopped for good
    Failed(String),
}

impl ConnectionState {
    /// True once no further reconnection will be attempted
    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, ConnectionState::Failed(_))
    }
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![500, 1000, 2000, 5000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Calculate backoff delay for given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Publishing to {topic} timed out after {timeout_ms}ms")]
    PublishTimeout { topic: String, timeout_ms: u64 },
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Build the retained offline announcement the broker publishes if we vanish
pub fn build_last_will(device_id: &str, topics: &TopicSet) -> Result<LastWill, MqttError> {
    let payload = serde_json::to_vec(&LifecycleStatus::offline(device_id))
        .map_err(MqttError::SerializationError)?;
    Ok(LastWill::new(
        &topics.status,
        payload,
        QoS::AtLeastOnce,
        true,
        None,
    ))
}

/// Client ID used by every session of one device
///
/// Stable across reconnects: a new session takes over a half-open old one,
/// and the broker publishes the old session's will before acknowledging the
/// new connection, so the retained `offline` can never land after `online`.
pub fn client_id_for(device_id: &str) -> String {
    format!("farm-{device_id}")
}

/// Pure function to configure MQTT options from config
///
/// Called once per session attempt so every attempt gets a last will
/// stamped with the current time.
pub fn configure_mqtt_options(
    device_id: &str,
    topics: &TopicSet,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(config.broker_url.clone())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(client_id_for(device_id), host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keepalive_secs));
    // Base64 images are far larger than the 10KB broker default
    mqtt_options.set_max_packet_size(Some(4 * 1024 * 1024));
    mqtt_options.set_last_will(build_last_will(device_id, topics)?);

    Ok(mqtt_options)
}
