//! MQTT client implementation for the farm device agent
//!
//! This module provides a decomposed MQTT client implementation that
//! separates pure functions from I/O operations for better testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, options and last will
//! - [`message_handler`] - Pure message routing and processing logic
//! - [`health_monitor`] - Pure reconnection decisions and state transitions
//! - [`client`] - Impure I/O operations and the session supervisor
//!
//! # Usage
//!
//! ```rust,no_run
//! use farm_agent::config::AgentConfig;
//! use farm_agent::protocol::TopicSet;
//! use farm_agent::transport::mqtt::MqttClient;
//! use std::path::Path;
//!
//! # tokio_test::block_on(async {
//! let config = AgentConfig::load_from_file(Path::new("farm-agent.toml"))?;
//! let topics = TopicSet::for_device(&config.device.topic_root, &config.device.id);
//!
//! let mut client = MqttClient::new(&config.device.id, topics, config.mqtt.clone())?;
//! client.connect().await?;
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{
    build_last_will, client_id_for, configure_mqtt_options, ConnectionState, MqttError,
    ReconnectConfig,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
