//! Transport layer for broker communication
//!
//! This module provides the transport abstraction the agent components are
//! written against, and its MQTT implementation.

use crate::protocol::CommandEnvelope;
use std::fmt;

pub mod mqtt;

pub use mqtt::ConnectionState;

/// Delivery guarantee requested for one publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryGuarantee {
    /// May be lost; used for high-frequency telemetry
    AtMostOnce,
    /// Retried until acknowledged; may arrive more than once
    AtLeastOnce,
}

impl fmt::Display for DeliveryGuarantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryGuarantee::AtMostOnce => f.write_str("at-most-once"),
            DeliveryGuarantee::AtLeastOnce => f.write_str("at-least-once"),
        }
    }
}

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the broker session so the
/// telemetry, dispatch and shutdown components can be tested with fakes.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish the session, subscribe the control topic and announce online
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Announce offline and close the session; safe to call repeatedly
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Publish a payload; fails without side effects unless connected
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
        retain: bool,
    ) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Set the sender that receives parsed control messages
    fn set_command_sender(&self, sender: tokio::sync::mpsc::Sender<CommandEnvelope>);
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
