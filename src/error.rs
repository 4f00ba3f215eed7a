//! Error types for the farm device agent
//!
//! Each layer owns its own error enum; `AgentError` aggregates them along
//! the recoverable/fatal split the runtime cares about. Only `Startup` is
//! ever fatal to the process.

use crate::config::ConfigError;
use crate::hardware::HardwareError;
use crate::protocol::ProtocolError;
use thiserror::Error;

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// Connect, publish or subscribe failure; recoverable
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Malformed or unknown inbound message; dropped after logging
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Actuator control failure; never aborts sibling actuators
    #[error("Actuator error: {0}")]
    Actuator(#[source] HardwareError),

    /// Sensor bus failure outside a reading (e.g. releasing the bus)
    #[error("Sensor error: {0}")]
    Sensor(#[source] HardwareError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The agent could not be brought up at all
    #[error("Startup failed: {message}")]
    Startup { message: String },
}

impl AgentError {
    /// Wrap any transport implementation's error
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }

    /// Create startup error
    pub fn startup<S: Into<String>>(message: S) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    /// Whether the runtime can keep going after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AgentError::Startup { .. } | AgentError::Config(_))
    }
}

/// Result type for Agent operations
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandEnvelope, ControlCommand};
    use crate::transport::mqtt::{ConnectionState, MqttError};

    #[test]
    fn test_transport_error_wraps_source() {
        let error = AgentError::transport(MqttError::NotConnected {
            state: ConnectionState::Connecting,
        });
        assert!(error.to_string().starts_with("Transport error"));
        assert!(std::error::Error::source(&error).is_some());
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_protocol_error_conversion() {
        let protocol_error =
            ControlCommand::try_from(&CommandEnvelope::new("heater", "on")).unwrap_err();
        let error: AgentError = protocol_error.into();
        assert!(matches!(error, AgentError::Protocol(_)));
        assert!(error.to_string().contains("heater"));
    }

    #[test]
    fn test_hardware_errors_keep_taxonomy() {
        let actuator = AgentError::Actuator(HardwareError::Unavailable("relay board".to_string()));
        let sensor = AgentError::Sensor(HardwareError::Unavailable("i2c bus".to_string()));
        assert!(actuator.to_string().starts_with("Actuator error"));
        assert!(sensor.to_string().starts_with("Sensor error"));
        assert!(actuator.is_recoverable());
    }

    #[test]
    fn test_startup_error_is_fatal() {
        let error = AgentError::startup("broker unreachable");
        assert_eq!(error.to_string(), "Startup failed: broker unreachable");
        assert!(!error.is_recoverable());
    }
}
