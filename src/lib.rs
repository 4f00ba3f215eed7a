//! Farm device agent
//!
//! Runs on a single field device: publishes sensor telemetry on a fixed
//! cadence, executes actuator and camera commands received over MQTT,
//! reports actuator status, and shuts down leaving every actuator off.
//!
//! # Overview
//!
//! - [`protocol`]: wire payloads and the per-device topic layout
//! - [`transport`]: the broker session with last-will and reconnection
//! - [`agent`]: telemetry loop, command dispatcher, state store, shutdown
//! - [`hardware`]: sensor, actuator and camera interfaces
//! - [`config`]: TOML configuration
//!
//! # Quick Start
//!
//! ```rust
//! use farm_agent::protocol::{CommandEnvelope, ControlCommand, TopicSet, Actuator};
//!
//! let topics = TopicSet::for_device("farm", "greenhouse-01");
//! assert_eq!(topics.control, "farm/greenhouse-01/control");
//!
//! let envelope: CommandEnvelope =
//!     serde_json::from_str(r#"{"type":"fan","action":"on"}"#).unwrap();
//! assert_eq!(
//!     ControlCommand::try_from(&envelope).unwrap(),
//!     ControlCommand::Switch { actuator: Actuator::Fan, on: true }
//! );
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod hardware;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use agent::FarmAgent;
pub use config::*;
pub use error::{AgentError, AgentResult};
pub use protocol::*;
pub use transport::mqtt::MqttClient;
