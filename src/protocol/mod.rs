//! Protocol message types and topics for the farm device agent
//!
//! Defines the telemetry, status, lifecycle, image and control payloads
//! exchanged with the broker, and the topic layout derived from a device ID.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
