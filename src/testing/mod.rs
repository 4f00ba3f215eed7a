//! Testing utilities and mock implementations
//!
//! Fakes for the transport and the hardware collaborators, so the agent
//! runtime can be tested without an MQTT broker or a sensor bus.

pub mod mocks;

pub use mocks::*;
