//! Observability for the farm device agent
//!
//! Structured logging and span macros.

pub mod logging;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{command_span, lifecycle_span, mqtt_span, telemetry_span};
