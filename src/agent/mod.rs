//! Agent runtime for the farm device
//!
//! Telemetry publishing, command dispatch, the shared actuator state, the
//! shutdown sequence and the lifecycle that wires them to a transport.

pub mod dispatcher;
pub mod lifecycle;
pub mod shutdown;
pub mod state_store;
pub mod telemetry;

pub use dispatcher::{switch_all_off, CommandDispatcher, DispatchOutcome};
pub use lifecycle::FarmAgent;
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use state_store::DeviceStateStore;
pub use telemetry::TelemetryPublisher;
