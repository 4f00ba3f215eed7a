//! Collaborator interfaces for sensors, actuators and the camera
//!
//! The agent core only ever talks to these traits. Bus wiring, calibration
//! and camera drivers live behind them; the simulated implementations here
//! are used when no hardware backend is wired in.

use crate::config::CameraSection;
use crate::protocol::{Actuator, ImageArtifact, SensorReading};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub mod camera;
pub mod simulated;

pub use camera::SnapshotCamera;
pub use simulated::{SimulatedActuators, SimulatedSensors};

/// Hardware access errors
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Device unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to switch {actuator}: {reason}")]
    ActuatorFailed { actuator: Actuator, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of environmental readings
#[async_trait]
pub trait SensorLayer: Send + Sync {
    /// Take one snapshot of every reading
    ///
    /// Never fails as a whole: a reading that could not be taken is `None`.
    async fn read_all(&self) -> SensorReading;

    /// Release any bus or device handles held by the sensors
    async fn release(&self) -> Result<(), HardwareError> {
        Ok(())
    }
}

/// On/off control of the farm's actuators
#[async_trait]
pub trait ActuatorLayer: Send + Sync {
    /// Drive one actuator on or off
    async fn set_actuator(&self, actuator: Actuator, on: bool) -> Result<(), HardwareError>;

    /// Read back the current output of one actuator
    async fn get_actuator(&self, actuator: Actuator) -> Result<bool, HardwareError>;
}

/// Still image capture
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Take a picture; `None` when the camera is absent or the capture failed
    async fn capture(&self) -> Option<ImageArtifact>;
}

/// The device's collaborators, as handed to the agent
#[derive(Clone)]
pub struct HardwareSet {
    pub sensors: Arc<dyn SensorLayer>,
    pub actuators: Arc<dyn ActuatorLayer>,
    pub camera: Arc<dyn CaptureDevice>,
}

impl HardwareSet {
    /// Simulated sensors and relays with the configured snapshot camera
    pub fn simulated(camera: &CameraSection) -> Self {
        Self {
            sensors: Arc::new(SimulatedSensors::new()),
            actuators: Arc::new(SimulatedActuators::new()),
            camera: Arc::new(SnapshotCamera::new(camera.snapshot_path.clone())),
        }
    }
}
