//! Commanded actuator state shared by the dispatcher and shutdown
//!
//! The store holds intent: what the agent last told each actuator to do.
//! It is the only state reported on the status topic.

use crate::protocol::{Actuator, DeviceStatus};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Single-owner store for the device's actuator state
///
/// Cloning shares the same underlying state. Every operation takes the one
/// lock for its whole duration, so readers never see a half-applied update.
#[derive(Debug, Clone, Default)]
pub struct DeviceStateStore {
    status: Arc<Mutex<DeviceStatus>>,
}

impl DeviceStateStore {
    /// Start with every actuator off
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the commanded state of one actuator
    pub async fn set(&self, actuator: Actuator, on: bool) {
        self.status.lock().await.set(actuator, on);
        debug!(actuator = %actuator, on, "Device state updated");
    }

    /// Snapshot of every actuator
    pub async fn get_all(&self) -> DeviceStatus {
        self.status.lock().await.clone()
    }

    /// Record every actuator as off in one step
    pub async fn all_off(&self) {
        *self.status.lock().await = DeviceStatus::all_off();
        debug!("Device state reset to all off");
    }
}
