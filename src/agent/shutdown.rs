//! Orderly teardown, run at most once per process
//!
//! Sequence: stop background tasks, switch actuators off, release sensors,
//! disconnect. Every step runs even when an earlier one failed.

use super::dispatcher::switch_all_off;
use super::state_store::DeviceStateStore;
use crate::error::AgentError;
use crate::hardware::{ActuatorLayer, SensorLayer};
use crate::protocol::Actuator;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// How long a background task may take to finish its current cycle
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened during teardown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Background tasks that had to be aborted
    pub tasks_aborted: usize,
    /// Actuators the hardware failed to switch off
    pub actuator_failures: Vec<Actuator>,
    pub sensor_release_error: Option<String>,
    pub disconnect_error: Option<String>,
}

impl ShutdownReport {
    /// True when every step succeeded
    pub fn is_clean(&self) -> bool {
        self.tasks_aborted == 0
            && self.actuator_failures.is_empty()
            && self.sensor_release_error.is_none()
            && self.disconnect_error.is_none()
    }
}

/// Runs the teardown sequence exactly once, whoever asks first
pub struct ShutdownCoordinator<T: Transport> {
    started: AtomicBool,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    actuators: Arc<dyn ActuatorLayer>,
    sensors: Arc<dyn SensorLayer>,
    store: DeviceStateStore,
    transport: Arc<T>,
}

impl<T: Transport> ShutdownCoordinator<T> {
    pub fn new(
        transport: Arc<T>,
        actuators: Arc<dyn ActuatorLayer>,
        sensors: Arc<dyn SensorLayer>,
        store: DeviceStateStore,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            started: AtomicBool::new(false),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
            actuators,
            sensors,
            store,
            transport,
        }
    }

    /// Stop flag for a background task; turns true when teardown begins
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Hand over a background task to be joined during teardown
    pub fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    pub fn has_run(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Run the teardown; `None` if it already ran
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already performed, ignoring");
            return None;
        }

        let span = crate::lifecycle_span!(phase = "shutdown");
        Some(self.run_sequence().instrument(span).await)
    }

    async fn run_sequence(&self) -> ShutdownReport {
        info!("Shutdown started");
        let mut report = ShutdownReport::default();

        // 0. Let in-flight work finish so no command can switch an actuator
        //    back on after the all-off below
        self.stop_tx.send_replace(true);
        report.tasks_aborted = self.join_tasks().await;

        // 1. Actuators off
        let failures = switch_all_off(self.actuators.as_ref(), &self.store).await;
        report.actuator_failures = failures.into_iter().map(|(a, _)| a).collect();

        // 2. Sensor resources
        if let Err(e) = self.sensors.release().await.map_err(AgentError::Sensor) {
            error!(component = "shutdown", operation = "release_sensors", error = %e, "Failed to release sensors");
            report.sensor_release_error = Some(e.to_string());
        }

        // 3. Offline announcement and session close
        if let Err(e) = self.transport.disconnect().await {
            error!(component = "shutdown", operation = "disconnect", error = %e, "Failed to disconnect cleanly");
            report.disconnect_error = Some(e.to_string());
        }

        if report.is_clean() {
            info!("Shutdown complete");
        } else {
            warn!(?report, "Shutdown completed with errors");
        }
        report
    }

    async fn join_tasks(&self) -> usize {
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        let mut aborted = 0;
        for mut handle in handles {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if !e.is_cancelled() {
                        error!(error = %e, "Background task ended abnormally");
                    }
                }
                Err(_) => {
                    warn!("Background task did not stop in time, aborting");
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}
