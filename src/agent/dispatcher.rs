//! Control command state machine
//!
//! | command            | effect                               | status publish |
//! |--------------------|--------------------------------------|----------------|
//! | pump/led/fan on/off| switch one actuator, record in store | yes            |
//! | all off            | switch every actuator off            | yes            |
//! | camera capture     | publish image if one was captured    | no             |
//! | anything else      | nothing                              | no             |
//!
//! The status report is always read back from the store after the change.

use super::state_store::DeviceStateStore;
use crate::error::{AgentError, AgentResult};
use crate::hardware::{ActuatorLayer, CaptureDevice};
use crate::protocol::{
    unix_timestamp, Actuator, CommandEnvelope, ControlCommand, DeviceStatus, ImagePayload,
    StatusReport, TopicSet,
};
use crate::transport::mqtt::MessageHandler;
use crate::transport::{DeliveryGuarantee, Transport};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn, Instrument};

/// What processing one control message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Actuator state changed; carries the reported status
    Applied {
        status: DeviceStatus,
        published: bool,
    },
    /// A picture was captured
    Captured { filename: String, published: bool },
    /// The camera produced nothing
    NoImage,
    /// Unknown type or action; nothing changed
    Rejected(String),
}

/// Switch every actuator off, each attempted independently, then record all-off
///
/// Returns the actuators the hardware failed to switch.
pub async fn switch_all_off(
    actuators: &dyn ActuatorLayer,
    store: &DeviceStateStore,
) -> Vec<(Actuator, AgentError)> {
    let mut failures = Vec::new();
    for actuator in Actuator::ALL {
        if let Err(e) = set_actuator(actuators, actuator, false).await {
            error!(
                component = "dispatcher",
                operation = "all_off",
                actuator = %actuator,
                error = %e,
                "Failed to switch actuator off"
            );
            failures.push((actuator, e));
        }
    }
    store.all_off().await;
    failures
}

async fn set_actuator(
    actuators: &dyn ActuatorLayer,
    actuator: Actuator,
    on: bool,
) -> AgentResult<()> {
    actuators
        .set_actuator(actuator, on)
        .await
        .map_err(AgentError::Actuator)
}

/// Maps control messages onto actuators and the camera
pub struct CommandDispatcher<T: Transport> {
    device_id: String,
    topics: TopicSet,
    transport: Arc<T>,
    actuators: Arc<dyn ActuatorLayer>,
    camera: Arc<dyn CaptureDevice>,
    store: DeviceStateStore,
}

impl<T: Transport> CommandDispatcher<T> {
    pub fn new(
        device_id: &str,
        topics: TopicSet,
        transport: Arc<T>,
        actuators: Arc<dyn ActuatorLayer>,
        camera: Arc<dyn CaptureDevice>,
        store: DeviceStateStore,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            topics,
            transport,
            actuators,
            camera,
            store,
        }
    }

    /// Process one control message
    pub async fn dispatch(&self, envelope: &CommandEnvelope) -> DispatchOutcome {
        let command = match ControlCommand::try_from(envelope) {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    component = "dispatcher",
                    operation = "validate",
                    command_type = %envelope.kind,
                    action = %envelope.action,
                    error = %e,
                    "Ignoring control message"
                );
                return DispatchOutcome::Rejected(e.to_string());
            }
        };

        match command {
            ControlCommand::Switch { actuator, on } => {
                self.switch(actuator, on).await;
                self.report_status().await
            }
            ControlCommand::AllOff => {
                switch_all_off(self.actuators.as_ref(), &self.store).await;
                self.report_status().await
            }
            ControlCommand::Capture => self.capture().await,
        }
    }

    async fn switch(&self, actuator: Actuator, on: bool) {
        if let Err(e) = set_actuator(self.actuators.as_ref(), actuator, on).await {
            error!(
                component = "dispatcher",
                operation = "set_actuator",
                actuator = %actuator,
                on,
                error = %e,
                "Actuator did not switch"
            );
        }
        // Intent is recorded even when the hardware refused
        self.store.set(actuator, on).await;
        info!(actuator = %actuator, on, "Actuator command applied");
    }

    /// Publish the store's current status on the status topic
    async fn report_status(&self) -> DispatchOutcome {
        let status = self.store.get_all().await;
        let report = StatusReport {
            device_id: self.device_id.clone(),
            timestamp: unix_timestamp(),
            status: status.clone(),
        };

        let published = match MessageHandler::format_payload(&report) {
            Ok(payload) => self.publish(&self.topics.status, payload, "publish_status").await,
            Err(e) => {
                error!(component = "dispatcher", operation = "publish_status", error = %e, "Failed to encode status");
                false
            }
        };

        DispatchOutcome::Applied { status, published }
    }

    async fn capture(&self) -> DispatchOutcome {
        let Some(artifact) = self.camera.capture().await else {
            info!("Capture produced no image");
            return DispatchOutcome::NoImage;
        };

        let payload = ImagePayload::from_artifact(&self.device_id, &artifact);
        let published = match MessageHandler::format_payload(&payload) {
            Ok(bytes) => self.publish(&self.topics.image, bytes, "publish_image").await,
            Err(e) => {
                error!(component = "dispatcher", operation = "publish_image", error = %e, "Failed to encode image");
                false
            }
        };

        info!(filename = %artifact.filename, bytes = artifact.bytes.len(), published, "Image captured");
        DispatchOutcome::Captured {
            filename: artifact.filename,
            published,
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, operation: &'static str) -> bool {
        match self
            .transport
            .publish(topic, payload, DeliveryGuarantee::AtLeastOnce, false)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    component = "dispatcher",
                    operation,
                    topic = %topic,
                    error = %e,
                    "Publish failed"
                );
                false
            }
        }
    }

    /// Consume commands one at a time until stopped or the channel closes
    ///
    /// Returns the number of commands processed.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<CommandEnvelope>,
        mut stop: watch::Receiver<bool>,
    ) -> u64 {
        let mut handled = 0u64;
        info!(topic = %self.topics.control, "Command dispatcher started");

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }

                next = commands.recv() => {
                    let Some(envelope) = next else {
                        break;
                    };
                    let span = crate::command_span!(
                        command_type = %envelope.kind,
                        action = %envelope.action
                    );
                    let outcome = self.dispatch(&envelope).instrument(span).await;
                    tracing::debug!(?outcome, "Command processed");
                    handled += 1;
                }
            }
        }

        info!(handled, "Command dispatcher stopped");
        handled
    }
}
