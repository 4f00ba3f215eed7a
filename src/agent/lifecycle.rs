//! Agent lifecycle: startup wiring and orderly shutdown
//!
//! Startup order matters: actuators are driven to the store's all-off state,
//! the command sink is installed on the transport, and only then is the
//! session opened, so no control message can arrive before it has somewhere
//! to go.

use super::dispatcher::{switch_all_off, CommandDispatcher};
use super::shutdown::{ShutdownCoordinator, ShutdownReport};
use super::state_store::DeviceStateStore;
use super::telemetry::TelemetryPublisher;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::hardware::HardwareSet;
use crate::protocol::{CommandEnvelope, TopicSet};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Instrument};

/// Inbound commands buffered between the session and the dispatcher
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Everything that exists only while the agent is running
struct Running<T: Transport> {
    transport: Arc<T>,
    coordinator: ShutdownCoordinator<T>,
}

/// The farm device agent with injected transport and hardware
pub struct FarmAgent<T>
where
    T: Transport + 'static,
{
    config: AgentConfig,
    topics: TopicSet,
    hardware: HardwareSet,
    store: DeviceStateStore,
    transport: Option<T>,
    running: Option<Running<T>>,
}

impl<T> FarmAgent<T>
where
    T: Transport + 'static,
{
    pub fn new(config: AgentConfig, transport: T, hardware: HardwareSet) -> Self {
        let topics = TopicSet::for_device(&config.device.topic_root, &config.device.id);
        Self {
            config,
            topics,
            hardware,
            store: DeviceStateStore::new(),
            transport: Some(transport),
            running: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.config.device.id
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// Shared actuator state
    pub fn store(&self) -> &DeviceStateStore {
        &self.store
    }

    /// The transport, once started
    pub fn transport(&self) -> Option<&Arc<T>> {
        self.running.as_ref().map(|r| &r.transport)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.coordinator.has_run())
    }

    /// Bring the agent up and spawn its background tasks
    pub async fn start(&mut self) -> AgentResult<()> {
        let span = crate::lifecycle_span!(phase = "startup", device_id = %self.config.device.id);
        self.start_inner().instrument(span).await
    }

    async fn start_inner(&mut self) -> AgentResult<()> {
        // The config may not have come through the loader
        self.config.validate()?;
        let Some(mut transport) = self.transport.take() else {
            return Err(AgentError::startup("agent already started"));
        };

        info!(broker = %self.config.mqtt.broker_url, "Starting farm agent");

        let failures = switch_all_off(self.hardware.actuators.as_ref(), &self.store).await;
        if !failures.is_empty() {
            warn!(
                failed = failures.len(),
                "Some actuators could not be driven off at startup"
            );
        }

        let (command_tx, command_rx) = Self::create_command_channel();
        transport.set_command_sender(command_tx);

        if let Err(e) = transport.connect().await {
            if self.config.mqtt.require_connection {
                error!(component = "lifecycle", operation = "connect", error = %e, "Broker unreachable and connection is required");
                if let Err(close) = transport.disconnect().await {
                    warn!(error = %close, "Failed to stop connection attempts");
                }
                return Err(AgentError::startup(format!(
                    "broker connection failed: {e}"
                )));
            }
            warn!(
                component = "lifecycle",
                operation = "connect",
                error = %e,
                "Broker unreachable, running degraded while reconnecting"
            );
        }

        let transport = Arc::new(transport);
        let coordinator = ShutdownCoordinator::new(
            transport.clone(),
            self.hardware.actuators.clone(),
            self.hardware.sensors.clone(),
            self.store.clone(),
        );

        let dispatcher = CommandDispatcher::new(
            &self.config.device.id,
            self.topics.clone(),
            transport.clone(),
            self.hardware.actuators.clone(),
            self.hardware.camera.clone(),
            self.store.clone(),
        );
        let stop = coordinator.stop_signal();
        coordinator.register_task(tokio::spawn(async move {
            dispatcher.run(command_rx, stop).await;
        }));

        let telemetry = TelemetryPublisher::new(
            &self.config.device.id,
            &self.topics,
            transport.clone(),
            self.hardware.sensors.clone(),
            Duration::from_secs(self.config.telemetry.interval_secs),
        )?;
        let stop = coordinator.stop_signal();
        coordinator.register_task(tokio::spawn(async move {
            telemetry.run(stop).await;
        }));

        self.running = Some(Running {
            transport,
            coordinator,
        });

        info!(device_id = %self.config.device.id, "Farm agent running");
        Ok(())
    }

    /// Stop background work, switch everything off and close the session
    ///
    /// Only the first call does anything; later calls and calls before
    /// `start` return `None`.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        match &self.running {
            Some(running) => running.coordinator.shutdown().await,
            None => None,
        }
    }

    fn create_command_channel() -> (
        mpsc::Sender<CommandEnvelope>,
        mpsc::Receiver<CommandEnvelope>,
    ) {
        mpsc::channel(COMMAND_QUEUE_DEPTH)
    }
}
