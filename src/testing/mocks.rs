//! Mock implementations for testing
//!
//! Provides a recording `Transport` and scriptable sensors, actuators and
//! camera so the agent runtime can be exercised without a broker or hardware.
//! Every mock is cheap to clone and clones share state, so a test can keep a
//! handle after giving the mock to the agent.

use crate::hardware::{ActuatorLayer, CaptureDevice, HardwareError, HardwareSet, SensorLayer};
use crate::protocol::{
    unix_timestamp, Actuator, CommandEnvelope, DeviceStatus, ImageArtifact, LifecycleStatus,
    SensorReading, TopicSet,
};
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{DeliveryGuarantee, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// One publish as seen by the mock transport
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub guarantee: DeliveryGuarantee,
    pub retain: bool,
}

impl PublishedMessage {
    /// Payload parsed as JSON; `Value::Null` if it is not JSON
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

/// Where the mock records online/offline announcements
#[derive(Debug, Clone)]
struct Announcements {
    device_id: String,
    status_topic: String,
}

/// Mock transport for testing
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    pub published_messages: Arc<StdMutex<Vec<PublishedMessage>>>,
    announcements: Option<Announcements>,
    connected: Arc<AtomicBool>,
    fail_connect: bool,
    fail_publish: Arc<AtomicBool>,
    connect_calls: Arc<AtomicUsize>,
    disconnect_calls: Arc<AtomicUsize>,
    command_sender: Arc<StdMutex<Option<mpsc::Sender<CommandEnvelope>>>>,
}

impl MockTransport {
    /// Starts disconnected; `connect` succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Already connected, for driving components without a lifecycle
    pub fn connected() -> Self {
        let transport = Self::default();
        transport.connected.store(true, Ordering::SeqCst);
        transport
    }

    /// `connect` fails as if the broker were unreachable
    pub fn with_connect_failure() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    /// Record retained online/offline announcements on the device's status
    /// topic the way the broker session produces them: online on every
    /// established session, offline on a clean disconnect, and the last
    /// will when a session is lost.
    pub fn with_announcements(mut self, device_id: &str, topics: &TopicSet) -> Self {
        self.announcements = Some(Announcements {
            device_id: device_id.to_string(),
            status_topic: topics.status.clone(),
        });
        self
    }

    /// Make every publish fail even while connected
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Lose the session as if the broker went away; the will fires
    pub fn simulate_drop(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.announce(false);
        }
    }

    /// Restore the session as if a reconnection succeeded
    pub fn simulate_reconnect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.announce(true);
        }
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.history().clone()
    }

    /// Publishes made on one topic, oldest first
    pub async fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.history()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// `status` field of every retained announcement, oldest first
    pub async fn announcement_history(&self) -> Vec<String> {
        let Some(announcements) = &self.announcements else {
            return Vec::new();
        };
        self.history()
            .iter()
            .filter(|m| m.retain && m.topic == announcements.status_topic)
            .filter_map(|m| m.json()["status"].as_str().map(str::to_string))
            .collect()
    }

    pub async fn clear_history(&self) {
        self.history().clear();
    }

    fn history(&self) -> std::sync::MutexGuard<'_, Vec<PublishedMessage>> {
        self.published_messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn announce(&self, online: bool) {
        let Some(announcements) = &self.announcements else {
            return;
        };
        let status = if online {
            LifecycleStatus::online(&announcements.device_id)
        } else {
            LifecycleStatus::offline(&announcements.device_id)
        };
        let payload = serde_json::to_vec(&status).unwrap_or_default();
        self.history().push(PublishedMessage {
            topic: announcements.status_topic.clone(),
            payload,
            guarantee: DeliveryGuarantee::AtLeastOnce,
            retain: true,
        });
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn has_command_sender(&self) -> bool {
        self.sender().is_some()
    }

    /// Deliver a control message the way the session would
    ///
    /// Returns false when no sender is installed or the queue rejected it.
    pub fn inject_command(&self, envelope: CommandEnvelope) -> bool {
        match self.sender() {
            Some(sender) => sender.try_send(envelope).is_ok(),
            None => false,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<CommandEnvelope>> {
        self.command_sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(MqttError::ConnectionFailedStr(
                "Mock broker unreachable".to_string(),
            ));
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.announce(true);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.announce(false);
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
        retain: bool,
    ) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                state: self.connection_state(),
            });
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed {
                topic: topic.to_string(),
                source: "Mock publish failure".into(),
            });
        }

        self.history().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            guarantee,
            retain,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected("Mock disconnection".to_string())
        }
    }

    fn set_command_sender(&self, sender: mpsc::Sender<CommandEnvelope>) {
        *self
            .command_sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(sender);
    }
}

/// Mock sensors returning a scripted reading
#[derive(Debug, Clone)]
pub struct MockSensors {
    reading: Arc<StdMutex<SensorReading>>,
    reads: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
    fail_release: bool,
}

impl MockSensors {
    /// Every reading present with plausible values
    pub fn new() -> Self {
        Self::with_reading(SensorReading {
            temperature: Some(24.5),
            humidity: Some(55.0),
            light: Some(800.0),
            co2: Some(420.0),
            ec: Some(1.2),
            tds: Some(600.0),
            timestamp: 0.0,
        })
    }

    /// Every reading absent, as when the sensor bus is gone
    pub fn failing() -> Self {
        Self::with_reading(SensorReading::absent(0.0))
    }

    /// Report this reading; its timestamp is replaced at read time
    pub fn with_reading(reading: SensorReading) -> Self {
        Self {
            reading: Arc::new(StdMutex::new(reading)),
            reads: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
            fail_release: false,
        }
    }

    /// `release` returns an error
    pub fn with_release_failure(mut self) -> Self {
        self.fail_release = true;
        self
    }

    pub fn set_reading(&self, reading: SensorReading) {
        *self
            .reading
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = reading;
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Default for MockSensors {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorLayer for MockSensors {
    async fn read_all(&self) -> SensorReading {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let reading = *self
            .reading
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        SensorReading {
            timestamp: unix_timestamp(),
            ..reading
        }
    }

    async fn release(&self) -> Result<(), HardwareError> {
        self.released.store(true, Ordering::SeqCst);
        if self.fail_release {
            return Err(HardwareError::Unavailable("Mock bus release failure".to_string()));
        }
        Ok(())
    }
}

/// Mock actuators recording every call
#[derive(Debug, Clone, Default)]
pub struct MockActuators {
    calls: Arc<StdMutex<Vec<(Actuator, bool)>>>,
    outputs: Arc<StdMutex<DeviceStatus>>,
    failing: Arc<StdMutex<HashSet<Actuator>>>,
    delay: Option<Duration>,
}

impl MockActuators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every switch of this actuator fails and leaves its output unchanged
    pub fn failing_on(self, actuator: Actuator) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(actuator);
        self
    }

    /// Each switch takes this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every `set_actuator` call in order, including failed ones
    pub fn calls(&self) -> Vec<(Actuator, bool)> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// What the hardware is actually doing
    pub fn outputs(&self) -> DeviceStatus {
        self.outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ActuatorLayer for MockActuators {
    async fn set_actuator(&self, actuator: Actuator, on: bool) -> Result<(), HardwareError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((actuator, on));

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&actuator);
        if failing {
            return Err(HardwareError::ActuatorFailed {
                actuator,
                reason: "Mock relay fault".to_string(),
            });
        }

        self.outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set(actuator, on);
        Ok(())
    }

    async fn get_actuator(&self, actuator: Actuator) -> Result<bool, HardwareError> {
        Ok(self.outputs().get(actuator))
    }
}

/// Mock camera with an optional canned picture
#[derive(Debug, Clone, Default)]
pub struct MockCamera {
    image: Option<ImageArtifact>,
    captures: Arc<AtomicUsize>,
}

impl MockCamera {
    /// A camera that never produces an image
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_image(filename: &str, bytes: Vec<u8>) -> Self {
        Self {
            image: Some(ImageArtifact {
                filename: filename.to_string(),
                bytes,
            }),
            captures: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for MockCamera {
    async fn capture(&self) -> Option<ImageArtifact> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        self.image.clone()
    }
}

/// Mock hardware plus handles for inspecting it
#[derive(Debug, Clone, Default)]
pub struct MockHardware {
    pub sensors: MockSensors,
    pub actuators: MockActuators,
    pub camera: MockCamera,
}

impl MockHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// The set handed to the agent; shares state with `self`
    pub fn hardware_set(&self) -> HardwareSet {
        HardwareSet {
            sensors: Arc::new(self.sensors.clone()),
            actuators: Arc::new(self.actuators.clone()),
            camera: Arc::new(self.camera.clone()),
        }
    }
}
