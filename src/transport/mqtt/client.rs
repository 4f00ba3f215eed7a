//! Impure I/O operations for MQTT client
//!
//! This module handles all impure I/O operations including network communication,
//! async coordination, and integration with the rumqttc client.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::config::MqttSection;
use crate::protocol::{CommandEnvelope, LifecycleStatus, TopicSet};
use crate::transport::{DeliveryGuarantee, Transport};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::PublishProperties;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop, MqttOptions};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Upper bound for the supervisor to flush the offline announcement and DISCONNECT
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT transport client for one farm device
///
/// A supervisor task owns the rumqttc event loop for the whole lifetime of
/// the client. Every other method only talks to the shared [`AsyncClient`]
/// handle and observes the connection state through a watch channel.
pub struct MqttClient {
    device_id: String,
    topics: TopicSet,
    config: MqttSection,
    client: Arc<Mutex<AsyncClient>>,
    event_loop: StdMutex<Option<EventLoop>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    reconnect_config: ReconnectConfig,
    message_forwarder: Arc<StdMutex<MessageForwarder>>,
}

impl MqttClient {
    /// Build the client without touching the network
    ///
    /// The broker URL is validated here so a typo fails at startup rather
    /// than inside the reconnection loop.
    pub fn new(device_id: &str, topics: TopicSet, config: MqttSection) -> Result<Self, MqttError> {
        let (client, event_loop) = Self::create_connection(device_id, &topics, &config)?;
        let ((state_tx, _), (shutdown_tx, _)) = Self::setup_connection_channels();
        let reconnect_config = config.reconnect_config();

        Ok(MqttClient {
            device_id: device_id.to_string(),
            topics,
            config,
            client: Arc::new(Mutex::new(client)),
            event_loop: StdMutex::new(Some(event_loop)),
            state_tx: Arc::new(state_tx),
            shutdown_tx,
            supervisor: Mutex::new(None),
            reconnect_config,
            message_forwarder: Arc::new(StdMutex::new(MessageForwarder::new())),
        })
    }

    /// Topics this client publishes and subscribes on
    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Set the sender for forwarding received control messages to the dispatcher
    pub fn set_command_sender(&self, sender: mpsc::Sender<CommandEnvelope>) {
        self.message_forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set_command_sender(sender);
    }

    /// Create a fresh client and event loop for one session attempt
    fn create_connection(
        device_id: &str,
        topics: &TopicSet,
        config: &MqttSection,
    ) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options: MqttOptions = configure_mqtt_options(device_id, topics, config)?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY))
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels =
            watch::channel(ConnectionState::Disconnected("Not connected".to_string()));
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for the supervisor to report an established session
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) | ConnectionState::Failed(reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason));
                    }
                    ConnectionState::Disconnecting => {
                        return Err(MqttError::ConnectionFailedStr(
                            "Disconnect requested while connecting".to_string(),
                        ));
                    }
                    ConnectionState::Connecting => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Start the session supervisor and wait for the first ConnAck
    ///
    /// On failure the supervisor keeps retrying in the background, so a
    /// caller that chooses to run degraded recovers once the broker is back.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let event_loop = event_loop.ok_or_else(|| {
            MqttError::ConnectionFailedStr("Event loop already started".to_string())
        })?;

        let current = self.connection_state();
        self.state_tx.send_replace(HealthMonitor::determine_next_state(
            &current,
            ConnectionEvent::ReconnectionStarted(0),
        ));
        let state_rx = self.state_tx.subscribe();

        let session_client = self.client.lock().await.clone();
        let supervisor = Supervisor {
            device_id: self.device_id.clone(),
            topics: self.topics.clone(),
            config: self.config.clone(),
            reconnect_config: self.reconnect_config.clone(),
            shared_client: self.client.clone(),
            session_client,
            event_loop,
            state_tx: self.state_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            message_forwarder: self.message_forwarder.clone(),
            reconnect_attempts: 0,
        };

        let span = crate::mqtt_span!(operation = "supervisor", device_id = %self.device_id);
        let handle = tokio::spawn(supervisor.run().instrument(span));
        *self.supervisor.get_mut() = Some(handle);

        let connection_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        Self::wait_for_connection_confirmation(state_rx, connection_timeout).await
    }

    /// Close the session, announcing offline first when connected
    ///
    /// Idempotent: once the supervisor has been stopped further calls only
    /// make sure the reported state is `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        let handle = self.supervisor.lock().await.take();
        let Some(mut handle) = handle else {
            self.mark_closed();
            return Ok(());
        };

        let current = self.connection_state();
        let mut outcome = Ok(());

        if HealthMonitor::can_publish(&current) {
            self.state_tx.send_replace(HealthMonitor::determine_next_state(
                &current,
                ConnectionEvent::CloseRequested,
            ));

            if let Err(e) = self.announce_offline().await {
                warn!(
                    component = "mqtt",
                    operation = "disconnect",
                    error = %e,
                    "Failed to publish offline status"
                );
                outcome = Err(e);
            }

            let sent = tokio::time::timeout(DRAIN_TIMEOUT, async {
                let client = self.client.lock().await;
                client.disconnect().await
            })
            .await;
            match sent {
                Ok(Ok(())) => debug!("DISCONNECT queued"),
                Ok(Err(e)) => {
                    warn!(component = "mqtt", operation = "disconnect", error = %e, "Failed to send DISCONNECT");
                    if outcome.is_ok() {
                        outcome = Err(MqttError::ConnectionFailed(Box::new(e)));
                    }
                }
                Err(_) => warn!(component = "mqtt", operation = "disconnect", "Timed out sending DISCONNECT"),
            }
        } else {
            debug!(state = ?current, "Not connected, stopping supervisor without announcement");
            let _ = self.shutdown_tx.send(true);
        }

        // After a DISCONNECT the supervisor exits on its own once the packet
        // is flushed; the shutdown signal covers a stuck session
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
            let _ = self.shutdown_tx.send(true);
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
                warn!("Supervisor did not stop gracefully, aborting");
                handle.abort();
            }
        }
        let _ = self.shutdown_tx.send(true);

        self.mark_closed();
        info!(device_id = %self.device_id, "MQTT client disconnected");
        outcome
    }

    /// Publish the retained offline announcement, bypassing the state gate
    async fn announce_offline(&self) -> Result<(), MqttError> {
        let payload = serde_json::to_vec(&LifecycleStatus::offline(&self.device_id))
            .map_err(MqttError::SerializationError)?;
        self.send_publish(
            &self.topics.status,
            payload,
            DeliveryGuarantee::AtLeastOnce,
            true,
        )
        .await
    }

    fn mark_closed(&self) {
        let current = self.connection_state();
        if !matches!(current, ConnectionState::Disconnected(_)) {
            self.state_tx.send_replace(HealthMonitor::determine_next_state(
                &current,
                ConnectionEvent::Closed,
            ));
        }
    }

    /// Get current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let current_state = self.connection_state();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }

    /// Publish a payload on a topic
    ///
    /// Fails fast with `NotConnected` unless the session is up; the hand-off
    /// to the session is bounded by `publish_timeout_ms`.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.check_connection_state()?;
        self.send_publish(topic, payload, guarantee, retain).await
    }

    async fn send_publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
        retain: bool,
    ) -> Result<(), MqttError> {
        let qos = MessageHandler::qos_for(guarantee);
        let timeout_ms = self.config.publish_timeout_ms;

        let result = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            let client = self.client.lock().await;
            client
                .publish_with_properties(topic, qos, retain, payload, PublishProperties::default())
                .await
        })
        .await;

        match result {
            Ok(Ok(())) => {
                debug!(topic = %topic, guarantee = %guarantee, retain, "Published message");
                Ok(())
            }
            Ok(Err(e)) => Err(MqttError::PublishFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            }),
            Err(_) => Err(MqttError::PublishTimeout {
                topic: topic.to_string(),
                timeout_ms,
            }),
        }
    }
}

/// Background task that owns the event loop and keeps the session alive
struct Supervisor {
    device_id: String,
    topics: TopicSet,
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    shared_client: Arc<Mutex<AsyncClient>>,
    session_client: AsyncClient,
    event_loop: EventLoop,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown_rx: watch::Receiver<bool>,
    message_forwarder: Arc<StdMutex<MessageForwarder>>,
    reconnect_attempts: u32,
}

impl Supervisor {
    async fn run(mut self) {
        info!(
            "Starting MQTT event loop with reconnection supervisor for device: {}",
            self.device_id
        );

        loop {
            tokio::select! {
                // Check for shutdown signal first (higher priority)
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping reconnection supervisor");
                        break;
                    }
                }

                event_result = self.event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route).await
                        }
                        Err(e) => self.handle_event_loop_error(e).await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!("MQTT event loop stopped for device: {}", self.device_id);
    }

    fn current_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn transition(&self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(&self.current_state(), event);
        self.state_tx.send_replace(next);
    }

    /// Process routed MQTT event
    /// Returns true to continue loop, false to break
    async fn process_event_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.reconnect_attempts = 0;
                self.on_session_established();
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                self.handle_message_received(&topic, &payload, retain);
                true
            }
            EventRoute::Disconnected => {
                if !HealthMonitor::should_reconnect_after_drop(&self.current_state()) {
                    return false;
                }
                self.transition(ConnectionEvent::DisconnectedByBroker);
                self.should_attempt_reconnection().await
            }
            EventRoute::SubscriptionConfirmed { packet_id, filters } => {
                debug!(target: "mqtt_transport", packet_id, filters, "Subscription confirmed");
                true
            }
            EventRoute::OutgoingDisconnect => {
                // Our DISCONNECT has been flushed; the session is over
                !matches!(self.current_state(), ConnectionState::Disconnecting)
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Subscribe the control topic and announce online on every new session
    ///
    /// Uses the non-blocking request path: awaiting here would wait on the
    /// very event loop this task is supposed to be polling.
    fn on_session_established(&self) {
        if let Err(e) = self
            .session_client
            .try_subscribe(self.topics.control.as_str(), QoS::AtLeastOnce)
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
        {
            error!(
                component = "mqtt",
                operation = "subscribe",
                topic = %self.topics.control,
                error = %e,
                "Failed to subscribe to control topic"
            );
        } else {
            info!(topic = %self.topics.control, "Subscribed to control topic");
        }

        match MessageHandler::format_payload(&LifecycleStatus::online(&self.device_id)) {
            Ok(payload) => {
                if let Err(e) = self.session_client.try_publish_with_properties(
                    self.topics.status.as_str(),
                    QoS::AtLeastOnce,
                    true,
                    payload,
                    PublishProperties::default(),
                ) {
                    error!(
                        component = "mqtt",
                        operation = "announce_online",
                        error = %e,
                        "Failed to queue online status"
                    );
                }
            }
            Err(e) => error!(error = %e, "Failed to encode online status"),
        }

        self.transition(ConnectionEvent::ConnAckReceived);
    }

    fn handle_message_received(&self, topic: &str, payload: &[u8], retain: bool) {
        debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);

        if !MessageHandler::should_process_message(topic, retain, &self.topics.control) {
            return;
        }

        match MessageHandler::parse_command_envelope(payload) {
            Ok(envelope) => {
                let forwarder = self
                    .message_forwarder
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Err(e) = forwarder.forward_command(envelope) {
                    warn!(component = "mqtt", operation = "forward_command", error = %e, "Control command dropped");
                }
            }
            Err(e) => {
                warn!(
                    component = "mqtt",
                    operation = "parse_command",
                    topic = %topic,
                    error = %e,
                    "Dropping malformed control message"
                );
            }
        }
    }

    /// Handle event loop error
    /// Returns true to continue loop (after reconnection), false to break
    async fn handle_event_loop_error(&mut self, error: rumqttc::v5::ConnectionError) -> bool {
        if !HealthMonitor::should_reconnect_after_drop(&self.current_state()) {
            debug!(error = %error, "Session closed during disconnect");
            return false;
        }

        self.transition(ConnectionEvent::NetworkError(error.to_string()));
        error!(
            component = "mqtt",
            operation = "poll",
            device_id = %self.device_id,
            error = %error,
            "MQTT event loop error"
        );

        self.should_attempt_reconnection().await
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Replace the event loop and shared client after a dropped session
    async fn apply_new_connection(&mut self) -> bool {
        match MqttClient::create_connection(&self.device_id, &self.topics, &self.config) {
            Ok((new_client, new_event_loop)) => {
                info!("Created new connection for reconnection attempt");
                self.event_loop = new_event_loop;
                self.session_client = new_client.clone();

                let mut client_guard = self.shared_client.lock().await;
                *client_guard = new_client;
                true
            }
            Err(e) => {
                // The old event loop reconnects on its next poll
                error!("Failed to create new connection: {}", e);
                true
            }
        }
    }

    /// Helper to handle reconnection logic
    async fn should_attempt_reconnection(&mut self) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.reconnect_attempts = attempt;
                self.transition(ConnectionEvent::ReconnectionStarted(attempt));

                let max_display = self
                    .reconnect_config
                    .max_attempts
                    .map_or("unlimited".to_string(), |max| max.to_string());
                info!(
                    "Attempting reconnection {}/{} after {}ms delay",
                    attempt, max_display, delay_ms
                );

                if !Self::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    return false;
                }

                self.apply_new_connection().await
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    self.reconnect_attempts
                );
                self.transition(ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }
}

/// Implementation of Transport trait for MqttClient
#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
        retain: bool,
    ) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload, guarantee, retain).await
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), ConnectionState::Connected)
    }

    fn connection_state(&self) -> ConnectionState {
        MqttClient::connection_state(self)
    }

    fn set_command_sender(&self, sender: mpsc::Sender<CommandEnvelope>) {
        MqttClient::set_command_sender(self, sender)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // Signal shutdown to background tasks if they're still running
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.supervisor.get_mut().take() {
            handle.abort();
        }

        // Async teardown is not possible here; callers should use disconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::protocol::DEFAULT_TOPIC_ROOT;

    fn test_client() -> MqttClient {
        let config = AgentConfig::test_config();
        let topics = TopicSet::for_device(DEFAULT_TOPIC_ROOT, &config.device.id);
        MqttClient::new(&config.device.id, topics, config.mqtt).unwrap()
    }

    #[test]
    fn test_setup_connection_channels() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            MqttClient::setup_connection_channels();

        assert!(matches!(
            *state_rx.borrow(),
            ConnectionState::Disconnected(_)
        ));
        assert!(!(*shutdown_rx.borrow()));

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[test]
    fn test_client_is_shareable_across_tasks() {
        fn assert_transport<T: Transport + Send + Sync + 'static>() {}
        assert_transport::<MqttClient>();
    }

    #[tokio::test]
    async fn test_second_connect_reports_event_loop_taken() {
        let mut client = test_client();
        client
            .event_loop
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let result = client.connect().await;
        assert!(matches!(result, Err(MqttError::ConnectionFailedStr(_))));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connecting);
            let _ = state_tx.send(ConnectionState::Connected);
            // Keep the sender alive until the waiter has seen the change
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        let _handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(state_tx);
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(10)).await;

        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("ConnAck") || err_msg.contains("timeout"),
            "Error should mention timeout or ConnAck, got: {err_msg}"
        );
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected("Test disconnect".to_string()));
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        assert!(result.unwrap_err().to_string().contains("Test disconnect"));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let ((_, _), (_shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();
        assert!(Supervisor::interruptible_sleep(shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let ((_, _), (shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        assert!(!Supervisor::interruptible_sleep(shutdown_rx, 5_000).await);
    }

    #[tokio::test]
    async fn test_connection_state_before_connect() {
        let client = test_client();
        assert!(matches!(
            client.connection_state(),
            ConnectionState::Disconnected(_)
        ));
        assert!(!Transport::is_connected(&client));
    }

    #[tokio::test]
    async fn test_publish_fails_without_connection() {
        let client = test_client();
        let result = client
            .publish(
                "farm/test-device/sensor",
                b"{}".to_vec(),
                DeliveryGuarantee::AtMostOnce,
                false,
            )
            .await;
        assert!(matches!(result, Err(MqttError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let client = test_client();
        assert!(client.disconnect().await.is_ok());
        assert!(client.disconnect().await.is_ok());
        assert!(matches!(
            client.connection_state(),
            ConnectionState::Disconnected(_)
        ));
    }

    #[test]
    fn test_invalid_broker_url_rejected_at_construction() {
        let mut config = AgentConfig::test_config();
        config.mqtt.broker_url = "not a url".to_string();
        let topics = TopicSet::for_device(DEFAULT_TOPIC_ROOT, "test-device");
        assert!(matches!(
            MqttClient::new("test-device", topics, config.mqtt),
            Err(MqttError::InvalidBrokerUrl(_))
        ));
    }
}
