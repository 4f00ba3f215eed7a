//! Pure message routing and processing logic for MQTT events
//!
//! This module contains pure functions for handling MQTT events,
//! control message parsing, and routing decisions.

use crate::protocol::{CommandEnvelope, ProtocolError};
use crate::transport::DeliveryGuarantee;
use rumqttc::v5::{mqttbytes::QoS, Event};
use rumqttc::Outgoing;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Parse a control payload into its structured shape (pure function)
    ///
    /// Anything that is not a JSON object is malformed. Unknown or missing
    /// `type`/`action` values are left for command validation to reject.
    pub fn parse_command_envelope(payload: &[u8]) -> Result<CommandEnvelope, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(ProtocolError::Malformed)?;
        // Derived struct deserialization would also accept `["fan","on"]`
        if !value.is_object() {
            return Err(ProtocolError::Malformed(serde::de::Error::custom(
                "control payload must be a JSON object",
            )));
        }
        serde_json::from_value(value).map_err(ProtocolError::Malformed)
    }

    /// Determine if message should be processed based on topic and retain flag (pure function)
    pub fn should_process_message(topic: &str, retain: bool, control_topic: &str) -> bool {
        // A retained command would replay an old actuator change on every reconnect
        if retain {
            debug!("Ignoring retained message on topic: {}", topic);
            return false;
        }

        if topic != control_topic {
            debug!("Ignoring message on non-control topic: {}", topic);
            return false;
        }

        true
    }

    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::Packet;
                match incoming {
                    Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                    Packet::Publish(publish) => EventRoute::MessageReceived {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.to_vec(),
                        retain: publish.retain,
                    },
                    Packet::Disconnect(_) => EventRoute::Disconnected,
                    Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                        filters: suback.return_codes.len(),
                    },
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::OutgoingDisconnect,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Serialize an outbound message into a JSON payload (pure function)
    pub fn format_payload<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(message).map_err(ProtocolError::Encode)
    }

    /// Map a delivery guarantee onto its MQTT QoS level (pure function)
    pub fn qos_for(guarantee: DeliveryGuarantee) -> QoS {
        match guarantee {
            DeliveryGuarantee::AtMostOnce => QoS::AtMostOnce,
            DeliveryGuarantee::AtLeastOnce => QoS::AtLeastOnce,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to subscribe and announce
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription confirmed
    SubscriptionConfirmed { packet_id: u16, filters: usize },
    /// Our own DISCONNECT packet has been written
    OutgoingDisconnect,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Hands parsed control messages to the dispatcher (impure I/O)
pub struct MessageForwarder {
    command_sender: Option<mpsc::Sender<CommandEnvelope>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self {
            command_sender: None,
        }
    }

    pub fn set_command_sender(&mut self, sender: mpsc::Sender<CommandEnvelope>) {
        self.command_sender = Some(sender);
    }

    /// Forward a command envelope without blocking the event loop
    ///
    /// A full dispatcher queue drops the command rather than stalling
    /// keepalives and acknowledgements.
    pub fn forward_command(&self, envelope: CommandEnvelope) -> Result<(), String> {
        let Some(sender) = &self.command_sender else {
            warn!("Received control message but no command sender configured - message dropped");
            return Err("No command sender configured".to_string());
        };

        info!(
            command_type = %envelope.kind,
            action = %envelope.action,
            "Forwarding control command to dispatcher"
        );

        sender.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(dropped) => format!(
                "Dispatcher queue full, dropped command {}/{}",
                dropped.kind, dropped.action
            ),
            TrySendError::Closed(_) => "Dispatcher channel closed".to_string(),
        })
    }
}

impl Default for MessageForwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LifecycleStatus, SensorReading, TelemetryPayload};
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::Publish;

    const CONTROL: &str = "farm/test-device/control";

    #[test]
    fn test_parse_command_envelope() {
        let parsed = MessageHandler::parse_command_envelope(br#"{"type":"fan","action":"on"}"#);
        assert_eq!(parsed.unwrap(), CommandEnvelope::new("fan", "on"));
    }

    #[test]
    fn test_parse_tolerates_extra_and_missing_fields() {
        let parsed =
            MessageHandler::parse_command_envelope(br#"{"type":"camera","extra":1}"#).unwrap();
        assert_eq!(parsed.kind, "camera");
        assert_eq!(parsed.action, "");
    }

    #[test]
    fn test_parse_malformed_payloads() {
        let payloads: [&[u8]; 7] = [
            b"invalid json",
            b"",
            b"[1,2,3]",
            br#"["fan","on"]"#,
            b"null",
            b"\"pump\"",
            br#"{"type": 5, "action": "on"}"#,
        ];
        for payload in payloads {
            assert!(matches!(
                MessageHandler::parse_command_envelope(payload),
                Err(ProtocolError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_should_process_message() {
        assert!(MessageHandler::should_process_message(CONTROL, false, CONTROL));

        // Retained commands are never replayed
        assert!(!MessageHandler::should_process_message(CONTROL, true, CONTROL));

        assert!(!MessageHandler::should_process_message(
            "farm/test-device/sensor",
            false,
            CONTROL
        ));
        assert!(!MessageHandler::should_process_message(
            "farm/other-device/control",
            false,
            CONTROL
        ));
    }

    #[test]
    fn test_route_mqtt_event() {
        use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Disconnect, Packet};

        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: rumqttc::v5::mqttbytes::v5::DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));

        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from(CONTROL),
            pkid: 1,
            payload: Bytes::from(r#"{"type":"pump","action":"off"}"#),
            properties: None,
        }));

        if let EventRoute::MessageReceived {
            topic,
            payload,
            retain,
        } = MessageHandler::route_mqtt_event(&publish)
        {
            assert_eq!(topic, CONTROL);
            assert_eq!(payload, br#"{"type":"pump","action":"off"}"#);
            assert!(!retain);
        } else {
            panic!("Expected MessageReceived route");
        }
    }

    #[test]
    fn test_route_outgoing_events() {
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::OutgoingDisconnect
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        ));
    }

    #[test]
    fn test_format_payloads() {
        let telemetry = TelemetryPayload {
            device_id: "test-device".to_string(),
            reading: SensorReading::absent(1.0),
        };
        let payload = MessageHandler::format_payload(&telemetry).unwrap();
        let text = String::from_utf8(payload).unwrap();
        assert!(text.contains("\"deviceId\":\"test-device\""));
        assert!(text.contains("\"co2\":null"));

        let lifecycle = MessageHandler::format_payload(&LifecycleStatus::online("d")).unwrap();
        assert!(String::from_utf8(lifecycle).unwrap().contains("online"));
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(
            MessageHandler::qos_for(DeliveryGuarantee::AtMostOnce),
            QoS::AtMostOnce
        );
        assert_eq!(
            MessageHandler::qos_for(DeliveryGuarantee::AtLeastOnce),
            QoS::AtLeastOnce
        );
    }

    #[tokio::test]
    async fn test_message_forwarder() {
        let mut forwarder = MessageForwarder::new();
        let envelope = CommandEnvelope::new("led", "on");

        // Should fail without sender
        assert!(forwarder.forward_command(envelope.clone()).is_err());

        let (tx, mut rx) = mpsc::channel(1);
        forwarder.set_command_sender(tx);

        assert!(forwarder.forward_command(envelope.clone()).is_ok());

        // Queue of one is now full: the next command is dropped, not awaited
        let overflow = forwarder.forward_command(CommandEnvelope::new("fan", "on"));
        assert!(overflow.unwrap_err().contains("queue full"));

        assert_eq!(rx.recv().await, Some(envelope));
    }

    #[tokio::test]
    async fn test_message_forwarder_closed_channel() {
        let mut forwarder = MessageForwarder::new();
        let (tx, rx) = mpsc::channel(4);
        forwarder.set_command_sender(tx);
        drop(rx);

        let result = forwarder.forward_command(CommandEnvelope::new("pump", "on"));
        assert!(result.unwrap_err().contains("closed"));
    }
}
