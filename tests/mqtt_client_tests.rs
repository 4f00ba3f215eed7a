//! Integration tests for MQTT client
//!
//! Tests the MQTT client's behavior that does not need a broker:
//! - Client construction from configuration (plain, TLS, credentials)
//! - Broker URL validation
//! - Publish gating before a session exists
//! - Reconnection backoff configuration


use farm_agent::config::MqttSection;
use farm_agent::protocol::TopicSet;
use farm_agent::transport::mqtt::{
    configure_mqtt_options, ConnectionState, HealthMonitor, MqttClient, MqttError,
    ReconnectConfig, ReconnectionDecision,
};
use farm_agent::transport::{DeliveryGuarantee, Transport};

fn test_mqtt_config() -> MqttSection {
    test_helpers::test_config().mqtt
}

fn topics() -> TopicSet {
    TopicSet::for_device("farm", "test-device")
}

#[test]
fn test_mqtt_client_creation() {
    let client = MqttClient::new("test-device", topics(), test_mqtt_config())
        .expect("Client creation should succeed");

    assert!(
        !client.is_connected(),
        "Client should not be connected until connect() is called"
    );
    assert!(matches!(
        client.connection_state(),
        ConnectionState::Disconnected(_)
    ));
    assert_eq!(client.topics().control, "farm/test-device/control");
}

#[test]
fn test_mqtt_client_creation_with_tls() {
    let mut config = test_mqtt_config();
    config.broker_url = "mqtts://broker.example.com:8883".to_string();

    assert!(MqttClient::new("test-device", topics(), config).is_ok());
}

#[test]
fn test_mqtt_client_creation_with_auth() {
    std::env::set_var("FARM_MQTT_TEST_USER", "grower");
    std::env::set_var("FARM_MQTT_TEST_PASS", "secret");

    let mut config = test_mqtt_config();
    config.username_env = Some("FARM_MQTT_TEST_USER".to_string());
    config.password_env = Some("FARM_MQTT_TEST_PASS".to_string());

    assert_eq!(config.username().as_deref(), Some("grower"));
    assert!(configure_mqtt_options("test-device", &topics(), &config).is_ok());
    assert!(MqttClient::new("test-device", topics(), config).is_ok());
}

#[test]
fn test_mqtt_client_invalid_broker_url() {
    for url in ["not a url", "http://localhost:1883", "ws://localhost:1883"] {
        let mut config = test_mqtt_config();
        config.broker_url = url.to_string();

        let result = MqttClient::new("test-device", topics(), config);
        assert!(
            matches!(result, Err(MqttError::InvalidBrokerUrl(_))),
            "{url} should be rejected"
        );
    }
}

#[test]
fn test_every_session_attempt_uses_the_device_client_id() {
    let config = test_mqtt_config();
    let first = configure_mqtt_options("test-device", &topics(), &config).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = configure_mqtt_options("test-device", &topics(), &config).unwrap();

    // A reconnect must take over the previous session, not run beside it
    assert_eq!(first.client_id(), "farm-test-device");
    assert_eq!(first.client_id(), second.client_id());
}

#[tokio::test]
async fn test_publish_without_connection() {
    let client = MqttClient::new("test-device", topics(), test_mqtt_config()).unwrap();

    for guarantee in [DeliveryGuarantee::AtMostOnce, DeliveryGuarantee::AtLeastOnce] {
        let result = client
            .publish("farm/test-device/sensor", b"{}".to_vec(), guarantee, false)
            .await;
        assert!(
            matches!(result, Err(MqttError::NotConnected { .. })),
            "publish must fail fast before connecting"
        );
    }
}

#[tokio::test]
async fn test_disconnect_before_connect_is_noop() {
    let client = MqttClient::new("test-device", topics(), test_mqtt_config()).unwrap();

    client.disconnect().await.expect("disconnect should succeed");
    client.disconnect().await.expect("disconnect should be idempotent");
    assert!(!client.is_connected());
}

#[test]
fn test_reconnect_backoff_follows_configured_pattern() {
    let mut config = test_mqtt_config();
    config.reconnect.backoff_ms = vec![100, 250];
    config.reconnect.sustained_delay_ms = 1000;
    config.reconnect.max_attempts = Some(4);

    let reconnect = config.reconnect_config();
    let delays: Vec<u64> = (1..=5)
        .map(|attempt| reconnect.calculate_backoff_delay(attempt))
        .collect();
    assert_eq!(delays, vec![100, 250, 1000, 1000, 1000]);

    assert_eq!(
        HealthMonitor::should_attempt_reconnection(3, &reconnect, false),
        ReconnectionDecision::Proceed {
            attempt: 4,
            delay_ms: 1000
        }
    );
    assert_eq!(
        HealthMonitor::should_attempt_reconnection(4, &reconnect, false),
        ReconnectionDecision::AbortMaxAttemptsExceeded
    );
    assert_eq!(
        HealthMonitor::should_attempt_reconnection(0, &reconnect, true),
        ReconnectionDecision::AbortShutdownRequested
    );
}

#[test]
fn test_reconnect_config_validation() {
    let valid = ReconnectConfig::default();
    assert!(HealthMonitor::validate_connection_config(&valid).is_ok());

    let zero_attempts = ReconnectConfig {
        max_attempts: Some(0),
        ..ReconnectConfig::default()
    };
    assert!(HealthMonitor::validate_connection_config(&zero_attempts).is_err());

    let zero_delay = ReconnectConfig {
        backoff_pattern: vec![100, 0],
        ..ReconnectConfig::default()
    };
    assert!(HealthMonitor::validate_connection_config(&zero_delay).is_err());
}
