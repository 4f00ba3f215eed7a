//! Integration Tests for Agent Startup When Broker is Down
//!
//! A field device often boots before the network or the broker is up:
//! - `connect()` reports failure within the configured timeout
//! - the client keeps retrying in the background
//! - publishing fails fast instead of blocking telemetry
//! - shutdown still completes promptly


use farm_agent::agent::FarmAgent;
use farm_agent::protocol::TopicSet;
use farm_agent::testing::MockHardware;
use farm_agent::transport::mqtt::{MqttClient, MqttError};
use farm_agent::transport::{ConnectionState, DeliveryGuarantee, Transport};
use std::time::{Duration, Instant};
use tokio::time::timeout;

fn unreachable_client(port: u16) -> MqttClient {
    MqttClient::new(
        "startup-retry-device",
        TopicSet::for_device("farm", "startup-retry-device"),
        test_helpers::unreachable_broker(port),
    )
    .expect("Client creation should succeed even if broker is down")
}

#[tokio::test]
async fn test_connect_fails_within_timeout_when_broker_unavailable() {
    let mut client = unreachable_client(9999);

    let start = Instant::now();
    let result = timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("connect must honor its own timeout");

    assert!(result.is_err(), "Connection should fail when broker unavailable");
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(!client.is_connected());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_client_keeps_retrying_after_failed_connect() {
    let mut client = unreachable_client(9998);
    let mut state = client.subscribe_state();

    let _ = client.connect().await;

    // Attempts continue in the background: the state keeps cycling
    // through Connecting rather than settling
    let saw_retry = timeout(Duration::from_secs(2), async {
        loop {
            if state.changed().await.is_err() {
                return false;
            }
            if *state.borrow_and_update() == ConnectionState::Connecting {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false);

    assert!(saw_retry, "client should still be retrying");
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_publish_fails_fast_while_disconnected() {
    let mut client = unreachable_client(9997);
    let _ = client.connect().await;

    let start = Instant::now();
    let result = client
        .publish(
            &client.topics().sensor.clone(),
            b"{}".to_vec(),
            DeliveryGuarantee::AtMostOnce,
            false,
        )
        .await;

    assert!(matches!(result, Err(MqttError::NotConnected { .. })));
    assert!(start.elapsed() < Duration::from_millis(100));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_prompt() {
    let mut client = unreachable_client(9996);
    let _ = client.connect().await;

    let result = timeout(Duration::from_secs(3), async {
        client.disconnect().await?;
        client.disconnect().await
    })
    .await
    .expect("disconnect should not hang while reconnecting");

    assert!(result.is_ok());
    assert!(matches!(
        client.connection_state(),
        ConnectionState::Disconnected(_)
    ));
}

#[tokio::test]
async fn test_agent_runs_degraded_and_shuts_down_cleanly() {
    let mut config = test_helpers::test_config();
    config.mqtt = test_helpers::unreachable_broker(9995);
    let topics = TopicSet::for_device(&config.device.topic_root, &config.device.id);
    let transport = MqttClient::new(&config.device.id, topics, config.mqtt.clone()).unwrap();
    let hardware = MockHardware::new();

    let mut agent = FarmAgent::new(config, transport, hardware.hardware_set());
    agent
        .start()
        .await
        .expect("agent should start degraded without a broker");
    assert!(agent.is_running());

    let report = timeout(Duration::from_secs(10), agent.shutdown())
        .await
        .expect("shutdown should not hang without a broker")
        .expect("first shutdown runs");

    assert!(report.actuator_failures.is_empty());
    assert!(hardware.actuators.outputs().is_all_off());
    assert!(hardware.sensors.is_released());
}

#[tokio::test]
async fn test_agent_aborts_when_connection_required() {
    let mut config = test_helpers::strict_test_config();
    config.mqtt = test_helpers::unreachable_broker(9994);
    config.mqtt.require_connection = true;
    let topics = TopicSet::for_device(&config.device.topic_root, &config.device.id);
    let transport = MqttClient::new(&config.device.id, topics, config.mqtt.clone()).unwrap();

    let mut agent = FarmAgent::new(config, transport, MockHardware::new().hardware_set());

    let result = timeout(Duration::from_secs(5), agent.start())
        .await
        .expect("startup should give up within the connect timeout");
    assert!(result.is_err());
    assert!(!agent.is_running());
}
