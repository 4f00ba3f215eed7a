//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use farm_agent::config::{AgentConfig, ConfigError};
use farm_agent::protocol::TopicSet;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[device]
id = "greenhouse-01"

[mqtt]
broker_url = "mqtt://192.168.0.10:1883"
username_env = "FARM_MQTT_USER"
password_env = "FARM_MQTT_PASS"

[telemetry]
interval_secs = 5

[camera]
snapshot_path = "/tmp/latest.jpg"
"#,
    );

    let config = AgentConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.id, "greenhouse-01");
    assert_eq!(config.mqtt.broker_url, "mqtt://192.168.0.10:1883");
    assert_eq!(config.mqtt.username_env.as_deref(), Some("FARM_MQTT_USER"));
    assert_eq!(config.telemetry.interval_secs, 5);
    assert_eq!(
        config.camera.snapshot_path.as_deref(),
        Some(Path::new("/tmp/latest.jpg"))
    );
}

#[test]
fn test_topics_follow_configured_root() {
    let temp_file = write_config(
        r#"
[device]
id = "house-7"
topic_root = "/site-a/"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );

    let config = AgentConfig::load_from_file(temp_file.path()).unwrap();
    let topics = TopicSet::for_device(&config.device.topic_root, &config.device.id);

    assert_eq!(topics.sensor, "site-a/house-7/sensor");
    assert_eq!(topics.status, "site-a/house-7/status");
    assert_eq!(topics.control, "site-a/house-7/control");
    assert_eq!(topics.image, "site-a/house-7/image");
}

#[test]
fn test_missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = AgentConfig::load_from_file(&dir.path().join("farm-agent.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[device\nid = ");
    let result = AgentConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_required_section_is_a_parse_error() {
    let temp_file = write_config(
        r#"
[device]
id = "no-broker"
"#,
    );
    let result = AgentConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_device_id_with_topic_characters_rejected() {
    for bad_id in ["", "green house", "farm/01", "dev+", "dev#"] {
        let temp_file = write_config(&format!(
            r#"
[device]
id = "{bad_id}"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#
        ));
        let result = AgentConfig::load_from_file(temp_file.path());
        assert!(
            matches!(result, Err(ConfigError::InvalidDeviceId(_))),
            "device id {bad_id:?} should be rejected, got {result:?}"
        );
    }
}

#[test]
fn test_invalid_reconnect_settings_rejected() {
    let temp_file = write_config(
        r#"
[device]
id = "greenhouse-01"

[mqtt]
broker_url = "mqtt://localhost:1883"

[mqtt.reconnect]
backoff_ms = [100, 0]
"#,
    );

    let result = AgentConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_zero_max_attempts_rejected() {
    let temp_file = write_config(
        r#"
[device]
id = "greenhouse-01"

[mqtt]
broker_url = "mqtt://localhost:1883"

[mqtt.reconnect]
max_attempts = 0
"#,
    );

    let result = AgentConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_shown_configuration_reloads_identically() {
    let temp_file = write_config(
        r#"
[device]
id = "greenhouse-01"
topic_root = "site-a"

[mqtt]
broker_url = "mqtts://broker.example.com:8883"
require_connection = true

[mqtt.reconnect]
backoff_ms = [100, 200]
max_attempts = 3

[telemetry]
interval_secs = 30
"#,
    );
    let config = AgentConfig::load_from_file(temp_file.path()).unwrap();

    let shown = toml::to_string_pretty(&config).unwrap();
    let reloaded = AgentConfig::from_toml_str(&shown).unwrap();

    assert_eq!(reloaded, config);
}
