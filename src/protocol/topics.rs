//! Topic construction and device ID validation
//!
//! Every topic the agent touches is derived from a topic root (default `farm`)
//! and the device identifier: `{root}/{device_id}/{channel}`.

use thiserror::Error;

/// Default topic root used when the configuration does not override it
pub const DEFAULT_TOPIC_ROOT: &str = "farm";

/// Normalize an MQTT topic: no leading or trailing separators and no empty levels.
pub fn canonicalize_topic(topic: &str) -> String {
    topic
        .split('/')
        .filter(|level| !level.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Validate a device identifier.
///
/// Only `[a-zA-Z0-9._-]` is accepted so an identifier can never inject a
/// topic level separator or an MQTT wildcard into a subscription.
pub fn validate_device_id(device_id: &str) -> Result<(), ValidationError> {
    if device_id.is_empty() {
        return Err(ValidationError::EmptyDeviceId);
    }

    for ch in device_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidDeviceIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for device identifiers
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Device ID cannot be empty")]
    EmptyDeviceId,
    #[error("Device ID contains invalid character: '{0}'")]
    InvalidDeviceIdChar(char),
}

/// The four topics owned by one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    /// Telemetry, publish-only, at-most-once
    pub sensor: String,
    /// Device status and lifecycle announcements (also carries the last will)
    pub status: String,
    /// Inbound commands, subscribe-only
    pub control: String,
    /// Captured images, publish-only, at-least-once
    pub image: String,
}

impl TopicSet {
    pub fn for_device(root: &str, device_id: &str) -> Self {
        let build = |channel: &str| canonicalize_topic(&format!("{root}/{device_id}/{channel}"));
        Self {
            sensor: build("sensor"),
            status: build("status"),
            control: build("control"),
            image: build("image"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_topic_set_for_device() {
        let topics = TopicSet::for_device(DEFAULT_TOPIC_ROOT, "greenhouse-01");
        assert_eq!(topics.sensor, "farm/greenhouse-01/sensor");
        assert_eq!(topics.status, "farm/greenhouse-01/status");
        assert_eq!(topics.control, "farm/greenhouse-01/control");
        assert_eq!(topics.image, "farm/greenhouse-01/image");
    }

    #[test]
    fn test_topic_set_custom_root() {
        let topics = TopicSet::for_device("/site-a/farm/", "pi");
        assert_eq!(topics.control, "site-a/farm/pi/control");
    }

    #[test]
    fn test_canonicalize_topic_edge_cases() {
        assert_eq!(canonicalize_topic(""), "");
        assert_eq!(canonicalize_topic("///"), "");
        assert_eq!(canonicalize_topic("farm//d1///sensor/"), "farm/d1/sensor");
        assert_eq!(canonicalize_topic("/farm/d1/status"), "farm/d1/status");
    }

    proptest! {
        #[test]
        fn canonicalize_topic_is_idempotent(topic in ".*") {
            let first = canonicalize_topic(&topic);
            let second = canonicalize_topic(&first);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn canonicalize_topic_has_no_empty_levels(topic in ".*") {
            let result = canonicalize_topic(&topic);
            prop_assert!(!result.contains("//"));
            prop_assert!(!result.starts_with('/'));
            prop_assert!(!result.ends_with('/'));
        }

        #[test]
        fn test_valid_device_id_format(id in "[a-zA-Z0-9._-]{1,64}") {
            prop_assert!(validate_device_id(&id).is_ok(), "Valid device ID should pass: {}", id);
        }

        #[test]
        fn test_invalid_device_id_chars(id in "[^a-zA-Z0-9._-]{1}[a-zA-Z0-9._-]*") {
            prop_assert!(validate_device_id(&id).is_err(), "Invalid device ID should fail: {}", id);
        }

        #[test]
        fn valid_device_ids_yield_three_level_topics(id in "[a-zA-Z0-9._-]{1,32}") {
            let topics = TopicSet::for_device(DEFAULT_TOPIC_ROOT, &id);
            prop_assert_eq!(topics.control.split('/').count(), 3);
            prop_assert!(!topics.control.contains('+'));
            prop_assert!(!topics.control.contains('#'));
        }
    }

    #[test]
    fn test_device_id_validation_examples() {
        assert!(validate_device_id("smartfarm-01").is_ok());
        assert!(validate_device_id("pi_4b.greenhouse").is_ok());

        assert_eq!(validate_device_id(""), Err(ValidationError::EmptyDeviceId));
        assert_eq!(
            validate_device_id("farm/evil"),
            Err(ValidationError::InvalidDeviceIdChar('/'))
        );
        assert_eq!(
            validate_device_id("all+"),
            Err(ValidationError::InvalidDeviceIdChar('+'))
        );
        assert_eq!(
            validate_device_id("#"),
            Err(ValidationError::InvalidDeviceIdChar('#'))
        );
    }
}
