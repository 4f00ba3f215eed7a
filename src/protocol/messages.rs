//! Wire message types for the farm device protocol
//!
//! Inbound commands are validated once at the boundary into [`ControlCommand`];
//! outbound payloads use camelCase keys (`deviceId`) to match what the
//! broker-side consumers expect.

use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Seconds since the Unix epoch with sub-second precision
pub fn unix_timestamp() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// One snapshot of every environmental reading the device knows about.
///
/// A reading the sensor layer could not produce is `None` and serializes as
/// JSON `null`. It is never dropped from the payload and never replaced by
/// a placeholder number, so consumers can tell "sensor failed" from "zero".
///
/// # Examples
/// ```
/// use farm_agent::protocol::SensorReading;
///
/// let reading = SensorReading {
///     temperature: Some(24.5),
///     humidity: None,
///     ..SensorReading::absent(1_700_000_000.0)
/// };
/// let json = serde_json::to_value(&reading).unwrap();
/// assert_eq!(json["temperature"], 24.5);
/// assert!(json["humidity"].is_null());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Air temperature in degrees Celsius
    pub temperature: Option<f64>,
    /// Relative humidity in percent
    pub humidity: Option<f64>,
    /// Illuminance in lux
    pub light: Option<f64>,
    /// CO2 concentration in ppm
    pub co2: Option<f64>,
    /// Electrical conductivity in mS/cm
    pub ec: Option<f64>,
    /// Total dissolved solids in ppm
    pub tds: Option<f64>,
    /// Capture time, seconds since epoch
    pub timestamp: f64,
}

impl SensorReading {
    /// Names of every reading in the schema, in payload order
    pub const FIELDS: [&'static str; 6] = ["temperature", "humidity", "light", "co2", "ec", "tds"];

    /// A snapshot where every reading is absent
    pub fn absent(timestamp: f64) -> Self {
        Self {
            temperature: None,
            humidity: None,
            light: None,
            co2: None,
            ec: None,
            tds: None,
            timestamp,
        }
    }

    /// Replace non-finite values with an explicit absence.
    ///
    /// JSON has no NaN or infinity; serde_json would quietly emit `null` for
    /// them, which is what we want, but doing it here keeps the in-memory
    /// record honest too.
    pub fn sanitized(self) -> Self {
        let keep = |value: Option<f64>| value.filter(|v| v.is_finite());
        Self {
            temperature: keep(self.temperature),
            humidity: keep(self.humidity),
            light: keep(self.light),
            co2: keep(self.co2),
            ec: keep(self.ec),
            tds: keep(self.tds),
            timestamp: self.timestamp,
        }
    }

    /// Number of readings that hold a value
    pub fn present_count(&self) -> usize {
        [
            self.temperature,
            self.humidity,
            self.light,
            self.co2,
            self.ec,
            self.tds,
        ]
        .iter()
        .filter(|value| value.is_some())
        .count()
    }
}

/// Actuators the device can switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actuator {
    Pump,
    Led,
    Fan,
}

impl Actuator {
    /// Every known actuator
    pub const ALL: [Actuator; 3] = [Actuator::Pump, Actuator::Led, Actuator::Fan];

    pub fn as_str(&self) -> &'static str {
        match self {
            Actuator::Pump => "pump",
            Actuator::Led => "led",
            Actuator::Fan => "fan",
        }
    }

    /// Look up an actuator by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commanded on/off state of every actuator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceStatus(BTreeMap<Actuator, bool>);

impl DeviceStatus {
    /// Every actuator off
    pub fn all_off() -> Self {
        Self(Actuator::ALL.into_iter().map(|a| (a, false)).collect())
    }

    pub fn get(&self, actuator: Actuator) -> bool {
        self.0.get(&actuator).copied().unwrap_or(false)
    }

    pub fn set(&mut self, actuator: Actuator, on: bool) {
        self.0.insert(actuator, on);
    }

    pub fn is_all_off(&self) -> bool {
        self.0.values().all(|on| !on)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Actuator, bool)> + '_ {
        self.0.iter().map(|(a, on)| (*a, *on))
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::all_off()
    }
}

/// Raw shape of an inbound control message: `{"type": ..., "action": ...}`
///
/// Missing fields deserialize as empty strings and are rejected later as an
/// unknown type or action; only payloads that are not a JSON object of
/// strings count as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub action: String,
}

impl CommandEnvelope {
    pub fn new(kind: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            action: action.into(),
        }
    }
}

/// A validated control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Turn one actuator on or off
    Switch { actuator: Actuator, on: bool },
    /// Turn every actuator off
    AllOff,
    /// Take a picture and publish it on the image topic
    Capture,
}

impl TryFrom<&CommandEnvelope> for ControlCommand {
    type Error = ProtocolError;

    fn try_from(envelope: &CommandEnvelope) -> Result<Self, Self::Error> {
        let unknown_action = || ProtocolError::UnknownAction {
            kind: envelope.kind.clone(),
            action: envelope.action.clone(),
        };

        if let Some(actuator) = Actuator::from_name(&envelope.kind) {
            return match envelope.action.as_str() {
                "on" => Ok(ControlCommand::Switch { actuator, on: true }),
                "off" => Ok(ControlCommand::Switch {
                    actuator,
                    on: false,
                }),
                _ => Err(unknown_action()),
            };
        }

        match (envelope.kind.as_str(), envelope.action.as_str()) {
            ("all", "off") => Ok(ControlCommand::AllOff),
            ("all", _) => Err(unknown_action()),
            ("camera", "capture") => Ok(ControlCommand::Capture),
            ("camera", _) => Err(unknown_action()),
            (other, _) => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// Errors raised while decoding inbound or encoding outbound messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed control payload: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("Unknown command type: '{0}'")]
    UnknownType(String),
    #[error("Unknown action '{action}' for command type '{kind}'")]
    UnknownAction { kind: String, action: String },
    #[error("Failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Telemetry message published on the sensor topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub device_id: String,
    #[serde(flatten)]
    pub reading: SensorReading,
}

/// Actuator state report published on the status topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub device_id: String,
    pub timestamp: f64,
    #[serde(flatten)]
    pub status: DeviceStatus,
}

/// Online/offline announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

/// Lifecycle message published on the status topic and used as the last will
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStatus {
    pub device_id: String,
    pub status: Connectivity,
    pub timestamp: f64,
}

impl LifecycleStatus {
    pub fn online(device_id: &str) -> Self {
        Self::now(device_id, Connectivity::Online)
    }

    pub fn offline(device_id: &str) -> Self {
        Self::now(device_id, Connectivity::Offline)
    }

    fn now(device_id: &str, status: Connectivity) -> Self {
        Self {
            device_id: device_id.to_string(),
            status,
            timestamp: unix_timestamp(),
        }
    }
}

/// A captured picture, held only until it has been published once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Image message published on the image topic; the picture is base64 text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub device_id: String,
    pub filename: String,
    pub timestamp: f64,
    pub image: String,
}

impl ImagePayload {
    pub fn from_artifact(device_id: &str, artifact: &ImageArtifact) -> Self {
        Self {
            device_id: device_id.to_string(),
            filename: artifact.filename.clone(),
            timestamp: unix_timestamp(),
            image: base64::engine::general_purpose::STANDARD.encode(&artifact.bytes),
        }
    }
}
