//! In-memory sensors and relays for running without a hardware backend

use super::{ActuatorLayer, HardwareError, SensorLayer};
use crate::protocol::{unix_timestamp, Actuator, DeviceStatus, SensorReading};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Sensors reporting fixed nominal greenhouse values
#[derive(Debug)]
pub struct SimulatedSensors {
    failing: BTreeSet<&'static str>,
    released: AtomicBool,
}

impl SimulatedSensors {
    pub const TEMPERATURE: f64 = 25.0;
    pub const HUMIDITY: f64 = 60.0;
    pub const LIGHT: f64 = 500.0;
    pub const CO2: f64 = 430.0;
    pub const EC: f64 = 1.5;
    pub const TDS: f64 = 750.0;

    pub fn new() -> Self {
        Self {
            failing: BTreeSet::new(),
            released: AtomicBool::new(false),
        }
    }

    /// Make one reading report as failed; unknown names are ignored
    pub fn with_failing(mut self, field: &str) -> Self {
        if let Some(known) = SensorReading::FIELDS.iter().find(|f| **f == field) {
            self.failing.insert(*known);
        }
        self
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn value(&self, field: &str, nominal: f64) -> Option<f64> {
        (!self.failing.contains(field)).then_some(nominal)
    }
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorLayer for SimulatedSensors {
    async fn read_all(&self) -> SensorReading {
        SensorReading {
            temperature: self.value("temperature", Self::TEMPERATURE),
            humidity: self.value("humidity", Self::HUMIDITY),
            light: self.value("light", Self::LIGHT),
            co2: self.value("co2", Self::CO2),
            ec: self.value("ec", Self::EC),
            tds: self.value("tds", Self::TDS),
            timestamp: unix_timestamp(),
        }
    }

    async fn release(&self) -> Result<(), HardwareError> {
        self.released.store(true, Ordering::SeqCst);
        info!("Simulated sensors released");
        Ok(())
    }
}

/// Relays that only exist in memory
#[derive(Debug, Default)]
pub struct SimulatedActuators {
    outputs: Mutex<DeviceStatus>,
}

impl SimulatedActuators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current output of every relay
    pub fn snapshot(&self) -> DeviceStatus {
        self.outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ActuatorLayer for SimulatedActuators {
    async fn set_actuator(&self, actuator: Actuator, on: bool) -> Result<(), HardwareError> {
        self.outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set(actuator, on);
        debug!(actuator = %actuator, on, "Simulated relay switched");
        Ok(())
    }

    async fn get_actuator(&self, actuator: Actuator) -> Result<bool, HardwareError> {
        Ok(self.snapshot().get(actuator))
    }
}
