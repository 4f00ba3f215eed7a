//! Periodic sensor publishing
//!
//! One snapshot per interval, published at-most-once on the sensor topic.
//! A failed read or publish is logged and the loop waits for the next tick:
//! failures never shorten the interval.

use crate::config::ConfigError;
use crate::error::{AgentError, AgentResult};
use crate::hardware::SensorLayer;
use crate::protocol::{SensorReading, TelemetryPayload, TopicSet};
use crate::transport::mqtt::MessageHandler;
use crate::transport::{DeliveryGuarantee, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

/// Publishes one sensor snapshot per interval
pub struct TelemetryPublisher<T: Transport> {
    device_id: String,
    sensor_topic: String,
    transport: Arc<T>,
    sensors: Arc<dyn SensorLayer>,
    interval: Duration,
}

impl<T: Transport> TelemetryPublisher<T> {
    /// Fails with a config error for a zero interval
    pub fn new(
        device_id: &str,
        topics: &TopicSet,
        transport: Arc<T>,
        sensors: Arc<dyn SensorLayer>,
        interval: Duration,
    ) -> AgentResult<Self> {
        if interval.is_zero() {
            return Err(AgentError::Config(ConfigError::InvalidConfig(
                "telemetry interval must be greater than 0".to_string(),
            )));
        }
        Ok(Self {
            device_id: device_id.to_string(),
            sensor_topic: topics.sensor.clone(),
            transport,
            sensors,
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Read the sensors once and publish the snapshot
    pub async fn publish_once(&self) -> AgentResult<SensorReading> {
        let reading = self.sensors.read_all().await.sanitized();
        if reading.present_count() < SensorReading::FIELDS.len() {
            debug!(
                present = reading.present_count(),
                "Publishing snapshot with absent readings"
            );
        }

        let payload = MessageHandler::format_payload(&TelemetryPayload {
            device_id: self.device_id.clone(),
            reading,
        })?;

        self.transport
            .publish(
                &self.sensor_topic,
                payload,
                DeliveryGuarantee::AtMostOnce,
                false,
            )
            .await
            .map_err(AgentError::transport)?;

        Ok(reading)
    }

    /// Run until `stop` turns true; returns the number of cycles attempted
    ///
    /// The stop flag is only observed between cycles, so a publish in
    /// flight always completes.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        info!(
            interval_secs = self.interval.as_secs_f64(),
            topic = %self.sensor_topic,
            "Telemetry loop started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    cycles += 1;
                    let span = crate::telemetry_span!(cycle = cycles, device_id = %self.device_id);
                    if let Err(e) = self.publish_once().instrument(span).await {
                        warn!(
                            component = "telemetry",
                            operation = "publish",
                            cycle = cycles,
                            error = %e,
                            "Telemetry cycle failed"
                        );
                    }
                }
            }
        }

        info!(cycles, "Telemetry loop stopped");
        cycles
    }
}
