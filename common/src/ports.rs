//! Capabilities the control loop depends on but does not implement.

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorError {
    #[error("sensor read failed: {0}")]
    ReadFailed(String),
    #[error("sensor returned a non-finite reading ({0})")]
    NonFinite(f64),
}

pub type SensorReading = Result<f64, SensorError>;

/// A restartable stream of temperature readings.
///
/// `start` hands out a fresh receiver for each run. The sequence is infinite
/// until `stop` is called, after which the producer finishes and the receiver
/// yields `None`.
pub trait TemperatureSource: Send + 'static {
    fn start(&mut self) -> mpsc::Receiver<SensorReading>;
    fn stop(&mut self);
}

/// Furnace or air-conditioner actuator.
///
/// Calls are fire-and-forget; the caller treats the transition as immediate.
pub trait EquipmentTrigger: Send + 'static {
    fn start(&mut self);
    fn stop(&mut self);
}

/// A single synchronous sensor read, e.g. one DHT11 conversion.
pub trait SensorProbe: Send + 'static {
    fn poll(&mut self) -> SensorReading;
}
