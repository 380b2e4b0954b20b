pub mod config;
pub mod control_loop;
pub mod events;
pub mod filter;
pub mod ports;
pub mod sensor;
pub mod thermostat;
pub mod topics;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, SensorConfig, TargetRange, ThermostatConfig};
pub use control_loop::ControlLoop;
pub use events::{EventStream, EventSubscription};
pub use filter::{MovingAverage, MovingAverageReader};
pub use ports::{EquipmentTrigger, SensorError, SensorProbe, SensorReading, TemperatureSource};
pub use sensor::PollingSensor;
pub use thermostat::{ThermostatEngine, HYSTERESIS_DEADBAND};
pub use topics::*;
pub use types::{ControllerStatus, EventKind, ModeParseError, ThermostatEvent, ThermostatMode};
