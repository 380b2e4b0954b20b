use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::types::ThermostatMode;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{mode} target range is inverted: min {min} > max {max}")]
    InvertedRange {
        mode: ThermostatMode,
        min: f64,
        max: f64,
    },
    #[error("{mode} target range bounds must be finite")]
    NonFiniteRange { mode: ThermostatMode },
    #[error("max overshoot must be a finite, non-negative number of degrees (got {0})")]
    InvalidOvershoot(f64),
    #[error("moving average window size must be at least 1")]
    ZeroWindow,
    #[error("sensor poll delay must be greater than zero")]
    ZeroPollDelay,
}

/// Inclusive bounds on the target temperature for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub min: f64,
    pub max: f64,
}

impl TargetRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    fn validate(&self, mode: ThermostatMode) -> Result<(), ConfigError> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(ConfigError::NonFiniteRange { mode });
        }
        if self.min > self.max {
            return Err(ConfigError::InvertedRange {
                mode,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub poll_delay_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            poll_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub mode: ThermostatMode,
    pub heating_range: TargetRange,
    pub cooling_range: TargetRange,
    pub max_overshoot_temp: f64,
    pub max_run_time_ms: u64,
    pub min_delay_between_runs_ms: u64,
    /// Carried for integrators; the control loop broadcasts every reading.
    pub temp_emit_delay_ms: u64,
    pub window_size: usize,
    pub sensor: SensorConfig,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            mode: ThermostatMode::Heating,
            heating_range: TargetRange::new(60.0, 75.0),
            cooling_range: TargetRange::new(68.0, 80.0),
            max_overshoot_temp: 4.0,
            max_run_time_ms: 1_800_000,
            min_delay_between_runs_ms: 10_000,
            temp_emit_delay_ms: 300_000,
            window_size: 3,
            sensor: SensorConfig::default(),
        }
    }
}

impl ThermostatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.heating_range.validate(ThermostatMode::Heating)?;
        self.cooling_range.validate(ThermostatMode::Cooling)?;

        if !self.max_overshoot_temp.is_finite() || self.max_overshoot_temp < 0.0 {
            return Err(ConfigError::InvalidOvershoot(self.max_overshoot_temp));
        }
        self.window()?;
        if self.sensor.poll_delay_ms == 0 {
            return Err(ConfigError::ZeroPollDelay);
        }
        Ok(())
    }

    pub fn target_range(&self, mode: ThermostatMode) -> TargetRange {
        match mode {
            ThermostatMode::Heating => self.heating_range,
            ThermostatMode::Cooling => self.cooling_range,
        }
    }

    /// Moving average window the control loop smooths readings with.
    pub fn window(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.window_size).ok_or(ConfigError::ZeroWindow)
    }

    /// Safest setpoint for a mode: the coldest heating target or the warmest cooling one.
    pub fn default_target(&self, mode: ThermostatMode) -> f64 {
        match mode {
            ThermostatMode::Heating => self.heating_range.min,
            ThermostatMode::Cooling => self.cooling_range.max,
        }
    }
}
