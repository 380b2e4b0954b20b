use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::topics::{
    SEGMENT_AC, SEGMENT_FURNACE, SEGMENT_SENSORS, SEGMENT_TARGET, SEGMENT_TEMPERATURE,
    SEGMENT_THERMOSTAT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermostatMode {
    Heating,
    Cooling,
}

impl ThermostatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heating => "Heating",
            Self::Cooling => "Cooling",
        }
    }

    /// Topic segment naming the equipment this mode drives.
    pub fn equipment(self) -> &'static str {
        match self {
            Self::Heating => SEGMENT_FURNACE,
            Self::Cooling => SEGMENT_AC,
        }
    }
}

impl fmt::Display for ThermostatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown thermostat mode '{0}', expected 'Heating' or 'Cooling'")]
pub struct ModeParseError(pub String);

impl FromStr for ThermostatMode {
    type Err = ModeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "heating" | "heat" => Ok(Self::Heating),
            "cooling" | "cool" => Ok(Self::Cooling),
            _ => Err(ModeParseError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Message,
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermostatEvent {
    pub kind: EventKind,
    pub topic: Vec<String>,
    pub message: String,
}

impl ThermostatEvent {
    pub fn message(topic: &[&str], message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Message,
            topic: topic.iter().map(|segment| segment.to_string()).collect(),
            message: message.into(),
        }
    }

    pub fn equipment(mode: ThermostatMode, on: bool) -> Self {
        Self::message(
            &[SEGMENT_THERMOSTAT, mode.equipment()],
            if on { "on" } else { "off" },
        )
    }

    pub fn temperature(temp: f64) -> Self {
        Self::message(
            &[SEGMENT_SENSORS, SEGMENT_TEMPERATURE, SEGMENT_THERMOSTAT],
            temp.to_string(),
        )
    }

    pub fn target(requested: f64) -> Self {
        Self::message(&[SEGMENT_THERMOSTAT, SEGMENT_TARGET], requested.to_string())
    }

    /// Topic segments joined with `/`, e.g. `thermostat/furnace`.
    pub fn topic_path(&self) -> String {
        self.topic.join("/")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub mode: ThermostatMode,
    pub target: f64,
    pub running: bool,
    #[serde(rename = "runtimeMs")]
    pub runtime_ms: u64,
    #[serde(rename = "lastTemp")]
    pub last_temp: Option<f64>,
}
