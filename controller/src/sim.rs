use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::info;

use hvac_common::{EquipmentTrigger, SensorProbe, SensorReading};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub start_temp: f64,
    pub drift_per_poll: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_temp: 70.0,
            drift_per_poll: -0.2,
        }
    }
}

#[derive(Debug)]
struct RoomState {
    temp: f64,
    drift_per_poll: f64,
}

/// Shared room model: the probe reads it, the triggers push it the other way.
#[derive(Debug, Clone)]
pub struct SimulatedRoom {
    state: Arc<Mutex<RoomState>>,
}

impl SimulatedRoom {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(RoomState {
                temp: config.start_temp,
                drift_per_poll: config.drift_per_poll,
            })),
        }
    }

    pub fn temperature(&self) -> f64 {
        self.lock().temp
    }

    pub fn drift(&self) -> f64 {
        self.lock().drift_per_poll
    }

    pub fn set_drift(&self, drift_per_poll: f64) {
        self.lock().drift_per_poll = drift_per_poll;
    }

    pub fn probe(&self) -> SimulatedProbe {
        SimulatedProbe { room: self.clone() }
    }

    pub fn trigger(&self, name: &'static str) -> SimulatedTrigger {
        SimulatedTrigger {
            name,
            room: self.clone(),
        }
    }

    fn advance(&self) -> f64 {
        let mut state = self.lock();
        state.temp += state.drift_per_poll;
        state.temp
    }

    fn reverse_drift(&self) {
        let mut state = self.lock();
        state.drift_per_poll = -state.drift_per_poll;
    }

    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SimulatedProbe {
    room: SimulatedRoom,
}

impl SensorProbe for SimulatedProbe {
    fn poll(&mut self) -> SensorReading {
        Ok(self.room.advance())
    }
}

pub struct SimulatedTrigger {
    name: &'static str,
    room: SimulatedRoom,
}

impl EquipmentTrigger for SimulatedTrigger {
    fn start(&mut self) {
        self.room.reverse_drift();
        info!("simulated {} started, drift now {}", self.name, self.room.drift());
    }

    fn stop(&mut self) {
        self.room.reverse_drift();
        info!("simulated {} stopped, drift now {}", self.name, self.room.drift());
    }
}
