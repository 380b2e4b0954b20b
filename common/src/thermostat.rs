use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    config::{ConfigError, ThermostatConfig},
    events::{EventStream, EventSubscription},
    ports::EquipmentTrigger,
    types::{ControllerStatus, ThermostatEvent, ThermostatMode},
};

/// Fixed band around the target inside which no start is attempted.
pub const HYSTERESIS_DEADBAND: f64 = 1.0;

/// Bang-bang decision engine with overshoot damping and run-time interlocks.
///
/// Time is supplied by the caller as monotonic milliseconds so the engine
/// stays deterministic under test.
pub struct ThermostatEngine {
    config: ThermostatConfig,
    mode: ThermostatMode,
    target: f64,
    target_overshoot_by: f64,

    start_ms: Option<u64>,
    stop_ms: Option<u64>,
    last_temp: Option<f64>,

    furnace: Box<dyn EquipmentTrigger>,
    ac: Box<dyn EquipmentTrigger>,
    events: EventStream,
    followers: Vec<mpsc::UnboundedSender<EventSubscription>>,
}

impl ThermostatEngine {
    pub fn new(
        config: ThermostatConfig,
        furnace: impl EquipmentTrigger,
        ac: impl EquipmentTrigger,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mode = config.mode;
        let target = config.default_target(mode);

        Ok(Self {
            config,
            mode,
            target,
            target_overshoot_by: 0.0,
            start_ms: None,
            stop_ms: None,
            last_temp: None,
            furnace: Box::new(furnace),
            ac: Box::new(ac),
            events: EventStream::new(),
            followers: Vec::new(),
        })
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    pub fn mode(&self) -> ThermostatMode {
        self.mode
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn target_overshoot_by(&self) -> f64 {
        self.target_overshoot_by
    }

    pub fn last_temp(&self) -> Option<f64> {
        self.last_temp
    }

    pub fn is_running(&self) -> bool {
        self.start_ms.is_some()
    }

    /// Stream for the current run; a fresh one is installed when a run completes.
    pub fn events(&self) -> EventStream {
        self.events.clone()
    }

    /// Subscribes to the current stream and to every stream installed after it.
    ///
    /// The subscription for a new stream is handed out when the stream is
    /// installed, before anything can be emitted on it.
    pub fn follow_runs(&mut self) -> mpsc::UnboundedReceiver<EventSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(self.events.subscribe()).is_ok() {
            self.followers.push(tx);
        }
        rx
    }

    /// Clamps into the current mode's range. The emitted event carries the
    /// requested value, not the clamped one.
    pub fn set_target(&mut self, requested: f64) -> bool {
        if requested.is_nan() {
            warn!("ignoring NaN target request");
            return false;
        }

        let clamped = self.config.target_range(self.mode).clamp(requested);
        if clamped != self.target {
            self.target = clamped;
            info!("target set to {clamped} (requested {requested})");
            self.events.emit(ThermostatEvent::target(requested));
            true
        } else {
            false
        }
    }

    /// Switches mode and resets the target to the mode's default.
    ///
    /// Equipment already running keeps running; the next stop goes to the
    /// trigger of the new mode.
    pub fn set_mode(&mut self, mode: ThermostatMode) -> bool {
        let changed = self.mode != mode;
        self.mode = mode;
        self.set_target(self.config.default_target(mode));
        if changed && self.is_running() {
            warn!("mode switched to {mode} while equipment is running");
        }
        changed
    }

    pub fn temp_received(&mut self, temp: f64, now_ms: u64) {
        debug!("temperature received: {temp}");
        self.last_temp = Some(temp);

        match self.mode {
            ThermostatMode::Heating => {
                if temp < self.target - HYSTERESIS_DEADBAND {
                    self.try_start_trigger(temp, now_ms);
                } else if temp >= self.target + self.target_overshoot_by {
                    self.stop_trigger(now_ms);
                }
            }
            ThermostatMode::Cooling => {
                if temp > self.target + HYSTERESIS_DEADBAND {
                    self.try_start_trigger(temp, now_ms);
                } else if temp <= self.target - self.target_overshoot_by {
                    self.stop_trigger(now_ms);
                }
            }
        }

        self.events.emit(ThermostatEvent::temperature(temp));
    }

    pub fn runtime_ms(&self, now_ms: u64) -> u64 {
        self.start_ms
            .map(|start| now_ms.saturating_sub(start))
            .unwrap_or(0)
    }

    pub fn status(&self, now_ms: u64) -> ControllerStatus {
        ControllerStatus {
            mode: self.mode,
            target: self.target,
            running: self.is_running(),
            runtime_ms: self.runtime_ms(now_ms),
            last_temp: self.last_temp,
        }
    }

    /// Completes the current event stream and installs a fresh one.
    pub(crate) fn complete_run(&mut self) {
        self.events.complete();
        self.events = EventStream::new();

        let events = self.events.clone();
        self.followers
            .retain(|follower| follower.send(events.subscribe()).is_ok());
    }

    fn try_start_trigger(&mut self, temp: f64, now_ms: u64) {
        if let Some(start) = self.start_ms {
            if now_ms.saturating_sub(start) > self.config.max_run_time_ms {
                warn!(
                    "{} exceeded max run time of {} ms, forcing stop",
                    self.mode.equipment(),
                    self.config.max_run_time_ms
                );
                self.stop_trigger(now_ms);
            }
        }

        if self.is_running() {
            return;
        }

        let rested = self
            .stop_ms
            .map(|stop| now_ms.saturating_sub(stop) > self.config.min_delay_between_runs_ms)
            .unwrap_or(true);

        if rested {
            self.target_overshoot_by =
                (self.target - temp).abs().min(self.config.max_overshoot_temp);
            self.start_trigger(now_ms);
        } else {
            debug!("equipment stopped too recently, ignoring reading {temp}");
        }
    }

    fn start_trigger(&mut self, now_ms: u64) {
        if self.is_running() {
            return;
        }

        self.start_ms = Some(now_ms);
        self.current_trigger().start();
        info!(
            "{} on (target {}, overshoot by {})",
            self.mode.equipment(),
            self.target,
            self.target_overshoot_by
        );
        self.events.emit(ThermostatEvent::equipment(self.mode, true));
    }

    fn stop_trigger(&mut self, now_ms: u64) {
        if !self.is_running() {
            return;
        }

        self.start_ms = None;
        self.stop_ms = Some(now_ms);
        self.current_trigger().stop();
        info!("{} off", self.mode.equipment());
        self.events.emit(ThermostatEvent::equipment(self.mode, false));
    }

    fn current_trigger(&mut self) -> &mut dyn EquipmentTrigger {
        match self.mode {
            ThermostatMode::Heating => self.furnace.as_mut(),
            ThermostatMode::Cooling => self.ac.as_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::TargetRange, events::EventSubscription, testing::RecordingTrigger};

    struct Harness {
        engine: ThermostatEngine,
        furnace: RecordingTrigger,
        ac: RecordingTrigger,
        events: EventSubscription,
    }

    fn test_config() -> ThermostatConfig {
        ThermostatConfig {
            heating_range: TargetRange::new(55.0, 75.0),
            cooling_range: TargetRange::new(68.0, 80.0),
            max_overshoot_temp: 1.0,
            max_run_time_ms: 2_000,
            min_delay_between_runs_ms: 5_000,
            ..ThermostatConfig::default()
        }
    }

    fn harness(config: ThermostatConfig) -> Harness {
        let furnace = RecordingTrigger::default();
        let ac = RecordingTrigger::default();
        let engine = ThermostatEngine::new(config, furnace.clone(), ac.clone()).unwrap();
        let events = engine.events().subscribe();
        Harness {
            engine,
            furnace,
            ac,
            events,
        }
    }

    fn equipment_messages(events: &mut EventSubscription) -> Vec<(String, String)> {
        events
            .drain()
            .into_iter()
            .filter(|event| event.topic.len() == 2 && event.topic[1] != "target")
            .map(|event| (event.topic_path(), event.message))
            .collect()
    }

    #[test]
    fn defaults_to_safe_targets() {
        let mut h = harness(test_config());
        assert_eq!(h.engine.target(), 55.0);

        assert!(h.engine.set_mode(ThermostatMode::Cooling));
        assert_eq!(h.engine.target(), 80.0);
        assert_eq!(h.events.drain(), vec![ThermostatEvent::target(80.0)]);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = ThermostatConfig {
            heating_range: TargetRange::new(75.0, 55.0),
            ..test_config()
        };
        let result = ThermostatEngine::new(
            config,
            RecordingTrigger::default(),
            RecordingTrigger::default(),
        );
        assert!(matches!(result, Err(ConfigError::InvertedRange { .. })));
    }

    #[test]
    fn clamps_target_and_reports_requested_value() {
        let mut h = harness(test_config());

        assert!(h.engine.set_target(90.0));
        assert_eq!(h.engine.target(), 75.0);

        assert!(h.engine.set_target(40.0));
        assert_eq!(h.engine.target(), 55.0);

        assert!(h.engine.set_target(62.5));
        assert_eq!(h.engine.target(), 62.5);

        assert_eq!(
            h.events.drain(),
            vec![
                ThermostatEvent::target(90.0),
                ThermostatEvent::target(40.0),
                ThermostatEvent::target(62.5),
            ]
        );
    }

    #[test]
    fn unchanged_target_emits_nothing() {
        let mut h = harness(test_config());
        h.engine.set_target(75.0);
        h.events.drain();

        assert!(!h.engine.set_target(75.0));
        assert!(!h.engine.set_target(99.0));
        assert!(!h.engine.set_target(f64::NAN));
        assert!(h.events.drain().is_empty());
    }

    #[test]
    fn tiny_target_changes_are_applied() {
        let mut h = harness(ThermostatConfig {
            heating_range: TargetRange::new(0.0, 75.0),
            ..test_config()
        });
        assert_eq!(h.engine.target(), 0.0);

        assert!(h.engine.set_target(1e-17));
        assert_eq!(h.engine.target(), 1e-17);
        assert_eq!(h.events.drain(), vec![ThermostatEvent::target(1e-17)]);
    }

    #[test]
    fn starts_once_below_deadband() {
        let mut h = harness(test_config());
        h.engine.set_target(70.0);

        for (i, temp) in [71.0, 70.0, 69.0, 68.0, 67.0].into_iter().enumerate() {
            h.engine.temp_received(temp, i as u64 * 100);
            assert_eq!(h.engine.is_running(), temp < 69.0);
        }

        assert_eq!(h.furnace.calls(), vec!["start"]);
        assert!(h.ac.calls().is_empty());
        assert_eq!(
            equipment_messages(&mut h.events),
            vec![("thermostat/furnace".to_string(), "on".to_string())]
        );
    }

    #[test]
    fn temperature_event_follows_decision() {
        let mut h = harness(test_config());
        h.engine.set_target(70.0);
        h.events.drain();

        h.engine.temp_received(65.0, 0);

        assert_eq!(
            h.events.drain(),
            vec![
                ThermostatEvent::equipment(ThermostatMode::Heating, true),
                ThermostatEvent::temperature(65.0),
            ]
        );
    }

    #[test]
    fn stops_only_after_overshoot() {
        let config = ThermostatConfig {
            max_overshoot_temp: 4.0,
            max_run_time_ms: 60_000,
            ..test_config()
        };
        let mut h = harness(config);
        h.engine.set_target(70.0);

        h.engine.temp_received(67.0, 0);
        assert!(h.engine.is_running());
        assert_eq!(h.engine.target_overshoot_by(), 3.0);

        for (step, temp) in [69.0, 70.0, 71.0, 72.5].into_iter().enumerate() {
            h.engine.temp_received(temp, 100 * (step as u64 + 1));
            assert!(h.engine.is_running(), "stopped early at {temp}");
        }

        h.engine.temp_received(73.0, 1_000);
        assert!(!h.engine.is_running());
        assert_eq!(h.furnace.calls(), vec!["start", "stop"]);
    }

    #[test]
    fn overshoot_is_capped_by_config() {
        let config = ThermostatConfig {
            max_overshoot_temp: 4.0,
            ..test_config()
        };
        let mut h = harness(config);
        h.engine.set_target(70.0);

        h.engine.temp_received(60.0, 0);
        assert_eq!(h.engine.target_overshoot_by(), 4.0);

        h.engine.temp_received(73.9, 10);
        assert!(h.engine.is_running());
        h.engine.temp_received(74.0, 20);
        assert!(!h.engine.is_running());
    }

    #[test]
    fn max_run_time_forces_stop() {
        let config = ThermostatConfig {
            max_run_time_ms: 10,
            ..test_config()
        };
        let mut h = harness(config);
        h.engine.set_target(70.0);

        h.engine.temp_received(65.0, 0);
        h.engine.temp_received(65.0, 10);
        assert!(h.engine.is_running());

        h.engine.temp_received(65.0, 11);
        assert!(!h.engine.is_running());
        assert_eq!(h.furnace.calls(), vec!["start", "stop"]);
        assert_eq!(
            equipment_messages(&mut h.events),
            vec![
                ("thermostat/furnace".to_string(), "on".to_string()),
                ("thermostat/furnace".to_string(), "off".to_string()),
            ]
        );
    }

    #[test]
    fn waits_min_delay_before_restart() {
        let mut h = harness(test_config());
        h.engine.set_target(70.0);

        h.engine.temp_received(68.0, 0);
        h.engine.temp_received(71.0, 1_000);
        assert!(!h.engine.is_running());

        h.engine.temp_received(60.0, 2_000);
        h.engine.temp_received(60.0, 6_000);
        assert!(!h.engine.is_running());

        h.engine.temp_received(60.0, 6_001);
        assert!(h.engine.is_running());
        assert_eq!(h.furnace.calls(), vec!["start", "stop", "start"]);
    }

    #[test]
    fn cooling_mirrors_heating() {
        let mut h = harness(test_config());
        h.engine.set_mode(ThermostatMode::Cooling);
        h.engine.set_target(72.0);

        h.engine.temp_received(73.0, 0);
        assert!(!h.engine.is_running());

        h.engine.temp_received(74.0, 100);
        assert!(h.engine.is_running());
        assert_eq!(h.engine.target_overshoot_by(), 1.0);

        h.engine.temp_received(71.5, 200);
        assert!(h.engine.is_running());
        h.engine.temp_received(71.0, 300);
        assert!(!h.engine.is_running());

        assert_eq!(h.ac.calls(), vec!["start", "stop"]);
        assert!(h.furnace.calls().is_empty());
        assert_eq!(
            equipment_messages(&mut h.events),
            vec![
                ("thermostat/ac".to_string(), "on".to_string()),
                ("thermostat/ac".to_string(), "off".to_string()),
            ]
        );
    }

    #[test]
    fn idle_equipment_is_never_stopped() {
        let mut h = harness(test_config());
        h.engine.set_target(70.0);

        h.engine.temp_received(75.0, 0);
        h.engine.temp_received(80.0, 100);

        assert!(h.furnace.calls().is_empty());
        assert!(equipment_messages(&mut h.events).is_empty());
    }

    #[test]
    fn mode_switch_leaves_equipment_running() {
        let mut h = harness(test_config());
        h.engine.set_target(70.0);
        h.engine.temp_received(65.0, 0);

        h.engine.set_mode(ThermostatMode::Cooling);

        assert!(h.engine.is_running());
        assert_eq!(h.furnace.calls(), vec!["start"]);
        assert!(h.ac.calls().is_empty());
    }

    #[test]
    fn status_reports_runtime() {
        let mut h = harness(test_config());
        h.engine.set_target(70.0);
        h.engine.temp_received(65.0, 1_000);

        let status = h.engine.status(1_750);
        assert!(status.running);
        assert_eq!(status.runtime_ms, 750);
        assert_eq!(status.last_temp, Some(65.0));
        assert_eq!(status.target, 70.0);
    }

    #[test]
    fn followers_get_each_new_stream_before_it_emits() {
        let mut h = harness(test_config());
        let mut runs = h.engine.follow_runs();
        let mut first = runs.try_recv().unwrap();

        h.engine.temp_received(70.0, 0);
        h.engine.complete_run();
        h.engine.set_target(62.0);

        assert_eq!(first.drain(), vec![ThermostatEvent::temperature(70.0)]);
        assert!(first.is_finished());

        let mut second = runs.try_recv().unwrap();
        assert_eq!(second.drain(), vec![ThermostatEvent::target(62.0)]);
        assert!(runs.try_recv().is_err());
    }

    #[test]
    fn dropped_followers_are_pruned() {
        let mut h = harness(test_config());
        drop(h.engine.follow_runs());

        assert_eq!(h.engine.followers.len(), 1);
        h.engine.complete_run();
        assert!(h.engine.followers.is_empty());
    }
}
