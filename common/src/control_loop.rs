use std::sync::Arc;

use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{info, warn};

use crate::{
    config::{ConfigError, ThermostatConfig},
    events::{EventStream, EventSubscription},
    filter::MovingAverageReader,
    ports::{EquipmentTrigger, TemperatureSource},
    thermostat::ThermostatEngine,
    types::{ControllerStatus, ThermostatMode},
};

/// Drives a [`ThermostatEngine`] from a smoothed temperature source.
///
/// One task per run consumes readings and evaluates them one at a time; the
/// engine lock is only held for a single synchronous evaluation.
pub struct ControlLoop<S> {
    engine: Arc<Mutex<ThermostatEngine>>,
    source: S,
    clock: Instant,
    run: Option<JoinHandle<()>>,
    stopping: bool,
}

impl<P: TemperatureSource> ControlLoop<MovingAverageReader<P>> {
    /// Smooths `source` over the configured `window_size` before evaluation.
    pub fn smoothed(
        config: ThermostatConfig,
        source: P,
        furnace: impl EquipmentTrigger,
        ac: impl EquipmentTrigger,
    ) -> Result<Self, ConfigError> {
        let reader = MovingAverageReader::new(source, config.window()?);
        Self::new(config, reader, furnace, ac)
    }
}

impl<S: TemperatureSource> ControlLoop<S> {
    pub fn new(
        config: ThermostatConfig,
        source: S,
        furnace: impl EquipmentTrigger,
        ac: impl EquipmentTrigger,
    ) -> Result<Self, ConfigError> {
        let engine = ThermostatEngine::new(config, furnace, ac)?;
        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            source,
            clock: Instant::now(),
            run: None,
            stopping: false,
        })
    }

    /// Starts consuming readings and returns the stream for this run.
    ///
    /// Calling this while a run is still active returns the active stream. A
    /// run that was asked to stop is drained first, so the new run gets its
    /// own stream.
    pub async fn start(&mut self) -> EventStream {
        if self.stopping {
            info!("waiting for the stopped run to drain before restarting");
            self.join().await;
        }

        let events = self.engine.lock().await.events();
        if self.is_active() {
            warn!("control loop already running, ignoring start");
            return events;
        }

        let mut readings = self.source.start();
        let engine = self.engine.clone();
        let clock = self.clock;

        self.run = Some(tokio::spawn(async move {
            while let Some(reading) = readings.recv().await {
                match reading {
                    Ok(temp) => {
                        let now_ms = elapsed_ms(clock);
                        engine.lock().await.temp_received(temp, now_ms);
                    }
                    Err(err) => warn!("error reading temperature: {err}"),
                }
            }

            engine.lock().await.complete_run();
            info!("temperature stream completed, control loop idle");
        }));

        info!("control loop started");
        events
    }

    /// Stops the source; the run finishes once the reading sequence drains.
    pub fn stop(&mut self) {
        self.source.stop();
        self.stopping = self.run.is_some();
    }

    /// Waits for the current run to finish.
    pub async fn join(&mut self) {
        if let Some(run) = self.run.take() {
            if let Err(err) = run.await {
                warn!("control loop task failed: {err}");
            }
        }
        self.stopping = false;
    }

    pub fn is_active(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.is_finished())
    }

    pub fn engine(&self) -> Arc<Mutex<ThermostatEngine>> {
        self.engine.clone()
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Stream subscribers can attach to before `start`.
    pub async fn events(&self) -> EventStream {
        self.engine.lock().await.events()
    }

    /// Subscriptions to the current run's stream and every later one, in order.
    pub async fn follow_runs(&self) -> mpsc::UnboundedReceiver<EventSubscription> {
        self.engine.lock().await.follow_runs()
    }

    pub async fn set_target(&self, target: f64) -> bool {
        self.engine.lock().await.set_target(target)
    }

    pub async fn target(&self) -> f64 {
        self.engine.lock().await.target()
    }

    pub async fn set_mode(&self, mode: ThermostatMode) -> bool {
        self.engine.lock().await.set_mode(mode)
    }

    pub async fn mode(&self) -> ThermostatMode {
        self.engine.lock().await.mode()
    }

    pub async fn is_running(&self) -> bool {
        self.engine.lock().await.is_running()
    }

    pub async fn status(&self) -> ControllerStatus {
        let now_ms = elapsed_ms(self.clock);
        self.engine.lock().await.status(now_ms)
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    clock.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
