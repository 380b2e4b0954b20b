use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::{
    config::SensorConfig,
    ports::{SensorError, SensorProbe, SensorReading, TemperatureSource},
};

const READING_CHANNEL_CAPACITY: usize = 32;

/// Polls a [`SensorProbe`] once per poll delay.
///
/// The first reading is taken immediately on `start`. After `stop`, the
/// polling task notices at its next wake-up and drops its sender, which
/// completes the reading sequence.
pub struct PollingSensor<P> {
    probe: Arc<Mutex<P>>,
    poll_delay: Duration,
    active: Option<Arc<AtomicBool>>,
}

impl<P: SensorProbe> PollingSensor<P> {
    pub fn new(probe: P, config: &SensorConfig) -> Self {
        Self {
            probe: Arc::new(Mutex::new(probe)),
            poll_delay: Duration::from_millis(config.poll_delay_ms),
            active: None,
        }
    }

    pub fn probe(&self) -> Arc<Mutex<P>> {
        self.probe.clone()
    }

    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }
}

impl<P: SensorProbe> TemperatureSource for PollingSensor<P> {
    fn start(&mut self) -> mpsc::Receiver<SensorReading> {
        // Each run gets its own flag so a stale task cannot outlive a restart.
        self.stop();
        let active = Arc::new(AtomicBool::new(true));
        self.active = Some(active.clone());

        let probe = self.probe.clone();
        let poll_delay = self.poll_delay;
        let (tx, rx) = mpsc::channel(READING_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while active.load(Ordering::Acquire) {
                let reading = probe.lock().await.poll().and_then(|temp| {
                    if temp.is_finite() {
                        Ok(temp)
                    } else {
                        Err(SensorError::NonFinite(temp))
                    }
                });

                if tx.send(reading).await.is_err() {
                    break;
                }
                tokio::time::sleep(poll_delay).await;
            }
            debug!("sensor polling finished");
        });

        rx
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.store(false, Ordering::Release);
        }
    }
}
