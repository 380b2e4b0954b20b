use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::types::ThermostatEvent;

#[derive(Debug, Default)]
struct Subscribers {
    senders: Vec<mpsc::UnboundedSender<ThermostatEvent>>,
    completed: bool,
}

/// Multicast event channel for one control run.
///
/// Subscribers only see events emitted after they subscribe. Completion drops
/// every sender, so each subscription drains what it already holds and then
/// ends; subscribing to a completed stream yields an already-finished
/// subscription.
#[derive(Debug, Clone, Default)]
pub struct EventStream {
    inner: Arc<Mutex<Subscribers>>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.lock();
        if !subscribers.completed {
            subscribers.senders.push(tx);
        }
        EventSubscription { rx }
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().senders.len()
    }

    pub(crate) fn emit(&self, event: ThermostatEvent) {
        let mut subscribers = self.lock();
        if subscribers.completed {
            return;
        }
        subscribers
            .senders
            .retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub(crate) fn complete(&self) {
        let mut subscribers = self.lock();
        subscribers.completed = true;
        subscribers.senders.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<ThermostatEvent>,
}

impl EventSubscription {
    /// Next event, or `None` once the run has completed and everything was drained.
    pub async fn recv(&mut self) -> Option<ThermostatEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<ThermostatEvent, TryRecvError> {
        self.rx.try_recv()
    }

    /// Everything already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<ThermostatEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn is_finished(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }
}
