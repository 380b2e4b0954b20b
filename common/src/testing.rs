use std::sync::{Arc, Mutex};

use crate::ports::EquipmentTrigger;

/// Trigger that records each call for later inspection.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingTrigger {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingTrigger {
    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

impl EquipmentTrigger for RecordingTrigger {
    fn start(&mut self) {
        self.calls.lock().unwrap().push("start");
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().push("stop");
    }
}
