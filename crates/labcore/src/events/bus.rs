use super::{ExecutionEvent, ProcessEvent};
use crate::{ExperimentId, ProcessId};
use chrono::Utc;
use tokio::sync::broadcast;

/// Per-process handle onto the event bus
#[derive(Clone)]
pub struct EventEmitter {
    experiment_id: ExperimentId,
    process_id: ProcessId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        experiment_id: ExperimentId,
        process_id: ProcessId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            experiment_id,
            process_id,
            sender,
        }
    }

    pub fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub fn emit(&self, event: ProcessEvent) {
        // no subscribers is fine
        let _ = self.sender.send(ExecutionEvent::ProcessEvent {
            experiment_id: self.experiment_id,
            process_id: self.process_id,
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(ProcessEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(ProcessEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, value: f64, max: f64, message: Option<String>) {
        self.emit(ProcessEvent::Progress {
            value,
            max,
            message,
        });
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("experiment_id", &self.experiment_id)
            .field("process_id", &self.process_id)
            .finish()
    }
}

/// Broadcast bus shared by every run of a runtime
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, experiment_id: ExperimentId, process_id: ProcessId) -> EventEmitter {
        EventEmitter::new(experiment_id, process_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
