use crate::events::EventEmitter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Oldest messages are dropped beyond this many
pub const MAX_PROGRESS_MESSAGES: usize = 64;

const DEFAULT_MAX_VALUE: f64 = 100.0;

/// Progress reporting boundary. Values are unit counts, never percentages.
pub trait ProgressTracker: Send + Sync {
    fn start(&self, max_units: f64);
    fn set_value(&self, unit: f64, message: &str);
    fn stop(&self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Info,
    Progress,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub text: String,
    pub level: MessageLevel,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub value: f64,
    pub max_value: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub messages: Vec<ProgressMessage>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            value: 0.0,
            max_value: DEFAULT_MAX_VALUE,
            started_at: None,
            ended_at: None,
            messages: Vec::new(),
        }
    }
}

impl ProgressSnapshot {
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn last_message(&self) -> Option<&ProgressMessage> {
        self.messages.last()
    }

    /// End the stream with an error-level message
    pub fn fail(&mut self, message: &str) {
        let now = Utc::now();
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.ended_at = Some(now);
        self.push(message, MessageLevel::Error);
    }

    fn push(&mut self, text: &str, level: MessageLevel) {
        if text.is_empty() {
            return;
        }
        self.messages.push(ProgressMessage {
            text: text.to_string(),
            level,
            timestamp: Utc::now(),
        });
        if self.messages.len() > MAX_PROGRESS_MESSAGES {
            let overflow = self.messages.len() - MAX_PROGRESS_MESSAGES;
            self.messages.drain(..overflow);
        }
    }
}

/// In-memory progress bar owned by one process
#[derive(Debug, Default)]
pub struct ProgressBar {
    state: Mutex<ProgressSnapshot>,
    emitter: Mutex<Option<EventEmitter>>,
}

impl ProgressBar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish further updates through `emitter`
    pub fn attach(&self, emitter: EventEmitter) {
        *lock(&self.emitter) = Some(emitter);
    }

    pub fn detach(&self) {
        *lock(&self.emitter) = None;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        lock(&self.state).clone()
    }

    /// Overwrite the state, e.g. with one loaded from a record
    pub fn restore(&self, snapshot: ProgressSnapshot) {
        *lock(&self.state) = snapshot;
    }

    pub fn reset(&self) {
        *lock(&self.state) = ProgressSnapshot::default();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).is_running()
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.state).is_finished()
    }

    pub fn value(&self) -> f64 {
        lock(&self.state).value
    }

    pub fn max_value(&self) -> f64 {
        lock(&self.state).max_value
    }

    pub fn messages(&self) -> Vec<ProgressMessage> {
        lock(&self.state).messages.clone()
    }

    pub fn add_message(&self, text: &str) {
        lock(&self.state).push(text, MessageLevel::Info);
        if let Some(emitter) = lock(&self.emitter).as_ref() {
            emitter.info(text);
        }
    }

    /// Stop with an error-level message
    pub fn fail(&self, message: &str) {
        self.finish(message, MessageLevel::Error);
        if let Some(emitter) = lock(&self.emitter).as_ref() {
            emitter.warn(message);
        }
    }

    fn finish(&self, message: &str, level: MessageLevel) {
        let mut state = lock(&self.state);
        match level {
            MessageLevel::Error => state.fail(message),
            _ => {
                let now = Utc::now();
                if state.started_at.is_none() {
                    state.started_at = Some(now);
                }
                state.ended_at = Some(now);
                state.push(message, level);
            }
        }
    }
}

impl ProgressTracker for ProgressBar {
    fn start(&self, max_units: f64) {
        let max = {
            let mut state = lock(&self.state);
            if state.is_running() {
                tracing::warn!("Progress bar already started, ignoring start");
                return;
            }
            state.max_value = if max_units > 0.0 {
                max_units
            } else {
                DEFAULT_MAX_VALUE
            };
            state.value = 0.0;
            state.started_at = Some(Utc::now());
            state.ended_at = None;
            state.max_value
        };
        if let Some(emitter) = lock(&self.emitter).as_ref() {
            emitter.progress(0.0, max, None);
        }
    }

    fn set_value(&self, unit: f64, message: &str) {
        let (value, max) = {
            let mut state = lock(&self.state);
            state.value = unit.clamp(0.0, state.max_value);
            state.push(message, MessageLevel::Progress);
            (state.value, state.max_value)
        };
        if let Some(emitter) = lock(&self.emitter).as_ref() {
            let message = (!message.is_empty()).then(|| message.to_string());
            emitter.progress(value, max, message);
        }
    }

    fn stop(&self, message: &str) {
        self.finish(message, MessageLevel::Info);
        if let Some(emitter) = lock(&self.emitter).as_ref() {
            if !message.is_empty() {
                emitter.info(message);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
