use crate::{ExperimentId, ProcessId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events emitted while an experiment runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    ExperimentStarted {
        experiment_id: ExperimentId,
        title: String,
        timestamp: DateTime<Utc>,
    },
    ExperimentCompleted {
        experiment_id: ExperimentId,
        success: bool,
        error: Option<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ProcessStarted {
        experiment_id: ExperimentId,
        process_id: ProcessId,
        instance_path: String,
        process_type: String,
        timestamp: DateTime<Utc>,
    },
    ProcessCompleted {
        experiment_id: ExperimentId,
        process_id: ProcessId,
        instance_path: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ProcessFailed {
        experiment_id: ExperimentId,
        process_id: ProcessId,
        instance_path: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ProcessEvent {
        experiment_id: ExperimentId,
        process_id: ProcessId,
        event: ProcessEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Updates a running process publishes about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ProcessEvent {
    Info { message: String },
    Warning { message: String },
    Progress {
        value: f64,
        max: f64,
        message: Option<String>,
    },
}
