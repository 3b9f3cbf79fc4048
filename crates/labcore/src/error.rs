use crate::{AccessLevel, ExperimentId, UserId};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LabError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors a task body reports back to the engine
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Invalid wiring or mutation. Raised by the call that caused it, with no
/// partial state left behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Port '{port}' not found on process '{process}'")]
    PortNotFound { process: String, port: String },

    #[error("A process named '{0}' already exists in the protocol")]
    DuplicateProcess(String),

    #[error("Port '{port}' already exists on process '{process}'")]
    DuplicatePort { process: String, port: String },

    #[error("The right-hand side port '{port}' of process '{process}' is already connected")]
    AlreadyConnected { process: String, port: String },

    #[error("Incompatible port types: {source_type} ({from}) cannot feed {target_type} ({to})")]
    IncompatibleTypes {
        from: String,
        to: String,
        source_type: String,
        target_type: String,
    },

    #[error("Process '{0}' cannot be connected to itself")]
    SelfConnection(String),

    #[error("Port '{port}' of process '{process}' is not an {expected} port")]
    WrongDirection {
        process: String,
        port: String,
        expected: String,
    },

    #[error("Connecting '{from}' to '{to}' would create a cycle")]
    CyclicConnection { from: String, to: String },

    #[error("Process '{process}' cannot be modified: {reason}")]
    NotMutable { process: String, reason: String },

    #[error("Process '{0}' is not a protocol")]
    NotAProtocol(String),

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Failed to create task '{task_type}': {reason}")]
    TaskCreation { task_type: String, reason: String },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Port '{port}' expects {expected}, got {actual}")]
    InvalidResource {
        port: String,
        expected: String,
        actual: String,
    },

    #[error("Port '{port}' of process '{process}' already holds a resource")]
    PortAlreadyFilled { process: String, port: String },

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Experiment {0} is validated and cannot be modified")]
    ExperimentLocked(ExperimentId),

    #[error("Experiment {0} is archived")]
    ExperimentArchived(ExperimentId),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthorizationError {
    #[error("Only {required} users can run process '{process}' (user '{user}')")]
    InsufficientPrivilege {
        user: String,
        process: String,
        required: AccessLevel,
    },

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),
}

/// Failure inside a run. Carries the path of the process that failed.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Process '{process}' failed: {source}")]
    Task {
        process: String,
        #[source]
        source: TaskError,
    },

    #[error("Process '{process}' produced an invalid output on '{port}': {reason}")]
    InvalidOutput {
        process: String,
        port: String,
        reason: String,
    },

    #[error("Process '{process}' did not produce required output '{port}'")]
    MissingOutput { process: String, port: String },

    #[error("Process '{0}' is not ready to run")]
    NotReady(String),

    #[error("Run of '{0}' was cancelled")]
    Cancelled(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Checkpoint failed: {0}")]
    Checkpoint(#[from] StoreError),
}

/// Non-fatal queue problems. The scheduler logs them and moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulingError {
    #[error("The maximum number of jobs is reached ({max_length})")]
    QueueFull { max_length: usize },

    #[error("Experiment {0} is already in the queue")]
    AlreadyQueued(ExperimentId),

    #[error("Job {job} refers to experiment {experiment} which no longer exists")]
    OrphanedJob { job: Uuid, experiment: ExperimentId },

    #[error("Experiment {experiment} cannot be launched: {reason}")]
    NotLaunchable {
        experiment: ExperimentId,
        reason: String,
    },

    #[error("Scheduler is not running")]
    SupervisorStopped,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: Uuid },

    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone)]
pub enum LaunchError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Failed to wait for worker: {0}")]
    Wait(String),

    #[error("Failed to terminate worker: {0}")]
    Terminate(String),

    #[error("Launcher unavailable: {0}")]
    Unavailable(String),
}
