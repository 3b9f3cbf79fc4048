//! Core abstractions for the lab workflow engine
//!
//! Resources, ports, IO, configuration, progress tracking and the task
//! trait every executable unit implements. Nothing in here runs a graph;
//! that lives in `labruntime`.

mod config;
mod error;
pub mod events;
mod graph;
mod io;
mod port;
mod progress;
mod resource;
mod task;
mod user;
mod value;

pub use config::{Config, ParamSpec, ParamType};
pub use error::{
    AuthorizationError, ConfigurationError, ExecutionError, LabError, LaunchError,
    SchedulingError, StoreError, TaskError,
};
pub use events::*;
pub use graph::{NodeSpec, Position, ProtocolGraph, PROTOCOL_TYPE};
pub use io::Io;
pub use port::{Connector, Direction, Interface, Outerface, Port, PortRef, PortSpec};
pub use progress::{
    MessageLevel, ProgressBar, ProgressMessage, ProgressSnapshot, ProgressTracker,
    MAX_PROGRESS_MESSAGES,
};
pub use resource::{types, Resource, ResourceId, ResourceType, ROOT_RESOURCE_TYPE};
pub use task::{Task, TaskContext, TaskInputs, TaskOutput, TaskSpec};
pub use user::{AccessLevel, User, UserGroup, UserId};
pub use value::Value;

/// Result type for lab operations
pub type Result<T> = std::result::Result<T, LabError>;

pub type ProcessId = uuid::Uuid;
pub type ExperimentId = uuid::Uuid;
