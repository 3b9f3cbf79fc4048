//! Workflow execution runtime
//!
//! Runs protocols of processes, binds them to experiments, persists state at
//! lifecycle checkpoints and admits queued experiments under a concurrency
//! bound.

mod builder;
mod context;
mod experiment;
mod file_store;
mod launcher;
mod process;
mod protocol;
mod queue;
mod registry;
mod runtime;
mod scheduler;
mod store;

pub use builder::{build_protocol, ProtocolBuilder};
pub use context::RunContext;
pub use experiment::{CallerContext, Experiment, ExperimentRecord, RunOptions};
pub use file_store::FileRepository;
pub use launcher::{
    InProcessLauncher, LaunchRequest, Launcher, ProcessLauncher, WorkerExit, WorkerHandle,
};
pub use process::{
    Process, ProcessIo, ProcessKind, ProcessRecord, RunOutcome, RunState, Runnable, Scope, TaskBody,
};
pub use protocol::Protocol;
pub use queue::{Job, Queue};
pub use registry::{TaskFactory, TaskMetadata, TaskRegistry};
pub use runtime::{LabRuntime, RuntimeConfig};
pub use scheduler::{SchedulerConfig, SchedulerHandle, TickReport};
pub use store::{Entity, MemoryRepository, Repository, RepositoryExt};
