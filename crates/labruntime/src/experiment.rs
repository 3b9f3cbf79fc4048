use crate::builder::build_protocol;
use crate::context::RunContext;
use crate::launcher::{LaunchRequest, WorkerExit, WorkerHandle};
use crate::process::{Process, RunOutcome, RunState};
use crate::registry::TaskRegistry;
use crate::runtime::LabRuntime;
use crate::store::Entity;
use chrono::{DateTime, Utc};
use labcore::{
    AuthorizationError, ConfigurationError, ExecutionError, ExecutionEvent, ExperimentId,
    LabError, LaunchError, ProgressSnapshot, ProtocolGraph, Resource, StoreError, User, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const KILLED_MESSAGE: &str = "Experiment manually stopped by a user.";

/// Where `run` is being called from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallerContext {
    /// A CLI, a test or a worker: blocking is fine
    #[default]
    Standalone,
    /// A serving process that must stay responsive
    Serving,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub wait_for_completion: bool,
    pub context: CallerContext,
    pub cancellation: CancellationToken,
}

impl RunOptions {
    /// Run in-process and return once the experiment has finished
    pub fn blocking() -> Self {
        Self {
            wait_for_completion: true,
            ..Self::default()
        }
    }

    /// Hand the run to a launcher and return right away
    pub fn serving() -> Self {
        Self {
            wait_for_completion: false,
            context: CallerContext::Serving,
            ..Self::default()
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Top-level execution of one root protocol on behalf of a user
pub struct Experiment {
    id: ExperimentId,
    title: String,
    protocol: Process,
    created_by: UserId,
    run_by: Option<UserId>,
    state: RunState,
    is_validated: bool,
    is_archived: bool,
    awaiting_worker: bool,
    pid: Option<u32>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    worker: Option<Arc<dyn WorkerHandle>>,
}

impl Experiment {
    pub fn new(title: impl Into<String>, protocol: Process, created_by: &User) -> Result<Self, ConfigurationError> {
        if !protocol.is_protocol() {
            return Err(ConfigurationError::NotAProtocol(
                protocol.instance_name().to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            title: title.into(),
            protocol,
            created_by: created_by.id,
            run_by: None,
            state: RunState::default(),
            is_validated: false,
            is_archived: false,
            awaiting_worker: false,
            pid: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            worker: None,
        })
    }

    /// Wrap a single process in a protocol that mirrors its ports
    pub fn from_task(title: impl Into<String>, process: Process, created_by: &User) -> Result<Self, ConfigurationError> {
        // Fresh task processes are named after their dotted type
        let name = process.instance_name().replace('.', "_");
        let inputs: Vec<String> = process.inputs().names().into_iter().map(String::from).collect();
        let outputs: Vec<String> = process.outputs().names().into_iter().map(String::from).collect();

        let mut protocol = Process::protocol();
        protocol.add_process(&name, process)?;
        for port in &inputs {
            protocol.add_interface(port, &name, port)?;
        }
        for port in &outputs {
            protocol.add_outerface(port, &name, port)?;
        }
        Self::new(title, protocol, created_by)
    }

    pub fn id(&self) -> ExperimentId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn protocol(&self) -> &Process {
        &self.protocol
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn run_by(&self) -> Option<UserId> {
        self.run_by
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_validated(&self) -> bool {
        self.is_validated
    }

    pub fn is_archived(&self) -> bool {
        self.is_archived
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn worker(&self) -> Option<Arc<dyn WorkerHandle>> {
        self.worker.clone()
    }

    pub(crate) fn attach_worker(&mut self, worker: Arc<dyn WorkerHandle>) {
        self.worker = Some(worker);
    }

    /// Mutable root protocol; refused once validated or while running
    pub fn protocol_mut(&mut self) -> Result<&mut Process, ConfigurationError> {
        if self.is_validated {
            return Err(ConfigurationError::ExperimentLocked(self.id));
        }
        if self.state.is_running {
            return Err(ConfigurationError::NotMutable {
                process: self.protocol.instance_name().to_string(),
                reason: "experiment is running".to_string(),
            });
        }
        Ok(&mut self.protocol)
    }

    /// Fill one of the root protocol's inputs before the run
    pub fn set_input(&mut self, name: &str, resource: impl Into<Arc<Resource>>) -> Result<(), ConfigurationError> {
        self.protocol_mut()?.set_input(name, resource)
    }

    fn ensure_launchable(&self) -> Result<(), ConfigurationError> {
        if self.is_archived {
            return Err(ConfigurationError::ExperimentArchived(self.id));
        }
        if self.is_validated {
            return Err(ConfigurationError::ExperimentLocked(self.id));
        }
        Ok(())
    }

    fn check_privileges(&self, user: &User) -> Result<(), AuthorizationError> {
        match self.protocol.access_violation(user) {
            Some((process, required)) => Err(AuthorizationError::InsufficientPrivilege {
                user: user.name.clone(),
                process,
                required,
            }),
            None => Ok(()),
        }
    }

    /// Run the experiment. A no-op once it is running or has finished.
    pub async fn run(&mut self, user: &User, options: RunOptions, runtime: &LabRuntime) -> Result<(), LabError> {
        if self.state.is_running || self.state.is_finished {
            tracing::debug!("Experiment {} already ran, ignoring run", self.id);
            return Ok(());
        }
        self.ensure_launchable()?;
        self.check_privileges(user)?;

        if options.context == CallerContext::Serving && !options.wait_for_completion {
            self.launch_worker(user, runtime).await
        } else {
            self.run_in_process(user, runtime, options.cancellation).await
        }
    }

    async fn run_in_process(
        &mut self,
        user: &User,
        runtime: &LabRuntime,
        cancellation: CancellationToken,
    ) -> Result<(), LabError> {
        let previous = self.state;
        self.state.mark_running();
        self.run_by = Some(user.id);
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        self.error = None;
        if let Err(e) = runtime.save_experiment(self).await {
            self.state = previous;
            return Err(ExecutionError::Checkpoint(e).into());
        }

        runtime.events().emit(ExecutionEvent::ExperimentStarted {
            experiment_id: self.id,
            title: self.title.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!("Experiment {} ({}) started by {}", self.id, self.title, user.name);

        let started = Instant::now();
        let ctx = RunContext::new(self.id, user.clone(), runtime.store(), runtime.events())
            .with_cancellation(cancellation);
        let result = match self.protocol.run(&ctx).await {
            Ok(RunOutcome::Completed) => Ok(()),
            Ok(RunOutcome::Skipped) => Err(ExecutionError::NotReady(
                self.protocol.instance_name().to_string(),
            )),
            Err(e) => Err(e),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        self.ended_at = Some(Utc::now());
        self.awaiting_worker = false;

        match result {
            Ok(()) => {
                self.state.mark_succeeded();
                if let Err(e) = runtime.save_experiment(self).await {
                    let e = ExecutionError::Checkpoint(e);
                    tracing::error!("Failed to record completion of experiment {}: {}", self.id, e);
                    self.state.mark_failed();
                    self.error = Some(e.to_string());
                    self.protocol.progress().fail(&format!("An error occurred: {}", e));
                    if let Err(save_error) = runtime.save_experiment(self).await {
                        tracing::error!("Failed to record failure of experiment {}: {}", self.id, save_error);
                    }
                    runtime.events().emit(ExecutionEvent::ExperimentCompleted {
                        experiment_id: self.id,
                        success: false,
                        error: Some(e.to_string()),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    return Err(e.into());
                }
                runtime.events().emit(ExecutionEvent::ExperimentCompleted {
                    experiment_id: self.id,
                    success: true,
                    error: None,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                tracing::info!("Experiment {} completed in {}ms", self.id, duration_ms);
                Ok(())
            }
            Err(e) => {
                let message = format!("An error occurred: {}", e);
                self.protocol.progress().fail(&message);
                self.state.mark_failed();
                self.error = Some(e.to_string());
                if let Err(save_error) = runtime.save_experiment(self).await {
                    tracing::error!("Failed to record failure of experiment {}: {}", self.id, save_error);
                }
                runtime.events().emit(ExecutionEvent::ExperimentCompleted {
                    experiment_id: self.id,
                    success: false,
                    error: Some(e.to_string()),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                tracing::error!("Experiment {} failed: {}", self.id, e);
                Err(e.into())
            }
        }
    }

    async fn launch_worker(&mut self, user: &User, runtime: &LabRuntime) -> Result<(), LabError> {
        let launcher = runtime
            .launcher()
            .ok_or_else(|| LaunchError::Unavailable("no launcher configured".to_string()))?;

        let previous = self.state;
        self.state.mark_running();
        self.awaiting_worker = true;
        self.run_by = Some(user.id);
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        self.error = None;
        if let Err(e) = runtime.save_experiment(self).await {
            self.state = previous;
            self.awaiting_worker = false;
            return Err(ExecutionError::Checkpoint(e).into());
        }

        let request = LaunchRequest {
            experiment_id: self.id,
            user_id: user.id,
        };
        match launcher.launch(request).await {
            Ok(worker) => {
                self.pid = worker.pid();
                self.worker = Some(worker);
                tracing::info!("Experiment {} handed to a worker", self.id);
                Ok(())
            }
            Err(e) => {
                self.state.mark_failed();
                self.awaiting_worker = false;
                self.ended_at = Some(Utc::now());
                self.error = Some(e.to_string());
                self.protocol.progress().fail(&format!("An error occurred: {}", e));
                if let Err(save_error) = runtime.save_experiment(self).await {
                    tracing::error!("Failed to record launch failure of {}: {}", self.id, save_error);
                }
                Err(e.into())
            }
        }
    }

    /// Worker side of an out-of-process run
    pub(crate) async fn run_as_worker(&mut self, user: &User, runtime: &LabRuntime) -> Result<(), LabError> {
        if !self.awaiting_worker {
            return Err(ConfigurationError::InvalidState(format!(
                "experiment {} is not waiting for a worker",
                self.id
            ))
            .into());
        }
        self.ensure_launchable()?;
        self.check_privileges(user)?;

        self.state.reset();
        self.pid = Some(std::process::id());
        self.run_in_process(user, runtime, CancellationToken::new()).await
    }

    /// Wait for the worker this experiment was handed to, if any
    pub async fn wait_for_worker(&self) -> Result<Option<WorkerExit>, LaunchError> {
        match &self.worker {
            Some(worker) => worker.wait().await.map(Some),
            None => Ok(None),
        }
    }

    /// Stop a running experiment and mark it failed
    pub async fn kill(&mut self, runtime: &LabRuntime) -> Result<(), LabError> {
        if !self.state.is_running {
            return Err(ConfigurationError::InvalidState(format!(
                "experiment {} is not running",
                self.id
            ))
            .into());
        }

        match self.worker.take() {
            Some(worker) => worker.terminate().await?,
            None => tracing::warn!(
                "Experiment {} has no worker handle (pid {:?}), marking it stopped",
                self.id,
                self.pid
            ),
        }

        self.protocol.progress().fail(KILLED_MESSAGE);
        self.state.mark_failed();
        self.awaiting_worker = false;
        self.error = Some(KILLED_MESSAGE.to_string());
        self.ended_at = Some(Utc::now());
        runtime.save_experiment(self).await?;
        tracing::info!("Experiment {} killed", self.id);
        Ok(())
    }

    /// Back to draft so it can run again
    pub async fn reset(&mut self, runtime: &LabRuntime) -> Result<(), LabError> {
        if self.is_validated {
            return Err(ConfigurationError::ExperimentLocked(self.id).into());
        }
        if self.state.is_running {
            return Err(ConfigurationError::InvalidState(format!(
                "experiment {} is running",
                self.id
            ))
            .into());
        }

        self.protocol.reset();
        self.state.reset();
        self.awaiting_worker = false;
        self.pid = None;
        self.error = None;
        self.started_at = None;
        self.ended_at = None;
        self.worker = None;
        runtime.save_experiment(self).await?;
        tracing::info!("Experiment {} reset", self.id);
        Ok(())
    }

    /// Lock a successfully finished experiment against further change
    pub async fn validate(&mut self, runtime: &LabRuntime) -> Result<(), LabError> {
        if self.is_validated {
            return Err(ConfigurationError::InvalidState(format!(
                "experiment {} is already validated",
                self.id
            ))
            .into());
        }
        if !self.state.is_succeeded() {
            return Err(ConfigurationError::InvalidState(format!(
                "experiment {} has not finished successfully",
                self.id
            ))
            .into());
        }

        self.is_validated = true;
        if let Err(e) = runtime.save_experiment(self).await {
            self.is_validated = false;
            return Err(e.into());
        }
        tracing::info!("Experiment {} validated", self.id);
        Ok(())
    }

    pub async fn archive(&mut self, archived: bool, runtime: &LabRuntime) -> Result<(), LabError> {
        if self.state.is_running {
            return Err(ConfigurationError::InvalidState(format!(
                "experiment {} is running",
                self.id
            ))
            .into());
        }

        let previous = self.is_archived;
        self.is_archived = archived;
        if let Err(e) = runtime.save_experiment(self).await {
            self.is_archived = previous;
            return Err(e.into());
        }
        Ok(())
    }

    /// Reload the flags a worker may have written since this copy was loaded
    pub async fn refresh(&mut self, runtime: &LabRuntime) -> Result<(), LabError> {
        let record = runtime
            .experiment_record(self.id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: ExperimentRecord::KIND.to_string(),
                id: self.id,
            })?;

        self.state = record.state;
        self.is_validated = record.is_validated;
        self.is_archived = record.is_archived;
        self.awaiting_worker = record.awaiting_worker;
        self.pid = record.pid;
        self.error = record.error;
        self.run_by = record.run_by;
        self.started_at = record.started_at;
        self.ended_at = record.ended_at;
        self.protocol.progress().restore(record.progress);
        Ok(())
    }

    pub fn record(&self) -> ExperimentRecord {
        let inputs = self
            .protocol
            .inputs()
            .ports()
            .filter(|port| !port.is_left_connected())
            .filter_map(|port| {
                port.resource()
                    .map(|r| (port.name().to_string(), Resource::clone(r)))
            })
            .collect();

        ExperimentRecord {
            id: self.id,
            title: self.title.clone(),
            graph: self.protocol.to_graph().unwrap_or_default(),
            inputs,
            created_by: self.created_by,
            run_by: self.run_by,
            state: self.state,
            is_validated: self.is_validated,
            is_archived: self.is_archived,
            awaiting_worker: self.awaiting_worker,
            pid: self.pid,
            error: self.error.clone(),
            progress: self.protocol.progress().snapshot(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }

    /// Rebuild from a persisted record. Processes come back as drafts; the
    /// experiment-level flags are restored as recorded.
    pub fn from_record(record: ExperimentRecord, registry: &TaskRegistry) -> Result<Self, LabError> {
        let mut protocol = build_protocol(&record.graph, registry)?;
        for (name, resource) in record.inputs {
            protocol.set_input(&name, resource)?;
        }
        protocol.progress().restore(record.progress);

        Ok(Self {
            id: record.id,
            title: record.title,
            protocol,
            created_by: record.created_by,
            run_by: record.run_by,
            state: record.state,
            is_validated: record.is_validated,
            is_archived: record.is_archived,
            awaiting_worker: record.awaiting_worker,
            pid: record.pid,
            error: record.error,
            created_at: record.created_at,
            started_at: record.started_at,
            ended_at: record.ended_at,
            worker: None,
        })
    }
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("state", &self.state)
            .field("is_validated", &self.is_validated)
            .field("is_archived", &self.is_archived)
            .finish()
    }
}

/// Persisted form of an experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: ExperimentId,
    pub title: String,
    pub graph: ProtocolGraph,
    #[serde(default)]
    pub inputs: BTreeMap<String, Resource>,
    pub created_by: UserId,
    #[serde(default)]
    pub run_by: Option<UserId>,
    pub state: RunState,
    #[serde(default)]
    pub is_validated: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub awaiting_worker: bool,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: ProgressSnapshot,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExperimentRecord {
    /// Close out a run whose worker went away without reporting back
    pub fn mark_abandoned(&mut self, message: &str) {
        self.state.mark_failed();
        self.awaiting_worker = false;
        self.error = Some(message.to_string());
        self.ended_at = Some(Utc::now());
        self.progress.fail(message);
    }
}

impl Entity for ExperimentRecord {
    const KIND: &'static str = "experiment";

    fn entity_id(&self) -> Uuid {
        self.id
    }
}
