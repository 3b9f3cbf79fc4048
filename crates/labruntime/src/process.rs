use crate::context::RunContext;
use crate::protocol::Protocol;
use crate::store::Entity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use labcore::{
    AccessLevel, Config, ConfigurationError, Connector, Direction, ExecutionError, ExecutionEvent,
    ExperimentId, Io, NodeSpec, PortRef, PortSpec, ProcessId, ProgressBar, ProgressSnapshot,
    ProgressTracker, ProtocolGraph, Resource, Task, TaskContext, TaskInputs, User, Value,
    PROTOCOL_TYPE,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Lifecycle flags of a process. Only the engine flips them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub is_running: bool,
    pub is_finished: bool,
    pub is_successful: bool,
}

impl RunState {
    /// Neither started nor finished
    pub fn is_draft(&self) -> bool {
        !self.is_running && !self.is_finished
    }

    pub fn is_succeeded(&self) -> bool {
        self.is_finished && self.is_successful
    }

    pub fn is_failed(&self) -> bool {
        self.is_finished && !self.is_successful
    }

    pub(crate) fn mark_running(&mut self) {
        self.is_running = true;
        self.is_finished = false;
        self.is_successful = false;
    }

    pub(crate) fn mark_succeeded(&mut self) {
        self.is_running = false;
        self.is_finished = true;
        self.is_successful = true;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.is_running = false;
        self.is_finished = true;
        self.is_successful = false;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Not ready, or declined by its admission check
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ProcessIo {
    pub inputs: Io,
    pub outputs: Io,
}

/// What a runnable body sees of the process it belongs to
pub struct Scope<'a> {
    ctx: &'a RunContext,
    process_id: ProcessId,
    path: &'a str,
    config: &'a Config,
    progress: &'a Arc<ProgressBar>,
}

impl<'a> Scope<'a> {
    pub fn ctx(&self) -> &'a RunContext {
        self.ctx
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Dotted instance path from the root protocol
    pub fn path(&self) -> &'a str {
        self.path
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn progress(&self) -> &'a Arc<ProgressBar> {
        self.progress
    }
}

/// Shared capability of leaf tasks and protocols
#[async_trait]
pub trait Runnable: Send + Sync {
    fn check_before_run(&self, _inputs: &Io) -> bool {
        true
    }

    async fn execute(&mut self, io: &mut ProcessIo, scope: &Scope<'_>) -> Result<(), ExecutionError>;
}

/// Leaf body: one [`Task`] run once per run
pub struct TaskBody {
    task: Box<dyn Task>,
}

impl TaskBody {
    pub fn task(&self) -> &dyn Task {
        self.task.as_ref()
    }
}

#[async_trait]
impl Runnable for TaskBody {
    fn check_before_run(&self, inputs: &Io) -> bool {
        self.task.check_before_run(&TaskInputs::new(inputs.resources()))
    }

    async fn execute(&mut self, io: &mut ProcessIo, scope: &Scope<'_>) -> Result<(), ExecutionError> {
        let ctx = scope.ctx();
        let task_ctx = TaskContext {
            process_id: scope.process_id(),
            instance_path: scope.path().to_string(),
            inputs: TaskInputs::new(io.inputs.resources()),
            config: scope.config().values(),
            progress: Arc::clone(scope.progress()),
            events: ctx.events().create_emitter(ctx.experiment_id(), scope.process_id()),
            cancellation: ctx.cancellation().child_token(),
        };

        let output = self
            .task
            .execute(task_ctx)
            .await
            .map_err(|source| ExecutionError::Task {
                process: scope.path().to_string(),
                source,
            })?;

        for (port, resource) in output.outputs {
            let slot = io
                .outputs
                .port_mut(&port)
                .ok_or_else(|| ExecutionError::InvalidOutput {
                    process: scope.path().to_string(),
                    port: port.clone(),
                    reason: "no such output port".to_string(),
                })?;
            slot.fill(scope.path(), resource)
                .map_err(|e| ExecutionError::InvalidOutput {
                    process: scope.path().to_string(),
                    port: port.clone(),
                    reason: e.to_string(),
                })?;
        }

        if let Some(port) = io.outputs.missing().first() {
            return Err(ExecutionError::MissingOutput {
                process: scope.path().to_string(),
                port: port.to_string(),
            });
        }
        Ok(())
    }
}

pub enum ProcessKind {
    Task(TaskBody),
    Protocol(Protocol),
}

impl ProcessKind {
    fn runnable(&self) -> &dyn Runnable {
        match self {
            ProcessKind::Task(body) => body,
            ProcessKind::Protocol(protocol) => protocol,
        }
    }

    fn runnable_mut(&mut self) -> &mut dyn Runnable {
        match self {
            ProcessKind::Task(body) => body,
            ProcessKind::Protocol(protocol) => protocol,
        }
    }
}

/// Executable graph node: a leaf task or a protocol of processes
pub struct Process {
    pub(crate) id: ProcessId,
    pub(crate) instance_name: String,
    pub(crate) process_type: String,
    pub(crate) title: Option<String>,
    pub(crate) access: AccessLevel,
    pub(crate) io: ProcessIo,
    pub(crate) config: Config,
    pub(crate) progress: Arc<ProgressBar>,
    pub(crate) max_progress: f64,
    pub(crate) state: RunState,
    pub(crate) kind: ProcessKind,
}

impl Process {
    /// Wrap a task, building its ports and config from the declared spec
    pub fn from_task(task: Box<dyn Task>) -> Result<Self, ConfigurationError> {
        let spec = task.spec();
        let name = task.task_type().to_string();
        let inputs = Io::from_specs(&name, Direction::Input, spec.inputs)?;
        let outputs = Io::from_specs(&name, Direction::Output, spec.outputs)?;
        let config = Config::new(spec.params)?;

        Ok(Self {
            id: Uuid::new_v4(),
            instance_name: name.clone(),
            process_type: name,
            title: None,
            access: spec.access,
            io: ProcessIo { inputs, outputs },
            config,
            progress: Arc::new(ProgressBar::new()),
            max_progress: spec.max_progress,
            state: RunState::default(),
            kind: ProcessKind::Task(TaskBody { task }),
        })
    }

    /// Empty protocol. Boundary ports appear as interfaces and outerfaces are declared.
    pub fn protocol() -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_name: PROTOCOL_TYPE.to_string(),
            process_type: PROTOCOL_TYPE.to_string(),
            title: None,
            access: AccessLevel::Standard,
            io: ProcessIo {
                inputs: Io::new(Direction::Input),
                outputs: Io::new(Direction::Output),
            },
            config: Config::default(),
            progress: Arc::new(ProgressBar::new()),
            max_progress: 0.0,
            state: RunState::default(),
            kind: ProcessKind::Protocol(Protocol::new()),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    pub fn access(&self) -> AccessLevel {
        self.access
    }

    pub fn inputs(&self) -> &Io {
        &self.io.inputs
    }

    pub fn outputs(&self) -> &Io {
        &self.io.outputs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn progress(&self) -> &Arc<ProgressBar> {
        &self.progress
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn kind(&self) -> &ProcessKind {
        &self.kind
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self.kind, ProcessKind::Protocol(_))
    }

    pub fn protocol_body(&self) -> Option<&Protocol> {
        match &self.kind {
            ProcessKind::Protocol(protocol) => Some(protocol),
            ProcessKind::Task(_) => None,
        }
    }

    /// Every required input holds a resource and the process has not run yet
    pub fn is_ready(&self) -> bool {
        self.state.is_draft() && self.io.inputs.is_ready()
    }

    /// Ready and accepted by the body's own admission check
    pub(crate) fn can_run(&self) -> bool {
        self.is_ready() && self.kind.runnable().check_before_run(&self.io.inputs)
    }

    pub(crate) fn ensure_mutable(&self) -> Result<(), ConfigurationError> {
        if self.state.is_running {
            return Err(ConfigurationError::NotMutable {
                process: self.instance_name.clone(),
                reason: "process is running".to_string(),
            });
        }
        if self.state.is_finished {
            return Err(ConfigurationError::NotMutable {
                process: self.instance_name.clone(),
                reason: "process has already run".to_string(),
            });
        }
        Ok(())
    }

    fn protocol_mut(&mut self) -> Result<&mut Protocol, ConfigurationError> {
        match &mut self.kind {
            ProcessKind::Protocol(protocol) => Ok(protocol),
            ProcessKind::Task(_) => Err(ConfigurationError::NotAProtocol(self.instance_name.clone())),
        }
    }

    pub fn set_param(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ConfigurationError> {
        self.ensure_mutable()?;
        self.config.set_value(name, value.into())
    }

    pub fn set_params(&mut self, values: &HashMap<String, Value>) -> Result<(), ConfigurationError> {
        self.ensure_mutable()?;
        self.config.set_values(values)
    }

    pub fn add_input_port(&mut self, name: &str, spec: PortSpec) -> Result<(), ConfigurationError> {
        self.ensure_mutable()?;
        self.io.inputs.create_port(&self.instance_name, name, spec)?;
        Ok(())
    }

    pub fn add_output_port(&mut self, name: &str, spec: PortSpec) -> Result<(), ConfigurationError> {
        self.ensure_mutable()?;
        self.io.outputs.create_port(&self.instance_name, name, spec)?;
        Ok(())
    }

    /// Fill an input port by hand. Ports fed by a connector or an interface are refused.
    pub fn set_input(&mut self, name: &str, resource: impl Into<Arc<Resource>>) -> Result<(), ConfigurationError> {
        self.ensure_mutable()?;
        let port = self
            .io
            .inputs
            .port_mut(name)
            .ok_or_else(|| ConfigurationError::PortNotFound {
                process: self.instance_name.clone(),
                port: name.to_string(),
            })?;
        if port.is_left_connected() {
            return Err(ConfigurationError::AlreadyConnected {
                process: self.instance_name.clone(),
                port: name.to_string(),
            });
        }
        port.replace(resource.into())
    }

    /// Direct child of a protocol
    pub fn process(&self, name: &str) -> Option<&Process> {
        self.protocol_body().and_then(|p| p.process(name))
    }

    pub fn process_mut(&mut self, name: &str) -> Option<&mut Process> {
        match &mut self.kind {
            ProcessKind::Protocol(protocol) => protocol.process_mut(name),
            ProcessKind::Task(_) => None,
        }
    }

    /// Descendant by dotted instance path, e.g. `"sub.move"`
    pub fn find(&self, path: &str) -> Option<&Process> {
        path.split('.')
            .try_fold(self, |process, name| process.process(name))
    }

    pub fn add_process(&mut self, name: &str, mut process: Process) -> Result<(), ConfigurationError> {
        self.ensure_mutable()?;
        process.ensure_mutable()?;
        process.instance_name = name.to_string();
        self.protocol_mut()?.insert_process(name, process)
    }

    pub fn remove_process(&mut self, name: &str) -> Result<Process, ConfigurationError> {
        self.ensure_mutable()?;
        self.protocol_mut()?.remove_process(name)
    }

    pub fn connect(
        &mut self,
        from_process: &str,
        from_port: &str,
        to_process: &str,
        to_port: &str,
    ) -> Result<(), ConfigurationError> {
        self.add_connector(Connector {
            from: PortRef::new(from_process, from_port),
            to: PortRef::new(to_process, to_port),
        })
    }

    pub fn add_connector(&mut self, connector: Connector) -> Result<(), ConfigurationError> {
        self.ensure_mutable()?;
        self.protocol_mut()?.connect(connector.from, connector.to)
    }

    /// Expose a child's input port as this protocol's input `name`
    pub fn add_interface(&mut self, name: &str, child: &str, port: &str) -> Result<(), ConfigurationError> {
        self.ensure_mutable()?;
        if self.io.inputs.contains(name) {
            return Err(ConfigurationError::DuplicatePort {
                process: self.instance_name.clone(),
                port: name.to_string(),
            });
        }
        let spec = self.protocol_mut()?.bind_interface(name, child, port)?;
        self.io.inputs.create_port(&self.instance_name, name, spec)?;
        Ok(())
    }

    /// Expose a child's output port as this protocol's output `name`
    pub fn add_outerface(&mut self, name: &str, child: &str, port: &str) -> Result<(), ConfigurationError> {
        self.ensure_mutable()?;
        if self.io.outputs.contains(name) {
            return Err(ConfigurationError::DuplicatePort {
                process: self.instance_name.clone(),
                port: name.to_string(),
            });
        }
        let spec = self.protocol_mut()?.bind_outerface(name, child, port)?;
        self.io.outputs.create_port(&self.instance_name, name, spec)?;
        Ok(())
    }

    /// Run as a root process
    pub async fn run(&mut self, ctx: &RunContext) -> Result<RunOutcome, ExecutionError> {
        let path = self.instance_name.clone();
        self.run_at(ctx, &path).await
    }

    pub(crate) fn run_at<'a>(
        &'a mut self,
        ctx: &'a RunContext,
        path: &'a str,
    ) -> BoxFuture<'a, Result<RunOutcome, ExecutionError>> {
        Box::pin(async move {
            if !self.can_run() {
                tracing::debug!("Process {} is not ready, skipping", path);
                return Ok(RunOutcome::Skipped);
            }

            self.state.mark_running();
            self.progress
                .attach(ctx.events().create_emitter(ctx.experiment_id(), self.id));
            let max_units = match &self.kind {
                ProcessKind::Protocol(protocol) => protocol.len() as f64,
                ProcessKind::Task(_) => self.max_progress,
            };
            self.progress.start(max_units);

            if let Err(e) = ctx.checkpoint(self, path).await {
                tracing::error!("Failed to record start of {}: {}", path, e);
                self.state.mark_failed();
                self.progress.fail(&e.to_string());
                self.progress.detach();
                return Err(e);
            }

            ctx.events().emit(ExecutionEvent::ProcessStarted {
                experiment_id: ctx.experiment_id(),
                process_id: self.id,
                instance_path: path.to_string(),
                process_type: self.process_type.clone(),
                timestamp: Utc::now(),
            });
            tracing::info!("Process {} ({}) started", path, self.process_type);

            let started = Instant::now();
            let scope = Scope {
                ctx,
                process_id: self.id,
                path,
                config: &self.config,
                progress: &self.progress,
            };
            let result = self.kind.runnable_mut().execute(&mut self.io, &scope).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    self.state.mark_succeeded();
                    self.progress.stop("");
                    let saved = ctx.checkpoint(self, path).await;
                    self.progress.detach();
                    if let Err(e) = saved {
                        tracing::error!("Failed to record completion of {}: {}", path, e);
                        self.state.mark_failed();
                        return Err(e);
                    }

                    ctx.events().emit(ExecutionEvent::ProcessCompleted {
                        experiment_id: ctx.experiment_id(),
                        process_id: self.id,
                        instance_path: path.to_string(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    tracing::info!("Process {} completed in {}ms", path, duration_ms);
                    Ok(RunOutcome::Completed)
                }
                Err(e) => {
                    self.state.mark_failed();
                    self.progress.fail(&e.to_string());
                    if let Err(save_error) = ctx.checkpoint(self, path).await {
                        tracing::error!("Failed to record failure of {}: {}", path, save_error);
                    }
                    self.progress.detach();

                    ctx.events().emit(ExecutionEvent::ProcessFailed {
                        experiment_id: ctx.experiment_id(),
                        process_id: self.id,
                        instance_path: path.to_string(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    tracing::error!("Process {} failed: {}", path, e);
                    Err(e)
                }
            }
        })
    }

    /// Back to draft, recursively. Resources that arrived through a link are
    /// dropped; inputs filled by hand on unlinked ports stay.
    pub fn reset(&mut self) {
        self.state.reset();
        self.progress.reset();
        self.io.outputs.reset();
        for port in self.io.inputs.ports_mut() {
            if port.is_left_connected() {
                port.clear();
            }
        }
        if let ProcessKind::Protocol(protocol) = &mut self.kind {
            protocol.reset();
        }
    }

    /// First process (depth first) the user may not run, with the level it demands
    pub fn access_violation(&self, user: &User) -> Option<(String, AccessLevel)> {
        self.access_violation_at(user, &self.instance_name)
    }

    fn access_violation_at(&self, user: &User, path: &str) -> Option<(String, AccessLevel)> {
        if !user.can_run(self.access) {
            return Some((path.to_string(), self.access));
        }
        self.protocol_body()?.processes().find_map(|(name, child)| {
            child.access_violation_at(user, &format!("{}.{}", path, name))
        })
    }

    /// Serializable description of a protocol. `None` for leaf tasks.
    pub fn to_graph(&self) -> Option<ProtocolGraph> {
        let protocol = self.protocol_body()?;
        let mut graph = ProtocolGraph::new();
        graph.title = self.title.clone();

        for (name, child) in protocol.processes() {
            let mut node = match child.to_graph() {
                Some(inner) => NodeSpec::protocol(inner),
                None => NodeSpec::task(child.process_type.clone()),
            };
            node.title = child.title.clone();
            node.config = child.config.explicit_values().clone();
            graph.nodes.insert(name.clone(), node);
        }
        graph.links = protocol.connectors().to_vec();
        graph.interfaces = protocol.interfaces().to_vec();
        graph.outerfaces = protocol.outerfaces().to_vec();
        Some(graph)
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("instance_name", &self.instance_name)
            .field("process_type", &self.process_type)
            .field("state", &self.state)
            .finish()
    }
}

/// Persisted lifecycle checkpoint of one process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub experiment_id: ExperimentId,
    pub instance_path: String,
    pub process_type: String,
    pub state: RunState,
    pub progress: ProgressSnapshot,
    pub updated_at: DateTime<Utc>,
}

impl ProcessRecord {
    pub(crate) fn capture(process: &Process, experiment_id: ExperimentId, path: &str) -> Self {
        Self {
            id: process.id,
            experiment_id,
            instance_path: path.to_string(),
            process_type: process.process_type.clone(),
            state: process.state,
            progress: process.progress.snapshot(),
            updated_at: Utc::now(),
        }
    }
}

impl Entity for ProcessRecord {
    const KIND: &'static str = "process";

    fn entity_id(&self) -> Uuid {
        self.id
    }
}
