use crate::{
    events::EventEmitter, AccessLevel, ParamSpec, PortSpec, ProcessId, ProgressBar, Resource,
    ResourceType, TaskError, Value,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that every leaf computation implements
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable type identifier (e.g. "core.source", "robot.move")
    fn task_type(&self) -> &str;

    /// Declared ports, parameters and access level
    fn spec(&self) -> TaskSpec;

    /// Extra admission check run once required inputs are present.
    /// Returning false skips the task without error.
    fn check_before_run(&self, _inputs: &TaskInputs) -> bool {
        true
    }

    /// Run the computation. Called at most once per run.
    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError>;
}

/// Ports, parameters and privilege a task declares
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub inputs: Vec<(String, PortSpec)>,
    pub outputs: Vec<(String, PortSpec)>,
    pub params: Vec<ParamSpec>,
    pub access: AccessLevel,
    pub max_progress: f64,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
            access: AccessLevel::Standard,
            max_progress: 100.0,
        }
    }
}

impl TaskSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, name: impl Into<String>, resource_type: ResourceType) -> Self {
        self.inputs.push((name.into(), PortSpec::required(resource_type)));
        self
    }

    pub fn optional_input(mut self, name: impl Into<String>, resource_type: ResourceType) -> Self {
        self.inputs.push((name.into(), PortSpec::optional(resource_type)));
        self
    }

    pub fn output(mut self, name: impl Into<String>, resource_type: ResourceType) -> Self {
        self.outputs.push((name.into(), PortSpec::required(resource_type)));
        self
    }

    pub fn optional_output(mut self, name: impl Into<String>, resource_type: ResourceType) -> Self {
        self.outputs.push((name.into(), PortSpec::optional(resource_type)));
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn admin_only(mut self) -> Self {
        self.access = AccessLevel::Admin;
        self
    }

    pub fn with_max_progress(mut self, max_progress: f64) -> Self {
        self.max_progress = max_progress;
        self
    }
}

/// Resources snapshotted from a process's input ports at run start
#[derive(Debug, Clone, Default)]
pub struct TaskInputs {
    resources: HashMap<String, Arc<Resource>>,
}

impl TaskInputs {
    pub fn new(resources: HashMap<String, Arc<Resource>>) -> Self {
        Self { resources }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Arc<Resource>, TaskError> {
        self.resources
            .get(name)
            .ok_or_else(|| TaskError::MissingInput(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Resource>)> {
        self.resources.iter()
    }
}

impl From<HashMap<String, Arc<Resource>>> for TaskInputs {
    fn from(resources: HashMap<String, Arc<Resource>>) -> Self {
        Self::new(resources)
    }
}

/// Execution context passed to each task
#[derive(Clone)]
pub struct TaskContext {
    pub process_id: ProcessId,

    /// Dotted path of the process inside the root protocol
    pub instance_path: String,

    pub inputs: TaskInputs,

    /// Resolved parameters (explicit values and defaults)
    pub config: HashMap<String, Value>,

    pub progress: Arc<ProgressBar>,

    pub events: EventEmitter,

    pub cancellation: CancellationToken,
}

impl TaskContext {
    pub fn new(process_id: ProcessId, events: EventEmitter) -> Self {
        Self {
            process_id,
            instance_path: String::new(),
            inputs: TaskInputs::default(),
            config: HashMap::new(),
            progress: Arc::new(ProgressBar::new()),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Arc<Resource>, TaskError> {
        self.inputs.require(name)
    }

    pub fn input(&self, name: &str) -> Option<&Arc<Resource>> {
        self.inputs.get(name)
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, TaskError> {
        self.config
            .get(name)
            .ok_or_else(|| TaskError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }
}

/// Resources a task hands back, keyed by output port
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    pub outputs: HashMap<String, Arc<Resource>>,
}

impl TaskOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, resource: impl Into<Arc<Resource>>) -> Self {
        self.outputs.insert(port.into(), resource.into());
        self
    }
}
