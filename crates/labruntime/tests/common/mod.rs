#![allow(dead_code)]

use async_trait::async_trait;
use labcore::{
    types, ExperimentId, LaunchError, NodeSpec, ParamSpec, ParamType, ProtocolGraph, Resource,
    Task, TaskContext, TaskError, TaskOutput, TaskSpec, User, UserGroup, Value,
};
use labruntime::{LaunchRequest, Launcher, TaskFactory, TaskRegistry, WorkerExit, WorkerHandle};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Emits its "text" parameter
pub struct EmitTask;

#[async_trait]
impl Task for EmitTask {
    fn task_type(&self) -> &str {
        "test.emit"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .output("out", types::text())
            .param(ParamSpec::new("text", ParamType::Text).with_default("hello"))
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let text = ctx.get_config_or("text", Value::from("hello"));
        let text = text.as_str().unwrap_or_default().to_string();
        Ok(TaskOutput::new().with_output("out", Resource::text(text)))
    }
}

/// Forwards its input untouched
pub struct PassTask;

#[async_trait]
impl Task for PassTask {
    fn task_type(&self) -> &str {
        "test.pass"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .input("in", types::resource())
            .output("out", types::resource())
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let resource = Arc::clone(ctx.require_input("in")?);
        Ok(TaskOutput::new().with_output("out", resource))
    }
}

/// Concatenates two text inputs as "left+right"
pub struct JoinTask;

#[async_trait]
impl Task for JoinTask {
    fn task_type(&self) -> &str {
        "test.join"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .input("left", types::text())
            .input("right", types::text())
            .output("out", types::text())
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let left = ctx.require_input("left")?.value.as_str().unwrap_or_default().to_string();
        let right = ctx.require_input("right")?.value.as_str().unwrap_or_default().to_string();
        Ok(TaskOutput::new().with_output("out", Resource::text(format!("{}+{}", left, right))))
    }
}

pub struct FailTask;

#[async_trait]
impl Task for FailTask {
    fn task_type(&self) -> &str {
        "test.fail"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new().optional_input("in", types::resource())
    }

    async fn execute(&self, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        Err(TaskError::ExecutionFailed("boom".to_string()))
    }
}

/// Only admins may run it
pub struct AdminTask;

#[async_trait]
impl Task for AdminTask {
    fn task_type(&self) -> &str {
        "test.admin"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new().output("out", types::text()).admin_only()
    }

    async fn execute(&self, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        Ok(TaskOutput::new().with_output("out", Resource::text("privileged")))
    }
}

pub struct NumberTask;

#[async_trait]
impl Task for NumberTask {
    fn task_type(&self) -> &str {
        "test.number"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new().output("out", types::number())
    }

    async fn execute(&self, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        Ok(TaskOutput::new().with_output("out", Resource::float(1.5)))
    }
}

pub struct IntegerSinkTask;

#[async_trait]
impl Task for IntegerSinkTask {
    fn task_type(&self) -> &str {
        "test.integer_sink"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new().input("in", types::integer())
    }

    async fn execute(&self, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        Ok(TaskOutput::new())
    }
}

/// Declares a required output but never fills it
pub struct SilentTask;

#[async_trait]
impl Task for SilentTask {
    fn task_type(&self) -> &str {
        "test.silent"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new().output("out", types::text())
    }

    async fn execute(&self, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        Ok(TaskOutput::new())
    }
}

/// Blocks until the test adds a permit to the shared gate
pub struct GateTask {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Task for GateTask {
    fn task_type(&self) -> &str {
        "test.gate"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .optional_input("in", types::resource())
            .output("out", types::text())
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(TaskError::Cancelled),
            permit = self.gate.acquire() => {
                permit
                    .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?
                    .forget();
                Ok(TaskOutput::new().with_output("out", Resource::text("opened")))
            }
        }
    }
}

struct TestFactory<F> {
    task_type: &'static str,
    make: F,
}

impl<F> TaskFactory for TestFactory<F>
where
    F: Fn() -> Box<dyn Task> + Send + Sync,
{
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok((self.make)())
    }

    fn task_type(&self) -> &str {
        self.task_type
    }
}

fn register<F>(registry: &mut TaskRegistry, task_type: &'static str, make: F)
where
    F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
{
    registry.register(Arc::new(TestFactory { task_type, make }));
}

/// Registry of the test tasks. Every `test.gate` shares `gate`.
pub fn test_registry_with_gate(gate: Arc<Semaphore>) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    register(&mut registry, "test.emit", || Box::new(EmitTask));
    register(&mut registry, "test.pass", || Box::new(PassTask));
    register(&mut registry, "test.join", || Box::new(JoinTask));
    register(&mut registry, "test.fail", || Box::new(FailTask));
    register(&mut registry, "test.admin", || Box::new(AdminTask));
    register(&mut registry, "test.number", || Box::new(NumberTask));
    register(&mut registry, "test.integer_sink", || Box::new(IntegerSinkTask));
    register(&mut registry, "test.silent", || Box::new(SilentTask));
    register(&mut registry, "test.gate", move || {
        Box::new(GateTask {
            gate: Arc::clone(&gate),
        })
    });
    registry
}

pub fn test_registry() -> TaskRegistry {
    test_registry_with_gate(Arc::new(Semaphore::new(0)))
}

/// emit -> pass, with pass.out exposed as "result"
pub fn chain_graph(text: &str) -> ProtocolGraph {
    let mut graph = ProtocolGraph::new().with_title("chain");
    graph
        .add_node("emit", NodeSpec::task("test.emit").with_config("text", text))
        .add_node("pass", NodeSpec::task("test.pass"))
        .link("emit", "out", "pass", "in")
        .outerface("result", "pass", "out");
    graph
}

/// A single gate whose output is exposed as "result"
pub fn gate_graph() -> ProtocolGraph {
    let mut graph = ProtocolGraph::new().with_title("gated");
    graph
        .add_node("gate", NodeSpec::task("test.gate"))
        .outerface("result", "gate", "out");
    graph
}

/// Launcher whose workers exit only when the test says so
#[derive(Default)]
pub struct ScriptedLauncher {
    launched: Mutex<Vec<LaunchRequest>>,
    workers: Mutex<HashMap<ExperimentId, Arc<ScriptedWorker>>>,
}

impl ScriptedLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Experiments launched so far, in launch order
    pub fn launched(&self) -> Vec<ExperimentId> {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.experiment_id)
            .collect()
    }

    /// Make the worker of `experiment_id` exit. Returns false if none was launched.
    pub fn finish(&self, experiment_id: ExperimentId, exit: WorkerExit) -> bool {
        match self.workers.lock().unwrap().get(&experiment_id) {
            Some(worker) => {
                worker.exit.send_replace(Some(exit));
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn WorkerHandle>, LaunchError> {
        let (exit, _) = watch::channel(None);
        let worker = Arc::new(ScriptedWorker { exit });
        self.launched.lock().unwrap().push(request);
        self.workers
            .lock()
            .unwrap()
            .insert(request.experiment_id, Arc::clone(&worker));
        Ok(worker)
    }
}

pub struct ScriptedWorker {
    exit: watch::Sender<Option<WorkerExit>>,
}

#[async_trait]
impl WorkerHandle for ScriptedWorker {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    async fn wait(&self) -> Result<WorkerExit, LaunchError> {
        let mut exit = self.exit.subscribe();
        let exit = *exit
            .wait_for(Option::is_some)
            .await
            .map_err(|e| LaunchError::Wait(e.to_string()))?;
        Ok(exit.unwrap_or_else(WorkerExit::failed))
    }

    async fn terminate(&self) -> Result<(), LaunchError> {
        self.exit.send_replace(Some(WorkerExit::failed()));
        Ok(())
    }
}

pub fn member() -> User {
    User::new("alice", UserGroup::User)
}

pub fn admin() -> User {
    User::new("root", UserGroup::Admin)
}

/// Poll `check` until it holds, failing the test after five seconds
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
