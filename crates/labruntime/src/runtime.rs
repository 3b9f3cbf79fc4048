use crate::builder::build_protocol;
use crate::experiment::{Experiment, ExperimentRecord};
use crate::launcher::{InProcessLauncher, Launcher, WorkerExit};
use crate::process::Process;
use crate::registry::TaskRegistry;
use crate::scheduler::{self, SchedulerConfig, SchedulerHandle};
use crate::store::{MemoryRepository, Repository, RepositoryExt};
use labcore::{
    AuthorizationError, ConfigurationError, EventBus, ExecutionEvent, ExperimentId, LabError,
    ProtocolGraph, StoreError, User, UserId,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Main runtime: task registry, repository, event bus and launcher shared by
/// every experiment it drives.
pub struct LabRuntime {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn Repository>,
    events: Arc<EventBus>,
    launcher: Option<Arc<dyn Launcher>>,
    config: RuntimeConfig,
}

impl LabRuntime {
    pub fn new(registry: TaskRegistry, store: Arc<dyn Repository>, config: RuntimeConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            registry: Arc::new(registry),
            store,
            events,
            launcher: None,
            config,
        }
    }

    /// Volatile runtime with default settings and no launcher
    pub fn in_memory(registry: TaskRegistry) -> Self {
        Self::new(registry, Arc::new(MemoryRepository::new()), RuntimeConfig::default())
    }

    /// Runtime whose workers are tokio tasks of this process
    pub fn with_in_process_launcher(
        registry: TaskRegistry,
        store: Arc<dyn Repository>,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|runtime| {
            let launcher: Arc<dyn Launcher> = Arc::new(InProcessLauncher::new(runtime.clone()));
            Self::new(registry, store, config).with_launcher(launcher)
        })
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.store)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn launcher(&self) -> Option<Arc<dyn Launcher>> {
        self.launcher.clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    pub fn build_protocol(&self, graph: &ProtocolGraph) -> Result<Process, ConfigurationError> {
        build_protocol(graph, &self.registry)
    }

    /// Build an experiment from a graph and persist it as a draft
    pub async fn create_experiment(
        &self,
        title: impl Into<String>,
        graph: &ProtocolGraph,
        user: &User,
    ) -> Result<Experiment, LabError> {
        let protocol = self.build_protocol(graph)?;
        let experiment = Experiment::new(title, protocol, user)?;
        self.save_experiment(&experiment).await?;
        tracing::info!("Created experiment {} ({})", experiment.id(), experiment.title());
        Ok(experiment)
    }

    pub async fn load_experiment(&self, id: ExperimentId) -> Result<Experiment, LabError> {
        let record = self
            .experiment_record(id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "experiment".to_string(),
                id,
            })?;
        Experiment::from_record(record, &self.registry)
    }

    pub async fn save_experiment(&self, experiment: &Experiment) -> Result<(), StoreError> {
        self.store.save(&experiment.record()).await
    }

    pub async fn experiment_record(&self, id: ExperimentId) -> Result<Option<ExperimentRecord>, StoreError> {
        self.store.get_by_id::<ExperimentRecord>(id).await
    }

    pub async fn list_experiments(&self) -> Result<Vec<ExperimentRecord>, StoreError> {
        let mut records = self.store.list_all::<ExperimentRecord>().await?;
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// Lab-wide number of experiments currently marked running
    pub async fn count_running_experiments(&self) -> Result<usize, StoreError> {
        Ok(self
            .store
            .list_all::<ExperimentRecord>()
            .await?
            .iter()
            .filter(|r| r.state.is_running)
            .count())
    }

    pub async fn register_user(&self, user: &User) -> Result<(), StoreError> {
        self.store.save(user).await
    }

    /// The system user resolves without a lookup
    pub async fn resolve_user(&self, id: UserId) -> Result<User, LabError> {
        let system = User::system();
        if id == system.id {
            return Ok(system);
        }
        self.store
            .get_by_id::<User>(id)
            .await?
            .ok_or_else(|| AuthorizationError::UnknownUser(id).into())
    }

    /// Entry point of an out-of-process worker
    pub async fn run_worker(&self, experiment_id: ExperimentId, user_id: UserId) -> Result<(), LabError> {
        let user = self.resolve_user(user_id).await?;
        let mut experiment = self.load_experiment(experiment_id).await?;
        tracing::info!("Worker picked up experiment {}", experiment_id);
        experiment.run_as_worker(&user, self).await
    }

    /// Fail a run whose worker exited while the record still says running.
    /// Returns whether the record had to be fixed.
    pub async fn recover_worker_exit(&self, experiment_id: ExperimentId, exit: &WorkerExit) -> Result<bool, StoreError> {
        let Some(mut record) = self.experiment_record(experiment_id).await? else {
            return Ok(false);
        };
        if !record.state.is_running {
            return Ok(false);
        }

        let message = match exit.code {
            Some(code) => format!("Worker exited before completion (exit code {})", code),
            None => "Worker exited before completion".to_string(),
        };
        tracing::warn!("Experiment {}: {}", experiment_id, message);
        record.mark_abandoned(&message);
        self.store.save(&record).await?;
        Ok(true)
    }

    /// Fail every run left marked running by a previous serving process
    pub async fn recover_orphaned_runs(&self) -> Result<usize, StoreError> {
        let mut recovered = 0;
        for mut record in self.store.list_all::<ExperimentRecord>().await? {
            if !record.state.is_running {
                continue;
            }
            tracing::warn!("Experiment {} was left running, marking it failed", record.id);
            record.mark_abandoned("Run interrupted: the serving process stopped before it completed");
            self.store.save(&record).await?;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Spawn the queue supervisor for this runtime
    pub fn start_scheduler(self: &Arc<Self>) -> SchedulerHandle {
        scheduler::spawn(Arc::clone(self), SchedulerConfig::from(&self.config))
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Lab-wide bound on concurrently running experiments
    pub max_running_experiments: usize,
    pub max_queue_length: usize,
    pub tick_interval_ms: u64,
    pub event_buffer_size: usize,
    pub worker_poll_interval_ms: u64,
    pub recover_orphans_on_start: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_running_experiments: 1,
            max_queue_length: 10,
            tick_interval_ms: 30_000,
            event_buffer_size: 1000,
            worker_poll_interval_ms: 200,
            recover_orphans_on_start: true,
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply `LAB_*` environment overrides. Unparsable values are ignored.
    pub fn apply_env(mut self) -> Self {
        override_from_env("LAB_MAX_RUNNING_EXPERIMENTS", &mut self.max_running_experiments);
        override_from_env("LAB_MAX_QUEUE_LENGTH", &mut self.max_queue_length);
        override_from_env("LAB_TICK_INTERVAL_MS", &mut self.tick_interval_ms);
        override_from_env("LAB_EVENT_BUFFER_SIZE", &mut self.event_buffer_size);
        override_from_env("LAB_WORKER_POLL_INTERVAL_MS", &mut self.worker_poll_interval_ms);
        override_from_env("LAB_RECOVER_ORPHANS_ON_START", &mut self.recover_orphans_on_start);
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms.max(1))
    }
}

fn override_from_env<T: std::str::FromStr>(key: &str, target: &mut T) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw),
    }
}
