use crate::process::Process;
use labcore::{ConfigurationError, Task, TaskError, TaskSpec, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating task instances
pub trait TaskFactory: Send + Sync {
    /// Create a new instance of the task with given configuration
    fn create(&self, config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError>;

    /// Get task type identifier
    fn task_type(&self) -> &str;

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata::default()
    }
}

/// Metadata about a task type
#[derive(Debug, Clone)]
pub struct TaskMetadata {
    pub description: String,
    pub category: String,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available task types, keyed by stable type identifier
pub struct TaskRegistry {
    factories: HashMap<String, Arc<dyn TaskFactory>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a task factory
    pub fn register(&mut self, factory: Arc<dyn TaskFactory>) {
        let task_type = factory.task_type().to_string();
        tracing::info!("Registering task type: {}", task_type);
        self.factories.insert(task_type, factory);
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(task_type)
    }

    /// Create a task instance from a task type and config
    pub fn create_task(
        &self,
        task_type: &str,
        config: &HashMap<String, Value>,
    ) -> Result<Box<dyn Task>, ConfigurationError> {
        let factory = self
            .factories
            .get(task_type)
            .ok_or_else(|| ConfigurationError::UnknownTaskType(task_type.to_string()))?;

        factory
            .create(config)
            .map_err(|e| ConfigurationError::TaskCreation {
                task_type: task_type.to_string(),
                reason: e.to_string(),
            })
    }

    /// Create a draft process with its parameters already validated
    pub fn create_process(
        &self,
        task_type: &str,
        config: &HashMap<String, Value>,
    ) -> Result<Process, ConfigurationError> {
        let task = self.create_task(task_type, config)?;
        let mut process = Process::from_task(task)?;
        process.set_params(config)?;
        Ok(process)
    }

    /// Get all registered task types, sorted
    pub fn list_task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, task_type: &str) -> Option<TaskMetadata> {
        self.factories.get(task_type).map(|f| f.metadata())
    }

    /// Declared ports and parameters of a task type
    pub fn describe(&self, task_type: &str) -> Result<TaskSpec, ConfigurationError> {
        Ok(self.create_task(task_type, &HashMap::new())?.spec())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
