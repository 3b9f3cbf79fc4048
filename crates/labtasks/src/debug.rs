use async_trait::async_trait;
use labcore::{
    types, ParamSpec, ParamType, Resource, Task, TaskContext, TaskError, TaskOutput, TaskSpec,
    Value,
};
use labruntime::{TaskFactory, TaskMetadata};
use std::collections::HashMap;

/// Simple debug task that logs its inputs
pub struct DebugTask;

#[async_trait]
impl Task for DebugTask {
    fn task_type(&self) -> &str {
        "debug.log"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .optional_input("message", types::resource())
            .optional_output("message", types::text())
            .param(ParamSpec::new("message", ParamType::Text).with_default(""))
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let message = match ctx.input("message") {
            Some(resource) => match &resource.value {
                Value::String(s) => s.clone(),
                other => other.to_json().to_string(),
            },
            None => ctx
                .get_config_or("message", Value::from(""))
                .as_str()
                .unwrap_or_default()
                .to_string(),
        };
        let message = if message.is_empty() {
            "(no message)".to_string()
        } else {
            message
        };

        ctx.events.info(format!("DEBUG: {}", message));
        tracing::info!("[{}] {}", ctx.instance_path, message);

        Ok(TaskOutput::new().with_output("message", Resource::text(message)))
    }
}

pub struct DebugTaskFactory;

impl TaskFactory for DebugTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(DebugTask))
    }

    fn task_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Logs a message or an incoming resource".to_string(),
            category: "debug".to_string(),
        }
    }
}

/// Always fails; used to exercise error propagation
pub struct FailTask;

#[async_trait]
impl Task for FailTask {
    fn task_type(&self) -> &str {
        "debug.fail"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .optional_input("resource", types::resource())
            .param(ParamSpec::new("message", ParamType::Text).with_default("Forced failure"))
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let message = ctx
            .get_config_or("message", Value::from("Forced failure"))
            .as_str()
            .unwrap_or("Forced failure")
            .to_string();
        Err(TaskError::ExecutionFailed(message))
    }
}

pub struct FailTaskFactory;

impl TaskFactory for FailTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(FailTask))
    }

    fn task_type(&self) -> &str {
        "debug.fail"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Fail with the configured message".to_string(),
            category: "debug".to_string(),
        }
    }
}
