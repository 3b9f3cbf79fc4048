use async_trait::async_trait;
use labcore::{
    types, ParamSpec, ParamType, Resource, Task, TaskContext, TaskError, TaskOutput, TaskSpec,
    Value,
};
use labruntime::{TaskFactory, TaskMetadata};
use std::collections::HashMap;
use std::sync::Arc;

/// Emits the configured value as a resource of the narrowest built-in type
pub struct SourceTask;

#[async_trait]
impl Task for SourceTask {
    fn task_type(&self) -> &str {
        "core.source"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .output("resource", types::resource())
            .param(
                ParamSpec::new("value", ParamType::Json)
                    .with_default(Value::Json(serde_json::Value::Null))
                    .with_description("Value to emit"),
            )
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let value = ctx.require_config("value")?.to_json();
        let resource = Resource::from_value(Value::from_json(value));
        ctx.events.info(format!("Emitting {} resource", resource.resource_type));

        Ok(TaskOutput::new().with_output("resource", resource))
    }
}

pub struct SourceTaskFactory;

impl TaskFactory for SourceTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(SourceTask))
    }

    fn task_type(&self) -> &str {
        "core.source"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Emit a configured value".to_string(),
            category: "core".to_string(),
        }
    }
}

/// Passes its input through unchanged
pub struct MoveTask;

#[async_trait]
impl Task for MoveTask {
    fn task_type(&self) -> &str {
        "core.move"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .input("resource", types::resource())
            .output("resource", types::resource())
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let resource = Arc::clone(ctx.require_input("resource")?);
        Ok(TaskOutput::new().with_output("resource", resource))
    }
}

pub struct MoveTaskFactory;

impl TaskFactory for MoveTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(MoveTask))
    }

    fn task_type(&self) -> &str {
        "core.move"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Forward a resource unchanged".to_string(),
            category: "core".to_string(),
        }
    }
}

/// Consumes a resource and records it
pub struct SinkTask;

#[async_trait]
impl Task for SinkTask {
    fn task_type(&self) -> &str {
        "core.sink"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new().input("resource", types::resource())
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let resource = ctx.require_input("resource")?;
        tracing::debug!(
            "Sink {} received {} {}",
            ctx.instance_path,
            resource.resource_type,
            resource.id
        );
        ctx.events.info(format!(
            "Received {}: {}",
            resource.resource_type,
            resource.value.to_json()
        ));

        Ok(TaskOutput::new())
    }
}

pub struct SinkTaskFactory;

impl TaskFactory for SinkTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(SinkTask))
    }

    fn task_type(&self) -> &str {
        "core.sink"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Consume a resource".to_string(),
            category: "core".to_string(),
        }
    }
}
