use async_trait::async_trait;
use labcore::{
    types, ParamSpec, ParamType, Task, TaskContext, TaskError, TaskOutput, TaskSpec, Value,
};
use labruntime::{TaskFactory, TaskMetadata};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayTask;

#[async_trait]
impl Task for DelayTask {
    fn task_type(&self) -> &str {
        "time.delay"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .optional_input("resource", types::resource())
            .optional_output("resource", types::resource())
            .param(
                ParamSpec::new("delay_ms", ParamType::Integer)
                    .with_default(1000)
                    .with_range(0.0, 3_600_000.0),
            )
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let delay_ms = ctx
            .config
            .get("delay_ms")
            .and_then(|v| v.as_i64())
            .unwrap_or(1000)
            .max(0) as u64;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(TaskError::Cancelled),
            _ = sleep(Duration::from_millis(delay_ms)) => {}
        }

        // Pass through the input, if any
        let mut output = TaskOutput::new();
        if let Some(resource) = ctx.input("resource") {
            output = output.with_output("resource", Arc::clone(resource));
        }
        Ok(output)
    }
}

pub struct DelayTaskFactory;

impl TaskFactory for DelayTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(DelayTask))
    }

    fn task_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
