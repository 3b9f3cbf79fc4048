use async_trait::async_trait;
use labcore::{types, Resource, Task, TaskContext, TaskError, TaskOutput, TaskSpec, Value};
use labruntime::{TaskFactory, TaskMetadata};
use std::collections::HashMap;

/// Parse a JSON string into a Json resource
pub struct JsonParseTask;

#[async_trait]
impl Task for JsonParseTask {
    fn task_type(&self) -> &str {
        "transform.json_parse"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .input("json", types::text())
            .output("parsed", types::json())
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let input = ctx.require_input("json")?;
        let text = input
            .value
            .as_str()
            .ok_or_else(|| TaskError::InvalidInputType {
                field: "json".to_string(),
                expected: "string".to_string(),
                actual: input.value.kind().to_string(),
            })?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| TaskError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(TaskOutput::new().with_output("parsed", Resource::json(parsed)))
    }
}

pub struct JsonParseTaskFactory;

impl TaskFactory for JsonParseTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(JsonParseTask))
    }

    fn task_type(&self) -> &str {
        "transform.json_parse"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Render any resource value as a JSON string
pub struct JsonStringifyTask;

#[async_trait]
impl Task for JsonStringifyTask {
    fn task_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec::new()
            .input("value", types::resource())
            .output("json", types::text())
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let value = ctx.require_input("value")?;

        let json_str = serde_json::to_string_pretty(&value.value.to_json())
            .map_err(|e| TaskError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(TaskOutput::new().with_output("json", Resource::text(json_str)))
    }
}

pub struct JsonStringifyTaskFactory;

impl TaskFactory for JsonStringifyTaskFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(JsonStringifyTask))
    }

    fn task_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}
