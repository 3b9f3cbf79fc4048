use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type ResourceId = Uuid;

/// Name of the universal resource type every other type derives from
pub const ROOT_RESOURCE_TYPE: &str = "Resource";

/// Declared type of a resource.
///
/// A type carries its full lineage (nearest parent first) so subtype checks
/// never need a global lookup table and survive serialization unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceType {
    name: String,
    #[serde(default)]
    lineage: Vec<String>,
}

impl ResourceType {
    /// The universal type; accepts any resource
    pub fn any() -> Self {
        Self {
            name: ROOT_RESOURCE_TYPE.to_string(),
            lineage: Vec::new(),
        }
    }

    /// A new type directly below the universal type
    pub fn new(name: impl Into<String>) -> Self {
        Self::derive(&Self::any(), name)
    }

    /// A new type below `parent`
    pub fn derive(parent: &ResourceType, name: impl Into<String>) -> Self {
        let mut lineage = Vec::with_capacity(parent.lineage.len() + 1);
        lineage.push(parent.name.clone());
        lineage.extend(parent.lineage.iter().cloned());
        Self {
            name: name.into(),
            lineage,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// True when a value of type `other` may be stored where `self` is declared
    pub fn is_assignable_from(&self, other: &ResourceType) -> bool {
        self.name == other.name || other.lineage.iter().any(|ancestor| ancestor == &self.name)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Built-in resource types
pub mod types {
    use super::ResourceType;

    pub fn resource() -> ResourceType {
        ResourceType::any()
    }

    pub fn text() -> ResourceType {
        ResourceType::new("Text")
    }

    pub fn number() -> ResourceType {
        ResourceType::new("Number")
    }

    pub fn integer() -> ResourceType {
        ResourceType::derive(&number(), "Integer")
    }

    pub fn float() -> ResourceType {
        ResourceType::derive(&number(), "Float")
    }

    pub fn boolean() -> ResourceType {
        ResourceType::new("Boolean")
    }

    pub fn json() -> ResourceType {
        ResourceType::new("Json")
    }

    /// Pick the narrowest built-in type for a plain value
    pub fn infer(value: &crate::Value) -> ResourceType {
        use crate::Value;
        match value {
            Value::Integer(_) => integer(),
            Value::Number(_) => float(),
            Value::String(_) => text(),
            Value::Bool(_) => boolean(),
            Value::Json(_) | Value::Array(_) | Value::Object(_) => json(),
            Value::Null => resource(),
        }
    }
}

/// A typed, immutable piece of data produced by a process.
///
/// Ports share resources through `Arc`; downstream consumers that need a
/// modified copy clone it first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub resource_type: ResourceType,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(resource_type: ResourceType, value: impl Into<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_type,
            value: value.into(),
            created_at: Utc::now(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(types::text(), Value::String(value.into()))
    }

    pub fn integer(value: i64) -> Self {
        Self::new(types::integer(), Value::Integer(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(types::float(), Value::Number(value))
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::new(types::json(), Value::Json(value))
    }

    /// Wrap a plain value using the inferred built-in type
    pub fn from_value(value: Value) -> Self {
        let resource_type = types::infer(&value);
        Self::new(resource_type, value)
    }

    pub fn is_instance_of(&self, resource_type: &ResourceType) -> bool {
        resource_type.is_assignable_from(&self.resource_type)
    }

    /// Same payload under a fresh identity, for tasks that derive a new resource
    pub fn derive_with(&self, value: impl Into<Value>) -> Self {
        Self::new(self.resource_type.clone(), value)
    }
}
