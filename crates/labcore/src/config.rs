use crate::{ConfigurationError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Integer,
    Float,
    Text,
    Boolean,
    Json,
}

/// Declared parameter of a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub allowed_values: Option<Vec<Value>>,
    #[serde(default)]
    pub description: String,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            default: None,
            min: None,
            max: None,
            allowed_values: None,
            description: String::new(),
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_allowed<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn invalid(&self, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::InvalidParameter {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Coerce `value` to the declared type and check bounds
    pub fn validate(&self, value: Value) -> Result<Value, ConfigurationError> {
        let coerced = match self.param_type {
            ParamType::Integer => value
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| self.invalid(format!("expected integer, got {}", value.kind())))?,
            ParamType::Float => value
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| self.invalid(format!("expected number, got {}", value.kind())))?,
            ParamType::Text => match value {
                Value::String(_) => value,
                other => return Err(self.invalid(format!("expected string, got {}", other.kind()))),
            },
            ParamType::Boolean => match value {
                Value::Bool(_) => value,
                other => return Err(self.invalid(format!("expected bool, got {}", other.kind()))),
            },
            ParamType::Json => match value {
                Value::Json(_) => value,
                other => Value::Json(other.to_json()),
            },
        };

        if let Some(n) = coerced.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    return Err(self.invalid(format!("{} is below the minimum {}", n, min)));
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Err(self.invalid(format!("{} is above the maximum {}", n, max)));
                }
            }
        }

        if let Some(allowed) = &self.allowed_values {
            if !allowed.contains(&coerced) {
                return Err(self.invalid(format!("{:?} is not one of the allowed values", coerced)));
            }
        }

        Ok(coerced)
    }
}

/// Validated name -> value mapping backed by parameter specs
#[derive(Debug, Clone, Default)]
pub struct Config {
    specs: Vec<ParamSpec>,
    values: HashMap<String, Value>,
}

impl Config {
    pub fn new(specs: Vec<ParamSpec>) -> Result<Self, ConfigurationError> {
        for (i, spec) in specs.iter().enumerate() {
            if specs[..i].iter().any(|s| s.name == spec.name) {
                return Err(ConfigurationError::InvalidParameter {
                    name: spec.name.clone(),
                    reason: "declared twice".to_string(),
                });
            }
            if let Some(default) = &spec.default {
                spec.validate(default.clone())?;
            }
        }
        Ok(Self {
            specs,
            values: HashMap::new(),
        })
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Explicit value, falling back to the declared default
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values
            .get(name)
            .cloned()
            .or_else(|| self.spec(name).and_then(|s| s.default.clone()))
    }

    pub fn set_value(&mut self, name: &str, value: Value) -> Result<(), ConfigurationError> {
        let spec = self
            .spec(name)
            .ok_or_else(|| ConfigurationError::UnknownParameter(name.to_string()))?;
        let value = spec.validate(value)?;
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Apply several values; none are applied if any is rejected
    pub fn set_values(&mut self, values: &HashMap<String, Value>) -> Result<(), ConfigurationError> {
        let mut validated = HashMap::with_capacity(values.len());
        for (name, value) in values {
            let spec = self
                .spec(name)
                .ok_or_else(|| ConfigurationError::UnknownParameter(name.clone()))?;
            validated.insert(name.clone(), spec.validate(value.clone())?);
        }
        self.values.extend(validated);
        Ok(())
    }

    /// Only the values set explicitly
    pub fn explicit_values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Every parameter that has a value or a default
    pub fn values(&self) -> HashMap<String, Value> {
        self.specs
            .iter()
            .filter_map(|s| self.get(&s.name).map(|v| (s.name.clone(), v)))
            .collect()
    }
}
