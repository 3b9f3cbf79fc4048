use crate::{ConfigurationError, Resource, ResourceType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Address of a port inside a protocol: child instance name plus port name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub process: String,
    pub port: String,
}

impl PortRef {
    pub fn new(process: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            process: process.into(),
            port: port.into(),
        }
    }

    /// A port on the enclosing protocol's own boundary
    pub fn boundary(port: impl Into<String>) -> Self {
        Self::new("", port)
    }

    pub fn is_boundary(&self) -> bool {
        self.process.is_empty()
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_boundary() {
            write!(f, "<boundary>.{}", self.port)
        } else {
            write!(f, "{}.{}", self.process, self.port)
        }
    }
}

/// Declared shape of a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub resource_type: ResourceType,
    #[serde(default)]
    pub optional: bool,
}

impl PortSpec {
    pub fn required(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            optional: false,
        }
    }

    pub fn optional(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            optional: true,
        }
    }
}

/// Single-slot typed channel on a process
#[derive(Debug, Clone)]
pub struct Port {
    name: String,
    direction: Direction,
    spec: PortSpec,
    resource: Option<Arc<Resource>>,
    left: Option<PortRef>,
    right: Vec<PortRef>,
}

impl Port {
    pub fn new(name: impl Into<String>, direction: Direction, spec: PortSpec) -> Self {
        Self {
            name: name.into(),
            direction,
            spec,
            resource: None,
            left: None,
            right: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn spec(&self) -> &PortSpec {
        &self.spec
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.spec.resource_type
    }

    pub fn is_optional(&self) -> bool {
        self.spec.optional
    }

    pub fn resource(&self) -> Option<&Arc<Resource>> {
        self.resource.as_ref()
    }

    /// A port is ready once it holds a resource
    pub fn is_ready(&self) -> bool {
        self.resource.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.resource.is_none()
    }

    pub fn accepts(&self, resource: &Resource) -> bool {
        resource.is_instance_of(&self.spec.resource_type)
    }

    fn check_type(&self, resource: &Resource) -> Result<(), ConfigurationError> {
        if self.accepts(resource) {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidResource {
                port: self.name.clone(),
                expected: self.spec.resource_type.to_string(),
                actual: resource.resource_type.to_string(),
            })
        }
    }

    /// Store a resource in an empty port
    pub fn fill(&mut self, owner: &str, resource: Arc<Resource>) -> Result<(), ConfigurationError> {
        if self.resource.is_some() {
            return Err(ConfigurationError::PortAlreadyFilled {
                process: owner.to_string(),
                port: self.name.clone(),
            });
        }
        self.check_type(&resource)?;
        self.resource = Some(resource);
        Ok(())
    }

    /// Store a resource whether or not the port already holds one
    pub fn replace(&mut self, resource: Arc<Resource>) -> Result<(), ConfigurationError> {
        self.check_type(&resource)?;
        self.resource = Some(resource);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.resource = None;
    }

    pub fn left(&self) -> Option<&PortRef> {
        self.left.as_ref()
    }

    pub fn right(&self) -> &[PortRef] {
        &self.right
    }

    pub fn is_left_connected(&self) -> bool {
        self.left.is_some()
    }

    pub fn is_right_connected(&self) -> bool {
        !self.right.is_empty()
    }

    pub fn set_left(&mut self, owner: &str, upstream: PortRef) -> Result<(), ConfigurationError> {
        if self.left.is_some() {
            return Err(ConfigurationError::AlreadyConnected {
                process: owner.to_string(),
                port: self.name.clone(),
            });
        }
        self.left = Some(upstream);
        Ok(())
    }

    pub fn add_right(&mut self, downstream: PortRef) {
        if !self.right.contains(&downstream) {
            self.right.push(downstream);
        }
    }

    pub fn clear_left(&mut self) {
        self.left = None;
    }

    pub fn remove_right(&mut self, downstream: &PortRef) {
        self.right.retain(|r| r != downstream);
    }
}

/// Link from one output port to one input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connector {
    pub from: PortRef,
    pub to: PortRef,
}

impl Connector {
    /// Check that `source` may feed `target` and build the connector.
    /// Nothing is recorded on either port; the caller links them on success.
    pub fn validate(
        from: PortRef,
        source: &Port,
        to: PortRef,
        target: &Port,
    ) -> Result<Self, ConfigurationError> {
        if source.direction() != Direction::Output {
            return Err(ConfigurationError::WrongDirection {
                process: from.process,
                port: from.port,
                expected: Direction::Output.to_string(),
            });
        }
        if target.direction() != Direction::Input {
            return Err(ConfigurationError::WrongDirection {
                process: to.process,
                port: to.port,
                expected: Direction::Input.to_string(),
            });
        }
        if target.is_left_connected() {
            return Err(ConfigurationError::AlreadyConnected {
                process: to.process,
                port: to.port,
            });
        }
        if from.process == to.process {
            return Err(ConfigurationError::SelfConnection(from.process));
        }
        if !target.resource_type().is_assignable_from(source.resource_type()) {
            return Err(ConfigurationError::IncompatibleTypes {
                from: from.to_string(),
                to: to.to_string(),
                source_type: source.resource_type().to_string(),
                target_type: target.resource_type().to_string(),
            });
        }
        Ok(Self { from, to })
    }

    pub fn source_process(&self) -> &str {
        &self.from.process
    }

    pub fn target_process(&self) -> &str {
        &self.to.process
    }
}

/// Maps a protocol input port onto a child input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub target: PortRef,
}

/// Maps a child output port onto a protocol output port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outerface {
    pub name: String,
    pub source: PortRef,
}
