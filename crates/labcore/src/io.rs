use crate::{ConfigurationError, Direction, Port, PortSpec, Resource};
use std::collections::HashMap;
use std::sync::Arc;

/// Named, ordered collection of ports on one side of a process
#[derive(Debug, Clone)]
pub struct Io {
    direction: Direction,
    ports: Vec<Port>,
}

impl Io {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ports: Vec::new(),
        }
    }

    /// Build the ports from declared specs, keeping declaration order
    pub fn from_specs<I, S>(owner: &str, direction: Direction, specs: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (S, PortSpec)>,
        S: Into<String>,
    {
        let mut io = Self::new(direction);
        for (name, spec) in specs {
            io.create_port(owner, name, spec)?;
        }
        Ok(io)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn create_port(
        &mut self,
        owner: &str,
        name: impl Into<String>,
        spec: PortSpec,
    ) -> Result<&mut Port, ConfigurationError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(ConfigurationError::DuplicatePort {
                process: owner.to_string(),
                port: name,
            });
        }
        self.ports.push(Port::new(name, self.direction, spec));
        let last = self.ports.len() - 1;
        Ok(&mut self.ports[last])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ports.iter().any(|p| p.name() == name)
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name() == name)
    }

    pub fn port_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.name() == name)
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    pub fn ports_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.ports.iter_mut()
    }

    pub fn names(&self) -> Vec<&str> {
        self.ports.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Every required port holds a resource
    pub fn is_ready(&self) -> bool {
        self.ports.iter().all(|p| p.is_optional() || p.is_ready())
    }

    /// Required ports that are still empty
    pub fn missing(&self) -> Vec<&str> {
        self.ports
            .iter()
            .filter(|p| !p.is_optional() && p.is_empty())
            .map(|p| p.name())
            .collect()
    }

    /// Snapshot of the filled ports
    pub fn resources(&self) -> HashMap<String, Arc<Resource>> {
        self.ports
            .iter()
            .filter_map(|p| p.resource().map(|r| (p.name().to_string(), Arc::clone(r))))
            .collect()
    }

    pub fn specs(&self) -> Vec<(String, PortSpec)> {
        self.ports
            .iter()
            .map(|p| (p.name().to_string(), p.spec().clone()))
            .collect()
    }

    /// Drop every held resource; links stay in place
    pub fn reset(&mut self) {
        for port in &mut self.ports {
            port.clear();
        }
    }
}
