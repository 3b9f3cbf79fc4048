use crate::process::Process;
use crate::registry::TaskRegistry;
use labcore::{ConfigurationError, Connector, Interface, Outerface, PortRef, ProtocolGraph};

/// Assembles a protocol process in one go: children first, then boundary
/// ports, then links.
#[derive(Default)]
pub struct ProtocolBuilder {
    title: Option<String>,
    processes: Vec<(String, Process)>,
    links: Vec<Connector>,
    interfaces: Vec<Interface>,
    outerfaces: Vec<Outerface>,
}

impl ProtocolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn process(mut self, name: impl Into<String>, process: Process) -> Self {
        self.processes.push((name.into(), process));
        self
    }

    pub fn connect(
        mut self,
        from_process: impl Into<String>,
        from_port: impl Into<String>,
        to_process: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        self.links.push(Connector {
            from: PortRef::new(from_process, from_port),
            to: PortRef::new(to_process, to_port),
        });
        self
    }

    pub fn interface(
        mut self,
        name: impl Into<String>,
        process: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        self.interfaces.push(Interface {
            name: name.into(),
            target: PortRef::new(process, port),
        });
        self
    }

    pub fn outerface(
        mut self,
        name: impl Into<String>,
        process: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        self.outerfaces.push(Outerface {
            name: name.into(),
            source: PortRef::new(process, port),
        });
        self
    }

    pub fn build(self) -> Result<Process, ConfigurationError> {
        let mut protocol = Process::protocol();
        if let Some(title) = self.title {
            protocol.set_title(title);
        }
        for (name, process) in self.processes {
            protocol.add_process(&name, process)?;
        }
        for interface in &self.interfaces {
            protocol.add_interface(&interface.name, &interface.target.process, &interface.target.port)?;
        }
        for outerface in &self.outerfaces {
            protocol.add_outerface(&outerface.name, &outerface.source.process, &outerface.source.port)?;
        }
        for link in self.links {
            protocol.add_connector(link)?;
        }
        Ok(protocol)
    }
}

/// Rebuild a protocol process from its serialized graph, resolving task types
/// through the registry. Nested protocol nodes are built recursively.
pub fn build_protocol(graph: &ProtocolGraph, registry: &TaskRegistry) -> Result<Process, ConfigurationError> {
    let mut builder = ProtocolBuilder::new();
    if let Some(title) = &graph.title {
        builder = builder.title(title.clone());
    }

    for (name, node) in &graph.nodes {
        let mut process = if node.is_protocol() {
            let inner = node.graph.as_deref().ok_or_else(|| {
                ConfigurationError::InvalidGraph(format!("protocol node '{}' has no graph", name))
            })?;
            build_protocol(inner, registry)?
        } else {
            registry.create_process(&node.process_type, &node.config)?
        };
        if let Some(title) = &node.title {
            process.set_title(title.clone());
        }
        builder = builder.process(name.clone(), process);
    }

    builder.interfaces = graph.interfaces.clone();
    builder.outerfaces = graph.outerfaces.clone();
    builder.links = graph.links.clone();
    builder.build()
}
