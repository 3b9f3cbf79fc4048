use crate::context::RunContext;
use crate::process::{Process, ProcessIo, RunOutcome, Runnable, Scope};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use labcore::{
    ConfigurationError, Connector, Direction, ExecutionError, Interface, Io, Outerface, Port,
    PortRef, PortSpec, ProgressTracker,
};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Composite body of a protocol process: children keyed by instance name,
/// the connectors between them and the boundary mappings.
#[derive(Default)]
pub struct Protocol {
    processes: BTreeMap<String, Process>,
    connectors: Vec<Connector>,
    interfaces: Vec<Interface>,
    outerfaces: Vec<Outerface>,
}

impl Protocol {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn processes(&self) -> impl Iterator<Item = (&String, &Process)> {
        self.processes.iter()
    }

    pub fn process(&self, name: &str) -> Option<&Process> {
        self.processes.get(name)
    }

    pub(crate) fn process_mut(&mut self, name: &str) -> Option<&mut Process> {
        self.processes.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn outerfaces(&self) -> &[Outerface] {
        &self.outerfaces
    }

    /// Whether some protocol input feeds this child directly
    pub fn is_interfaced_with(&self, name: &str) -> bool {
        self.interfaces.iter().any(|i| i.target.process == name)
    }

    /// Whether this child feeds some protocol output directly
    pub fn is_outerfaced_with(&self, name: &str) -> bool {
        self.outerfaces.iter().any(|o| o.source.process == name)
    }

    pub(crate) fn insert_process(&mut self, name: &str, process: Process) -> Result<(), ConfigurationError> {
        if name.is_empty() || name.contains('.') {
            return Err(ConfigurationError::InvalidGraph(format!(
                "invalid process name '{}'",
                name
            )));
        }
        if self.processes.contains_key(name) {
            return Err(ConfigurationError::DuplicateProcess(name.to_string()));
        }
        self.processes.insert(name.to_string(), process);
        Ok(())
    }

    pub(crate) fn remove_process(&mut self, name: &str) -> Result<Process, ConfigurationError> {
        if !self.processes.contains_key(name) {
            return Err(ConfigurationError::ProcessNotFound(name.to_string()));
        }
        if self.is_interfaced_with(name) || self.is_outerfaced_with(name) {
            return Err(ConfigurationError::NotMutable {
                process: name.to_string(),
                reason: "process is bound to a protocol port".to_string(),
            });
        }

        let (detached, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.connectors)
            .into_iter()
            .partition(|c| c.source_process() == name || c.target_process() == name);
        self.connectors = kept;

        for connector in &detached {
            if connector.target_process() != name {
                if let Some(port) = self.port_mut(&connector.to, Direction::Input) {
                    port.clear_left();
                }
            }
            if connector.source_process() != name {
                if let Some(port) = self.port_mut(&connector.from, Direction::Output) {
                    port.remove_right(&connector.to);
                }
            }
        }

        let mut process = self
            .processes
            .remove(name)
            .ok_or_else(|| ConfigurationError::ProcessNotFound(name.to_string()))?;
        for connector in &detached {
            if connector.target_process() == name {
                if let Some(port) = process.io.inputs.port_mut(&connector.to.port) {
                    port.clear_left();
                }
            } else if let Some(port) = process.io.outputs.port_mut(&connector.from.port) {
                port.remove_right(&connector.to);
            }
        }
        Ok(process)
    }

    /// Port of a child. The side matching `side` is searched first so a
    /// direction mismatch is reported as such rather than as a missing port.
    fn port(&self, at: &PortRef, side: Direction) -> Result<&Port, ConfigurationError> {
        let process = self
            .processes
            .get(&at.process)
            .ok_or_else(|| ConfigurationError::ProcessNotFound(at.process.clone()))?;
        let (first, second) = match side {
            Direction::Output => (&process.io.outputs, &process.io.inputs),
            Direction::Input => (&process.io.inputs, &process.io.outputs),
        };
        first
            .port(&at.port)
            .or_else(|| second.port(&at.port))
            .ok_or_else(|| ConfigurationError::PortNotFound {
                process: at.process.clone(),
                port: at.port.clone(),
            })
    }

    fn port_mut(&mut self, at: &PortRef, side: Direction) -> Option<&mut Port> {
        let process = self.processes.get_mut(&at.process)?;
        match side {
            Direction::Output => process.io.outputs.port_mut(&at.port),
            Direction::Input => process.io.inputs.port_mut(&at.port),
        }
    }

    pub(crate) fn connect(&mut self, from: PortRef, to: PortRef) -> Result<(), ConfigurationError> {
        let source = self.port(&from, Direction::Output)?;
        let target = self.port(&to, Direction::Input)?;
        let connector = Connector::validate(from.clone(), source, to.clone(), target)?;
        self.check_acyclic(&connector)?;

        let target = self
            .port_mut(&connector.to, Direction::Input)
            .ok_or_else(|| ConfigurationError::ProcessNotFound(connector.to.process.clone()))?;
        target.set_left(&connector.to.process, connector.from.clone())?;
        if let Some(source) = self.port_mut(&connector.from, Direction::Output) {
            source.add_right(connector.to.clone());
        }

        tracing::debug!("Connected {} -> {}", connector.from, connector.to);
        self.connectors.push(connector);
        Ok(())
    }

    fn check_acyclic(&self, candidate: &Connector) -> Result<(), ConfigurationError> {
        let mut graph = DiGraph::<&str, ()>::new();
        let indices: HashMap<&str, _> = self
            .processes
            .keys()
            .map(|name| (name.as_str(), graph.add_node(name.as_str())))
            .collect();

        for connector in self.connectors.iter().chain(std::iter::once(candidate)) {
            if let (Some(from), Some(to)) = (
                indices.get(connector.source_process()),
                indices.get(connector.target_process()),
            ) {
                graph.add_edge(*from, *to, ());
            }
        }

        if toposort(&graph, None).is_err() {
            return Err(ConfigurationError::CyclicConnection {
                from: candidate.from.to_string(),
                to: candidate.to.to_string(),
            });
        }
        Ok(())
    }

    /// Mark the child port as fed by protocol input `name` and return its spec
    pub(crate) fn bind_interface(&mut self, name: &str, child: &str, port: &str) -> Result<PortSpec, ConfigurationError> {
        let at = PortRef::new(child, port);
        let target = self.port(&at, Direction::Input)?;
        if target.direction() != Direction::Input {
            return Err(ConfigurationError::WrongDirection {
                process: child.to_string(),
                port: port.to_string(),
                expected: Direction::Input.to_string(),
            });
        }
        let spec = target.spec().clone();

        if let Some(target) = self.port_mut(&at, Direction::Input) {
            target.set_left(child, PortRef::boundary(name))?;
        }
        self.interfaces.push(Interface {
            name: name.to_string(),
            target: at,
        });
        Ok(spec)
    }

    /// Mark the child port as feeding protocol output `name` and return its spec
    pub(crate) fn bind_outerface(&mut self, name: &str, child: &str, port: &str) -> Result<PortSpec, ConfigurationError> {
        let at = PortRef::new(child, port);
        let source = self.port(&at, Direction::Output)?;
        if source.direction() != Direction::Output {
            return Err(ConfigurationError::WrongDirection {
                process: child.to_string(),
                port: port.to_string(),
                expected: Direction::Output.to_string(),
            });
        }
        let spec = source.spec().clone();

        if let Some(source) = self.port_mut(&at, Direction::Output) {
            source.add_right(PortRef::boundary(name));
        }
        self.outerfaces.push(Outerface {
            name: name.to_string(),
            source: at,
        });
        Ok(spec)
    }

    pub(crate) fn reset(&mut self) {
        for process in self.processes.values_mut() {
            process.reset();
        }
    }

    /// Copy protocol inputs into the child ports their interfaces target
    fn load_interfaces(&mut self, inputs: &Io) -> Result<(), ConfigurationError> {
        for interface in &self.interfaces {
            let Some(resource) = inputs.port(&interface.name).and_then(Port::resource) else {
                continue;
            };
            if let Some(child) = self.processes.get_mut(&interface.target.process) {
                if let Some(port) = child.io.inputs.port_mut(&interface.target.port) {
                    port.fill(&interface.target.process, Arc::clone(resource))?;
                }
            }
        }
        Ok(())
    }

    /// Copy the resources behind each outerface into the protocol outputs
    fn store_outerfaces(&self, owner: &str, outputs: &mut Io) -> Result<(), ConfigurationError> {
        for outerface in &self.outerfaces {
            let resource = self
                .processes
                .get(&outerface.source.process)
                .and_then(|child| child.io.outputs.port(&outerface.source.port))
                .and_then(Port::resource);
            if let (Some(resource), Some(port)) = (resource, outputs.port_mut(&outerface.name)) {
                port.fill(owner, Arc::clone(resource))?;
            }
        }
        Ok(())
    }

    /// Push a finished child's outputs along its connectors
    fn propagate_from(&mut self, name: &str) -> Result<(), ConfigurationError> {
        let Some(source) = self.processes.get(name) else {
            return Ok(());
        };
        let deliveries: Vec<_> = source
            .io
            .outputs
            .ports()
            .filter_map(|port| port.resource().map(|r| (port, r)))
            .flat_map(|(port, resource)| {
                port.right()
                    .iter()
                    .filter(|target| !target.is_boundary())
                    .map(move |target| (target.clone(), Arc::clone(resource)))
            })
            .collect();

        for (target, resource) in deliveries {
            match self.processes.get_mut(&target.process) {
                Some(child) if child.state.is_draft() => {
                    if let Some(port) = child.io.inputs.port_mut(&target.port) {
                        port.fill(&target.process, resource)?;
                    }
                }
                Some(_) => tracing::debug!("{} already ran, not delivering to it", target),
                None => tracing::debug!("{} is in flight, not delivering to it", target),
            }
        }
        Ok(())
    }

    fn ready_children(&self) -> Vec<String> {
        self.processes
            .iter()
            .filter(|(_, p)| p.can_run())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

async fn run_child(
    name: String,
    mut child: Process,
    path: String,
    ctx: &RunContext,
) -> (String, Process, Result<RunOutcome, ExecutionError>) {
    let result = child.run_at(ctx, &path).await;
    (name, child, result)
}

#[async_trait]
impl Runnable for Protocol {
    async fn execute(&mut self, io: &mut ProcessIo, scope: &Scope<'_>) -> Result<(), ExecutionError> {
        self.load_interfaces(&io.inputs)?;

        let ctx = scope.ctx();
        let cancellation = ctx.cancellation();
        let mut running = FuturesUnordered::new();
        let mut failure: Option<ExecutionError> = None;
        let mut finished = 0usize;

        loop {
            // Fan out every child that became ready; nothing new starts after a failure
            if failure.is_none() && !cancellation.is_cancelled() {
                for name in self.ready_children() {
                    if let Some(child) = self.processes.remove(&name) {
                        let path = format!("{}.{}", scope.path(), name);
                        running.push(run_child(name, child, path, ctx));
                    }
                }
            }

            let Some((name, child, result)) = running.next().await else {
                break;
            };
            self.processes.insert(name.clone(), child);

            match result {
                Ok(RunOutcome::Completed) => {
                    finished += 1;
                    scope
                        .progress()
                        .set_value(finished as f64, &format!("{} finished", name));
                    if let Err(e) = self.propagate_from(&name) {
                        failure.get_or_insert(e.into());
                    }
                }
                Ok(RunOutcome::Skipped) => {}
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if cancellation.is_cancelled() {
            return Err(ExecutionError::Cancelled(scope.path().to_string()));
        }

        let idle: Vec<&str> = self
            .processes
            .iter()
            .filter(|(_, p)| p.state.is_draft())
            .map(|(name, _)| name.as_str())
            .collect();
        if !idle.is_empty() {
            let message = format!("Processes never became ready: {}", idle.join(", "));
            tracing::warn!("{}: {}", scope.path(), message);
            scope.progress().add_message(&message);
        }

        self.store_outerfaces(scope.path(), &mut io.outputs)?;
        Ok(())
    }
}
