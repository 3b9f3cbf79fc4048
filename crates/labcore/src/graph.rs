use crate::{Connector, Interface, Outerface, PortRef, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Process type used for nested protocol nodes
pub const PROTOCOL_TYPE: &str = "protocol";

/// Serializable description of a protocol: nodes, links and boundary ports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolGraph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeSpec>,
    #[serde(default)]
    pub links: Vec<Connector>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub outerfaces: Vec<Outerface>,
}

impl ProtocolGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn add_node(&mut self, name: impl Into<String>, node: NodeSpec) -> &mut Self {
        self.nodes.insert(name.into(), node);
        self
    }

    pub fn link(
        &mut self,
        from_node: impl Into<String>,
        from_port: impl Into<String>,
        to_node: impl Into<String>,
        to_port: impl Into<String>,
    ) -> &mut Self {
        self.links.push(Connector {
            from: PortRef::new(from_node, from_port),
            to: PortRef::new(to_node, to_port),
        });
        self
    }

    pub fn interface(
        &mut self,
        name: impl Into<String>,
        node: impl Into<String>,
        port: impl Into<String>,
    ) -> &mut Self {
        self.interfaces.push(Interface {
            name: name.into(),
            target: PortRef::new(node, port),
        });
        self
    }

    pub fn outerface(
        &mut self,
        name: impl Into<String>,
        node: impl Into<String>,
        port: impl Into<String>,
    ) -> &mut Self {
        self.outerfaces.push(Outerface {
            name: name.into(),
            source: PortRef::new(node, port),
        });
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Total number of nodes, nested protocols included
    pub fn node_count(&self) -> usize {
        self.nodes
            .values()
            .map(|n| 1 + n.graph.as_ref().map_or(0, |g| g.node_count()))
            .sum()
    }
}

/// One node of a protocol graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub process_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<Box<ProtocolGraph>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl NodeSpec {
    pub fn task(process_type: impl Into<String>) -> Self {
        Self {
            process_type: process_type.into(),
            title: None,
            config: HashMap::new(),
            graph: None,
            position: None,
        }
    }

    pub fn protocol(graph: ProtocolGraph) -> Self {
        Self {
            process_type: PROTOCOL_TYPE.to_string(),
            title: graph.title.clone(),
            config: HashMap::new(),
            graph: Some(Box::new(graph)),
            position: None,
        }
    }

    pub fn is_protocol(&self) -> bool {
        self.process_type == PROTOCOL_TYPE
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }
}

/// Node position in a visual editor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
