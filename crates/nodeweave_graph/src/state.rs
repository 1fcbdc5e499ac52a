// SPDX-License-Identifier: MIT OR Apache-2.0
//! Serialized forms of editors, graphs, templates, nodes and ports.
//!
//! Field names follow the persisted format (`templateId`, `nodeInterfaceId`,
//! `graphTemplates`, node `type`).

use crate::connection::ConnectionId;
use crate::error::StateError;
use crate::graph::GraphId;
use crate::id::uuid_id;
use crate::node::NodeId;
use crate::port::PortId;
use crate::template::TemplateId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

uuid_id! {
    /// Identifier of a graph boundary port descriptor
    InterfaceId
}

/// Saved port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortState {
    /// Port ID
    pub id: PortId,
    /// Template port this one was instantiated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<PortId>,
    /// Held value
    #[serde(default)]
    pub value: Value,
}

/// Saved node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    /// Registered node type name
    #[serde(rename = "type")]
    pub type_name: String,
    /// Node ID
    pub id: NodeId,
    /// Display title
    pub title: String,
    /// Input ports by key
    #[serde(default)]
    pub inputs: IndexMap<String, PortState>,
    /// Output ports by key
    #[serde(default)]
    pub outputs: IndexMap<String, PortState>,
    /// Full state of the subgraph (graph nodes only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_state: Option<GraphState>,
}

/// Saved connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Connection ID
    pub id: ConnectionId,
    /// Source port ID
    pub from: PortId,
    /// Target port ID
    pub to: PortId,
}

/// Boundary port of a graph, exposed when the graph is embedded as a subgraph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphInterface {
    /// Descriptor ID, stable across template instances
    pub id: InterfaceId,
    /// Display name
    pub name: String,
    /// Inner port this descriptor exposes
    pub node_interface_id: PortId,
}

impl GraphInterface {
    /// Create a descriptor exposing `port_id` under `name`
    pub fn new(name: impl Into<String>, node_interface_id: PortId) -> Self {
        Self {
            id: InterfaceId::new(),
            name: name.into(),
            node_interface_id,
        }
    }
}

/// Saved graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    /// Graph ID
    pub id: GraphId,
    /// Nodes in insertion order
    #[serde(default)]
    pub nodes: Vec<NodeState>,
    /// Connections in insertion order
    #[serde(default)]
    pub connections: Vec<ConnectionState>,
    /// Boundary inputs
    #[serde(default)]
    pub inputs: Vec<GraphInterface>,
    /// Boundary outputs
    #[serde(default)]
    pub outputs: Vec<GraphInterface>,
}

impl GraphState {
    /// An empty graph with a fresh ID
    pub fn empty() -> Self {
        Self {
            id: GraphId::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

/// Saved graph template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateState {
    /// Template ID
    pub id: TemplateId,
    /// Template name
    pub name: String,
    /// Node snapshots
    #[serde(default)]
    pub nodes: Vec<NodeState>,
    /// Connection snapshots
    #[serde(default)]
    pub connections: Vec<ConnectionState>,
    /// Boundary inputs
    #[serde(default)]
    pub inputs: Vec<GraphInterface>,
    /// Boundary outputs
    #[serde(default)]
    pub outputs: Vec<GraphInterface>,
}

/// Saved editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorState {
    /// Root graph
    pub graph: GraphState,
    /// Graph templates in registration order
    #[serde(default)]
    pub graph_templates: Vec<TemplateState>,
}

impl EditorState {
    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON
    pub fn from_json_str(json: &str) -> Result<Self, StateError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty RON
    pub fn to_ron_string(&self) -> Result<String, StateError> {
        let config = ron::ser::PrettyConfig::default().enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Parse from RON
    pub fn from_ron_str(ron: &str) -> Result<Self, StateError> {
        Ok(ron::from_str(ron)?)
    }
}
