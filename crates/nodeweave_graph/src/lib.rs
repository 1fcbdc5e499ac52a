// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node graph editor core.
//!
//! This crate provides the model behind a node-based visual editor:
//! - Nodes with key-addressed input/output ports holding JSON values
//! - Connections validated by pluggable rules
//! - Cancellable before-events, broadcast after-events and transform hooks on
//!   every entity, aggregated at graph, template and editor level
//! - Graph templates instantiated as subgraph nodes
//! - Serialization of the whole editor state
//!
//! Evaluation is out of scope: nodes carry asynchronous compute functions and
//! subgraph nodes delegate to an external [`GraphRunner`].
//!
//! ## Example
//!
//! ```
//! use nodeweave_graph::{Editor, Node, Port};
//! use serde_json::json;
//!
//! let editor = Editor::new();
//! editor.register_node_type(
//!     "Number",
//!     || Node::new("Number").with_output("value", Port::new("Value", json!(0))),
//!     Default::default(),
//! );
//! editor.register_node_type(
//!     "Display",
//!     || Node::new("Display").with_input("value", Port::new("Value", json!(null))),
//!     Default::default(),
//! );
//!
//! let graph = editor.graph();
//! let number = graph.add_node(editor.create_node("Number").unwrap()).unwrap().unwrap();
//! let display = graph.add_node(editor.create_node("Display").unwrap()).unwrap().unwrap();
//! let connection = graph
//!     .add_connection(&number.output("value").unwrap(), &display.input("value").unwrap())
//!     .unwrap();
//! assert_eq!(connection.to().connection_count(), 1);
//!
//! let state = editor.save().unwrap();
//! assert!(editor.load(&state).unwrap().is_empty());
//! ```

pub mod calculation;
pub mod config;
pub mod connection;
pub mod editor;
pub mod error;
pub mod events;
pub mod graph;
pub mod graph_node;
mod id;
pub mod node;
pub mod port;
pub mod rules;
pub mod state;
pub mod template;

pub use calculation::{CalculationContext, CalculationInputs, CalculationOutputs, GraphRunner};
pub use config::EditorConfig;
pub use connection::{
    CheckConnectionHookResult, CheckConnectionResult, Connection, ConnectionCandidate,
    ConnectionId,
};
pub use editor::{Editor, NodeTypeEntry, NodeTypeKind, NodeTypeOptions};
pub use error::{ConfigError, GraphError, StateError};
pub use events::{Event, Flow, PreventableEvent, SequentialHook, SubscriptionId, ValidationHook};
pub use graph::{Graph, GraphChange, GraphId};
pub use graph_node::{GraphNode, CALCULATION_RESULTS_KEY};
pub use node::{Node, NodeBehavior, NodeId};
pub use port::{Port, PortDirection, PortId};
pub use state::{
    ConnectionState, EditorState, GraphInterface, GraphState, InterfaceId, NodeState, PortState,
    TemplateState,
};
pub use template::{GraphTemplate, TemplateId};
