// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.
//!
//! A [`Node`] owns two key-addressed port collections. Concrete node types add
//! lifecycle behaviour through [`NodeBehavior`] and computation through a
//! compute function ([`Node::set_calculate`]).

use crate::calculation::{CalculateFn, CalculationContext, CalculationFuture, CalculationInputs};
use crate::error::{GraphError, Result};
use crate::events::{stream_group, Event, PreventableEvent, SequentialHook, SubscriptionId};
use crate::graph::{Graph, GraphInner};
use crate::graph_node::GraphNode;
use crate::id::uuid_id;
use crate::port::{Port, PortDirection, PortId};
use crate::state::NodeState;
use indexmap::IndexMap;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

uuid_id! {
    /// Unique identifier for a node
    NodeId
}

/// Payload of port add/remove events
#[derive(Debug, Clone)]
pub struct PortChange {
    /// The node whose ports change
    pub node: Node,
    /// Key of the port in its collection
    pub key: String,
    /// The port being added or removed
    pub port: Port,
}

/// Payload of the generic update event
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    /// The updated node
    pub node: Node,
    /// The port whose value changed, or `None` for a structural update
    pub port: Option<Port>,
}

/// Payload of the title events
#[derive(Debug, Clone)]
pub struct TitleChange {
    /// The renamed node
    pub node: Node,
    /// Proposed (before) or applied (after) title
    pub title: String,
}

stream_group! {
    /// Events emitted by a node
    pub struct NodeEvents {
        /// Fired after `load` finished
        loaded: Event<Node>,
        /// Fired before an input is added
        before_add_input: PreventableEvent<PortChange>,
        /// Fired after an input was added
        add_input: Event<PortChange>,
        /// Fired before an output is added
        before_add_output: PreventableEvent<PortChange>,
        /// Fired after an output was added
        add_output: Event<PortChange>,
        /// Fired before an input is removed
        before_remove_input: PreventableEvent<PortChange>,
        /// Fired after an input was removed
        remove_input: Event<PortChange>,
        /// Fired before an output is removed
        before_remove_output: PreventableEvent<PortChange>,
        /// Fired after an output was removed
        remove_output: Event<PortChange>,
        /// Fired before the title changes
        before_title_changed: PreventableEvent<TitleChange>,
        /// Fired after the title changed
        title_changed: Event<TitleChange>,
        /// Fired when a port value changes or the node was rebuilt
        update: Event<NodeUpdate>,
    }
}

stream_group! {
    /// Hooks applied when a node is loaded or saved
    pub struct NodeHooks {
        /// Transforms the incoming state before it is applied
        before_load: SequentialHook<NodeState>,
        /// Transforms the outgoing state
        after_save: SequentialHook<NodeState>,
    }
}

/// Lifecycle behaviour of a node type.
///
/// Every method has a default that does nothing, except [`NodeBehavior::as_any`].
pub trait NodeBehavior: Any {
    /// Called once after the node was added to a graph
    fn on_placed(&self, _node: &Node) -> Result<()> {
        Ok(())
    }

    /// Called once after the node was removed from its graph
    fn on_destroy(&self, _node: &Node) {}

    /// Called by [`Node::load`] before the base state is restored
    fn before_load(&self, _node: &Node, _state: &NodeState) -> Result<()> {
        Ok(())
    }

    /// Called by [`Node::save`] before the save hook runs
    fn after_save(&self, _node: &Node, _state: &mut NodeState) -> Result<()> {
        Ok(())
    }

    /// Built-in compute function, used when none was set on the node
    fn calculate(
        &self,
        _node: &Node,
        _inputs: CalculationInputs,
        _context: &CalculationContext,
    ) -> Option<CalculationFuture> {
        None
    }

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}

/// Behaviour of nodes without lifecycle logic
struct PlainNode;

impl NodeBehavior for PlainNode {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct NodeInner {
    id: Cell<NodeId>,
    type_name: String,
    title: RefCell<String>,
    inputs: RefCell<IndexMap<String, Port>>,
    outputs: RefCell<IndexMap<String, Port>>,
    /// Subscriptions forwarding port value changes to `update`
    forwarding: RefCell<Vec<(Port, SubscriptionId)>>,
    graph: RefCell<Weak<GraphInner>>,
    behavior: Rc<dyn NodeBehavior>,
    calculate: RefCell<Option<CalculateFn>>,
    events: NodeEvents,
    hooks: NodeHooks,
}

/// A node instance
#[derive(Clone)]
pub struct Node(Rc<NodeInner>);

/// Non-owning node handle
#[derive(Clone)]
pub struct WeakNode(Weak<NodeInner>);

impl WeakNode {
    /// Get the node back if it still exists
    pub fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(Node)
    }
}

impl Node {
    /// Create a node of the given type without lifecycle behaviour
    pub fn new(type_name: impl Into<String>) -> Self {
        Self::with_behavior(type_name, PlainNode)
    }

    /// Create a node with custom lifecycle behaviour
    pub fn with_behavior(type_name: impl Into<String>, behavior: impl NodeBehavior) -> Self {
        let type_name = type_name.into();
        Self(Rc::new(NodeInner {
            id: Cell::new(NodeId::new()),
            title: RefCell::new(type_name.clone()),
            type_name,
            inputs: RefCell::new(IndexMap::new()),
            outputs: RefCell::new(IndexMap::new()),
            forwarding: RefCell::new(Vec::new()),
            graph: RefCell::new(Weak::new()),
            behavior: Rc::new(behavior),
            calculate: RefCell::new(None),
            events: NodeEvents::default(),
            hooks: NodeHooks::default(),
        }))
    }

    /// Set the title
    pub fn with_title(self, title: impl Into<String>) -> Self {
        *self.0.title.borrow_mut() = title.into();
        self
    }

    /// Add an input port
    pub fn with_input(self, key: impl Into<String>, port: Port) -> Self {
        self.add_input(key, port);
        self
    }

    /// Add an output port
    pub fn with_output(self, key: impl Into<String>, port: Port) -> Self {
        self.add_output(key, port);
        self
    }

    /// Set the compute function
    pub fn with_calculate(
        self,
        calculate: impl Fn(&Node, CalculationInputs, &CalculationContext) -> CalculationFuture + 'static,
    ) -> Self {
        self.set_calculate(calculate);
        self
    }

    /// Node ID
    pub fn id(&self) -> NodeId {
        self.0.id.get()
    }

    /// Registered type name
    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    /// Display title
    pub fn title(&self) -> String {
        self.0.title.borrow().clone()
    }

    /// Change the title unless a `before_title_changed` subscriber prevents it
    pub fn set_title(&self, title: impl Into<String>) -> bool {
        let change = TitleChange {
            node: self.clone(),
            title: title.into(),
        };
        if self.0.events.before_title_changed.emit(&change).is_prevented() {
            return false;
        }
        *self.0.title.borrow_mut() = change.title.clone();
        self.0.events.title_changed.emit(&change);
        true
    }

    /// Input ports by key
    pub fn inputs(&self) -> IndexMap<String, Port> {
        self.0.inputs.borrow().clone()
    }

    /// Output ports by key
    pub fn outputs(&self) -> IndexMap<String, Port> {
        self.0.outputs.borrow().clone()
    }

    /// Get an input port by key
    pub fn input(&self, key: &str) -> Option<Port> {
        self.0.inputs.borrow().get(key).cloned()
    }

    /// Get an output port by key
    pub fn output(&self, key: &str) -> Option<Port> {
        self.0.outputs.borrow().get(key).cloned()
    }

    /// All ports, inputs first
    pub fn ports(&self) -> Vec<Port> {
        let inputs = self.0.inputs.borrow();
        let outputs = self.0.outputs.borrow();
        inputs.values().chain(outputs.values()).cloned().collect()
    }

    /// Get a port by ID
    pub fn port_by_id(&self, port_id: PortId) -> Option<Port> {
        self.ports().into_iter().find(|p| p.id() == port_id)
    }

    /// Add an input port under `key`.
    ///
    /// Returns `false` if a `before_add_input` subscriber prevented it.
    pub fn add_input(&self, key: impl Into<String>, port: Port) -> bool {
        self.add_port(PortDirection::Input, key.into(), port)
    }

    /// Add an output port under `key`.
    ///
    /// Returns `false` if a `before_add_output` subscriber prevented it.
    pub fn add_output(&self, key: impl Into<String>, port: Port) -> bool {
        self.add_port(PortDirection::Output, key.into(), port)
    }

    /// Remove an input port and every connection touching it.
    ///
    /// Returns `Ok(false)` if the key is unknown or removal was prevented.
    pub fn remove_input(&self, key: &str) -> Result<bool> {
        self.remove_port(PortDirection::Input, key)
    }

    /// Remove an output port and every connection touching it.
    ///
    /// Returns `Ok(false)` if the key is unknown or removal was prevented.
    pub fn remove_output(&self, key: &str) -> Result<bool> {
        self.remove_port(PortDirection::Output, key)
    }

    fn ports_cell(&self, direction: PortDirection) -> &RefCell<IndexMap<String, Port>> {
        match direction {
            PortDirection::Input => &self.0.inputs,
            PortDirection::Output => &self.0.outputs,
        }
    }

    fn add_port(&self, direction: PortDirection, key: String, port: Port) -> bool {
        let events = &self.0.events;
        let (before, after) = match direction {
            PortDirection::Input => (&events.before_add_input, &events.add_input),
            PortDirection::Output => (&events.before_add_output, &events.add_output),
        };
        let change = PortChange {
            node: self.clone(),
            key,
            port,
        };
        if before.emit(&change).is_prevented() {
            return false;
        }

        change.port.set_direction(direction);
        change.port.set_node_id(Some(self.id()));
        let replaced = self
            .ports_cell(direction)
            .borrow_mut()
            .insert(change.key.clone(), change.port.clone());
        if let Some(replaced) = replaced {
            self.stop_forwarding(&replaced);
        }
        self.forward_updates(&change.port);

        after.emit(&change);
        true
    }

    fn remove_port(&self, direction: PortDirection, key: &str) -> Result<bool> {
        let Some(port) = self.ports_cell(direction).borrow().get(key).cloned() else {
            return Ok(false);
        };
        let events = &self.0.events;
        let (before, after) = match direction {
            PortDirection::Input => (&events.before_remove_input, &events.remove_input),
            PortDirection::Output => (&events.before_remove_output, &events.remove_output),
        };
        let change = PortChange {
            node: self.clone(),
            key: key.to_string(),
            port,
        };
        if before.emit(&change).is_prevented() {
            return Ok(false);
        }

        if change.port.connection_count() > 0 {
            let graph = self.graph().ok_or(GraphError::NodeNotInGraph(self.id()))?;
            for connection in graph.connections_for_port(&change.port) {
                graph.remove_connection(&connection);
            }
        }
        self.stop_forwarding(&change.port);
        self.ports_cell(direction).borrow_mut().shift_remove(key);

        after.emit(&change);
        Ok(true)
    }

    fn forward_updates(&self, port: &Port) {
        let node = self.downgrade();
        let subscription = port.events().set_value.subscribe(move |change| {
            if let Some(node) = node.upgrade() {
                node.0.events.update.emit(&NodeUpdate {
                    node: node.clone(),
                    port: Some(change.port.clone()),
                });
            }
        });
        self.0
            .forwarding
            .borrow_mut()
            .push((port.clone(), subscription));
    }

    fn stop_forwarding(&self, port: &Port) {
        let mut forwarding = self.0.forwarding.borrow_mut();
        forwarding.retain(|(forwarded, subscription)| {
            if forwarded.ptr_eq(port) {
                forwarded.events().set_value.unsubscribe(*subscription);
                false
            } else {
                true
            }
        });
    }

    /// The graph this node is placed in
    pub fn graph(&self) -> Option<Graph> {
        self.0.graph.borrow().upgrade().map(Graph)
    }

    pub(crate) fn register_graph(&self, graph: Option<&Graph>) {
        *self.0.graph.borrow_mut() = graph.map_or_else(Weak::new, |g| Rc::downgrade(&g.0));
    }

    pub(crate) fn on_placed(&self) -> Result<()> {
        let behavior = Rc::clone(&self.0.behavior);
        behavior.on_placed(self)
    }

    pub(crate) fn on_destroy(&self) {
        let behavior = Rc::clone(&self.0.behavior);
        behavior.on_destroy(self);
    }

    /// Node events
    pub fn events(&self) -> &NodeEvents {
        &self.0.events
    }

    /// Node hooks
    pub fn hooks(&self) -> &NodeHooks {
        &self.0.hooks
    }

    /// Set the compute function, replacing the built-in one
    pub fn set_calculate(
        &self,
        calculate: impl Fn(&Node, CalculationInputs, &CalculationContext) -> CalculationFuture + 'static,
    ) {
        *self.0.calculate.borrow_mut() = Some(Rc::new(calculate));
    }

    /// Start the node's computation, if it has one
    pub fn calculate(
        &self,
        inputs: CalculationInputs,
        context: &CalculationContext,
    ) -> Option<CalculationFuture> {
        let custom = self.0.calculate.borrow().clone();
        match custom {
            Some(calculate) => Some(calculate(self, inputs, context)),
            None => self.0.behavior.calculate(self, inputs, context),
        }
    }

    /// Restore the node from a saved state.
    ///
    /// Only ports present both in `state` and on the node are loaded.
    pub fn load(&self, state: &NodeState) -> Result<()> {
        let state = self.0.hooks.before_load.execute(state.clone());
        let behavior = Rc::clone(&self.0.behavior);
        behavior.before_load(self, &state)?;

        self.0.id.set(state.id);
        *self.0.title.borrow_mut() = state.title.clone();
        for (key, port_state) in &state.inputs {
            if let Some(port) = self.input(key) {
                port.load(port_state);
            }
        }
        for (key, port_state) in &state.outputs {
            if let Some(port) = self.output(key) {
                port.load(port_state);
            }
        }
        for port in self.ports() {
            port.set_node_id(Some(state.id));
        }

        self.0.events.loaded.emit(self);
        Ok(())
    }

    /// Serialize the node
    pub fn save(&self) -> Result<NodeState> {
        let mut state = NodeState {
            type_name: self.0.type_name.clone(),
            id: self.id(),
            title: self.title(),
            inputs: self
                .inputs()
                .into_iter()
                .map(|(key, port)| (key, port.save()))
                .collect(),
            outputs: self
                .outputs()
                .into_iter()
                .map(|(key, port)| (key, port.save()))
                .collect(),
            graph_state: None,
        };
        let behavior = Rc::clone(&self.0.behavior);
        behavior.after_save(self, &mut state)?;
        Ok(self.0.hooks.after_save.execute(state))
    }

    /// The graph node behaviour, if this node is a template instance
    pub fn as_graph_node(&self) -> Option<&GraphNode> {
        self.0.behavior.as_any().downcast_ref::<GraphNode>()
    }

    /// Non-owning handle to this node
    pub fn downgrade(&self) -> WeakNode {
        WeakNode(Rc::downgrade(&self.0))
    }

    /// Whether both handles refer to the same node
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("type_name", &self.0.type_name)
            .field("title", &*self.0.title.borrow())
            .field("inputs", &self.0.inputs.borrow().keys().collect::<Vec<_>>())
            .field("outputs", &self.0.outputs.borrow().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Flow;
    use serde_json::{json, Value};

    fn math_node() -> Node {
        Node::new("Math")
            .with_title("Add")
            .with_input("a", Port::new("A", json!(1)))
            .with_input("b", Port::new("B", json!(2)))
            .with_output("result", Port::new("Result", Value::Null))
    }

    #[test]
    fn test_ports_take_direction_and_owner() {
        let node = math_node();
        let a = node.input("a").unwrap();
        let result = node.output("result").unwrap();

        assert!(a.is_input());
        assert!(!result.is_input());
        assert_eq!(a.node_id(), Some(node.id()));
        assert_eq!(node.ports().len(), 3);
        assert_eq!(node.port_by_id(result.id()), Some(result));
    }

    #[test]
    fn test_prevented_add_reports_failure() {
        let node = math_node();
        node.events()
            .before_add_input
            .subscribe(|change| if change.key == "c" { Flow::Prevent } else { Flow::Continue });

        assert!(!node.add_input("c", Port::new("C", Value::Null)));
        assert!(node.input("c").is_none());
        assert!(node.add_input("d", Port::new("D", Value::Null)));
    }

    #[test]
    fn test_value_change_emits_update() {
        let node = math_node();
        let updates = Rc::new(Cell::new(0));
        let counter = Rc::clone(&updates);
        node.events()
            .update
            .subscribe(move |_| counter.set(counter.get() + 1));

        let a = node.input("a").unwrap();
        a.set_value(json!(10));
        assert_eq!(updates.get(), 1);

        assert!(node.remove_input("a").unwrap());
        a.set_value(json!(11));
        assert_eq!(updates.get(), 1);
    }

    #[test]
    fn test_remove_connected_port_requires_graph() {
        let node = math_node();
        let source = Port::output("out", Value::Null);
        let target = node.input("a").unwrap();
        let _connection = crate::connection::Connection::new(&source, &target).unwrap();

        let err = node.remove_input("a").unwrap_err();
        assert!(matches!(err, GraphError::NodeNotInGraph(_)));
    }

    #[test]
    fn test_save_and_load_partial_state() {
        let node = math_node();
        node.input("a").unwrap().set_value(json!(5));
        let mut state = node.save().unwrap();
        assert_eq!(state.type_name, "Math");
        assert_eq!(state.inputs["a"].value, json!(5));

        let fresh = math_node();
        state.inputs.shift_remove("b");
        state.title = "Sum".to_string();
        fresh.load(&state).unwrap();

        assert_eq!(fresh.id(), node.id());
        assert_eq!(fresh.title(), "Sum");
        assert_eq!(fresh.input("a").unwrap().value(), json!(5));
        assert_eq!(fresh.input("b").unwrap().value(), json!(2));
        assert_eq!(fresh.input("b").unwrap().node_id(), Some(node.id()));
    }

    #[test]
    fn test_removing_connected_input_drops_its_connection() {
        let editor = crate::editor::Editor::new();
        let graph = editor.graph();
        let source = graph.add_node(math_node()).unwrap().unwrap();
        let target = graph.add_node(math_node()).unwrap().unwrap();
        let out = source.output("result").unwrap();
        let connection = graph
            .add_connection(&out, &target.input("a").unwrap())
            .unwrap();

        assert!(target.remove_input("a").unwrap());
        assert!(target.input("a").is_none());
        assert_eq!(graph.connection_count(), 0);
        assert_eq!(out.connection_count(), 0);
        assert!(connection.is_destructed());
    }

    #[test]
    fn test_removing_connected_output_drops_its_connection() {
        let editor = crate::editor::Editor::new();
        let graph = editor.graph();
        let source = graph.add_node(math_node()).unwrap().unwrap();
        let target = graph.add_node(math_node()).unwrap().unwrap();
        let input = target.input("b").unwrap();
        let connection = graph
            .add_connection(&source.output("result").unwrap(), &input)
            .unwrap();

        assert!(source.remove_output("result").unwrap());
        assert_eq!(graph.connection_count(), 0);
        assert_eq!(input.connection_count(), 0);
        assert!(connection.is_destructed());
    }

    #[test]
    fn test_hooks_wrap_save() {
        let node = math_node();
        node.hooks().after_save.subscribe(|mut state| {
            state.title = state.title.to_uppercase();
            state
        });
        assert_eq!(node.save().unwrap().title, "ADD");
    }

    #[test]
    fn test_title_can_be_vetoed() {
        let node = math_node();
        node.events()
            .before_title_changed
            .subscribe(|change| if change.title.is_empty() { Flow::Prevent } else { Flow::Continue });

        assert!(!node.set_title(""));
        assert!(node.set_title("Sum"));
        assert_eq!(node.title(), "Sum");
    }
}
