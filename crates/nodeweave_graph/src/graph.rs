// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes and connections.
//!
//! Every structural mutation runs a preventable `before_*` event first and a
//! broadcast event afterwards. Handlers may mutate the graph again; those
//! mutations complete before the outer operation continues.

use crate::connection::{
    CheckConnectionHookResult, CheckConnectionResult, Connection, ConnectionCandidate,
    ConnectionEvents,
};
use crate::editor::{Editor, EditorInner};
use crate::error::{GraphError, Result};
use crate::events::{stream_group, Event, PreventableEvent, SequentialHook, ValidationHook};
use crate::id::uuid_id;
use crate::node::{Node, NodeEvents, NodeHooks, NodeId};
use crate::port::{Port, PortId};
use crate::state::{ConnectionState, GraphInterface, GraphState};
use crate::template::{GraphTemplate, TemplateInner};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

uuid_id! {
    /// Unique identifier for a graph
    GraphId
}

/// Payload of graph events: the graph and the entity concerned
#[derive(Debug, Clone)]
pub struct GraphChange<T> {
    /// The graph emitting the event
    pub graph: Graph,
    /// The node, connection or candidate concerned
    pub subject: T,
}

stream_group! {
    /// Events emitted by a graph
    pub struct GraphEvents {
        /// Fired before a node is added
        before_add_node: PreventableEvent<GraphChange<Node>>,
        /// Fired after a node was added and placed
        add_node: Event<GraphChange<Node>>,
        /// Fired before a node is removed
        before_remove_node: PreventableEvent<GraphChange<Node>>,
        /// Fired after a node was removed
        remove_node: Event<GraphChange<Node>>,
        /// Fired before a validated connection is created
        before_add_connection: PreventableEvent<GraphChange<ConnectionCandidate>>,
        /// Fired after a connection was created
        add_connection: Event<GraphChange<Connection>>,
        /// Fired while validating a prospective connection
        check_connection: PreventableEvent<GraphChange<ConnectionCandidate>>,
        /// Fired before a connection is removed
        before_remove_connection: PreventableEvent<GraphChange<Connection>>,
        /// Fired after a connection was removed
        remove_connection: Event<GraphChange<Connection>>,
    }
}

stream_group! {
    /// Hooks applied by a graph
    pub struct GraphHooks {
        /// Transforms the outgoing state
        after_save: SequentialHook<GraphState>,
        /// Runs after a state was loaded
        after_load: SequentialHook<GraphState>,
        /// Connection rules; a connection is allowed only if every rule allows it
        check_connection: ValidationHook<GraphChange<ConnectionCandidate>, CheckConnectionHookResult>,
    }
}

pub(crate) struct GraphInner {
    id: Cell<GraphId>,
    editor: Weak<EditorInner>,
    nodes: RefCell<Vec<Node>>,
    connections: RefCell<Vec<Connection>>,
    inputs: RefCell<Vec<GraphInterface>>,
    outputs: RefCell<Vec<GraphInterface>>,
    loading: Cell<bool>,
    destroying: Cell<bool>,
    active_transactions: Cell<usize>,
    template: RefCell<Weak<TemplateInner>>,
    events: GraphEvents,
    hooks: GraphHooks,
    node_events: NodeEvents,
    node_hooks: NodeHooks,
    connection_events: ConnectionEvents,
}

/// A node graph
#[derive(Clone)]
pub struct Graph(pub(crate) Rc<GraphInner>);

impl Graph {
    /// Create an empty graph and register it with `editor`
    pub fn new(editor: &Editor) -> Self {
        let graph = Self::unregistered(Rc::downgrade(&editor.0));
        editor.register_graph(&graph);
        graph
    }

    pub(crate) fn unregistered(editor: Weak<EditorInner>) -> Self {
        Self(Rc::new(GraphInner {
            id: Cell::new(GraphId::new()),
            editor,
            nodes: RefCell::new(Vec::new()),
            connections: RefCell::new(Vec::new()),
            inputs: RefCell::new(Vec::new()),
            outputs: RefCell::new(Vec::new()),
            loading: Cell::new(false),
            destroying: Cell::new(false),
            active_transactions: Cell::new(0),
            template: RefCell::new(Weak::new()),
            events: GraphEvents::default(),
            hooks: GraphHooks::default(),
            node_events: NodeEvents::default(),
            node_hooks: NodeHooks::default(),
            connection_events: ConnectionEvents::default(),
        }))
    }

    /// Graph ID
    pub fn id(&self) -> GraphId {
        self.0.id.get()
    }

    /// The editor owning this graph
    pub fn editor(&self) -> Option<Editor> {
        self.0.editor.upgrade().map(Editor)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> Vec<Node> {
        self.0.nodes.borrow().clone()
    }

    /// Connections in insertion order
    pub fn connections(&self) -> Vec<Connection> {
        self.0.connections.borrow().clone()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.0.nodes.borrow().len()
    }

    /// Get the number of connections
    pub fn connection_count(&self) -> usize {
        self.0.connections.borrow().len()
    }

    /// Boundary inputs
    pub fn inputs(&self) -> Vec<GraphInterface> {
        self.0.inputs.borrow().clone()
    }

    /// Boundary outputs
    pub fn outputs(&self) -> Vec<GraphInterface> {
        self.0.outputs.borrow().clone()
    }

    /// Replace the boundary inputs
    pub fn set_inputs(&self, inputs: Vec<GraphInterface>) {
        *self.0.inputs.borrow_mut() = inputs;
    }

    /// Replace the boundary outputs
    pub fn set_outputs(&self, outputs: Vec<GraphInterface>) {
        *self.0.outputs.borrow_mut() = outputs;
    }

    /// Whether a bulk load is in progress
    pub fn is_loading(&self) -> bool {
        self.0.loading.get()
    }

    /// Whether the graph is being torn down
    pub fn is_destroying(&self) -> bool {
        self.0.destroying.get()
    }

    /// Number of open transactions
    pub fn active_transactions(&self) -> usize {
        self.0.active_transactions.get()
    }

    /// Open a transaction. The counter is advisory: nothing here batches on it.
    pub fn begin_transaction(&self) {
        self.0.active_transactions.set(self.active_transactions() + 1);
    }

    /// Close a transaction
    pub fn end_transaction(&self) {
        self.0
            .active_transactions
            .set(self.active_transactions().saturating_sub(1));
    }

    /// The template this graph was instantiated from
    pub fn template(&self) -> Option<GraphTemplate> {
        self.0.template.borrow().upgrade().map(GraphTemplate)
    }

    pub(crate) fn set_template(&self, template: Option<&GraphTemplate>) {
        *self.0.template.borrow_mut() =
            template.map_or_else(Weak::new, |t| Rc::downgrade(&t.0));
    }

    /// Graph events
    pub fn events(&self) -> &GraphEvents {
        &self.0.events
    }

    /// Graph hooks
    pub fn hooks(&self) -> &GraphHooks {
        &self.0.hooks
    }

    /// Events of every node in this graph
    pub fn node_events(&self) -> &NodeEvents {
        &self.0.node_events
    }

    /// Hooks of every node in this graph
    pub fn node_hooks(&self) -> &NodeHooks {
        &self.0.node_hooks
    }

    /// Events of every connection in this graph
    pub fn connection_events(&self) -> &ConnectionEvents {
        &self.0.connection_events
    }

    fn change<T>(&self, subject: T) -> GraphChange<T> {
        GraphChange {
            graph: self.clone(),
            subject,
        }
    }

    fn contains_node(&self, node: &Node) -> bool {
        self.0.nodes.borrow().iter().any(|n| n.ptr_eq(node))
    }

    fn contains_connection(&self, connection: &Connection) -> bool {
        self.0
            .connections
            .borrow()
            .iter()
            .any(|c| c.ptr_eq(connection))
    }

    /// Add a node to the graph.
    ///
    /// Returns `Ok(None)` if a `before_add_node` subscriber prevented it.
    pub fn add_node(&self, node: Node) -> Result<Option<Node>> {
        let change = self.change(node);
        if self.0.events.before_add_node.emit(&change).is_prevented() {
            return Ok(None);
        }
        let node = change.subject.clone();

        self.0.node_events.add_target(node.events());
        self.0.node_hooks.add_target(node.hooks());
        node.register_graph(Some(self));
        self.0.nodes.borrow_mut().push(node.clone());
        node.on_placed()?;
        tracing::debug!(graph = %self.id(), node = %node.id(), "Added node {}", node.type_name());

        self.0.events.add_node.emit(&change);
        Ok(Some(node))
    }

    /// Remove a node and its connections
    pub fn remove_node(&self, node: &Node) {
        if !self.contains_node(node) {
            return;
        }
        let change = self.change(node.clone());
        if self.0.events.before_remove_node.emit(&change).is_prevented() {
            return;
        }

        let ports = node.ports();
        let doomed: Vec<Connection> = self
            .connections()
            .into_iter()
            .filter(|c| ports.iter().any(|p| c.involves_port(p)))
            .collect();
        for connection in doomed {
            self.remove_connection(&connection);
        }
        self.0.nodes.borrow_mut().retain(|n| !n.ptr_eq(node));
        tracing::debug!(graph = %self.id(), node = %node.id(), "Removed node {}", node.type_name());

        self.0.events.remove_node.emit(&change);
        node.on_destroy();
        node.register_graph(None);
        self.0.node_events.remove_target(node.events());
        self.0.node_hooks.remove_target(node.hooks());
    }

    /// Check whether a connection between two ports would be allowed.
    ///
    /// Never fails: every rejection is reported as [`CheckConnectionResult::Denied`].
    /// Endpoints given in input-to-output order are swapped.
    pub fn check_connection(&self, from: &Port, to: &Port) -> CheckConnectionResult {
        let owned = |port: &Port| {
            self.find_node_interface(port.id())
                .is_some_and(|found| found.ptr_eq(port))
        };
        if !owned(from) || !owned(to) {
            return CheckConnectionResult::Denied;
        }
        if from.node_id().is_some() && from.node_id() == to.node_id() {
            return CheckConnectionResult::Denied;
        }

        let (from, to) = if from.is_input() && !to.is_input() {
            (to, from)
        } else {
            (from, to)
        };
        if from.is_input() || !to.is_input() {
            return CheckConnectionResult::Denied;
        }

        let duplicate = self
            .0
            .connections
            .borrow()
            .iter()
            .any(|c| c.from().ptr_eq(from) && c.to().ptr_eq(to));
        if duplicate {
            return CheckConnectionResult::Denied;
        }

        let check = self.change(ConnectionCandidate {
            from: from.clone(),
            to: to.clone(),
        });
        if self.0.events.check_connection.emit(&check).is_prevented() {
            return CheckConnectionResult::Denied;
        }

        let verdicts = self
            .0
            .hooks
            .check_connection
            .execute_until(&check, |verdict| !verdict.is_allowed());
        let mut connections_in_danger: Vec<Connection> = Vec::new();
        for verdict in verdicts {
            match verdict {
                CheckConnectionHookResult::Deny => return CheckConnectionResult::Denied,
                CheckConnectionHookResult::Allow {
                    connections_in_danger: flagged,
                } => {
                    for connection in flagged {
                        if !connections_in_danger.iter().any(|c| c.ptr_eq(&connection)) {
                            connections_in_danger.push(connection);
                        }
                    }
                }
            }
        }

        CheckConnectionResult::Allowed {
            dummy_connection: check.subject,
            connections_in_danger,
        }
    }

    /// Validate and add a connection between two ports.
    ///
    /// Returns `None` if validation failed or a `before_add_connection`
    /// subscriber prevented it.
    pub fn add_connection(&self, from: &Port, to: &Port) -> Option<Connection> {
        let CheckConnectionResult::Allowed {
            dummy_connection,
            connections_in_danger,
        } = self.check_connection(from, to)
        else {
            return None;
        };

        for connection in &connections_in_danger {
            if self.contains_connection(connection) {
                self.remove_connection(connection);
            }
        }

        let candidate = self.change(dummy_connection);
        if self.0.events.before_add_connection.emit(&candidate).is_prevented() {
            return None;
        }

        let connection = Connection::new(&candidate.subject.from, &candidate.subject.to).ok()?;
        self.register_connection(&connection);
        Some(connection)
    }

    /// Store an already validated connection and announce it
    fn register_connection(&self, connection: &Connection) {
        self.0.connection_events.add_target(connection.events());
        self.0.connections.borrow_mut().push(connection.clone());
        tracing::debug!(graph = %self.id(), connection = %connection.id(), "Added connection");

        self.0
            .events
            .add_connection
            .emit(&self.change(connection.clone()));
    }

    /// Remove a connection
    pub fn remove_connection(&self, connection: &Connection) {
        if !self.contains_connection(connection) {
            return;
        }
        let change = self.change(connection.clone());
        if self
            .0
            .events
            .before_remove_connection
            .emit(&change)
            .is_prevented()
        {
            return;
        }

        connection.destruct();
        self.0
            .connections
            .borrow_mut()
            .retain(|c| !c.ptr_eq(connection));
        tracing::debug!(graph = %self.id(), connection = %connection.id(), "Removed connection");

        self.0.events.remove_connection.emit(&change);
        self.0.connection_events.remove_target(connection.events());
    }

    /// Find a port by ID across all nodes
    pub fn find_node_interface(&self, port_id: PortId) -> Option<Port> {
        self.nodes()
            .iter()
            .find_map(|node| node.port_by_id(port_id))
    }

    /// Find a node by ID
    pub fn find_node_by_id(&self, node_id: NodeId) -> Option<Node> {
        self.0
            .nodes
            .borrow()
            .iter()
            .find(|n| n.id() == node_id)
            .cloned()
    }

    /// Get connections from a specific port
    pub fn connections_from(&self, port: &Port) -> Vec<Connection> {
        self.filter_connections(|c| c.from().ptr_eq(port))
    }

    /// Get connections to a specific port
    pub fn connections_to(&self, port: &Port) -> Vec<Connection> {
        self.filter_connections(|c| c.to().ptr_eq(port))
    }

    /// Get connections touching a specific port
    pub fn connections_for_port(&self, port: &Port) -> Vec<Connection> {
        self.filter_connections(|c| c.involves_port(port))
    }

    /// Get connections involving a node
    pub fn connections_for_node(&self, node_id: NodeId) -> Vec<Connection> {
        self.filter_connections(|c| c.involves_node(node_id))
    }

    fn filter_connections(&self, predicate: impl Fn(&Connection) -> bool) -> Vec<Connection> {
        self.0
            .connections
            .borrow()
            .iter()
            .filter(|c| predicate(c))
            .cloned()
            .collect()
    }

    /// Replace the graph's contents with a saved state.
    ///
    /// Unknown node types and unresolvable connection endpoints are skipped;
    /// a warning is returned for each.
    pub fn load(&self, state: &GraphState) -> Result<Vec<String>> {
        self.0.loading.set(true);
        scopeguard::defer! {
            self.0.loading.set(false);
        }
        let editor = self.editor().ok_or(GraphError::EditorDropped)?;
        let mut warnings = Vec::new();

        for connection in self.connections().into_iter().rev() {
            self.remove_connection(&connection);
        }
        for node in self.nodes().into_iter().rev() {
            self.remove_node(&node);
        }

        self.0.id.set(state.id);
        self.set_inputs(state.inputs.clone());
        self.set_outputs(state.outputs.clone());

        for node_state in &state.nodes {
            let Some(node) = editor.create_node(&node_state.type_name) else {
                warnings.push(format!("Node type {} is not registered", node_state.type_name));
                continue;
            };
            if let Some(node) = self.add_node(node)? {
                node.load(node_state)?;
            }
        }

        for connection_state in &state.connections {
            let Some(from) = self.find_node_interface(connection_state.from) else {
                warnings.push(format!(
                    "Could not find interface with id {}",
                    connection_state.from
                ));
                continue;
            };
            let Some(to) = self.find_node_interface(connection_state.to) else {
                warnings.push(format!(
                    "Could not find interface with id {}",
                    connection_state.to
                ));
                continue;
            };
            match Connection::with_id(connection_state.id, &from, &to) {
                Ok(connection) => self.register_connection(&connection),
                Err(err) => warnings.push(format!(
                    "Skipping connection {}: {err}",
                    connection_state.id
                )),
            }
        }

        self.0.hooks.after_load.execute(state.clone());
        Ok(warnings)
    }

    /// Serialize the graph
    pub fn save(&self) -> Result<GraphState> {
        let nodes = self
            .nodes()
            .iter()
            .map(Node::save)
            .collect::<Result<Vec<_>>>()?;
        let connections = self
            .connections()
            .iter()
            .map(|c| ConnectionState {
                id: c.id(),
                from: c.from().id(),
                to: c.to().id(),
            })
            .collect();
        Ok(self.0.hooks.after_save.execute(GraphState {
            id: self.id(),
            nodes,
            connections,
            inputs: self.inputs(),
            outputs: self.outputs(),
        }))
    }

    /// Remove every node and unregister the graph from its editor
    pub fn destroy(&self) {
        self.0.destroying.set(true);
        for node in self.nodes() {
            self.remove_node(&node);
        }
        if let Some(template) = self.template() {
            template.detach_instance(self);
        }
        if let Some(editor) = self.editor() {
            editor.unregister_graph(self);
        }
    }

    /// Whether both handles refer to the same graph
    pub fn ptr_eq(&self, other: &Graph) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Graph {}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id())
            .field("nodes", &self.node_count())
            .field("connections", &self.connection_count())
            .field("loading", &self.is_loading())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Flow;
    use serde_json::{json, Value};

    fn editor_with_math() -> Editor {
        let editor = Editor::new();
        editor.register_node_type("Math", math_node, Default::default());
        editor
    }

    fn math_node() -> Node {
        Node::new("Math")
            .with_input("a", Port::new("A", json!(0)))
            .with_input("b", Port::new("B", json!(0)))
            .with_output("result", Port::new("Result", Value::Null))
    }

    fn placed(graph: &Graph) -> Node {
        graph.add_node(math_node()).unwrap().unwrap()
    }

    #[test]
    fn test_connect_counts_and_disconnect() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let n1 = placed(&graph);
        let n2 = placed(&graph);
        let out = n1.output("result").unwrap();
        let input = n2.input("a").unwrap();

        let connection = graph.add_connection(&out, &input).unwrap();
        assert_eq!(out.connection_count(), 1);
        assert_eq!(input.connection_count(), 1);

        graph.remove_connection(&connection);
        assert_eq!(out.connection_count(), 0);
        assert_eq!(input.connection_count(), 0);
        assert!(graph.connections().is_empty());
        assert!(connection.is_destructed());
    }

    #[test]
    fn test_check_connection_swaps_direction() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let n1 = placed(&graph);
        let n2 = placed(&graph);
        let out = n1.output("result").unwrap();
        let input = n2.input("a").unwrap();

        let connection = graph.add_connection(&input, &out).unwrap();
        assert!(connection.from().ptr_eq(&out));
        assert!(connection.to().ptr_eq(&input));
    }

    #[test]
    fn test_rejected_connections() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let n1 = placed(&graph);
        let n2 = placed(&graph);
        let foreign = math_node();

        let same_node = graph.check_connection(&n1.output("result").unwrap(), &n1.input("a").unwrap());
        assert!(!same_node.is_allowed());

        let two_inputs = graph.check_connection(&n1.input("a").unwrap(), &n2.input("a").unwrap());
        assert!(!two_inputs.is_allowed());

        let detached = graph.check_connection(&foreign.output("result").unwrap(), &n2.input("a").unwrap());
        assert!(!detached.is_allowed());

        let out = n1.output("result").unwrap();
        let input = n2.input("a").unwrap();
        assert!(graph.add_connection(&out, &input).is_some());
        assert!(!graph.check_connection(&out, &input).is_allowed());
    }

    #[test]
    fn test_rule_flags_connections_in_danger() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let n1 = placed(&graph);
        let n2 = placed(&graph);
        let n3 = placed(&graph);
        let input = n3.input("a").unwrap();
        graph.hooks().check_connection.subscribe(crate::rules::exclusive_inputs());

        let first = graph.add_connection(&n1.output("result").unwrap(), &input).unwrap();
        let second = graph.add_connection(&n2.output("result").unwrap(), &input).unwrap();

        assert!(first.is_destructed());
        assert_eq!(graph.connections(), vec![second]);
        assert_eq!(input.connection_count(), 1);
    }

    #[test]
    fn test_denying_rule_short_circuits() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let n1 = placed(&graph);
        let n2 = placed(&graph);
        let later_rule_ran = Rc::new(Cell::new(false));

        graph
            .hooks()
            .check_connection
            .subscribe(|_| CheckConnectionHookResult::Deny);
        let flag = Rc::clone(&later_rule_ran);
        graph.hooks().check_connection.subscribe(move |_| {
            flag.set(true);
            CheckConnectionHookResult::allow()
        });

        let result = graph.check_connection(&n1.output("result").unwrap(), &n2.input("a").unwrap());
        assert!(!result.is_allowed());
        assert!(!later_rule_ran.get());
    }

    #[test]
    fn test_prevented_add_node_leaves_graph_unchanged() {
        let editor = editor_with_math();
        let graph = editor.graph();
        graph.events().before_add_node.subscribe(|_| Flow::Prevent);

        assert!(graph.add_node(math_node()).unwrap().is_none());
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_remove_node_cascades_connections() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let n1 = placed(&graph);
        let n2 = placed(&graph);
        let n3 = placed(&graph);
        let out = n1.output("result").unwrap();
        graph.add_connection(&out, &n2.input("a").unwrap()).unwrap();
        graph.add_connection(&n2.output("result").unwrap(), &n3.input("b").unwrap()).unwrap();

        graph.remove_node(&n2);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.connection_count(), 0);
        assert_eq!(out.connection_count(), 0);
        assert!(n2.graph().is_none());

        graph.remove_node(&n2);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_handler_mutation_runs_depth_first() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&order);
        let inner_graph = graph.clone();
        graph.events().add_node.subscribe(move |change| {
            log.borrow_mut().push(format!("added {}", change.subject.title()));
            if change.subject.title() == "Math" {
                let extra = math_node().with_title("Extra");
                inner_graph.add_node(extra).unwrap();
                log.borrow_mut().push("after nested".to_string());
            }
        });

        placed(&graph);
        assert_eq!(
            *order.borrow(),
            vec!["added Math", "added Extra", "after nested"]
        );
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_find_helpers() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let node = placed(&graph);
        let port = node.input("b").unwrap();

        assert_eq!(graph.find_node_by_id(node.id()), Some(node));
        assert_eq!(graph.find_node_interface(port.id()), Some(port));
        assert!(graph.find_node_interface(PortId::new()).is_none());
    }

    #[test]
    fn test_load_skips_unknown_entries() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let n1 = placed(&graph);
        let n2 = placed(&graph);
        graph.add_connection(&n1.output("result").unwrap(), &n2.input("a").unwrap()).unwrap();

        let mut state = graph.save().unwrap();
        let mut unknown = state.nodes[0].clone();
        unknown.type_name = "Missing".to_string();
        state.nodes.push(unknown);
        state.connections.push(ConnectionState {
            id: crate::connection::ConnectionId::new(),
            from: PortId::new(),
            to: n2.input("b").unwrap().id(),
        });

        let warnings = graph.load(&state).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("Missing"));
        assert!(!graph.is_loading());
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.connection_count(), 1);
        assert_eq!(graph.id(), state.id);
    }

    #[test]
    fn test_loading_flag_visible_during_load() {
        let editor = editor_with_math();
        let graph = editor.graph();
        placed(&graph);
        let state = graph.save().unwrap();

        let observed = Rc::new(Cell::new(false));
        let flag = Rc::clone(&observed);
        let watched = graph.clone();
        graph
            .events()
            .add_node
            .subscribe(move |_| flag.set(watched.is_loading()));

        graph.load(&state).unwrap();
        assert!(observed.get());
        assert!(!graph.is_loading());
    }

    #[test]
    fn test_save_restores_topology() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let n1 = placed(&graph);
        let n2 = placed(&graph);
        n1.input("a").unwrap().set_value(json!(4));
        graph.add_connection(&n1.output("result").unwrap(), &n2.input("b").unwrap()).unwrap();
        let state = graph.save().unwrap();

        let other = Graph::new(&editor);
        assert!(other.load(&state).unwrap().is_empty());
        assert_eq!(other.save().unwrap(), state);
        let loaded = other.connections();
        assert_eq!(loaded[0].to().connection_count(), 1);
    }

    #[test]
    fn test_load_announces_connections() {
        let editor = editor_with_math();
        let graph = editor.graph();
        let n1 = placed(&graph);
        let n2 = placed(&graph);
        graph.add_connection(&n1.output("result").unwrap(), &n2.input("b").unwrap()).unwrap();
        let state = graph.save().unwrap();

        let other = Graph::new(&editor);
        let added = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&added);
        other
            .events()
            .add_connection
            .subscribe(move |change| sink.borrow_mut().push(change.subject.id()));

        other.load(&state).unwrap();
        assert_eq!(*added.borrow(), vec![state.connections[0].id]);
    }

    #[test]
    fn test_transactions_are_counted() {
        let editor = Editor::new();
        let graph = editor.graph();
        graph.begin_transaction();
        graph.begin_transaction();
        graph.end_transaction();
        assert_eq!(graph.active_transactions(), 1);
        graph.end_transaction();
        graph.end_transaction();
        assert_eq!(graph.active_transactions(), 0);
    }

    #[test]
    fn test_destroy_unregisters() {
        let editor = editor_with_math();
        let graph = Graph::new(&editor);
        placed(&graph);
        assert!(editor.graphs().contains(&graph));

        graph.destroy();
        assert!(graph.is_destroying());
        assert_eq!(graph.node_count(), 0);
        assert!(!editor.graphs().contains(&graph));
    }
}
