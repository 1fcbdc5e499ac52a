// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph templates.
//!
//! A template is a detached snapshot of a graph. Each instantiation gets an
//! entirely fresh id space; template ids and instance ids are related only
//! through a remap table that lives for the duration of one `create_graph` call.

use crate::connection::{ConnectionEvents, ConnectionId};
use crate::editor::{Editor, EditorInner};
use crate::error::{GraphError, Result};
use crate::events::{stream_group, Event, SequentialHook};
use crate::graph::{Graph, GraphEvents, GraphHooks, GraphId, GraphInner};
use crate::id::uuid_id;
use crate::node::{NodeEvents, NodeHooks, NodeId};
use crate::port::PortId;
use crate::state::{
    ConnectionState, GraphInterface, GraphState, NodeState, PortState, TemplateState,
};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use uuid::Uuid;

uuid_id! {
    /// Unique identifier for a graph template
    TemplateId
}

/// Name prefix of template-backed node types
pub const GRAPH_NODE_TYPE_PREFIX: &str = "__graph_node-";

/// Payload of [`TemplateEvents::name_changed`]
#[derive(Debug, Clone)]
pub struct TemplateRename {
    /// The renamed template
    pub template: GraphTemplate,
    /// New name
    pub name: String,
}

stream_group! {
    /// Events emitted by a template
    pub struct TemplateEvents {
        /// Fired after the name changed
        name_changed: Event<TemplateRename>,
        /// Fired after the stored snapshot was replaced
        updated: Event<GraphTemplate>,
    }
}

stream_group! {
    /// Hooks applied by a template
    pub struct TemplateHooks {
        /// Transforms the outgoing state
        after_save: SequentialHook<TemplateState>,
    }
}

/// Stored graph content of a template
struct Snapshot {
    nodes: Vec<NodeState>,
    connections: Vec<ConnectionState>,
    inputs: Vec<GraphInterface>,
    outputs: Vec<GraphInterface>,
}

pub(crate) struct TemplateInner {
    id: TemplateId,
    name: RefCell<String>,
    snapshot: RefCell<Snapshot>,
    editor: Weak<EditorInner>,
    instances: RefCell<Vec<Weak<GraphInner>>>,
    events: TemplateEvents,
    hooks: TemplateHooks,
    graph_events: GraphEvents,
    graph_hooks: GraphHooks,
    node_events: NodeEvents,
    node_hooks: NodeHooks,
    connection_events: ConnectionEvents,
}

/// A reusable, instantiable graph snapshot
#[derive(Clone)]
pub struct GraphTemplate(pub(crate) Rc<TemplateInner>);

impl GraphTemplate {
    /// Create a template from a saved state.
    ///
    /// The template is not registered; see [`Editor::add_graph_template`].
    pub fn new(state: TemplateState, editor: &Editor) -> Self {
        Self(Rc::new(TemplateInner {
            id: state.id,
            name: RefCell::new(state.name),
            snapshot: RefCell::new(Snapshot {
                nodes: state.nodes,
                connections: state.connections,
                inputs: state.inputs,
                outputs: state.outputs,
            }),
            editor: Rc::downgrade(&editor.0),
            instances: RefCell::new(Vec::new()),
            events: TemplateEvents::default(),
            hooks: TemplateHooks::default(),
            graph_events: GraphEvents::default(),
            graph_hooks: GraphHooks::default(),
            node_events: NodeEvents::default(),
            node_hooks: NodeHooks::default(),
            connection_events: ConnectionEvents::default(),
        }))
    }

    /// Capture a live graph, named after the editor's default template name
    pub fn from_graph(graph: &Graph, editor: &Editor) -> Result<Self> {
        let state = graph.save()?;
        Ok(Self::new(
            TemplateState {
                id: TemplateId::new(),
                name: editor.config().default_template_name.clone(),
                nodes: state.nodes,
                connections: state.connections,
                inputs: state.inputs,
                outputs: state.outputs,
            },
            editor,
        ))
    }

    /// Template ID
    pub fn id(&self) -> TemplateId {
        self.0.id
    }

    /// Template name
    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }

    /// Rename the template and the display title of its node type
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        *self.0.name.borrow_mut() = name.clone();
        if let Some(editor) = self.editor() {
            editor.set_node_type_title(&self.node_type_name(), &name);
        }
        self.0.events.name_changed.emit(&TemplateRename {
            template: self.clone(),
            name,
        });
    }

    /// Type name of the node type backed by this template
    pub fn node_type_name(&self) -> String {
        format!("{GRAPH_NODE_TYPE_PREFIX}{}", self.0.id)
    }

    /// The editor this template belongs to
    pub fn editor(&self) -> Option<Editor> {
        self.0.editor.upgrade().map(Editor)
    }

    /// Stored node snapshots
    pub fn nodes(&self) -> Vec<NodeState> {
        self.0.snapshot.borrow().nodes.clone()
    }

    /// Stored connection snapshots
    pub fn connections(&self) -> Vec<ConnectionState> {
        self.0.snapshot.borrow().connections.clone()
    }

    /// Boundary inputs
    pub fn inputs(&self) -> Vec<GraphInterface> {
        self.0.snapshot.borrow().inputs.clone()
    }

    /// Boundary outputs
    pub fn outputs(&self) -> Vec<GraphInterface> {
        self.0.snapshot.borrow().outputs.clone()
    }

    /// Replace the stored content with `state` (its id is ignored) and notify
    /// every instance
    pub fn update(&self, state: GraphState) {
        *self.0.snapshot.borrow_mut() = Snapshot {
            nodes: state.nodes,
            connections: state.connections,
            inputs: state.inputs,
            outputs: state.outputs,
        };
        tracing::debug!(template = %self.id(), "Template updated");
        self.0.events.updated.emit(self);
    }

    /// Instantiate the template.
    ///
    /// Loads into `target` when given, replacing its content, otherwise into a
    /// new graph registered with the editor.
    pub fn create_graph(&self, target: Option<&Graph>) -> Result<Graph> {
        let editor = self.editor().ok_or(GraphError::EditorDropped)?;
        let state = self.instance_state()?;

        let graph = match target {
            Some(graph) => graph.clone(),
            None => Graph::new(&editor),
        };
        let warnings = match graph.load(&state) {
            Ok(warnings) => warnings,
            Err(err) => {
                if target.is_none() {
                    graph.destroy();
                }
                return Err(err);
            }
        };
        for warning in &warnings {
            tracing::warn!(template = %self.id(), "{warning}");
        }

        if let Some(previous) = graph.template() {
            if !previous.ptr_eq(self) {
                previous.detach_instance(&graph);
            }
        }
        graph.set_template(Some(self));
        self.attach_instance(&graph);
        Ok(graph)
    }

    /// Snapshot of the template with every id replaced
    fn instance_state(&self) -> Result<GraphState> {
        let snapshot = self.0.snapshot.borrow();
        let mut remap = IdRemap::default();

        let nodes = snapshot
            .nodes
            .iter()
            .map(|node| NodeState {
                type_name: node.type_name.clone(),
                id: NodeId(remap.fresh(node.id.0)),
                title: node.title.clone(),
                inputs: remap.ports(&node.inputs),
                outputs: remap.ports(&node.outputs),
                // nested graph nodes build their own subgraph from their template
                graph_state: None,
            })
            .collect();

        let connections = snapshot
            .connections
            .iter()
            .map(|connection| -> Result<ConnectionState> {
                Ok(ConnectionState {
                    id: ConnectionId(remap.fresh(connection.id.0)),
                    from: PortId(remap.mapped(connection.from.0)?),
                    to: PortId(remap.mapped(connection.to.0)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let interfaces = |descriptors: &[GraphInterface]| {
            descriptors
                .iter()
                .map(|descriptor| -> Result<GraphInterface> {
                    Ok(GraphInterface {
                        id: descriptor.id,
                        name: descriptor.name.clone(),
                        node_interface_id: PortId(remap.mapped(descriptor.node_interface_id.0)?),
                    })
                })
                .collect::<Result<Vec<_>>>()
        };
        let inputs = interfaces(snapshot.inputs.as_slice())?;
        let outputs = interfaces(snapshot.outputs.as_slice())?;

        Ok(GraphState {
            id: GraphId::new(),
            nodes,
            connections,
            inputs,
            outputs,
        })
    }

    /// Serialize the template
    pub fn save(&self) -> TemplateState {
        let snapshot = self.0.snapshot.borrow();
        let state = TemplateState {
            id: self.id(),
            name: self.name(),
            nodes: snapshot.nodes.clone(),
            connections: snapshot.connections.clone(),
            inputs: snapshot.inputs.clone(),
            outputs: snapshot.outputs.clone(),
        };
        drop(snapshot);
        self.0.hooks.after_save.execute(state)
    }

    /// Template events
    pub fn events(&self) -> &TemplateEvents {
        &self.0.events
    }

    /// Template hooks
    pub fn hooks(&self) -> &TemplateHooks {
        &self.0.hooks
    }

    /// Events of every live instance graph
    pub fn graph_events(&self) -> &GraphEvents {
        &self.0.graph_events
    }

    /// Hooks of every live instance graph
    pub fn graph_hooks(&self) -> &GraphHooks {
        &self.0.graph_hooks
    }

    /// Events of every node in every live instance
    pub fn node_events(&self) -> &NodeEvents {
        &self.0.node_events
    }

    /// Hooks of every node in every live instance
    pub fn node_hooks(&self) -> &NodeHooks {
        &self.0.node_hooks
    }

    /// Events of every connection in every live instance
    pub fn connection_events(&self) -> &ConnectionEvents {
        &self.0.connection_events
    }

    /// Live graphs instantiated from this template
    pub fn instances(&self) -> Vec<Graph> {
        self.0
            .instances
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .map(Graph)
            .collect()
    }

    pub(crate) fn attach_instance(&self, graph: &Graph) {
        {
            let mut instances = self.0.instances.borrow_mut();
            instances.retain(|w| w.strong_count() > 0);
            if instances.iter().any(|w| std::ptr::eq(w.as_ptr(), Rc::as_ptr(&graph.0))) {
                return;
            }
            instances.push(Rc::downgrade(&graph.0));
        }
        self.0.graph_events.add_target(graph.events());
        self.0.graph_hooks.add_target(graph.hooks());
        self.0.node_events.add_target(graph.node_events());
        self.0.node_hooks.add_target(graph.node_hooks());
        self.0.connection_events.add_target(graph.connection_events());
    }

    pub(crate) fn detach_instance(&self, graph: &Graph) {
        self.0
            .instances
            .borrow_mut()
            .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), Rc::as_ptr(&graph.0)));
        self.0.graph_events.remove_target(graph.events());
        self.0.graph_hooks.remove_target(graph.hooks());
        self.0.node_events.remove_target(graph.node_events());
        self.0.node_hooks.remove_target(graph.node_hooks());
        self.0.connection_events.remove_target(graph.connection_events());
    }

    /// Whether both handles refer to the same template
    pub fn ptr_eq(&self, other: &GraphTemplate) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for GraphTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for GraphTemplate {}

impl fmt::Debug for GraphTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphTemplate")
            .field("id", &self.id())
            .field("name", &*self.0.name.borrow())
            .field("nodes", &self.0.snapshot.borrow().nodes.len())
            .finish_non_exhaustive()
    }
}

/// Old-to-new id table for a single instantiation
#[derive(Default)]
struct IdRemap {
    forward: HashMap<Uuid, Uuid>,
    backward: HashMap<Uuid, Uuid>,
}

impl IdRemap {
    /// New id for `old`, generated on first sight
    fn fresh(&mut self, old: Uuid) -> Uuid {
        if let Some(new) = self.forward.get(&old) {
            return *new;
        }
        let new = Uuid::new_v4();
        self.forward.insert(old, new);
        self.backward.insert(new, old);
        new
    }

    /// New id for an `old` id that must already have been seen
    fn mapped(&self, old: Uuid) -> Result<Uuid> {
        self.forward
            .get(&old)
            .copied()
            .ok_or(GraphError::UnmappedTemplateId(old))
    }

    /// Template id a new id was generated for
    fn original(&self, new: Uuid) -> Option<Uuid> {
        self.backward.get(&new).copied()
    }

    fn ports(&mut self, ports: &IndexMap<String, PortState>) -> IndexMap<String, PortState> {
        ports
            .iter()
            .map(|(key, port)| {
                let id = self.fresh(port.id.0);
                let state = PortState {
                    id: PortId(id),
                    template_id: self.original(id).map(PortId),
                    value: port.value.clone(),
                };
                (key.clone(), state)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::port::Port;
    use serde_json::{json, Value};
    use std::collections::HashSet;

    fn editor() -> Editor {
        let editor = Editor::new();
        editor.register_node_type(
            "Add",
            || {
                Node::new("Add")
                    .with_input("a", Port::new("A", json!(0)))
                    .with_input("b", Port::new("B", json!(0)))
                    .with_output("sum", Port::new("Sum", Value::Null))
            },
            Default::default(),
        );
        editor
    }

    fn chain(editor: &Editor) -> Graph {
        let graph = Graph::new(editor);
        let first = graph.add_node(editor.create_node("Add").unwrap()).unwrap().unwrap();
        let second = graph.add_node(editor.create_node("Add").unwrap()).unwrap().unwrap();
        first.input("b").unwrap().set_value(json!(2));
        graph
            .add_connection(&first.output("sum").unwrap(), &second.input("a").unwrap())
            .unwrap();
        graph.set_inputs(vec![GraphInterface::new("x", first.input("a").unwrap().id())]);
        graph.set_outputs(vec![GraphInterface::new("y", second.output("sum").unwrap().id())]);
        graph
    }

    fn ids(graph: &Graph) -> HashSet<Uuid> {
        let mut ids = HashSet::new();
        ids.insert(graph.id().0);
        for node in graph.nodes() {
            ids.insert(node.id().0);
            ids.extend(node.ports().iter().map(|p| p.id().0));
        }
        ids.extend(graph.connections().iter().map(|c| c.id().0));
        ids
    }

    #[test]
    fn test_instances_have_disjoint_ids() {
        let editor = editor();
        let source = chain(&editor);
        let template = GraphTemplate::from_graph(&source, &editor).unwrap();

        let a = template.create_graph(None).unwrap();
        let b = template.create_graph(None).unwrap();
        assert_eq!(a.node_count(), 2);
        assert_eq!(b.connection_count(), 1);
        assert!(ids(&a).is_disjoint(&ids(&b)));
        assert!(ids(&a).is_disjoint(&ids(&source)));
        assert_eq!(a.template(), Some(template.clone()));
        assert_eq!(template.instances().len(), 2);
    }

    #[test]
    fn test_instance_keeps_values_and_boundary() {
        let editor = editor();
        let source = chain(&editor);
        let template = GraphTemplate::from_graph(&source, &editor).unwrap();
        let instance = template.create_graph(None).unwrap();

        let inputs = instance.inputs();
        assert_eq!(inputs[0].id, source.inputs()[0].id);
        let exposed = instance.find_node_interface(inputs[0].node_interface_id).unwrap();
        assert_eq!(exposed.template_id(), Some(source.inputs()[0].node_interface_id));

        let nodes = instance.nodes();
        assert_eq!(nodes[0].input("b").unwrap().value(), json!(2));
        assert_eq!(instance.connections()[0].to().connection_count(), 1);
    }

    #[test]
    fn test_unmapped_endpoint_is_fatal() {
        let editor = editor();
        let source = chain(&editor);
        let mut state = source.save().unwrap();
        state.connections[0].from = PortId::new();
        let template = GraphTemplate::from_graph(&source, &editor).unwrap();
        template.update(state);

        let err = template.create_graph(None).unwrap_err();
        assert!(matches!(err, GraphError::UnmappedTemplateId(_)));
    }

    #[test]
    fn test_create_into_existing_graph() {
        let editor = editor();
        let source = chain(&editor);
        let template = GraphTemplate::from_graph(&source, &editor).unwrap();
        let target = Graph::new(&editor);
        target.add_node(editor.create_node("Add").unwrap()).unwrap();

        let graph = template.create_graph(Some(&target)).unwrap();
        assert!(graph.ptr_eq(&target));
        assert_eq!(target.node_count(), 2);
        assert_eq!(target.template(), Some(template));
    }

    #[test]
    fn test_failed_instantiation_leaves_no_graph_behind() {
        let editor = editor();
        let source = chain(&editor);
        let inner = GraphTemplate::from_graph(&source, &editor).unwrap();
        editor.add_graph_template(&inner);

        let holder = Graph::new(&editor);
        holder
            .add_node(editor.create_node(&inner.node_type_name()).unwrap())
            .unwrap();
        let outer = GraphTemplate::from_graph(&holder, &editor).unwrap();
        holder.destroy();

        let mut state = source.save().unwrap();
        state.connections[0].from = PortId::new();
        inner.update(state);

        let before = editor.graphs().len();
        assert!(outer.create_graph(None).is_err());
        assert_eq!(editor.graphs().len(), before);
        assert!(outer.instances().is_empty());
    }

    #[test]
    fn test_switching_template_releases_previous_one() {
        let editor = editor();
        let first = GraphTemplate::from_graph(&chain(&editor), &editor).unwrap();
        let second = GraphTemplate::from_graph(&chain(&editor), &editor).unwrap();
        let graph = first.create_graph(None).unwrap();

        second.create_graph(Some(&graph)).unwrap();
        assert!(first.instances().is_empty());
        assert_eq!(second.instances(), vec![graph.clone()]);
        assert_eq!(graph.template(), Some(second.clone()));

        let updates = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&updates);
        first
            .node_events()
            .update
            .subscribe(move |_| counter.set(counter.get() + 1));
        let reached = Rc::new(std::cell::Cell::new(0));
        let sink = Rc::clone(&reached);
        second
            .node_events()
            .update
            .subscribe(move |_| sink.set(sink.get() + 1));

        graph.nodes()[0].input("a").unwrap().set_value(json!(3));
        assert_eq!(updates.get(), 0);
        assert_eq!(reached.get(), 1);
    }

    #[test]
    fn test_update_notifies() {
        let editor = editor();
        let template = GraphTemplate::from_graph(&chain(&editor), &editor).unwrap();
        let updates = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&updates);
        template
            .events()
            .updated
            .subscribe(move |_| counter.set(counter.get() + 1));

        template.update(GraphState::empty());
        assert_eq!(updates.get(), 1);
        assert!(template.nodes().is_empty());
    }

    #[test]
    fn test_instance_events_reach_template() {
        let editor = editor();
        let template = GraphTemplate::from_graph(&chain(&editor), &editor).unwrap();
        let instance = template.create_graph(None).unwrap();
        let updates = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&updates);
        template
            .node_events()
            .update
            .subscribe(move |_| counter.set(counter.get() + 1));

        instance.nodes()[0].input("a").unwrap().set_value(json!(9));
        assert_eq!(updates.get(), 1);

        instance.destroy();
        assert!(template.instances().is_empty());
    }
}
