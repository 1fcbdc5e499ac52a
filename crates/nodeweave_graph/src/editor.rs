// SPDX-License-Identifier: MIT OR Apache-2.0
//! The editor: root graph, node type registry and graph templates.
//!
//! The editor aggregates the events and hooks of every registered graph, so a
//! single subscription on e.g. [`Editor::node_events`] observes every node of
//! every graph, including subgraph instances.

use crate::config::EditorConfig;
use crate::connection::ConnectionEvents;
use crate::error::Result;
use crate::events::{stream_group, Event, PreventableEvent, SequentialHook};
use crate::graph::{Graph, GraphEvents, GraphHooks};
use crate::graph_node::GraphNode;
use crate::node::{Node, NodeEvents, NodeHooks};
use crate::state::EditorState;
use crate::template::{GraphTemplate, TemplateEvents, TemplateHooks, TemplateId};
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Constructor of an externally defined node type
pub type NodeFactory = Rc<dyn Fn() -> Node>;

/// How instances of a registered node type are built
#[derive(Clone)]
pub enum NodeTypeKind {
    /// Built by a factory supplied at registration
    External(NodeFactory),
    /// Built as a [`GraphNode`] bound to the template
    Template(TemplateId),
}

impl fmt::Debug for NodeTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External(_) => f.write_str("External"),
            Self::Template(id) => f.debug_tuple("Template").field(id).finish(),
        }
    }
}

/// Registry entry of a node type
#[derive(Debug, Clone)]
pub struct NodeTypeEntry {
    /// Constructor
    pub kind: NodeTypeKind,
    /// Category used to group node types in a palette
    pub category: String,
    /// Display title
    pub title: String,
}

/// Optional metadata for [`Editor::register_node_type`]
#[derive(Debug, Clone, Default)]
pub struct NodeTypeOptions {
    /// Category, `"default"` if unset
    pub category: Option<String>,
    /// Display title, the type name if unset
    pub title: Option<String>,
}

/// Payload of the node type registration events
#[derive(Debug, Clone)]
pub struct NodeTypeChange {
    /// Registered type name
    pub type_name: String,
    /// Registry entry
    pub entry: NodeTypeEntry,
}

stream_group! {
    /// Events emitted by the editor itself
    pub struct EditorEvents {
        /// Fired before a node type is registered
        before_register_node_type: PreventableEvent<NodeTypeChange>,
        /// Fired after a node type was registered
        register_node_type: Event<NodeTypeChange>,
        /// Fired before a node type is unregistered
        before_unregister_node_type: PreventableEvent<String>,
        /// Fired after a node type was unregistered
        unregister_node_type: Event<String>,
        /// Fired before a template is added
        before_add_graph_template: PreventableEvent<GraphTemplate>,
        /// Fired after a template was added
        add_graph_template: Event<GraphTemplate>,
        /// Fired before a template is removed
        before_remove_graph_template: PreventableEvent<GraphTemplate>,
        /// Fired after a template was removed
        remove_graph_template: Event<GraphTemplate>,
        /// Fired after a graph was registered
        register_graph: Event<Graph>,
        /// Fired after a graph was unregistered
        unregister_graph: Event<Graph>,
        /// Fired after `load` finished
        loaded: Event<Editor>,
    }
}

stream_group! {
    /// Hooks applied by the editor
    pub struct EditorHooks {
        /// Transforms the incoming state before it is applied
        before_load: SequentialHook<EditorState>,
        /// Transforms the outgoing state
        after_save: SequentialHook<EditorState>,
    }
}

pub(crate) struct EditorInner {
    config: EditorConfig,
    graph: Graph,
    graphs: RefCell<Vec<Graph>>,
    templates: RefCell<Vec<GraphTemplate>>,
    node_types: RefCell<IndexMap<String, NodeTypeEntry>>,
    loading: Cell<bool>,
    events: EditorEvents,
    hooks: EditorHooks,
    graph_events: GraphEvents,
    graph_hooks: GraphHooks,
    node_events: NodeEvents,
    node_hooks: NodeHooks,
    connection_events: ConnectionEvents,
    template_events: TemplateEvents,
    template_hooks: TemplateHooks,
}

/// Top-level registry owning the root graph
#[derive(Clone)]
pub struct Editor(pub(crate) Rc<EditorInner>);

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

impl Editor {
    /// Create an editor with the default configuration
    pub fn new() -> Self {
        Self::with_config(EditorConfig::default())
    }

    /// Create an editor
    pub fn with_config(config: EditorConfig) -> Self {
        let editor = Self(Rc::new_cyclic(|weak| EditorInner {
            config,
            graph: Graph::unregistered(weak.clone()),
            graphs: RefCell::new(Vec::new()),
            templates: RefCell::new(Vec::new()),
            node_types: RefCell::new(IndexMap::new()),
            loading: Cell::new(false),
            events: EditorEvents::default(),
            hooks: EditorHooks::default(),
            graph_events: GraphEvents::default(),
            graph_hooks: GraphHooks::default(),
            node_events: NodeEvents::default(),
            node_hooks: NodeHooks::default(),
            connection_events: ConnectionEvents::default(),
            template_events: TemplateEvents::default(),
            template_hooks: TemplateHooks::default(),
        }));
        editor.attach_graph(&editor.0.graph);
        editor
    }

    /// Configuration
    pub fn config(&self) -> &EditorConfig {
        &self.0.config
    }

    /// The root graph
    pub fn graph(&self) -> Graph {
        self.0.graph.clone()
    }

    /// Additional registered graphs, not including the root graph
    pub fn graphs(&self) -> Vec<Graph> {
        self.0.graphs.borrow().clone()
    }

    /// Graph templates in registration order
    pub fn graph_templates(&self) -> Vec<GraphTemplate> {
        self.0.templates.borrow().clone()
    }

    /// Find a template by ID
    pub fn graph_template(&self, id: TemplateId) -> Option<GraphTemplate> {
        self.0
            .templates
            .borrow()
            .iter()
            .find(|t| t.id() == id)
            .cloned()
    }

    /// Whether a load is in progress
    pub fn is_loading(&self) -> bool {
        self.0.loading.get()
    }

    /// Editor events
    pub fn events(&self) -> &EditorEvents {
        &self.0.events
    }

    /// Editor hooks
    pub fn hooks(&self) -> &EditorHooks {
        &self.0.hooks
    }

    /// Events of every registered graph
    pub fn graph_events(&self) -> &GraphEvents {
        &self.0.graph_events
    }

    /// Hooks of every registered graph
    pub fn graph_hooks(&self) -> &GraphHooks {
        &self.0.graph_hooks
    }

    /// Events of every node in every registered graph
    pub fn node_events(&self) -> &NodeEvents {
        &self.0.node_events
    }

    /// Hooks of every node in every registered graph
    pub fn node_hooks(&self) -> &NodeHooks {
        &self.0.node_hooks
    }

    /// Events of every connection in every registered graph
    pub fn connection_events(&self) -> &ConnectionEvents {
        &self.0.connection_events
    }

    /// Events of every template
    pub fn template_events(&self) -> &TemplateEvents {
        &self.0.template_events
    }

    /// Hooks of every template
    pub fn template_hooks(&self) -> &TemplateHooks {
        &self.0.template_hooks
    }

    // ------------------------------------------------------------------
    // Node types
    // ------------------------------------------------------------------

    /// Register an externally defined node type.
    ///
    /// Without an explicit title the entry takes the title of a node built by
    /// `factory`. Registering an existing name replaces it. Returns `false` if a
    /// `before_register_node_type` subscriber prevented it.
    pub fn register_node_type(
        &self,
        type_name: impl Into<String>,
        factory: impl Fn() -> Node + 'static,
        options: NodeTypeOptions,
    ) -> bool {
        let type_name = type_name.into();
        let title = options.title.unwrap_or_else(|| factory().title());
        let entry = NodeTypeEntry {
            kind: NodeTypeKind::External(Rc::new(factory)),
            category: options.category.unwrap_or_else(|| "default".to_string()),
            title,
        };
        self.register_entry(type_name, entry)
    }

    fn register_entry(&self, type_name: String, entry: NodeTypeEntry) -> bool {
        let change = NodeTypeChange { type_name, entry };
        if self
            .0
            .events
            .before_register_node_type
            .emit(&change)
            .is_prevented()
        {
            return false;
        }
        self.0
            .node_types
            .borrow_mut()
            .insert(change.type_name.clone(), change.entry.clone());
        self.0.events.register_node_type.emit(&change);
        true
    }

    /// Unregister a node type. Existing nodes of that type are left in place.
    pub fn unregister_node_type(&self, type_name: &str) -> bool {
        if !self.0.node_types.borrow().contains_key(type_name) {
            return false;
        }
        let type_name = type_name.to_string();
        if self
            .0
            .events
            .before_unregister_node_type
            .emit(&type_name)
            .is_prevented()
        {
            return false;
        }
        self.0.node_types.borrow_mut().shift_remove(&type_name);
        self.0.events.unregister_node_type.emit(&type_name);
        true
    }

    /// Registered node types in registration order
    pub fn node_types(&self) -> IndexMap<String, NodeTypeEntry> {
        self.0.node_types.borrow().clone()
    }

    /// Registry entry of a node type
    pub fn node_type(&self, type_name: &str) -> Option<NodeTypeEntry> {
        self.0.node_types.borrow().get(type_name).cloned()
    }

    /// Names of the node types in a category
    pub fn node_types_in_category(&self, category: &str) -> Vec<String> {
        self.0
            .node_types
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.category == category)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn set_node_type_title(&self, type_name: &str, title: &str) {
        if let Some(entry) = self.0.node_types.borrow_mut().get_mut(type_name) {
            entry.title = title.to_string();
        }
    }

    /// Instantiate a registered node type
    pub fn create_node(&self, type_name: &str) -> Option<Node> {
        let kind = self.node_type(type_name)?.kind;
        match kind {
            NodeTypeKind::External(factory) => Some(factory()),
            NodeTypeKind::Template(id) => {
                let template = self.graph_template(id)?;
                Some(GraphNode::create(&template))
            }
        }
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    /// Add a template and register its node type
    pub fn add_graph_template(&self, template: &GraphTemplate) -> bool {
        if self
            .0
            .events
            .before_add_graph_template
            .emit(template)
            .is_prevented()
        {
            return false;
        }
        self.0.templates.borrow_mut().push(template.clone());
        self.0.template_events.add_target(template.events());
        self.0.template_hooks.add_target(template.hooks());

        let entry = NodeTypeEntry {
            kind: NodeTypeKind::Template(template.id()),
            category: self.0.config.subgraph_category.clone(),
            title: template.name(),
        };
        self.register_entry(template.node_type_name(), entry);
        tracing::debug!(template = %template.id(), "Added graph template {}", template.name());

        self.0.events.add_graph_template.emit(template);
        true
    }

    /// Remove a template, every node built from it, and its node type
    pub fn remove_graph_template(&self, template: &GraphTemplate) -> bool {
        if !self.0.templates.borrow().iter().any(|t| t.ptr_eq(template)) {
            return false;
        }
        if self
            .0
            .events
            .before_remove_graph_template
            .emit(template)
            .is_prevented()
        {
            return false;
        }

        let mut graphs = vec![self.graph()];
        graphs.extend(self.graphs());
        for graph in graphs {
            let instances: Vec<Node> = graph
                .nodes()
                .into_iter()
                .filter(|node| {
                    node.as_graph_node()
                        .is_some_and(|g| g.template().id() == template.id())
                })
                .collect();
            for node in instances {
                graph.remove_node(&node);
            }
        }

        self.unregister_node_type(&template.node_type_name());
        self.0.templates.borrow_mut().retain(|t| !t.ptr_eq(template));
        self.0.template_events.remove_target(template.events());
        self.0.template_hooks.remove_target(template.hooks());
        tracing::debug!(template = %template.id(), "Removed graph template {}", template.name());

        self.0.events.remove_graph_template.emit(template);
        true
    }

    // ------------------------------------------------------------------
    // Graphs
    // ------------------------------------------------------------------

    /// Register an additional graph with this editor
    pub fn register_graph(&self, graph: &Graph) {
        if self.0.graphs.borrow().iter().any(|g| g.ptr_eq(graph)) {
            return;
        }
        self.attach_graph(graph);
        self.0.graphs.borrow_mut().push(graph.clone());
        self.0.events.register_graph.emit(graph);
    }

    /// Unregister a graph
    pub fn unregister_graph(&self, graph: &Graph) {
        if !self.0.graphs.borrow().iter().any(|g| g.ptr_eq(graph)) {
            return;
        }
        self.0.graph_events.remove_target(graph.events());
        self.0.graph_hooks.remove_target(graph.hooks());
        self.0.node_events.remove_target(graph.node_events());
        self.0.node_hooks.remove_target(graph.node_hooks());
        self.0.connection_events.remove_target(graph.connection_events());
        self.0.graphs.borrow_mut().retain(|g| !g.ptr_eq(graph));
        self.0.events.unregister_graph.emit(graph);
    }

    fn attach_graph(&self, graph: &Graph) {
        self.0.graph_events.add_target(graph.events());
        self.0.graph_hooks.add_target(graph.hooks());
        self.0.node_events.add_target(graph.node_events());
        self.0.node_hooks.add_target(graph.node_hooks());
        self.0.connection_events.add_target(graph.connection_events());
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Replace templates and the root graph with a saved state.
    ///
    /// Returns a warning for every entity that had to be skipped.
    pub fn load(&self, state: &EditorState) -> Result<Vec<String>> {
        self.0.loading.set(true);
        scopeguard::defer! {
            self.0.loading.set(false);
        }
        let state = self.0.hooks.before_load.execute(state.clone());

        for template in self.graph_templates() {
            self.remove_graph_template(&template);
        }
        for template_state in &state.graph_templates {
            let template = GraphTemplate::new(template_state.clone(), self);
            self.add_graph_template(&template);
        }

        let warnings = self.0.graph.load(&state.graph)?;
        self.0.events.loaded.emit(self);

        if self.0.config.log_load_warnings {
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
        }
        Ok(warnings)
    }

    /// Serialize the root graph and every template
    pub fn save(&self) -> Result<EditorState> {
        let state = EditorState {
            graph: self.0.graph.save()?,
            graph_templates: self
                .graph_templates()
                .iter()
                .map(GraphTemplate::save)
                .collect(),
        };
        Ok(self.0.hooks.after_save.execute(state))
    }

    /// Whether both handles refer to the same editor
    pub fn ptr_eq(&self, other: &Editor) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Editor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Editor")
            .field("graph", &self.0.graph)
            .field("graphs", &self.0.graphs.borrow().len())
            .field("templates", &self.0.templates.borrow().len())
            .field("node_types", &self.0.node_types.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Editors compare by identity
impl PartialEq for Editor {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Editor {}
