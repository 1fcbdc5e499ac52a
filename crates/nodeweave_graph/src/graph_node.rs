// SPDX-License-Identifier: MIT OR Apache-2.0
//! Template-backed nodes.
//!
//! A graph node owns one live instance of its template and exposes the
//! instance's boundary descriptors as its own ports, keyed by descriptor id.
//! The ports are rebuilt whenever the template is updated.

use crate::calculation::{
    CalculationContext, CalculationFuture, CalculationInputs, CalculationOutputs,
};
use crate::error::{GraphError, Result};
use crate::events::SubscriptionId;
use crate::graph::Graph;
use crate::node::{Node, NodeBehavior, NodeUpdate};
use crate::port::Port;
use crate::state::{GraphInterface, NodeState};
use crate::template::GraphTemplate;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;

/// Key of the hidden output carrying the raw results of every inner node
pub const CALCULATION_RESULTS_KEY: &str = "_calculationResults";

/// Node behaviour wrapping a live subgraph instantiated from a template
pub struct GraphNode {
    template: GraphTemplate,
    subgraph: RefCell<Option<Graph>>,
    /// `updated` and `name_changed` subscriptions on the template
    subscriptions: RefCell<Option<(SubscriptionId, SubscriptionId)>>,
}

impl GraphNode {
    /// Create a node backed by `template`. The subgraph is created once the
    /// node is added to a graph.
    pub fn create(template: &GraphTemplate) -> Node {
        let behavior = GraphNode {
            template: template.clone(),
            subgraph: RefCell::new(None),
            subscriptions: RefCell::new(None),
        };
        Node::with_behavior(template.node_type_name(), behavior)
            .with_title(template.name())
            .with_output(CALCULATION_RESULTS_KEY, results_port())
    }

    /// The backing template
    pub fn template(&self) -> &GraphTemplate {
        &self.template
    }

    /// The live subgraph, once placed
    pub fn subgraph(&self) -> Option<Graph> {
        self.subgraph.borrow().clone()
    }

    fn subscribe_template(&self, node: &Node) {
        self.unsubscribe_template();
        let events = self.template.events();

        let weak = node.downgrade();
        let updated = events.updated.subscribe(move |_| {
            let Some(node) = weak.upgrade() else {
                return;
            };
            if let Some(graph_node) = node.as_graph_node() {
                if let Err(err) = graph_node.initialize(&node) {
                    tracing::error!(node = %node.id(), "Failed to rebuild graph node: {err}");
                }
            }
        });

        let weak = node.downgrade();
        let renamed = events.name_changed.subscribe(move |rename| {
            if let Some(node) = weak.upgrade() {
                node.set_title(rename.name.clone());
            }
        });

        *self.subscriptions.borrow_mut() = Some((updated, renamed));
    }

    fn unsubscribe_template(&self) {
        let subscriptions = self.subscriptions.borrow_mut().take();
        if let Some((updated, renamed)) = subscriptions {
            let events = self.template.events();
            events.updated.unsubscribe(updated);
            events.name_changed.unsubscribe(renamed);
        }
    }

    /// Replace the subgraph with a fresh instance and resync the ports
    fn initialize(&self, node: &Node) -> Result<()> {
        let previous = self.subgraph.borrow_mut().take();
        if let Some(previous) = previous {
            previous.destroy();
        }

        let subgraph = self.template.create_graph(None)?;
        *self.subgraph.borrow_mut() = Some(subgraph.clone());
        node.set_title(self.template.name());
        update_interfaces(node, &subgraph)?;

        node.events().update.emit(&NodeUpdate {
            node: node.clone(),
            port: None,
        });
        Ok(())
    }
}

fn results_port() -> Port {
    Port::output(CALCULATION_RESULTS_KEY, Value::Null).hidden()
}

/// Set-diff the node's ports against the subgraph's boundary by descriptor id
fn update_interfaces(node: &Node, subgraph: &Graph) -> Result<()> {
    let inputs = subgraph.inputs();
    for descriptor in &inputs {
        let key = descriptor.id.to_string();
        match node.input(&key) {
            Some(port) => port.set_name(descriptor.name.clone()),
            None => {
                let resting = subgraph
                    .find_node_interface(descriptor.node_interface_id)
                    .map_or(Value::Null, |inner| inner.value());
                node.add_input(key, Port::input(descriptor.name.clone(), resting));
            }
        }
    }
    for key in node.inputs().keys() {
        if !exposes(&inputs, key) {
            node.remove_input(key)?;
        }
    }

    let outputs = subgraph.outputs();
    for descriptor in &outputs {
        let key = descriptor.id.to_string();
        match node.output(&key) {
            Some(port) => port.set_name(descriptor.name.clone()),
            None => {
                node.add_output(key, Port::output(descriptor.name.clone(), Value::Null));
            }
        }
    }
    for key in node.outputs().keys() {
        if !exposes(&outputs, key) {
            node.remove_output(key)?;
        }
    }

    // the results output is always last
    node.add_output(CALCULATION_RESULTS_KEY, results_port());
    Ok(())
}

fn exposes(descriptors: &[GraphInterface], key: &str) -> bool {
    descriptors.iter().any(|d| d.id.to_string() == key)
}

impl NodeBehavior for GraphNode {
    fn on_placed(&self, node: &Node) -> Result<()> {
        self.subscribe_template(node);
        self.initialize(node)
    }

    fn on_destroy(&self, _node: &Node) {
        self.unsubscribe_template();
        let subgraph = self.subgraph.borrow_mut().take();
        if let Some(subgraph) = subgraph {
            subgraph.destroy();
        }
    }

    fn before_load(&self, node: &Node, state: &NodeState) -> Result<()> {
        let Some(graph_state) = &state.graph_state else {
            return Ok(());
        };
        let subgraph = self
            .subgraph()
            .ok_or(GraphError::SubgraphNotInitialized(node.id()))?;
        for warning in subgraph.load(graph_state)? {
            tracing::warn!(node = %node.id(), "{warning}");
        }
        Ok(())
    }

    fn after_save(&self, node: &Node, state: &mut NodeState) -> Result<()> {
        let subgraph = self
            .subgraph()
            .ok_or(GraphError::SubgraphNotInitialized(node.id()))?;
        state.graph_state = Some(subgraph.save()?);
        Ok(())
    }

    fn calculate(
        &self,
        node: &Node,
        inputs: CalculationInputs,
        context: &CalculationContext,
    ) -> Option<CalculationFuture> {
        let Some(subgraph) = self.subgraph() else {
            let id = node.id();
            return Some(async move { Err(GraphError::SubgraphNotInitialized(id)) }.boxed_local());
        };

        let mut overrides = HashMap::new();
        for inner in subgraph.nodes() {
            for port in inner.inputs().values() {
                if port.connection_count() == 0 {
                    overrides.insert(port.id(), port.value());
                }
            }
        }
        let boundary_inputs = subgraph.inputs();
        for (key, value) in inputs {
            if let Some(descriptor) = boundary_inputs.iter().find(|d| d.id.to_string() == key) {
                overrides.insert(descriptor.node_interface_id, value);
            }
        }

        // (output key, inner node, position among that node's outputs)
        let mut targets = Vec::new();
        for descriptor in subgraph.outputs() {
            let Some(port) = subgraph.find_node_interface(descriptor.node_interface_id) else {
                continue;
            };
            let Some(inner) = port.node_id().and_then(|id| subgraph.find_node_by_id(id)) else {
                continue;
            };
            if let Some(position) = inner.outputs().values().position(|p| p.ptr_eq(&port)) {
                targets.push((descriptor.id.to_string(), inner.id(), position));
            }
        }

        let runner = context.runner.clone();
        let global_values = context.global_values.clone();
        Some(
            async move {
                let results = runner.run_graph(&subgraph, overrides, global_values).await?;

                let mut outputs = CalculationOutputs::new();
                for (key, node_id, position) in targets {
                    let value = results
                        .get(&node_id)
                        .and_then(|values| values.get(position))
                        .cloned()
                        .unwrap_or(Value::Null);
                    outputs.insert(key, value);
                }
                let raw = results
                    .into_iter()
                    .map(|(id, values)| (id.to_string(), Value::Array(values)))
                    .collect();
                outputs.insert(CALCULATION_RESULTS_KEY.to_string(), Value::Object(raw));
                Ok(outputs)
            }
            .boxed_local(),
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::{GraphRunResult, GraphRunner};
    use crate::port::PortId;
    use crate::state::GraphState;
    use crate::Editor;
    use futures::future::LocalBoxFuture;
    use serde_json::json;
    use std::rc::Rc;

    /// Every output of a node yields the sum of its inputs
    struct SumRunner;

    impl GraphRunner for SumRunner {
        fn run_graph(
            &self,
            graph: &Graph,
            input_overrides: HashMap<PortId, Value>,
            _global_values: Value,
        ) -> LocalBoxFuture<'_, Result<GraphRunResult>> {
            let mut results = GraphRunResult::new();
            for node in graph.nodes() {
                let sum: i64 = node
                    .inputs()
                    .values()
                    .map(|p| {
                        input_overrides
                            .get(&p.id())
                            .cloned()
                            .unwrap_or_else(|| p.value())
                            .as_i64()
                            .unwrap_or(0)
                    })
                    .sum();
                results.insert(node.id(), node.outputs().values().map(|_| json!(sum)).collect());
            }
            async move { Ok(results) }.boxed_local()
        }
    }

    fn add_node() -> Node {
        Node::new("Add")
            .with_input("a", Port::new("A", json!(0)))
            .with_input("b", Port::new("B", json!(2)))
            .with_output("sum", Port::new("Sum", Value::Null))
    }

    fn setup() -> (Editor, GraphTemplate) {
        let editor = Editor::new();
        editor.register_node_type("Add", add_node, Default::default());

        let source = Graph::new(&editor);
        let inner = source.add_node(add_node()).unwrap().unwrap();
        source.set_inputs(vec![GraphInterface::new("x", inner.input("a").unwrap().id())]);
        source.set_outputs(vec![GraphInterface::new("y", inner.output("sum").unwrap().id())]);
        let template = GraphTemplate::from_graph(&source, &editor).unwrap();
        source.destroy();

        editor.add_graph_template(&template);
        (editor, template)
    }

    #[test]
    fn test_ports_mirror_boundary() {
        let (editor, template) = setup();
        let node = editor
            .graph()
            .add_node(editor.create_node(&template.node_type_name()).unwrap())
            .unwrap()
            .unwrap();

        let input_key = template.inputs()[0].id.to_string();
        let output_key = template.outputs()[0].id.to_string();
        assert_eq!(node.input(&input_key).unwrap().name(), "x");
        let keys: Vec<String> = node.outputs().keys().cloned().collect();
        assert_eq!(keys, vec![output_key, CALCULATION_RESULTS_KEY.to_string()]);
        assert!(node.output(CALCULATION_RESULTS_KEY).unwrap().is_hidden());
        assert_eq!(node.title(), template.name());
        assert!(node.as_graph_node().unwrap().subgraph().is_some());
    }

    #[test]
    fn test_template_update_resyncs_ports() {
        let (editor, template) = setup();
        let node = editor
            .graph()
            .add_node(GraphNode::create(&template))
            .unwrap()
            .unwrap();
        let before = node.as_graph_node().unwrap().subgraph().unwrap();

        let mut state = GraphState::empty();
        state.nodes = template.nodes();
        state.outputs = template.outputs();
        state.outputs[0].name = "total".to_string();
        template.update(state);

        assert!(node.inputs().is_empty());
        let output_key = template.outputs()[0].id.to_string();
        assert_eq!(node.output(&output_key).unwrap().name(), "total");
        let after = node.as_graph_node().unwrap().subgraph().unwrap();
        assert!(!after.ptr_eq(&before));
        assert!(before.is_destroying());
    }

    #[test]
    fn test_rename_retitles_node() {
        let (editor, template) = setup();
        let node = editor
            .graph()
            .add_node(GraphNode::create(&template))
            .unwrap()
            .unwrap();

        template.set_name("Adder");
        assert_eq!(node.title(), "Adder");
        assert_eq!(editor.node_type(&template.node_type_name()).unwrap().title, "Adder");
    }

    #[test]
    fn test_calculate_maps_outputs() {
        let (editor, template) = setup();
        let node = editor
            .graph()
            .add_node(GraphNode::create(&template))
            .unwrap()
            .unwrap();
        let input_key = template.inputs()[0].id.to_string();
        let output_key = template.outputs()[0].id.to_string();

        let context = CalculationContext::new(Rc::new(SumRunner));
        let inputs: CalculationInputs = [(input_key, json!(5))].into_iter().collect();
        let outputs = futures::executor::block_on(node.calculate(inputs, &context).unwrap()).unwrap();

        assert_eq!(outputs[&output_key], json!(7));
        let raw = outputs[CALCULATION_RESULTS_KEY].as_object().unwrap();
        assert_eq!(raw.len(), 1);
    }

    #[test]
    fn test_unplaced_node_has_no_subgraph() {
        let (_editor, template) = setup();
        let node = GraphNode::create(&template);
        let context = CalculationContext::new(Rc::new(SumRunner));

        assert!(node.save().is_err());
        let result = futures::executor::block_on(node.calculate(CalculationInputs::new(), &context).unwrap());
        assert!(matches!(result, Err(GraphError::SubgraphNotInitialized(_))));
    }

    #[test]
    fn test_save_embeds_subgraph_state() {
        let (editor, template) = setup();
        let node = editor
            .graph()
            .add_node(GraphNode::create(&template))
            .unwrap()
            .unwrap();
        let subgraph = node.as_graph_node().unwrap().subgraph().unwrap();
        subgraph.nodes()[0].input("b").unwrap().set_value(json!(40));

        let state = node.save().unwrap();
        let graph_state = state.graph_state.clone().unwrap();
        assert_eq!(graph_state.id, subgraph.id());

        let copy = editor.graph().add_node(GraphNode::create(&template)).unwrap().unwrap();
        copy.load(&state).unwrap();
        let copied = copy.as_graph_node().unwrap().subgraph().unwrap();
        assert_eq!(copied.nodes()[0].input("b").unwrap().value(), json!(40));
    }

    #[test]
    fn test_destroy_releases_subgraph() {
        let (editor, template) = setup();
        let graph = editor.graph();
        let node = graph.add_node(GraphNode::create(&template)).unwrap().unwrap();
        let subgraph = node.as_graph_node().unwrap().subgraph().unwrap();
        assert!(editor.graphs().contains(&subgraph));

        graph.remove_node(&node);
        assert!(!editor.graphs().contains(&subgraph));
        assert!(node.as_graph_node().unwrap().subgraph().is_none());
        assert_eq!(template.events().updated.subscriber_count(), 0);
    }
}
