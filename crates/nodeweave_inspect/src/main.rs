// SPDX-License-Identifier: MIT OR Apache-2.0
//! Load an editor snapshot and print a summary of its contents.
//!
//! Usage: `nodeweave_inspect <snapshot.json|snapshot.ron> [config.ron]`
//!
//! Node types are not known to this tool, so every type used in the snapshot
//! is registered as a placeholder carrying the ports found in the snapshot.

use nodeweave_graph::template::GRAPH_NODE_TYPE_PREFIX;
use nodeweave_graph::{
    ConfigError, Editor, EditorConfig, EditorState, GraphError, Node, NodeState, Port, StateError,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Error)]
enum InspectError {
    #[error("usage: nodeweave_inspect <snapshot.json|snapshot.ron> [config.ron]")]
    Usage,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Port keys seen for one node type
#[derive(Debug, Clone, Default, PartialEq)]
struct NodeShape {
    inputs: BTreeSet<String>,
    outputs: BTreeSet<String>,
}

impl NodeShape {
    fn build(&self, type_name: &str) -> Node {
        let node = self.inputs.iter().fold(Node::new(type_name), |node, key| {
            node.with_input(key.clone(), Port::new(key.clone(), Value::Null))
        });
        self.outputs.iter().fold(node, |node, key| {
            node.with_output(key.clone(), Port::new(key.clone(), Value::Null))
        })
    }
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run() {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), InspectError> {
    let mut args = std::env::args_os().skip(1);
    let snapshot_path = PathBuf::from(args.next().ok_or(InspectError::Usage)?);
    let config = match args.next() {
        Some(path) => EditorConfig::load(path)?,
        None => EditorConfig::default(),
    };

    let state = read_state(&snapshot_path)?;
    tracing::info!("Loaded snapshot {}", snapshot_path.display());

    let editor = Editor::with_config(config);
    let mut shapes = BTreeMap::new();
    collect_shapes(&state.graph.nodes, &mut shapes);
    for template in &state.graph_templates {
        collect_shapes(&template.nodes, &mut shapes);
    }
    for (type_name, shape) in shapes {
        let name = type_name.clone();
        editor.register_node_type(type_name, move || shape.build(&name), Default::default());
    }

    let warnings = editor.load(&state)?;
    print_summary(&editor, warnings.len());
    Ok(())
}

fn read_state(path: &Path) -> Result<EditorState, InspectError> {
    let text = std::fs::read_to_string(path).map_err(|source| InspectError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let is_ron = path.extension().is_some_and(|ext| ext == "ron");
    let state = if is_ron {
        EditorState::from_ron_str(&text)?
    } else {
        EditorState::from_json_str(&text)?
    };
    Ok(state)
}

/// Gather the port keys of every non-template node type, including nested subgraphs
fn collect_shapes(nodes: &[NodeState], shapes: &mut BTreeMap<String, NodeShape>) {
    for node in nodes {
        if let Some(graph_state) = &node.graph_state {
            collect_shapes(&graph_state.nodes, shapes);
        }
        if node.type_name.starts_with(GRAPH_NODE_TYPE_PREFIX) {
            continue;
        }
        let shape = shapes.entry(node.type_name.clone()).or_default();
        shape.inputs.extend(node.inputs.keys().cloned());
        shape.outputs.extend(node.outputs.keys().cloned());
    }
}

fn print_summary(editor: &Editor, warning_count: usize) {
    let graph = editor.graph();
    println!("graph {}", graph.id());
    println!(
        "  {} nodes, {} connections",
        graph.node_count(),
        graph.connection_count()
    );
    for node in graph.nodes() {
        let kind = if node.as_graph_node().is_some() {
            "subgraph"
        } else {
            "node"
        };
        println!(
            "  {kind} {} \"{}\" [{}] {} in / {} out",
            node.id(),
            node.title(),
            node.type_name(),
            node.inputs().len(),
            node.outputs().len()
        );
    }

    let templates = editor.graph_templates();
    println!("{} templates", templates.len());
    for template in templates {
        println!(
            "  {} \"{}\" {} nodes, {} live instances",
            template.id(),
            template.name(),
            template.nodes().len(),
            template.instances().len()
        );
    }
    println!("{warning_count} warnings");
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeweave_graph::{GraphState, NodeId, PortId, PortState};

    fn node_state(type_name: &str, inputs: &[&str], outputs: &[&str]) -> NodeState {
        let ports = |keys: &[&str]| {
            keys.iter()
                .map(|key| {
                    let state = PortState {
                        id: PortId::new(),
                        template_id: None,
                        value: Value::Null,
                    };
                    (key.to_string(), state)
                })
                .collect()
        };
        NodeState {
            type_name: type_name.to_string(),
            id: NodeId::new(),
            title: type_name.to_string(),
            inputs: ports(inputs),
            outputs: ports(outputs),
            graph_state: None,
        }
    }

    #[test]
    fn test_shapes_merge_ports_and_skip_templates() {
        let mut nested = GraphState::empty();
        nested.nodes.push(node_state("Inner", &["x"], &[]));
        let mut wrapper = node_state(&format!("{GRAPH_NODE_TYPE_PREFIX}abc"), &[], &["y"]);
        wrapper.graph_state = Some(nested);

        let nodes = vec![
            node_state("Math", &["a"], &["result"]),
            node_state("Math", &["b"], &["result"]),
            wrapper,
        ];
        let mut shapes = BTreeMap::new();
        collect_shapes(&nodes, &mut shapes);

        assert_eq!(shapes.keys().collect::<Vec<_>>(), vec!["Inner", "Math"]);
        let math = &shapes["Math"];
        assert_eq!(math.inputs.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(math.outputs.len(), 1);
    }

    #[test]
    fn test_placeholder_round_trips_snapshot() {
        let editor = Editor::new();
        editor.register_node_type(
            "Math",
            || {
                Node::new("Math")
                    .with_input("a", Port::new("A", serde_json::json!(3)))
                    .with_output("result", Port::new("Result", Value::Null))
            },
            Default::default(),
        );
        editor.graph().add_node(editor.create_node("Math").unwrap()).unwrap();
        let state = editor.save().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.ron");
        std::fs::write(&path, state.to_ron_string().unwrap()).unwrap();
        let loaded = read_state(&path).unwrap();

        let mut shapes = BTreeMap::new();
        collect_shapes(&loaded.graph.nodes, &mut shapes);
        let inspector = Editor::new();
        for (type_name, shape) in shapes {
            let name = type_name.clone();
            inspector.register_node_type(
                type_name,
                move || shape.build(&name),
                Default::default(),
            );
        }
        assert!(inspector.load(&loaded).unwrap().is_empty());
        let nodes = inspector.graph().nodes();
        assert_eq!(nodes[0].input("a").unwrap().value(), serde_json::json!(3));
    }

    #[test]
    fn test_unreadable_snapshot() {
        let err = read_state(Path::new("/nonexistent/snapshot.json")).unwrap_err();
        assert!(matches!(err, InspectError::Read { .. }));
    }
}
