// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node calculation contract.
//!
//! This crate does not evaluate graphs. Nodes may carry an asynchronous compute
//! function, and graph nodes delegate to an external engine through
//! [`GraphRunner`].

use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::{Node, NodeId};
use crate::port::PortId;
use futures::future::LocalBoxFuture;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// Input values by port key
pub type CalculationInputs = IndexMap<String, Value>;

/// Output values by port key
pub type CalculationOutputs = IndexMap<String, Value>;

/// Pending result of a node calculation
pub type CalculationFuture = LocalBoxFuture<'static, Result<CalculationOutputs, GraphError>>;

/// Compute function bound to a node
pub type CalculateFn = Rc<dyn Fn(&Node, CalculationInputs, &CalculationContext) -> CalculationFuture>;

/// Output values of every node in a graph run, in each node's output order
pub type GraphRunResult = IndexMap<NodeId, Vec<Value>>;

/// Execution engine capability used by graph nodes
pub trait GraphRunner {
    /// Evaluate `graph`, using `input_overrides` instead of the stored values of
    /// the given ports
    fn run_graph(
        &self,
        graph: &Graph,
        input_overrides: HashMap<PortId, Value>,
        global_values: Value,
    ) -> LocalBoxFuture<'_, Result<GraphRunResult, GraphError>>;
}

/// Context passed to compute functions
#[derive(Clone)]
pub struct CalculationContext {
    /// Engine used to run subgraphs
    pub runner: Rc<dyn GraphRunner>,
    /// Values shared by every node of a run
    pub global_values: Value,
}

impl CalculationContext {
    /// Create a context with no global values
    pub fn new(runner: Rc<dyn GraphRunner>) -> Self {
        Self {
            runner,
            global_values: Value::Null,
        }
    }

    /// Set the global values
    pub fn with_global_values(mut self, global_values: Value) -> Self {
        self.global_values = global_values;
        self
    }
}
