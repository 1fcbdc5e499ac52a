// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection rules for [`GraphHooks::check_connection`](crate::graph::GraphHooks).
//!
//! No rule is installed by default:
//!
//! ```
//! # use nodeweave_graph::{rules, Editor};
//! let editor = Editor::new();
//! editor.graph_hooks().check_connection.subscribe(rules::exclusive_inputs());
//! editor.graph_hooks().check_connection.subscribe(rules::forbid_cycles());
//! ```

use crate::connection::{CheckConnectionHookResult, ConnectionCandidate};
use crate::graph::{Graph, GraphChange};
use crate::node::NodeId;
use std::collections::HashSet;

/// Inputs that are not multi-connect accept one connection: an existing one
/// is flagged for removal.
pub fn exclusive_inputs(
) -> impl Fn(&GraphChange<ConnectionCandidate>) -> CheckConnectionHookResult + 'static {
    |change: &GraphChange<ConnectionCandidate>| {
        let to = &change.subject.to;
        if to.multi_connect() {
            return CheckConnectionHookResult::allow();
        }
        CheckConnectionHookResult::Allow {
            connections_in_danger: change.graph.connections_to(to),
        }
    }
}

/// Reject connections that would close a cycle
pub fn forbid_cycles(
) -> impl Fn(&GraphChange<ConnectionCandidate>) -> CheckConnectionHookResult + 'static {
    |change: &GraphChange<ConnectionCandidate>| {
        let (Some(from), Some(to)) = (change.subject.from.node_id(), change.subject.to.node_id())
        else {
            return CheckConnectionHookResult::allow();
        };
        let mut visited = HashSet::new();
        if reaches(&change.graph, to, from, &mut visited) {
            CheckConnectionHookResult::Deny
        } else {
            CheckConnectionHookResult::allow()
        }
    }
}

/// Whether `target` is downstream of `node`
fn reaches(graph: &Graph, node: NodeId, target: NodeId, visited: &mut HashSet<NodeId>) -> bool {
    if node == target {
        return true;
    }
    if !visited.insert(node) {
        return false;
    }
    graph
        .connections_for_node(node)
        .iter()
        .filter(|c| c.from().node_id() == Some(node))
        .filter_map(|c| c.to().node_id())
        .any(|next| reaches(graph, next, target, visited))
}
