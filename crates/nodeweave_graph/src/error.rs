// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types.
//!
//! [`GraphError`] covers misuse of the API. Problems found in loaded data
//! (unknown node types, dangling connection endpoints) are not errors: they are
//! reported as warning strings by `Graph::load` and `Editor::load`.

use crate::node::NodeId;
use crate::port::PortId;
use thiserror::Error;
use uuid::Uuid;

/// Contract violations raised by graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    /// A connection must go from an output to an input
    #[error("Invalid connection endpoints: {from} -> {to}")]
    InvalidEndpoints {
        /// Requested source port
        from: PortId,
        /// Requested target port
        to: PortId,
    },

    /// The operation needs the node to be placed in a graph
    #[error("Node {0} is not placed in a graph")]
    NodeNotInGraph(NodeId),

    /// A graph node was used before its subgraph was created
    #[error("Graph node {0} has no subgraph instance")]
    SubgraphNotInitialized(NodeId),

    /// A template references an id it never defined
    #[error("Unable to create graph from template: could not map old id {0} to a new id")]
    UnmappedTemplateId(Uuid),

    /// The editor owning this object no longer exists
    #[error("Editor has been dropped")]
    EditorDropped,

    /// The execution engine failed
    #[error("Calculation failed: {0}")]
    Calculation(String),
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors converting editor state to and from text
#[derive(Debug, Error)]
pub enum StateError {
    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// RON serialization error
    #[error("RON error: {0}")]
    Ron(#[from] ron::Error),

    /// RON parse error
    #[error("RON parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),
}

/// Errors reading or writing the editor configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RON serialization error
    #[error("RON error: {0}")]
    Ron(#[from] ron::Error),

    /// RON parse error
    #[error("RON parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),

    /// The file was written by a newer version
    #[error("Config version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version found in the file
        found: u32,
        /// Highest supported version
        supported: u32,
    },
}
