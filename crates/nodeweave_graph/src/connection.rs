// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection (edge) definitions for the graph.

use crate::error::GraphError;
use crate::events::{stream_group, Event};
use crate::id::uuid_id;
use crate::node::NodeId;
use crate::port::Port;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

uuid_id! {
    /// Unique identifier for a connection
    ConnectionId
}

stream_group! {
    /// Events emitted by a connection
    pub struct ConnectionEvents {
        /// Fired once when the connection is destructed
        destruct: Event<Connection>,
    }
}

struct ConnectionInner {
    id: Cell<ConnectionId>,
    from: Port,
    to: Port,
    destructed: Cell<bool>,
    events: ConnectionEvents,
}

/// A connection from an output port to an input port.
///
/// The connection refers to its endpoints but does not manage their lifecycle;
/// it only keeps their connection counts up to date.
#[derive(Clone)]
pub struct Connection(Rc<ConnectionInner>);

impl Connection {
    /// Create a new connection and count it on both endpoints
    pub fn new(from: &Port, to: &Port) -> Result<Self, GraphError> {
        Self::with_id(ConnectionId::new(), from, to)
    }

    /// Create a connection with a known ID
    pub fn with_id(id: ConnectionId, from: &Port, to: &Port) -> Result<Self, GraphError> {
        if from.is_input() || !to.is_input() {
            return Err(GraphError::InvalidEndpoints {
                from: from.id(),
                to: to.id(),
            });
        }
        from.set_connection_count(from.connection_count() + 1);
        to.set_connection_count(to.connection_count() + 1);
        Ok(Self(Rc::new(ConnectionInner {
            id: Cell::new(id),
            from: from.clone(),
            to: to.clone(),
            destructed: Cell::new(false),
            events: ConnectionEvents::default(),
        })))
    }

    /// Connection ID
    pub fn id(&self) -> ConnectionId {
        self.0.id.get()
    }

    /// Source (output) port
    pub fn from(&self) -> &Port {
        &self.0.from
    }

    /// Target (input) port
    pub fn to(&self) -> &Port {
        &self.0.to
    }

    /// Whether the connection has been destructed
    pub fn is_destructed(&self) -> bool {
        self.0.destructed.get()
    }

    /// Connection events
    pub fn events(&self) -> &ConnectionEvents {
        &self.0.events
    }

    /// Check if this connection involves a specific port
    pub fn involves_port(&self, port: &Port) -> bool {
        self.0.from.ptr_eq(port) || self.0.to.ptr_eq(port)
    }

    /// Check if this connection involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.0.from.node_id() == Some(node_id) || self.0.to.node_id() == Some(node_id)
    }

    /// Uncount the connection on both endpoints and mark it inert
    pub(crate) fn destruct(&self) {
        debug_assert!(!self.is_destructed(), "connection destructed twice");
        if self.is_destructed() {
            return;
        }
        self.0.events.destruct.emit(self);
        let from = &self.0.from;
        let to = &self.0.to;
        from.set_connection_count(from.connection_count().saturating_sub(1));
        to.set_connection_count(to.connection_count().saturating_sub(1));
        self.0.destructed.set(true);
    }

    /// Whether both handles refer to the same connection
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("from", &self.0.from.id())
            .field("to", &self.0.to.id())
            .field("destructed", &self.is_destructed())
            .finish()
    }
}

/// A validated but not yet created connection
#[derive(Debug, Clone)]
pub struct ConnectionCandidate {
    /// Source (output) port
    pub from: Port,
    /// Target (input) port
    pub to: Port,
}

/// Verdict of one connection rule
#[derive(Debug, Clone)]
pub enum CheckConnectionHookResult {
    /// The rule rejects the connection
    Deny,
    /// The rule accepts the connection once `connections_in_danger` are removed
    Allow {
        /// Existing connections that must go for the new one to be valid
        connections_in_danger: Vec<Connection>,
    },
}

impl CheckConnectionHookResult {
    /// Accept without side effects
    pub fn allow() -> Self {
        Self::Allow {
            connections_in_danger: Vec::new(),
        }
    }

    /// Whether the rule accepted the connection
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Result of validating a prospective connection
#[derive(Debug, Clone)]
pub enum CheckConnectionResult {
    /// The connection is not allowed
    Denied,
    /// The connection is allowed
    Allowed {
        /// Endpoints after direction correction
        dummy_connection: ConnectionCandidate,
        /// De-duplicated existing connections to remove before adding
        connections_in_danger: Vec<Connection>,
    },
}

impl CheckConnectionResult {
    /// Whether the connection is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}
