// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs.
//!
//! A [`Port`] is a shared handle: cloning it yields another reference to the
//! same slot. Its value is a display-agnostic [`serde_json::Value`].

use crate::events::{stream_group, Event, PreventableEvent, SequentialHook};
use crate::id::uuid_id;
use crate::node::NodeId;
use crate::state::PortState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

uuid_id! {
    /// Unique identifier for a port
    PortId
}

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

/// Payload of the value events
#[derive(Debug, Clone)]
pub struct ValueChange {
    /// The port being written
    pub port: Port,
    /// The proposed (before) or stored (after) value
    pub value: Value,
}

/// Payload of the connection count event
#[derive(Debug, Clone)]
pub struct ConnectionCountChange {
    /// The port whose count changed
    pub port: Port,
    /// The new count
    pub count: usize,
}

stream_group! {
    /// Events emitted by a port
    pub struct PortEvents {
        /// Fired before a value is stored; preventing drops the assignment
        before_set_value: PreventableEvent<ValueChange>,
        /// Fired after a value is stored
        set_value: Event<ValueChange>,
        /// Fired whenever the connection count is written
        set_connection_count: Event<ConnectionCountChange>,
    }
}

stream_group! {
    /// Hooks applied when a port is loaded or saved
    pub struct PortHooks {
        /// Transforms the incoming state before it is applied
        load: SequentialHook<PortState>,
        /// Transforms the outgoing state
        save: SequentialHook<PortState>,
    }
}

struct PortInner {
    id: Cell<PortId>,
    template_id: Cell<Option<PortId>>,
    name: RefCell<String>,
    direction: Cell<PortDirection>,
    value: RefCell<Value>,
    connection_count: Cell<usize>,
    node_id: Cell<Option<NodeId>>,
    multi_connect: Cell<Option<bool>>,
    hidden: Cell<bool>,
    show_port: Cell<bool>,
    events: PortEvents,
    hooks: PortHooks,
}

/// A port on a node
#[derive(Clone)]
pub struct Port(Rc<PortInner>);

impl Port {
    /// Create a new port; its direction is fixed when it is added to a node
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self(Rc::new(PortInner {
            id: Cell::new(PortId::new()),
            template_id: Cell::new(None),
            name: RefCell::new(name.into()),
            direction: Cell::new(PortDirection::Input),
            value: RefCell::new(value),
            connection_count: Cell::new(0),
            node_id: Cell::new(None),
            multi_connect: Cell::new(None),
            hidden: Cell::new(false),
            show_port: Cell::new(true),
            events: PortEvents::default(),
            hooks: PortHooks::default(),
        }))
    }

    /// Create a new input port
    pub fn input(name: impl Into<String>, value: Value) -> Self {
        let port = Self::new(name, value);
        port.set_direction(PortDirection::Input);
        port
    }

    /// Create a new output port
    pub fn output(name: impl Into<String>, value: Value) -> Self {
        let port = Self::new(name, value);
        port.set_direction(PortDirection::Output);
        port
    }

    /// Allow or forbid multiple connections (default: outputs only)
    pub fn with_multi_connect(self, multi_connect: bool) -> Self {
        self.0.multi_connect.set(Some(multi_connect));
        self
    }

    /// Hide the port from rendering layers
    pub fn hidden(self) -> Self {
        self.0.hidden.set(true);
        self
    }

    /// Whether a connection socket should be shown for this port
    pub fn with_show_port(self, show_port: bool) -> Self {
        self.0.show_port.set(show_port);
        self
    }

    /// Port ID
    pub fn id(&self) -> PortId {
        self.0.id.get()
    }

    /// ID of the template port this one was instantiated from, if any
    pub fn template_id(&self) -> Option<PortId> {
        self.0.template_id.get()
    }

    /// Display name
    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }

    /// Rename the port
    pub fn set_name(&self, name: impl Into<String>) {
        *self.0.name.borrow_mut() = name.into();
    }

    /// Port direction
    pub fn direction(&self) -> PortDirection {
        self.0.direction.get()
    }

    /// Whether this is an input port
    pub fn is_input(&self) -> bool {
        self.direction() == PortDirection::Input
    }

    pub(crate) fn set_direction(&self, direction: PortDirection) {
        self.0.direction.set(direction);
    }

    /// Current value
    pub fn value(&self) -> Value {
        self.0.value.borrow().clone()
    }

    /// Store a value unless a `before_set_value` subscriber prevents it.
    ///
    /// Returns whether the value was stored.
    pub fn set_value(&self, value: Value) -> bool {
        let change = ValueChange {
            port: self.clone(),
            value,
        };
        if self.0.events.before_set_value.emit(&change).is_prevented() {
            return false;
        }
        *self.0.value.borrow_mut() = change.value.clone();
        self.0.events.set_value.emit(&change);
        true
    }

    /// Number of live connections using this port as an endpoint
    pub fn connection_count(&self) -> usize {
        self.0.connection_count.get()
    }

    pub(crate) fn set_connection_count(&self, count: usize) {
        self.0.connection_count.set(count);
        self.0
            .events
            .set_connection_count
            .emit(&ConnectionCountChange {
                port: self.clone(),
                count,
            });
    }

    /// ID of the owning node
    pub fn node_id(&self) -> Option<NodeId> {
        self.0.node_id.get()
    }

    pub(crate) fn set_node_id(&self, node_id: Option<NodeId>) {
        self.0.node_id.set(node_id);
    }

    /// Whether the port accepts more than one connection
    pub fn multi_connect(&self) -> bool {
        self.0
            .multi_connect
            .get()
            .unwrap_or(self.direction() == PortDirection::Output)
    }

    /// Whether the port is hidden from rendering layers
    pub fn is_hidden(&self) -> bool {
        self.0.hidden.get()
    }

    /// Change the hidden flag
    pub fn set_hidden(&self, hidden: bool) {
        self.0.hidden.set(hidden);
    }

    /// Whether a connection socket should be shown
    pub fn show_port(&self) -> bool {
        self.0.show_port.get()
    }

    /// Port events
    pub fn events(&self) -> &PortEvents {
        &self.0.events
    }

    /// Port hooks
    pub fn hooks(&self) -> &PortHooks {
        &self.0.hooks
    }

    /// Restore id, template id and value from a saved state
    pub fn load(&self, state: &PortState) {
        let state = self.0.hooks.load.execute(state.clone());
        self.0.id.set(state.id);
        self.0.template_id.set(state.template_id);
        self.set_value(state.value);
    }

    /// Serialize the port
    pub fn save(&self) -> PortState {
        self.0.hooks.save.execute(PortState {
            id: self.id(),
            template_id: self.template_id(),
            value: self.value(),
        })
    }

    /// Whether both handles refer to the same port
    pub fn ptr_eq(&self, other: &Port) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Port {}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id())
            .field("name", &*self.0.name.borrow())
            .field("direction", &self.direction())
            .field("value", &*self.0.value.borrow())
            .field("connection_count", &self.connection_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Flow;
    use serde_json::json;

    #[test]
    fn test_value_change_fires_events() {
        let port = Port::input("a", json!(1));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        port.events()
            .set_value
            .subscribe(move |change| sink.borrow_mut().push(change.value.clone()));

        assert!(port.set_value(json!(2)));
        assert_eq!(port.value(), json!(2));
        assert_eq!(*seen.borrow(), vec![json!(2)]);
    }

    #[test]
    fn test_prevented_value_is_dropped() {
        let port = Port::input("a", json!("keep"));
        port.events().before_set_value.subscribe(|change| {
            if change.value.is_null() {
                Flow::Prevent
            } else {
                Flow::Continue
            }
        });

        assert!(!port.set_value(Value::Null));
        assert_eq!(port.value(), json!("keep"));
        assert!(port.set_value(json!("next")));
        assert_eq!(port.value(), json!("next"));
    }

    #[test]
    fn test_multi_connect_defaults() {
        assert!(!Port::input("i", Value::Null).multi_connect());
        assert!(Port::output("o", Value::Null).multi_connect());
        assert!(Port::input("i", Value::Null)
            .with_multi_connect(true)
            .multi_connect());
    }

    #[test]
    fn test_load_and_save_pass_through_hooks() {
        let port = Port::output("out", json!(0));
        port.hooks().save.subscribe(|mut state| {
            state.value = json!({ "wrapped": state.value });
            state
        });
        port.hooks().load.subscribe(|mut state| {
            state.value = state.value["wrapped"].clone();
            state
        });

        let saved = port.save();
        assert_eq!(saved.value, json!({ "wrapped": 0 }));

        let restored = PortState {
            id: PortId::new(),
            template_id: Some(saved.id),
            value: json!({ "wrapped": 5 }),
        };
        port.load(&restored);
        assert_eq!(port.id(), restored.id);
        assert_eq!(port.template_id(), Some(saved.id));
        assert_eq!(port.value(), json!(5));
    }
}
