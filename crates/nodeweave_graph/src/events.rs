// SPDX-License-Identifier: MIT OR Apache-2.0
//! Event and hook primitives.
//!
//! Four kinds of stream are provided:
//! - [`Event`]: broadcast notification, every subscriber sees every payload
//! - [`PreventableEvent`]: subscribers may return [`Flow::Prevent`] to veto the
//!   operation that emitted it
//! - [`SequentialHook`]: ordered transforms threading a value through every handler
//! - [`ValidationHook`]: ordered verdicts collected for the caller to reduce
//!
//! Any stream can also act as an aggregator: `add_target(child)` makes every
//! subscriber of the aggregator receive what is emitted on `child`, and hook
//! handlers registered on the aggregator take part in every execution of `child`.
//! Executing a hook that is itself an aggregator runs the handlers of its
//! targets first, then its own.
//! Links are weak in both directions and only change through `add_target` /
//! `remove_target`.
//!
//! Handler lists are snapshotted when an emission starts, so subscribing or
//! unsubscribing from inside a handler takes effect on the next emission.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle returned by `subscribe`, used to unsubscribe later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Verdict of a preventable event handler
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    /// Let the operation proceed
    #[default]
    Continue,
    /// Veto the operation
    Prevent,
}

impl Flow {
    /// Whether the operation was vetoed
    pub fn is_prevented(self) -> bool {
        self == Self::Prevent
    }
}

/// Handler storage shared by every stream kind
struct Registry<H: ?Sized> {
    handlers: RefCell<Vec<(SubscriptionId, Rc<H>)>>,
    /// Aggregators this stream forwards to
    observers: RefCell<Vec<Weak<Registry<H>>>>,
    /// Streams this aggregator is attached to
    targets: RefCell<Vec<Weak<Registry<H>>>>,
}

impl<H: ?Sized> Registry<H> {
    fn new() -> Self {
        Self {
            handlers: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
            targets: RefCell::new(Vec::new()),
        }
    }

    fn subscribe(&self, handler: Rc<H>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.handlers.borrow_mut().push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Own handlers followed by every live aggregator's handlers
    fn snapshot(&self) -> Vec<Rc<H>> {
        let mut handlers: Vec<Rc<H>> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        let observers: Vec<Rc<Registry<H>>> =
            self.observers.borrow().iter().filter_map(Weak::upgrade).collect();
        for observer in observers {
            handlers.extend(observer.snapshot());
        }
        handlers
    }

    /// Handlers of every live target, deepest first, followed by `snapshot()`
    fn hook_snapshot(&self) -> Vec<Rc<H>> {
        let mut handlers = self.descendant_handlers();
        handlers.extend(self.snapshot());
        handlers
    }

    fn descendant_handlers(&self) -> Vec<Rc<H>> {
        let targets: Vec<Rc<Registry<H>>> =
            self.targets.borrow().iter().filter_map(Weak::upgrade).collect();
        let mut handlers = Vec::new();
        for target in targets {
            handlers.extend(target.descendant_handlers());
            handlers.extend(target.handlers.borrow().iter().map(|(_, h)| Rc::clone(h)));
        }
        handlers
    }

    fn len(&self) -> usize {
        self.handlers.borrow().len()
    }
}

fn points_to<H: ?Sized>(weak: &Weak<Registry<H>>, rc: &Rc<Registry<H>>) -> bool {
    std::ptr::eq(weak.as_ptr(), Rc::as_ptr(rc))
}

fn attach<H: ?Sized>(aggregator: &Rc<Registry<H>>, child: &Rc<Registry<H>>) {
    if Rc::ptr_eq(aggregator, child) {
        return;
    }
    {
        let mut observers = child.observers.borrow_mut();
        observers.retain(|w| w.strong_count() > 0);
        if observers.iter().any(|w| points_to(w, aggregator)) {
            return;
        }
        observers.push(Rc::downgrade(aggregator));
    }
    let mut targets = aggregator.targets.borrow_mut();
    targets.retain(|w| w.strong_count() > 0);
    targets.push(Rc::downgrade(child));
}

fn detach<H: ?Sized>(aggregator: &Rc<Registry<H>>, child: &Rc<Registry<H>>) {
    child
        .observers
        .borrow_mut()
        .retain(|w| w.strong_count() > 0 && !points_to(w, aggregator));
    aggregator
        .targets
        .borrow_mut()
        .retain(|w| w.strong_count() > 0 && !points_to(w, child));
}

fn live_targets<H: ?Sized>(registry: &Registry<H>) -> usize {
    registry
        .targets
        .borrow()
        .iter()
        .filter(|w| w.strong_count() > 0)
        .count()
}

/// Shared subscription surface of all stream kinds
macro_rules! stream_common {
    ($name:ident, [$($param:ident),+]) => {
        impl<$($param: 'static),+> $name<$($param),+> {
            /// Create a stream with no subscribers
            pub fn new() -> Self {
                Self { registry: Rc::new(Registry::new()) }
            }

            /// Remove a handler; returns whether it was registered here
            pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
                self.registry.unsubscribe(id)
            }

            /// Number of handlers registered directly on this stream
            pub fn subscriber_count(&self) -> usize {
                self.registry.len()
            }

            /// Forward everything on `child` to this stream's subscribers
            pub fn add_target(&self, child: &Self) {
                attach(&self.registry, &child.registry);
            }

            /// Stop forwarding `child`
            pub fn remove_target(&self, child: &Self) {
                detach(&self.registry, &child.registry);
            }

            /// Number of live streams this aggregator is attached to
            pub fn target_count(&self) -> usize {
                live_targets(&self.registry)
            }
        }

        impl<$($param: 'static),+> Default for $name<$($param),+> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<$($param: 'static),+> fmt::Debug for $name<$($param),+> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("subscribers", &self.registry.len())
                    .field("targets", &live_targets(&self.registry))
                    .finish()
            }
        }
    };
}

/// Broadcast event
pub struct Event<T: 'static> {
    registry: Rc<Registry<dyn Fn(&T)>>,
}

stream_common!(Event, [T]);

impl<T: 'static> Event<T> {
    /// Register a handler
    pub fn subscribe(&self, handler: impl Fn(&T) + 'static) -> SubscriptionId {
        self.registry.subscribe(Rc::new(handler))
    }

    /// Deliver `payload` to every subscriber in registration order
    pub fn emit(&self, payload: &T) {
        for handler in self.registry.snapshot() {
            handler(payload);
        }
    }
}

/// Event whose subscribers may veto the emitting operation
pub struct PreventableEvent<T: 'static> {
    registry: Rc<Registry<dyn Fn(&T) -> Flow>>,
}

stream_common!(PreventableEvent, [T]);

impl<T: 'static> PreventableEvent<T> {
    /// Register a handler
    pub fn subscribe(&self, handler: impl Fn(&T) -> Flow + 'static) -> SubscriptionId {
        self.registry.subscribe(Rc::new(handler))
    }

    /// Deliver `payload` until a subscriber prevents it
    pub fn emit(&self, payload: &T) -> Flow {
        for handler in self.registry.snapshot() {
            if handler(payload).is_prevented() {
                return Flow::Prevent;
            }
        }
        Flow::Continue
    }
}

/// Ordered transform pipeline
pub struct SequentialHook<T: 'static> {
    registry: Rc<Registry<dyn Fn(T) -> T>>,
}

stream_common!(SequentialHook, [T]);

impl<T: 'static> SequentialHook<T> {
    /// Register a transform
    pub fn subscribe(&self, handler: impl Fn(T) -> T + 'static) -> SubscriptionId {
        self.registry.subscribe(Rc::new(handler))
    }

    /// Thread `value` through every transform and return the result
    pub fn execute(&self, value: T) -> T {
        self.registry
            .hook_snapshot()
            .into_iter()
            .fold(value, |value, handler| handler(value))
    }
}

/// Ordered pipeline of checks returning one verdict each
pub struct ValidationHook<A: 'static, R: 'static> {
    registry: Rc<Registry<dyn Fn(&A) -> R>>,
}

stream_common!(ValidationHook, [A, R]);

impl<A: 'static, R: 'static> ValidationHook<A, R> {
    /// Register a check
    pub fn subscribe(&self, handler: impl Fn(&A) -> R + 'static) -> SubscriptionId {
        self.registry.subscribe(Rc::new(handler))
    }

    /// Collect every verdict in registration order
    pub fn execute(&self, args: &A) -> Vec<R> {
        self.registry
            .hook_snapshot()
            .into_iter()
            .map(|handler| handler(args))
            .collect()
    }

    /// Collect verdicts up to and including the first one matching `stop`
    pub fn execute_until(&self, args: &A, stop: impl Fn(&R) -> bool) -> Vec<R> {
        let mut verdicts = Vec::new();
        for handler in self.registry.hook_snapshot() {
            let verdict = handler(args);
            let done = stop(&verdict);
            verdicts.push(verdict);
            if done {
                break;
            }
        }
        verdicts
    }
}

/// Declare a named group of streams that can be aggregated as a whole.
///
/// The generated `add_target`/`remove_target` attach or detach every field
/// pairwise.
macro_rules! stream_group {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $name {
            /// Forward every stream of `child` to this group's subscribers
            pub fn add_target(&self, child: &Self) {
                $( self.$field.add_target(&child.$field); )*
            }

            /// Stop forwarding the streams of `child`
            pub fn remove_target(&self, child: &Self) {
                $( self.$field.remove_target(&child.$field); )*
            }
        }
    };
}

pub(crate) use stream_group;
