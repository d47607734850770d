//! Subscription Registry
//!
//! Maps event names to handlers. Handlers are removed by the
//! [`SubscriptionId`] returned at registration, never by comparing closures.
//!
//! Dispatch holds the read side of a gate while handlers run and `close`
//! takes the write side, so no handler starts or is still running once
//! `close` has returned. A `close` issued from inside a handler cannot wait
//! for its own dispatch; it only raises the closed flag, which stops the
//! remaining handlers of that dispatch.

use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::connection::protocol::{EventKind, ServerEvent};
use crate::error::RelayError;

/// Callback for a server event
pub type EventHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Callback for a connection-level failure
pub type ErrorHandler = Arc<dyn Fn(&RelayError) + Send + Sync>;

/// Handle identifying one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct Handlers {
    events: HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>,
    errors: Vec<(SubscriptionId, ErrorHandler)>,
}

thread_local! {
    /// Registries currently dispatching on this thread
    static DISPATCHING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a registry as dispatching on the current thread until dropped
struct DispatchScope {
    key: usize,
}

impl DispatchScope {
    fn enter(registry: &SubscriptionRegistry) -> Self {
        let key = registry.key();
        DISPATCHING.with(|active| active.borrow_mut().push(key));
        Self { key }
    }

    fn is_active(registry: &SubscriptionRegistry) -> bool {
        let key = registry.key();
        DISPATCHING.with(|active| active.borrow().contains(&key))
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        DISPATCHING.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|key| *key == self.key) {
                active.remove(pos);
            }
        });
    }
}

/// Event-name to handler registry with a teardown gate
pub struct SubscriptionRegistry {
    handlers: RwLock<Handlers>,
    closed: AtomicBool,
    gate: RwLock<()>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Handlers::default()),
            closed: AtomicBool::new(false),
            gate: RwLock::new(()),
        }
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// Register `handler` for `kind`
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers
            .write()
            .events
            .entry(kind)
            .or_default()
            .push((id, handler));
        tracing::debug!(event = %kind, subscription = %id, "Handler subscribed");
        id
    }

    /// Remove the handler registered under `id` for `kind`.
    ///
    /// Returns `false` when nothing matched.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.events.get_mut(&kind) else {
            return false;
        };

        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.events.remove(&kind);
        }

        if removed {
            tracing::debug!(event = %kind, subscription = %id, "Handler unsubscribed");
        }
        removed
    }

    pub fn subscribe_errors(&self, handler: ErrorHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers.write().errors.push((id, handler));
        id
    }

    pub fn unsubscribe_errors(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.errors.len();
        handlers.errors.retain(|(existing, _)| *existing != id);
        handlers.errors.len() != before
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .events
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's kind.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let _gate = self.gate.read();
        if self.is_closed() {
            return 0;
        }

        // Snapshot so handlers may (un)subscribe while running
        let targets: Vec<EventHandler> = self
            .handlers
            .read()
            .events
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        let _scope = DispatchScope::enter(self);
        let mut invoked = 0;
        for handler in &targets {
            // A handler may have closed the registry
            if self.is_closed() {
                break;
            }
            handler(event);
            invoked += 1;
        }
        invoked
    }

    /// Invoke every error handler
    pub fn dispatch_error(&self, error: &RelayError) -> usize {
        let _gate = self.gate.read();
        if self.is_closed() {
            return 0;
        }

        let targets: Vec<ErrorHandler> = self
            .handlers
            .read()
            .errors
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let _scope = DispatchScope::enter(self);
        let mut invoked = 0;
        for handler in &targets {
            if self.is_closed() {
                break;
            }
            handler(error);
            invoked += 1;
        }
        invoked
    }

    /// Close the gate and drop every handler.
    ///
    /// Blocks until an in-flight dispatch on another thread finishes. Called
    /// from inside a handler, it returns at once and the rest of that
    /// dispatch is skipped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let _gate = if DispatchScope::is_active(self) {
            None
        } else {
            Some(self.gate.write())
        };

        let mut handlers = self.handlers.write();
        handlers.events.clear();
        handlers.errors.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
