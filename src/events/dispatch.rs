//! Event Dispatch
//!
//! Handler registry keyed by [`EventName`]. The registry belongs to the
//! connection manager rather than to a transport, so registered handlers keep
//! receiving events from every replacement transport after a reconnect.
//! Each registration returns a [`Subscription`]; dropping it detaches the handler.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use super::names::EventName;

/// Handler invoked with the raw event payload
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

type Registry = RwLock<HandlerTable>;

#[derive(Default)]
struct HandlerTable {
    next_id: u64,
    handlers: HashMap<EventName, Vec<(u64, EventHandler)>>,
}

impl HandlerTable {
    fn remove(&mut self, event: EventName, id: u64) -> bool {
        let Some(list) = self.handlers.get_mut(&event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(&event);
        }
        removed
    }

    fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }
}

/// Fan-out of domain events to registered handlers
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`
    pub fn on<F>(&self, event: EventName, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut table = self.write();
        table.next_id += 1;
        let id = table.next_id;
        table
            .handlers
            .entry(event)
            .or_default()
            .push((id, Arc::new(handler)));

        tracing::trace!(event = %event, handler_id = id, "Handler registered");
        Subscription {
            id,
            event,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invoke every handler registered for `event`, in registration order.
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, event: EventName, payload: &Value) -> usize {
        // Snapshot so handlers may register or detach while running
        let handlers: Vec<EventHandler> = match self.read().handlers.get(&event) {
            Some(list) => list.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            None => return 0,
        };

        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// Detach every handler. Returns how many were removed.
    pub fn remove_all_listeners(&self) -> usize {
        let mut table = self.write();
        let removed = table.len();
        table.handlers.clear();
        tracing::debug!(removed, "All event handlers removed");
        removed
    }

    /// Total number of registered handlers
    pub fn listener_count(&self) -> usize {
        self.read().len()
    }

    /// Number of handlers registered for one event
    pub fn listener_count_for(&self, event: EventName) -> usize {
        self.read().handlers.get(&event).map(Vec::len).unwrap_or(0)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HandlerTable> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HandlerTable> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registration handle; the handler stays attached while this is alive
#[must_use = "dropping a Subscription detaches its handler"]
pub struct Subscription {
    id: u64,
    event: EventName,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Event this handler listens to
    pub fn event(&self) -> EventName {
        self.event
    }

    /// Whether the handler is still registered
    pub fn is_attached(&self) -> bool {
        self.registry.upgrade().is_some_and(|registry| {
            registry
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .handlers
                .get(&self.event)
                .is_some_and(|list| list.iter().any(|(id, _)| *id == self.id))
        })
    }

    /// Detach now
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut table = registry.write().unwrap_or_else(|e| e.into_inner());
            if table.remove(self.event, self.id) {
                tracing::trace!(event = %self.event, handler_id = self.id, "Handler detached");
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event", &self.event)
            .finish()
    }
}
