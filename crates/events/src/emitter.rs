//! Ordered event delivery to registered handlers.
//!
//! Handlers are plain closures held by value; anything a handler needs is
//! passed through the payload, never captured from the emitter's owner, so
//! no reference cycles can form between the client and its subscribers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::AgentEvent;

type Handler = Arc<dyn Fn(&serde_json::Value) + Send + Sync + 'static>;

struct Entry {
    id: u64,
    handler: Handler,
    once: bool,
}

/// Token returned by `on`/`once`, used to remove a single handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    event: AgentEvent,
    id: u64,
}

/// Registry of event handlers with ordered, exception-safe dispatch.
///
/// For a given event, handlers observe emissions in the order the owner
/// emitted them; within one emission, handlers run in registration order.
/// A panicking handler is caught and logged and never prevents delivery
/// to the remaining handlers.
#[derive(Default)]
pub struct EventEmitter {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<AgentEvent, Vec<Entry>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent handler.
    pub fn on<F>(&self, event: AgentEvent, handler: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(handler), false)
    }

    /// Register a handler that is removed after its first invocation.
    pub fn once<F>(&self, event: AgentEvent, handler: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(handler), true)
    }

    fn register(&self, event: AgentEvent, handler: Handler, once: bool) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.lock().unwrap();
        listeners
            .entry(event)
            .or_default()
            .push(Entry { id, handler, once });
        Subscription { event, id }
    }

    /// Remove a single handler. Returns false if it was already gone.
    pub fn off(&self, subscription: Subscription) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(entries) = listeners.get_mut(&subscription.event) {
            let before = entries.len();
            entries.retain(|e| e.id != subscription.id);
            return entries.len() != before;
        }
        false
    }

    /// Drop every registered handler.
    pub fn remove_all_listeners(&self) {
        self.listeners.lock().unwrap().clear();
    }

    /// Number of handlers currently registered for an event.
    pub fn listener_count(&self, event: AgentEvent) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .get(&event)
            .map_or(0, Vec::len)
    }

    /// Deliver a payload to every handler registered for `event`.
    ///
    /// One-shot handlers are unregistered before invocation so a handler
    /// that re-emits the same event cannot run itself twice.
    pub fn emit(&self, event: AgentEvent, payload: serde_json::Value) {
        let snapshot: Vec<Handler> = {
            let mut listeners = self.listeners.lock().unwrap();
            let Some(entries) = listeners.get_mut(&event) else {
                return;
            };
            let snapshot = entries.iter().map(|e| e.handler.clone()).collect();
            entries.retain(|e| !e.once);
            snapshot
        };

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(&payload))).is_err() {
                tracing::warn!(event = %event, "event handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capture(emitter: &EventEmitter, event: AgentEvent) -> Arc<Mutex<Vec<serde_json::Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        emitter.on(event, move |payload| {
            sink.lock().unwrap().push(payload.clone());
        });
        seen
    }

    #[test]
    fn test_emit_preserves_order() {
        let emitter = EventEmitter::new();
        let seen = capture(&emitter, AgentEvent::Info);

        for i in 0..5 {
            emitter.emit(AgentEvent::Info, json!({ "seq": i }));
        }

        let seen = seen.lock().unwrap();
        let seqs: Vec<i64> = seen.iter().map(|v| v["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_once_fires_once() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        emitter.once(AgentEvent::EndOfTurn, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        emitter.emit(AgentEvent::EndOfTurn, json!({}));
        emitter.emit(AgentEvent::EndOfTurn, json!({}));

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(emitter.listener_count(AgentEvent::EndOfTurn), 0);
    }

    #[test]
    fn test_off_removes_handler() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = emitter.on(AgentEvent::Warning, move |payload| {
            sink.lock().unwrap().push(payload.clone());
        });

        assert!(emitter.off(sub));
        assert!(!emitter.off(sub));
        emitter.emit(AgentEvent::Warning, json!({}));

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panicking_handler_does_not_stop_delivery() {
        let emitter = EventEmitter::new();
        emitter.on(AgentEvent::Error, |_| panic!("handler bug"));
        let seen = capture(&emitter, AgentEvent::Error);

        emitter.emit(AgentEvent::Error, json!({ "reason": "boom" }));

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_all_listeners() {
        let emitter = EventEmitter::new();
        let seen = capture(&emitter, AgentEvent::Info);
        emitter.remove_all_listeners();

        emitter.emit(AgentEvent::Info, json!({}));

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(emitter.listener_count(AgentEvent::Info), 0);
    }
}
