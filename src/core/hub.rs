//! Per-context publish/subscribe registry.
//!
//! Event names are dot-namespaced strings agreed on out of band; context
//! lifecycle events use `context.ended.<identifier>`. Listeners take a slice
//! of opaque JSON values and return a value or an error. Dispatch snapshots
//! the listener list under the hub mutex and runs listeners outside it, so
//! registrations concurrent with an in-flight dispatch never join it.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type Listener = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Per-listener outcomes of one dispatch call, in subscription order.
#[derive(Default)]
pub struct DispatchResults {
    pub results: Vec<Option<Value>>,
    pub errors: Vec<Option<anyhow::Error>>,
}

#[derive(Default)]
pub struct EventHub {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_listeners(&self, event_id: &str) -> bool {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.get(event_id).is_some_and(|l| !l.is_empty())
    }

    pub fn on<F>(&self, event_id: &str, listener: F)
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .entry(event_id.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Clears every registration. A dispatch already in flight completes with
    /// the snapshot it took.
    pub fn reset(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.clear();
    }

    /// Invokes every listener registered for `event_id` exactly once, in
    /// subscription order. A listener error is captured in the returned
    /// results and never stops the remaining listeners.
    pub fn dispatch(&self, event_id: &str, args: &[Value]) -> DispatchResults {
        tracing::debug!(event = event_id, "dispatching event");
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.get(event_id).cloned().unwrap_or_default()
        };

        let mut outcome = DispatchResults::default();
        for listener in snapshot {
            match listener(args) {
                Ok(result) => {
                    outcome.results.push(Some(result));
                    outcome.errors.push(None);
                }
                Err(err) => {
                    outcome.results.push(None);
                    outcome.errors.push(Some(err));
                }
            }
        }
        outcome
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let events: Vec<&String> = listeners.keys().collect();
        f.debug_struct("EventHub").field("events", &events).finish()
    }
}
