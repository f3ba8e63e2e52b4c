//! Hierarchical execution contexts with scoped event dispatch.
//!
//! A context is a unit of operation-local state: an identifier, a key-value
//! data map, parent/child links, and an owned [`EventHub`]. Each thread keeps
//! its own "current context" stack seeded with the process-wide `__root`
//! sentinel; entering a scope pushes a new context and returns a guard whose
//! drop restores the previous context and announces `context.ended.<id>`.
//!
//! Data inheritance is an eager copy taken when the parent is attached. A
//! value the parent sets afterwards is not visible to an existing child; this
//! snapshot semantic is deliberate and tested, not an optimization target.

pub mod hub;

#[cfg(test)]
mod hub_tests;

pub use hub::{DispatchResults, EventHub, Listener};

use crate::error::ContextError;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, RwLock, Weak};

pub const ROOT_CONTEXT_ID: &str = "__root";

pub struct ExecutionContext {
    identifier: String,
    data: RwLock<HashMap<String, Value>>,
    parents: RwLock<Vec<Arc<ExecutionContext>>>,
    // Weak: child links must not keep a finished scope's context alive
    // (parent links already point the other way).
    children: RwLock<Vec<Weak<ExecutionContext>>>,
    event_hub: EventHub,
}

impl ExecutionContext {
    pub fn new(identifier: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            identifier: identifier.into(),
            data: RwLock::new(HashMap::new()),
            parents: RwLock::new(Vec::new()),
            children: RwLock::new(Vec::new()),
            event_hub: EventHub::new(),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn event_hub(&self) -> &EventHub {
        &self.event_hub
    }

    pub fn parent(&self) -> Option<Arc<ExecutionContext>> {
        self.parents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .first()
            .cloned()
    }

    pub fn parents(&self) -> Vec<Arc<ExecutionContext>> {
        self.parents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn children(&self) -> Vec<Arc<ExecutionContext>> {
        self.children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Links `parent` as this context's parent and copies the parent's
    /// accumulated data snapshot into this context's own map. The root
    /// sentinel can never receive a parent.
    pub fn add_parent(
        self: &Arc<Self>,
        parent: &Arc<ExecutionContext>,
    ) -> Result<(), ContextError> {
        if self.identifier == ROOT_CONTEXT_ID {
            return Err(ContextError::RootParent);
        }
        self.parents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(parent));
        parent.add_child(self);

        // The root sentinel's data is excluded from inheritance, same as it
        // is excluded from lookup.
        if parent.identifier != ROOT_CONTEXT_ID {
            let snapshot = parent
                .data
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            self.data
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .extend(snapshot);
        }
        Ok(())
    }

    pub fn add_child(&self, child: &Arc<ExecutionContext>) {
        let mut children = self.children.write().unwrap_or_else(|e| e.into_inner());
        // Long-lived contexts (the root especially) parent every scope that
        // passes through; prune finished ones as we go.
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(child));
    }

    /// Looks up `key` in this context's own data, then up the nearest
    /// ancestor chain, stopping at (and excluding) the root sentinel.
    pub fn get_item(&self, key: &str) -> Option<Value> {
        if self.identifier == ROOT_CONTEXT_ID {
            return None;
        }
        if let Some(value) = self
            .data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return Some(value.clone());
        }
        let mut current = self.parent();
        while let Some(ctx) = current {
            if ctx.identifier == ROOT_CONTEXT_ID {
                return None;
            }
            if let Some(value) = ctx
                .data
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(key)
            {
                return Some(value.clone());
            }
            current = ctx.parent();
        }
        None
    }

    pub fn get_items(&self, keys: &[&str]) -> Vec<Option<Value>> {
        keys.iter().map(|key| self.get_item(key)).collect()
    }

    pub fn set_item(&self, key: impl Into<String>, value: Value) {
        self.data
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value);
    }

    pub fn set_items(&self, items: HashMap<String, Value>) {
        self.data
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .extend(items);
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExecutionContext '{}'", self.identifier)
    }
}

static ROOT_CONTEXT: OnceLock<Arc<ExecutionContext>> = OnceLock::new();

thread_local! {
    static CURRENT_STACK: RefCell<Vec<Arc<ExecutionContext>>> =
        RefCell::new(vec![root_context()]);
}

/// The process-wide root sentinel. Shared by every thread's context stack.
///
/// Data set on the root does not propagate: it is skipped both by the
/// copy-on-attach snapshot in [`ExecutionContext::add_parent`] and by the
/// ancestor walk in [`ExecutionContext::get_item`].
pub fn root_context() -> Arc<ExecutionContext> {
    Arc::clone(ROOT_CONTEXT.get_or_init(|| ExecutionContext::new(ROOT_CONTEXT_ID)))
}

/// The calling thread's current context; the root sentinel when no scope is
/// active.
pub fn current_context() -> Arc<ExecutionContext> {
    CURRENT_STACK.with(|stack| {
        stack
            .borrow()
            .last()
            .cloned()
            .unwrap_or_else(root_context)
    })
}

/// Scope handle returned by [`context_with_data`]. Dropping it restores the
/// previous current context and dispatches `context.ended.<identifier>`
/// exactly once, including on panic unwinds.
pub struct ScopeGuard {
    context: Arc<ExecutionContext>,
    // Kept off other threads: the guard pops this thread's context stack.
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        CURRENT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.last() {
                Some(top) if Arc::ptr_eq(top, &self.context) => {
                    stack.pop();
                }
                _ => {
                    // Out-of-order release across scopes; drop our entry
                    // wherever it sits so the stack cannot leak.
                    stack.retain(|ctx| !Arc::ptr_eq(ctx, &self.context));
                    tracing::debug!(
                        identifier = self.context.identifier(),
                        "scope released out of order"
                    );
                }
            }
        });
        // The ended event goes through the hub of whichever context is
        // current after the scope exits.
        dispatch(
            &format!("context.ended.{}", self.context.identifier()),
            &[],
        );
    }
}

/// Enters a new scoped context as a child of `parent` (defaulting to the
/// calling thread's current context), seeds it with `data`, and makes it
/// current.
pub fn context_with_data(
    identifier: impl Into<String>,
    parent: Option<Arc<ExecutionContext>>,
    data: HashMap<String, Value>,
) -> Result<ScopeGuard, ContextError> {
    let parent = parent.unwrap_or_else(current_context);
    let context = ExecutionContext::new(identifier);
    context.add_parent(&parent)?;
    // Initial data is applied after the parent snapshot so the caller's
    // values win over inherited ones.
    context.set_items(data);

    CURRENT_STACK.with(|stack| stack.borrow_mut().push(Arc::clone(&context)));
    Ok(ScopeGuard {
        context,
        _not_send: PhantomData,
    })
}

pub fn get_item(key: &str) -> Option<Value> {
    current_context().get_item(key)
}

pub fn get_items(keys: &[&str]) -> Vec<Option<Value>> {
    current_context().get_items(keys)
}

pub fn set_item(key: impl Into<String>, value: Value) {
    current_context().set_item(key, value);
}

pub fn set_items(items: HashMap<String, Value>) {
    current_context().set_items(items);
}

pub fn on<F>(event_id: &str, listener: F)
where
    F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    current_context().event_hub().on(event_id, listener);
}

pub fn has_listeners(event_id: &str) -> bool {
    current_context().event_hub().has_listeners(event_id)
}

pub fn dispatch(event_id: &str, args: &[Value]) -> DispatchResults {
    current_context().event_hub().dispatch(event_id, args)
}

/// Clears listener registrations on the current context and every ancestor
/// up to and including the root. Used between test runs and on process
/// reinitialization.
pub fn reset_listeners() {
    let mut current = Some(current_context());
    while let Some(ctx) = current {
        ctx.event_hub().reset();
        current = ctx.parent();
    }
}
