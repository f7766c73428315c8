//! Plugin contract.
//!
//! Plugins add cross-cutting behavior (dev tools, validation, logging) to a
//! store without the store knowing about them. A plugin is attached once per
//! store; its instance hears about every committed write and about destroy.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::access::State;
use crate::path::Path;

/// Unique token identifying a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginId {
    raw: u64,
    name: &'static str,
}

impl PluginId {
    /// Mint a new token. Two calls never return equal ids, even with the
    /// same name; keep the token in a `static` or a `OnceLock`.
    pub fn new(name: &'static str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            raw: COUNTER.fetch_add(1, Ordering::Relaxed),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.raw)
    }
}

/// Details of one committed write.
///
/// Optional fields are `None` when they do not apply: no `previous` when the
/// old value was absent, no `value` for deletes and for writes that made the
/// root pending, no `merged` outside of merges.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteInfo {
    pub path: Path,
    pub previous: Option<Value>,
    pub value: Option<Value>,
    pub merged: Option<Value>,
}

/// Details handed to plugins when the store is destroyed.
#[derive(Debug, Clone, PartialEq)]
pub struct DestroyInfo {
    /// Last root value, `None` when the root was absent.
    pub value: Option<Value>,
}

/// A plugin definition.
pub trait Plugin {
    fn id(&self) -> PluginId;

    /// Called once when the plugin is attached. Returning `None` attaches
    /// the plugin without callbacks.
    fn init(&self, _root: &State) -> Option<Rc<dyn PluginInstance>> {
        None
    }
}

/// Per-store plugin callbacks.
pub trait PluginInstance {
    fn on_write(&self, _info: &WriteInfo) {}

    fn on_destroy(&self, _info: &DestroyInfo) {}

    /// Downcast hook for callers that query the plugin's own state.
    fn as_any(&self) -> &dyn Any;
}

/// Emits a `tracing` event for every committed write and for destroy.
#[derive(Debug, Clone, Copy)]
pub struct TraceWrites {
    id: PluginId,
}

impl TraceWrites {
    pub fn new() -> Self {
        Self {
            id: PluginId::new("trace-writes"),
        }
    }
}

impl Default for TraceWrites {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for TraceWrites {
    fn id(&self) -> PluginId {
        self.id
    }

    fn init(&self, _root: &State) -> Option<Rc<dyn PluginInstance>> {
        Some(Rc::new(WriteTracer::default()))
    }
}

/// Instance created by [`TraceWrites`]; counts what it traced.
#[derive(Debug, Default)]
pub struct WriteTracer {
    writes: std::cell::Cell<u64>,
}

impl WriteTracer {
    pub fn writes(&self) -> u64 {
        self.writes.get()
    }
}

impl PluginInstance for WriteTracer {
    fn on_write(&self, info: &WriteInfo) {
        self.writes.set(self.writes.get() + 1);
        tracing::info!(
            path = %info.path,
            previous = ?info.previous,
            value = ?info.value,
            merged = ?info.merged,
            "state write"
        );
    }

    fn on_destroy(&self, info: &DestroyInfo) {
        tracing::info!(value = ?info.value, "state destroyed");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
