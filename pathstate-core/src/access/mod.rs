//! State handles.
//!
//! A [`State`] is an explicit accessor for one path of one store. Reads go
//! through the handle's tracking node, so a handle obtained from a mounted
//! consumer records what the consumer used; writes go through the store's
//! write algorithm. Handles are cheap to clone and never own the value.
//!
//! # Example
//!
//! ```rust
//! use pathstate_core::{Partial, State};
//! use serde_json::json;
//!
//! let state = State::create(json!({"todos": [{"title": "write docs"}]})).unwrap();
//! let title = state.nested("todos").nested(0usize).nested("title");
//! assert_eq!(title.value().unwrap(), json!("write docs"));
//!
//! state.nested("todos").merge(json!([{"title": "ship"}])).unwrap();
//! assert_eq!(state.nested("todos").keys().unwrap().map(|keys| keys.len()), Some(2));
//!
//! state.merge(Partial::entries().with("filter", json!("open"))).unwrap();
//! assert_eq!(state.edition(), 3);
//! ```

mod proxy;

pub use proxy::{ArrayView, ObjectView, View};

use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{Rejection, StateError};
use crate::path::{Path, Segment};
use crate::store::{
    is_container, plan_merge, MergePlan, Partial, Plugin, PluginId, PluginInstance, SetValue,
    Store,
};
use crate::tracking::{ReadLevel, TrackingNode};

/// Handle to the value at one path of a store.
#[derive(Clone)]
pub struct State {
    node: Rc<TrackingNode>,
}

impl State {
    /// Create a store with the default configuration.
    ///
    /// `SetValue::None` starts the root absent until the first write;
    /// `SetValue::Future` starts it pending on the future.
    pub fn create(initial: impl Into<SetValue>) -> Result<State, StateError> {
        Self::with_config(initial, Config::default())
    }

    pub fn with_config(initial: impl Into<SetValue>, config: Config) -> Result<State, StateError> {
        let store = Store::new(initial.into(), config)?;
        Ok(State::detached(store))
    }

    /// Root handle that is not bound to any consumer.
    pub(crate) fn detached(store: Rc<Store>) -> State {
        State::from_node(TrackingNode::new(store, Path::root(), None, false))
    }

    pub(crate) fn from_node(node: Rc<TrackingNode>) -> State {
        State { node }
    }

    pub(crate) fn node(&self) -> &Rc<TrackingNode> {
        &self.node
    }

    pub(crate) fn store(&self) -> &Rc<Store> {
        self.node.store()
    }

    pub fn path(&self) -> &Path {
        self.node.path()
    }

    /// The whole value at this path; `None` when the path leads nowhere.
    ///
    /// Counts as reading everything below the path. Fails while the root
    /// is pending, or with the rejection once its future failed.
    pub fn get(&self) -> Result<Option<Value>, StateError> {
        self.node.read(ReadLevel::Deep)
    }

    /// Like [`State::get`], with a missing value read as `null`.
    pub fn value(&self) -> Result<Value, StateError> {
        Ok(self.get()?.unwrap_or(Value::Null))
    }

    /// Read without recording usage.
    pub fn get_untracked(&self) -> Result<Option<Value>, StateError> {
        self.node.peek()
    }

    /// Deserialize the value into `T`.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T, StateError> {
        let value = self.value()?;
        serde_json::from_value(value).map_err(|err| StateError::Conversion {
            path: self.path().clone(),
            message: err.to_string(),
        })
    }

    /// Read-only view whose element reads are tracked one by one.
    pub fn view(&self) -> Result<Option<View>, StateError> {
        View::build(self)
    }

    /// Handle for a direct child.
    pub fn nested(&self, key: impl Into<Segment>) -> State {
        State::from_node(self.node.child(key.into()))
    }

    /// Keys of the container at this path, `None` for primitives and
    /// missing values.
    pub fn keys(&self) -> Result<Option<Vec<Segment>>, StateError> {
        self.node.keys()
    }

    /// Replace the value at this path.
    ///
    /// Writing a primitive equal to the current value does nothing.
    pub fn set(&self, value: impl Into<SetValue>) -> Result<(), StateError> {
        let value = value.into();
        if let SetValue::Value(next) = &value {
            if self.is_unchanged(next) {
                tracing::trace!(path = %self.path(), "unchanged value not written");
                return Ok(());
            }
        }
        self.store().commit(self.path(), value, None, None)
    }

    /// Serialize `value` and [`set`](State::set) it.
    pub fn set_serialized<T: Serialize>(&self, value: &T) -> Result<(), StateError> {
        let value = serde_json::to_value(value).map_err(|err| StateError::Conversion {
            path: self.path().clone(),
            message: err.to_string(),
        })?;
        self.set(value)
    }

    /// Apply a partial update as a single write.
    ///
    /// Arrays take appended items or per-index entries, objects per-key
    /// entries, strings appended text; anything else is replaced.
    pub fn merge(&self, partial: impl Into<Partial>) -> Result<(), StateError> {
        let store = self.store();
        if store.is_destroyed() {
            return Err(StateError::DestroyedStore {
                path: self.path().clone(),
            });
        }
        let partial = partial.into();
        let merged = partial.to_value();
        let current = self.node.peek()?;

        match plan_merge(self.path(), current.as_ref(), partial)? {
            MergePlan::Nothing => {
                tracing::trace!(path = %self.path(), "merge changed nothing");
                Ok(())
            }
            MergePlan::Replace(value) => {
                store.commit(self.path(), SetValue::Value(value), Some(merged), None)
            }
            MergePlan::Keyed { value, actions } => store.commit(
                self.path(),
                SetValue::Value(value),
                Some(merged),
                Some(actions),
            ),
        }
    }

    /// True while the root waits for its value.
    pub fn promised(&self) -> bool {
        self.node.mark_read(ReadLevel::Shallow);
        self.store().is_promised()
    }

    /// Rejection of the root future, if it failed.
    pub fn error(&self) -> Option<Rejection> {
        self.node.mark_read(ReadLevel::Shallow);
        self.store().pending_error()
    }

    pub fn edition(&self) -> i64 {
        self.store().edition()
    }

    /// Destroy the whole store. Later writes fail.
    pub fn destroy(&self) {
        self.store().destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.store().is_destroyed()
    }

    /// Attach a plugin to the store. Attaching the same id twice keeps the
    /// first instance.
    pub fn attach(&self, plugin: &dyn Plugin) -> Result<(), StateError> {
        let store = self.store();
        if store.is_destroyed() {
            return Err(StateError::DestroyedStore {
                path: self.path().clone(),
            });
        }
        let id = plugin.id();
        if store.has_plugin(id) {
            return Ok(());
        }
        let instance = plugin.init(&State::detached(Rc::clone(store)));
        tracing::debug!(plugin = %id, callbacks = instance.is_some(), "plugin attached");
        store.register_plugin(id, instance);
        Ok(())
    }

    /// Instance of an attached plugin; `UnknownPlugin` when it was never
    /// attached.
    pub fn plugin(&self, id: PluginId) -> Result<Option<Rc<dyn PluginInstance>>, StateError> {
        self.store().plugin(id)
    }

    /// Stop fine-grained tracking: any write at or below this path counts
    /// as affecting a consumer that read it.
    pub fn downgrade(&self) {
        self.node.downgrade();
    }

    /// Bring back the reads of the previous render, so code that captured
    /// this handle earlier keeps being notified.
    pub fn reconnect(&self) {
        self.node.reconnect();
    }

    fn is_unchanged(&self, next: &Value) -> bool {
        if is_container(next) || self.store().is_destroyed() {
            return false;
        }
        matches!(self.node.peek(), Ok(Some(current)) if current == *next)
    }
}

impl From<&State> for SetValue {
    fn from(state: &State) -> Self {
        SetValue::Handle(state.path().clone())
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("path", self.path())
            .field("edition", &self.edition())
            .field("mounted", &self.node.is_mounted())
            .finish()
    }
}
