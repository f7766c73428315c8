//! Store
//!
//! The store owns the root value of one state tree and everything attached to
//! it: the edition counter, the pending root value, plugins and top-level
//! subscribers.
//!
//! # Write Algorithm
//!
//! Every committed write:
//!
//! 1. mutates the tree in place,
//! 2. bumps the edition by exactly one,
//! 3. reports a [`WriteInfo`] to every plugin,
//! 4. hands a [`Change`] to every subscriber; re-render callbacks collected
//!    along the way run once the whole fan-out is done.
//!
//! Writes return the smallest change that describes them. Replacing an
//! existing key is reported at the key itself; inserting or deleting a key
//! is reported one level up, tagged with the action, because it changes the
//! shape of the enclosing container (and, for arrays, the identity of every
//! later element).
//!
//! # Root Futures
//!
//! A root value can be a future. The store keeps a pending value
//! until it settles and hands the future to the configured spawner. A
//! settlement for a pending value that has since been replaced is ignored.

mod merge;
mod pending;
mod plugin;
mod value;

pub(crate) use merge::{plan_merge, MergePlan};
pub use plugin::{DestroyInfo, Plugin, PluginId, PluginInstance, TraceWrites, WriteInfo, WriteTracer};
pub(crate) use value::{container_keys, is_container, Slot};
use value::{child_value_mut, lookup};
pub use value::{Partial, RootFuture, SetValue};

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::Value;

use crate::config::Config;
use crate::error::{Rejection, StateError};
use crate::path::{Path, Segment};
use crate::tracking::{Action, Change, RerenderQueue, Subscriber, SubscriberId};

use pending::PendingValue;

/// Edition of a store that has been destroyed. Terminal.
pub(crate) const DESTROYED_EDITION: i64 = -1;

/// Edition of a freshly created store.
const INITIAL_EDITION: i64 = 1;

struct StoreInner {
    /// `None` while the root is absent.
    value: Option<Value>,
    edition: i64,
    pending: Option<PendingValue>,
    plugins: IndexMap<PluginId, Option<Rc<dyn PluginInstance>>>,
    subscribers: IndexMap<SubscriberId, Rc<dyn Subscriber>>,
}

/// Outcome of a write before its side effects run.
struct Committed {
    change: Change,
    info: WriteInfo,
    settle: Option<(u64, RootFuture)>,
}

pub(crate) struct Store {
    inner: RefCell<StoreInner>,
    config: Config,
    weak: Weak<Store>,
}

impl Store {
    pub(crate) fn new(initial: SetValue, config: Config) -> Result<Rc<Store>, StateError> {
        let (value, pending, future) = match initial {
            SetValue::Value(value) => (Some(value), None, None),
            SetValue::None => (None, Some(PendingValue::awaiting_write()), None),
            SetValue::Future(future) => (None, Some(PendingValue::with_source()), Some(future)),
            SetValue::Handle(path) => return Err(StateError::InitializedFromHandle { path }),
        };
        let pending_id = pending.as_ref().map(PendingValue::id);

        let store = Rc::new_cyclic(|weak| Store {
            inner: RefCell::new(StoreInner {
                value,
                edition: INITIAL_EDITION,
                pending,
                plugins: IndexMap::new(),
                subscribers: IndexMap::new(),
            }),
            config,
            weak: weak.clone(),
        });

        if let (Some(future), Some(id)) = (future, pending_id) {
            store.spawn_settlement(id, future);
        }
        Ok(store)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn edition(&self) -> i64 {
        self.inner.borrow().edition
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.inner.borrow().edition == DESTROYED_EDITION
    }

    /// True while the root waits for a future or for an explicit write.
    pub(crate) fn is_promised(&self) -> bool {
        self.inner
            .borrow()
            .pending
            .as_ref()
            .is_some_and(|pending| !pending.is_fulfilled())
    }

    pub(crate) fn pending_error(&self) -> Option<Rejection> {
        self.inner
            .borrow()
            .pending
            .as_ref()
            .and_then(|pending| pending.error().cloned())
    }

    pub(crate) fn read(&self, path: &Path) -> Slot {
        let inner = self.inner.borrow();
        match &inner.value {
            None => Slot::Absent,
            Some(root) => match lookup(root, path.segments()) {
                Some(value) => Slot::Present(value.clone()),
                None => Slot::Missing,
            },
        }
    }

    /// Apply a write and notify subscribers.
    ///
    /// When `actions` is given and the write replaces the value at `path`,
    /// the change is narrowed to those keys. The change carries the
    /// normalized form of `path`, so segments are not compared directly.
    pub(crate) fn commit(
        &self,
        path: &Path,
        value: SetValue,
        merged: Option<Value>,
        actions: Option<IndexMap<Segment, Action>>,
    ) -> Result<(), StateError> {
        let Some(mut change) = self.write(path, value, merged)? else {
            return Ok(());
        };
        if let Some(actions) = actions {
            if change.actions.is_none() && change.path.len() == path.len() {
                change.actions = Some(actions);
            }
        }
        self.notify(&change);
        Ok(())
    }

    /// Apply a write without notifying subscribers.
    ///
    /// Returns `None` when the write changed nothing.
    pub(crate) fn write(
        &self,
        path: &Path,
        value: SetValue,
        merged: Option<Value>,
    ) -> Result<Option<Change>, StateError> {
        let (committed, edition, instances) = {
            let mut inner = self.inner.borrow_mut();
            if inner.edition == DESTROYED_EDITION {
                return Err(StateError::DestroyedStore { path: path.clone() });
            }
            let committed = if path.is_root() {
                write_root(&mut inner, value, merged)?
            } else {
                match write_nested(&mut inner, path, value, merged)? {
                    Some(committed) => committed,
                    None => {
                        tracing::trace!(path = %path, "delete of an absent key ignored");
                        return Ok(None);
                    }
                }
            };
            inner.edition += 1;
            let instances: Vec<Rc<dyn PluginInstance>> =
                inner.plugins.values().flatten().cloned().collect();
            (committed, inner.edition, instances)
        };

        tracing::debug!(path = %committed.info.path, edition, "state write committed");
        for instance in &instances {
            instance.on_write(&committed.info);
        }
        if let Some((id, future)) = committed.settle {
            self.spawn_settlement(id, future);
        }
        Ok(Some(committed.change))
    }

    /// Deliver a change to every top-level subscriber, then run the
    /// re-render callbacks they collected.
    pub(crate) fn notify(&self, change: &Change) {
        let subscribers: Vec<Rc<dyn Subscriber>> =
            self.inner.borrow().subscribers.values().cloned().collect();
        let mut queue = RerenderQueue::new();

        for part in change.split_updates() {
            for subscriber in &subscribers {
                subscriber.on_write(&part, &mut queue);
            }
        }

        tracing::trace!(
            path = %change.path,
            subscribers = subscribers.len(),
            rerenders = queue.len(),
            "change delivered"
        );
        queue.flush();
    }

    pub(crate) fn subscribe(&self, subscriber: Rc<dyn Subscriber>) {
        self.inner
            .borrow_mut()
            .subscribers
            .insert(subscriber.subscriber_id(), subscriber);
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) -> Option<Rc<dyn Subscriber>> {
        self.inner.borrow_mut().subscribers.shift_remove(&id)
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    pub(crate) fn has_plugin(&self, id: PluginId) -> bool {
        self.inner.borrow().plugins.contains_key(&id)
    }

    pub(crate) fn register_plugin(&self, id: PluginId, instance: Option<Rc<dyn PluginInstance>>) {
        self.inner.borrow_mut().plugins.entry(id).or_insert(instance);
    }

    pub(crate) fn plugin(&self, id: PluginId) -> Result<Option<Rc<dyn PluginInstance>>, StateError> {
        self.inner
            .borrow()
            .plugins
            .get(&id)
            .cloned()
            .ok_or(StateError::UnknownPlugin { id })
    }

    /// Move the store into its terminal state. Destroy callbacks run once;
    /// later calls do nothing.
    pub(crate) fn destroy(&self) {
        let (instances, subscribers, value) = {
            let mut inner = self.inner.borrow_mut();
            if inner.edition == DESTROYED_EDITION {
                return;
            }
            inner.edition = DESTROYED_EDITION;
            let instances: Vec<Rc<dyn PluginInstance>> = std::mem::take(&mut inner.plugins)
                .into_values()
                .flatten()
                .collect();
            let subscribers = std::mem::take(&mut inner.subscribers);
            (instances, subscribers, inner.value.clone())
        };

        tracing::debug!(
            plugins = instances.len(),
            subscribers = subscribers.len(),
            "store destroyed"
        );
        let info = DestroyInfo { value };
        for instance in &instances {
            instance.on_destroy(&info);
        }
    }

    fn spawn_settlement(&self, id: u64, future: RootFuture) {
        let weak = self.weak.clone();
        self.config.spawner().spawn(Box::pin(async move {
            let outcome = future.await;
            match weak.upgrade() {
                Some(store) => store.settle(id, outcome),
                None => tracing::trace!(pending = id, "store dropped before its root future settled"),
            }
        }));
    }

    fn settle(&self, id: u64, outcome: Result<Value, Rejection>) {
        let current = {
            let inner = self.inner.borrow();
            inner.edition != DESTROYED_EDITION
                && inner.pending.as_ref().map(PendingValue::id) == Some(id)
        };
        if !current {
            tracing::trace!(pending = id, "stale root settlement ignored");
            return;
        }

        match outcome {
            Ok(value) => {
                self.inner.borrow_mut().pending = None;
                tracing::debug!(pending = id, "root future resolved");
                if let Err(err) = self.commit(&Path::root(), SetValue::Value(value), None, None) {
                    tracing::warn!(pending = id, error = %err, "resolved root value could not be applied");
                }
            }
            Err(rejection) => {
                {
                    let mut inner = self.inner.borrow_mut();
                    if let Some(pending) = inner.pending.as_mut() {
                        pending.reject(rejection.clone());
                    }
                    inner.edition += 1;
                }
                tracing::debug!(pending = id, error = %rejection, "root future rejected");
                self.notify(&Change::replaced(Path::root()));
            }
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Store")
            .field("edition", &inner.edition)
            .field("value", &inner.value)
            .field("pending", &inner.pending)
            .field("plugins", &inner.plugins.len())
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

fn write_root(
    inner: &mut StoreInner,
    value: SetValue,
    merged: Option<Value>,
) -> Result<Committed, StateError> {
    let path = Path::root();
    let (value, settle) = match value {
        SetValue::Handle(source_path) => {
            return Err(StateError::SetFromHandle { path, source_path });
        }
        SetValue::None => {
            inner.pending = Some(PendingValue::awaiting_write());
            (None, None)
        }
        SetValue::Future(future) => {
            let pending = PendingValue::with_source();
            let id = pending.id();
            inner.pending = Some(pending);
            (None, Some((id, future)))
        }
        SetValue::Value(value) => {
            if inner.pending.as_ref().is_some_and(PendingValue::blocks_writes) {
                return Err(StateError::SetWhilePending { path });
            }
            // An explicit value completes a pending root that had no source,
            // and retires one whose future already failed.
            if let Some(pending) = inner.pending.take() {
                tracing::debug!(
                    pending = pending.id(),
                    had_source = pending.has_source(),
                    "pending root completed by write"
                );
            }
            (Some(value), None)
        }
    };

    let previous = std::mem::replace(&mut inner.value, value.clone());
    Ok(Committed {
        change: Change::replaced(path.clone()),
        info: WriteInfo {
            path,
            previous,
            value,
            merged,
        },
        settle,
    })
}

fn write_nested(
    inner: &mut StoreInner,
    path: &Path,
    value: SetValue,
    merged: Option<Value>,
) -> Result<Option<Committed>, StateError> {
    let value = match value {
        SetValue::Value(value) => Some(value),
        SetValue::None => None,
        SetValue::Future(_) => return Err(StateError::NestedFuture { path: path.clone() }),
        SetValue::Handle(source_path) => {
            return Err(StateError::SetFromHandle {
                path: path.clone(),
                source_path,
            });
        }
    };
    let Some((key, parents)) = path.segments().split_last() else {
        return Err(StateError::InvalidPath { path: path.clone() });
    };
    let Some(root) = inner.value.as_mut() else {
        return Err(StateError::SetWhilePending { path: path.clone() });
    };

    let invalid = || StateError::InvalidPath { path: path.clone() };
    let mut parent_path = Path::root();
    let mut container = root;
    for segment in parents {
        let segment = segment.normalized_for(container);
        container = child_value_mut(container, &segment).ok_or_else(invalid)?;
        parent_path = parent_path.child(segment);
    }
    let key = key.normalized_for(container);
    let target = parent_path.child(key.clone());

    let (change, previous) = match container {
        Value::Array(items) => {
            let index = key.as_index().ok_or_else(invalid)?;
            match (index < items.len(), &value) {
                (true, Some(next)) => {
                    let previous = std::mem::replace(&mut items[index], next.clone());
                    (Change::replaced(target.clone()), Some(previous))
                }
                (true, None) => {
                    let previous = items.remove(index);
                    (Change::keyed(parent_path, key, Action::Delete), Some(previous))
                }
                (false, Some(next)) => {
                    items.resize(index, Value::Null);
                    items.push(next.clone());
                    (Change::keyed(parent_path, key, Action::Insert), None)
                }
                (false, None) => return Ok(None),
            }
        }
        Value::Object(map) => {
            let name = key.to_string();
            match (map.get(&name).cloned(), &value) {
                (Some(previous), Some(next)) => {
                    map.insert(name, next.clone());
                    (Change::replaced(target.clone()), Some(previous))
                }
                (Some(previous), None) => {
                    map.retain(|existing, _| *existing != name);
                    (Change::keyed(parent_path, key, Action::Delete), Some(previous))
                }
                (None, Some(next)) => {
                    map.insert(name, next.clone());
                    (Change::keyed(parent_path, key, Action::Insert), None)
                }
                (None, None) => return Ok(None),
            }
        }
        _ => return Err(invalid()),
    };

    Ok(Some(Committed {
        change,
        info: WriteInfo {
            path: target,
            previous,
            value,
            merged,
        },
        settle: None,
    }))
}
