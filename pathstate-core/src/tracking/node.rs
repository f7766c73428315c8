//! Per-path usage tracking.
//!
//! A [`TrackingNode`] exists for every path a consumer touched during its
//! last render. Nodes form a tree mirroring the accessed part of the value
//! tree and decide, write by write, whether their consumer has to render
//! again.
//!
//! # Read Levels
//!
//! - *Shallow*: the node's container was looked at (navigated through, its
//!   keys listed, a view built). Writes replacing the container or changing
//!   its shape affect it; writes inside children only affect it through the
//!   children that were read.
//! - *Deep*: the whole value was copied out. Any write at or below the node
//!   affects it.
//!
//! # Child Caches
//!
//! `children_created` keeps child nodes alive across renders so their
//! identity is stable; `children_read` is the subset used since the last
//! render and the only one change propagation walks. Writes prune the
//! created cache for every key they touched.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::StateError;
use crate::path::{Path, Segment};
use crate::store::{container_keys, Slot, Store};

use super::subscriber::{Action, Change, Rerender, RerenderQueue, Subscriber, SubscriberId};

/// How much of a node's value was observed since the last render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ReadLevel {
    Unread,
    Shallow,
    Deep,
}

/// Identity token for the view built from a node.
///
/// The same token is handed out until a write affects the node, so two views
/// compare equal exactly when nothing they showed has changed.
#[derive(Debug)]
pub(crate) struct ViewStamp {
    pub(crate) edition: i64,
}

struct NodeState {
    snapshot: Slot,
    snapshot_edition: i64,
    read: ReadLevel,
    read_previous: ReadLevel,
    downgraded: bool,
    children_created: IndexMap<Segment, Rc<TrackingNode>>,
    children_read: IndexMap<Segment, Rc<TrackingNode>>,
    children_read_previous: IndexMap<Segment, Rc<TrackingNode>>,
    view_cache: Option<Rc<ViewStamp>>,
    /// Present while the owning consumer is mounted.
    rerender: Option<Rc<Rerender>>,
    /// Scoped nodes attached to this one.
    subscribers: IndexMap<SubscriberId, Rc<dyn Subscriber>>,
}

pub(crate) struct TrackingNode {
    id: SubscriberId,
    store: Rc<Store>,
    path: Path,
    state: RefCell<NodeState>,
}

impl TrackingNode {
    pub(crate) fn new(
        store: Rc<Store>,
        path: Path,
        rerender: Option<Rc<Rerender>>,
        downgraded: bool,
    ) -> Rc<Self> {
        Rc::new(Self {
            id: SubscriberId::new(),
            store,
            path,
            state: RefCell::new(NodeState {
                snapshot: Slot::Absent,
                snapshot_edition: i64::MIN,
                read: ReadLevel::Unread,
                read_previous: ReadLevel::Unread,
                downgraded,
                children_created: IndexMap::new(),
                children_read: IndexMap::new(),
                children_read_previous: IndexMap::new(),
                view_cache: None,
                rerender,
                subscribers: IndexMap::new(),
            }),
        })
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn store(&self) -> &Rc<Store> {
        &self.store
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.state.borrow().rerender.is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_downgraded(&self) -> bool {
        self.state.borrow().downgraded
    }

    /// Disable fine-grained tracking below this node.
    pub(crate) fn downgrade(&self) {
        self.state.borrow_mut().downgraded = true;
    }

    /// Current value without recording a read.
    pub(crate) fn peek(&self) -> Result<Option<Value>, StateError> {
        let mut state = self.state.borrow_mut();
        self.refresh(&mut state);
        match &state.snapshot {
            Slot::Present(value) => Ok(Some(value.clone())),
            Slot::Missing => Ok(None),
            Slot::Absent => Err(self.absent_error()),
        }
    }

    /// Current value, recording a read at `level`. The read is recorded
    /// even when the value is unavailable, so the consumer hears about the
    /// settlement.
    pub(crate) fn read(&self, level: ReadLevel) -> Result<Option<Value>, StateError> {
        self.mark_read(level);
        self.peek()
    }

    pub(crate) fn mark_read(&self, level: ReadLevel) {
        let mut state = self.state.borrow_mut();
        state.read = state.read.max(level);
    }

    /// Keys of the current container, recorded as a shallow read.
    pub(crate) fn keys(&self) -> Result<Option<Vec<Segment>>, StateError> {
        Ok(self
            .read(ReadLevel::Shallow)?
            .as_ref()
            .and_then(container_keys))
    }

    /// Identity token for a view of this node; stable until a write affects
    /// the node. Unmounted nodes never hear about writes, so they hand out a
    /// fresh token every time.
    pub(crate) fn view_stamp(&self) -> Rc<ViewStamp> {
        let edition = self.store.edition();
        let mut state = self.state.borrow_mut();
        if state.rerender.is_none() {
            return Rc::new(ViewStamp { edition });
        }
        Rc::clone(state.view_cache.get_or_insert_with(|| Rc::new(ViewStamp { edition })))
    }

    /// Node for a direct child, created on first access.
    ///
    /// Looking up a child reads this node's container, so it counts as a
    /// shallow read here.
    pub(crate) fn child(&self, key: Segment) -> Rc<TrackingNode> {
        let mut state = self.state.borrow_mut();
        state.read = state.read.max(ReadLevel::Shallow);
        self.refresh(&mut state);

        let key = match &state.snapshot {
            Slot::Present(container) => key.normalized_for(container),
            _ => key,
        };
        if let Some(child) = state.children_read.get(&key) {
            return Rc::clone(child);
        }
        if let Some(child) = state.children_created.get(&key).cloned() {
            child.reconstruct();
            state.children_read.insert(key, Rc::clone(&child));
            return child;
        }

        let child = TrackingNode::new(
            Rc::clone(&self.store),
            self.path.child(key.clone()),
            state.rerender.clone(),
            state.downgraded,
        );
        if state.rerender.is_some() {
            state.children_created.insert(key.clone(), Rc::clone(&child));
            state.children_read.insert(key, Rc::clone(&child));
        }
        child
    }

    /// Start a new render: keep the previous reads for [`Self::reconnect`]
    /// and track from scratch.
    pub(crate) fn reconstruct(&self) {
        let mut state = self.state.borrow_mut();
        state.read_previous = std::mem::replace(&mut state.read, ReadLevel::Unread);
        state.children_read_previous = std::mem::take(&mut state.children_read);
        self.refresh(&mut state);
    }

    /// Merge the reads of the previous render back into the active set.
    pub(crate) fn reconnect(&self) {
        let mut state = self.state.borrow_mut();
        state.read = state.read.max(state.read_previous);
        let previous = std::mem::take(&mut state.children_read_previous);
        for (key, child) in previous {
            state.children_read.entry(key).or_insert(child);
        }
    }

    /// Detach from the consumer: later writes queue nothing.
    pub(crate) fn release(&self) {
        let rerender = self.state.borrow_mut().rerender.take();
        if let Some(rerender) = rerender {
            rerender.mark_inert();
        }
    }

    pub(crate) fn subscribe(&self, subscriber: Rc<dyn Subscriber>) {
        self.state
            .borrow_mut()
            .subscribers
            .insert(subscriber.subscriber_id(), subscriber);
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) {
        self.state.borrow_mut().subscribers.shift_remove(&id);
    }

    fn refresh(&self, state: &mut NodeState) {
        let edition = self.store.edition();
        if state.snapshot_edition != edition {
            state.snapshot = self.store.read(&self.path);
            state.snapshot_edition = edition;
        }
    }

    fn absent_error(&self) -> StateError {
        match self.store.pending_error() {
            Some(rejection) => StateError::Rejected(rejection),
            None => StateError::ReadWhilePending {
                path: self.path.clone(),
            },
        }
    }

    fn propagate(&self, change: &Change, queue: &mut RerenderQueue) -> bool {
        if !self.path.is_prefix_of(&change.path) && !change.path.is_prefix_of(&self.path) {
            return false;
        }

        let next = {
            let mut state = self.state.borrow_mut();
            if state.downgraded && state.read != ReadLevel::Unread {
                affect(&mut state, queue);
                return true;
            }
            match change.path.get(self.path.len()) {
                None => {
                    if state.read == ReadLevel::Unread {
                        return false;
                    }
                    affect(&mut state, queue);
                    let actions = (change.path.len() == self.path.len())
                        .then_some(change.actions.as_ref())
                        .flatten();
                    prune(&mut state, actions);
                    return true;
                }
                Some(key) => (
                    state.read == ReadLevel::Deep,
                    state.children_read.get(key).cloned(),
                ),
            }
        };

        // Every live child is visited, even when this node already knows it
        // is affected: scoped consumers may hang off any of them.
        let (deep, child) = next;
        let child_affected = child.is_some_and(|child| child.on_write(change, queue));
        if deep || child_affected {
            let mut state = self.state.borrow_mut();
            if deep {
                affect(&mut state, queue);
            } else {
                state.view_cache = None;
            }
            return true;
        }
        false
    }

    #[cfg(test)]
    pub(crate) fn created_keys(&self) -> Vec<Segment> {
        self.state.borrow().children_created.keys().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn read_level(&self) -> ReadLevel {
        self.state.borrow().read
    }
}

fn affect(state: &mut NodeState, queue: &mut RerenderQueue) {
    if let Some(rerender) = &state.rerender {
        queue.push(rerender);
    }
    state.view_cache = None;
}

/// Drop cached children the write invalidated. Without actions the value was
/// replaced and every child goes.
fn prune(state: &mut NodeState, actions: Option<&IndexMap<Segment, Action>>) {
    let Some(actions) = actions else {
        state.children_created.clear();
        return;
    };
    for key in actions.keys() {
        state.children_created.shift_remove(key);
    }
    // Deleting from an array renumbers every later element.
    let first_deleted = actions
        .iter()
        .filter(|(_, action)| **action == Action::Delete)
        .filter_map(|(key, _)| match key {
            Segment::Index(index) => Some(*index),
            Segment::Key(_) => None,
        })
        .min();
    if let Some(first) = first_deleted {
        state
            .children_created
            .retain(|key, _| !matches!(key, Segment::Index(index) if *index >= first));
    }
}

impl Subscriber for TrackingNode {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn on_write(&self, change: &Change, queue: &mut RerenderQueue) -> bool {
        let affected = self.propagate(change, queue);
        if affected {
            return true;
        }

        let subscribers: Vec<Rc<dyn Subscriber>> =
            self.state.borrow().subscribers.values().cloned().collect();
        let mut scoped_affected = false;
        for subscriber in &subscribers {
            scoped_affected |= subscriber.on_write(change, queue);
        }
        if scoped_affected {
            self.state.borrow_mut().view_cache = None;
        }
        false
    }
}

impl fmt::Debug for TrackingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TrackingNode")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("read", &state.read)
            .field("downgraded", &state.downgraded)
            .field("mounted", &state.rerender.is_some())
            .field("children_read", &state.children_read.len())
            .finish()
    }
}
