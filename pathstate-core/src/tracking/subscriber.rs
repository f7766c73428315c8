//! Subscriber types for change notification.
//!
//! A subscriber is anything that wants to hear about committed writes: the
//! root tracking node of every mounted consumer, and scoped nodes attached to
//! a parent node. Subscribers decide whether a [`Change`] affects them and
//! queue the owning consumer's re-render callback when it does.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::path::{Path, Segment};

/// Unique identifier for a subscriber.
///
/// Each tracking node and each re-render callback gets a unique ID when
/// created. Subscriptions and the re-render queue are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one key of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Insert,
    Update,
    Delete,
}

/// Description of one committed write.
///
/// `actions` is present when the write is known to have touched only the
/// listed keys of the container at `path`. Without it the value at `path`
/// was replaced wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: Path,
    pub actions: Option<IndexMap<Segment, Action>>,
}

impl Change {
    /// A wholesale replacement of the value at `path`.
    pub fn replaced(path: Path) -> Self {
        Self {
            path,
            actions: None,
        }
    }

    /// A single-key insert or delete inside the container at `path`.
    pub fn keyed(path: Path, key: Segment, action: Action) -> Self {
        let mut actions = IndexMap::with_capacity(1);
        actions.insert(key, action);
        Self {
            path,
            actions: Some(actions),
        }
    }

    /// Split a change made only of updates into one change per key.
    ///
    /// Any insert or delete keeps the change whole: the container's shape
    /// changed and every reader of the container has to hear about it.
    pub fn split_updates(&self) -> Vec<Change> {
        match &self.actions {
            Some(actions)
                if !actions.is_empty()
                    && actions.values().all(|action| *action == Action::Update) =>
            {
                actions
                    .keys()
                    .map(|key| Change::replaced(self.path.child(key.clone())))
                    .collect()
            }
            _ => vec![self.clone()],
        }
    }
}

/// Something that listens to committed writes.
pub trait Subscriber {
    /// Stable identity used for subscribe/unsubscribe.
    fn subscriber_id(&self) -> SubscriberId;

    /// React to a write. Returns true when this subscriber, or something
    /// below it, was affected. Re-render callbacks go into `queue` and are
    /// invoked only after every subscriber has seen the change.
    fn on_write(&self, change: &Change, queue: &mut RerenderQueue) -> bool;
}

/// The callback that asks a consumer to render again.
///
/// Once the consumer unmounts the callback turns inert: it may still sit in
/// a queue, but invoking it does nothing.
pub struct Rerender {
    id: SubscriberId,
    inert: Cell<bool>,
    callback: Box<dyn Fn()>,
}

impl Rerender {
    pub fn new<F>(callback: F) -> Rc<Self>
    where
        F: Fn() + 'static,
    {
        Rc::new(Self {
            id: SubscriberId::new(),
            inert: Cell::new(false),
            callback: Box::new(callback),
        })
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn mark_inert(&self) {
        self.inert.set(true);
    }

    pub fn is_inert(&self) -> bool {
        self.inert.get()
    }

    /// Run the callback unless the consumer is gone.
    pub fn invoke(&self) {
        if !self.inert.get() {
            (self.callback)();
        }
    }
}

impl fmt::Debug for Rerender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rerender")
            .field("id", &self.id)
            .field("inert", &self.inert.get())
            .finish()
    }
}

/// Re-render callbacks collected during one notification pass.
///
/// Each callback is kept once no matter how many nodes queue it.
#[derive(Debug, Default)]
pub struct RerenderQueue {
    pending: IndexMap<SubscriberId, Rc<Rerender>>,
}

impl RerenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rerender: &Rc<Rerender>) {
        self.pending
            .entry(rerender.id())
            .or_insert_with(|| Rc::clone(rerender));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Invoke every queued callback once, in queue order.
    pub fn flush(self) {
        for rerender in self.pending.into_values() {
            rerender.invoke();
        }
    }
}
