//! Consumer binding.
//!
//! A [`Binding`] is the glue between a UI consumer and a store. It owns the
//! consumer's root tracking node and its re-render callback, subscribes the
//! node when created and unsubscribes it when dropped.
//!
//! Two modes exist:
//!
//! - **Global**: the node is subscribed to the store. Used for handles that
//!   are not owned by a mounted consumer.
//! - **Scoped**: the node is subscribed to the tracking node of a handle a
//!   mounted parent consumer passed down. It hears about writes its parent
//!   was not affected by, so a child can render on its own.
//!
//! # Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use pathstate_core::Binding;
//! use serde_json::json;
//!
//! let renders = Rc::new(Cell::new(0));
//! let counter = renders.clone();
//! let binding = Binding::local(json!({"count": 0, "label": "clicks"}), move || {
//!     counter.set(counter.get() + 1)
//! })
//! .unwrap();
//!
//! let state = binding.render();
//! let count = state.nested("count");
//! assert_eq!(count.value().unwrap(), json!(0));
//!
//! state.nested("label").set(json!("taps")).unwrap();
//! assert_eq!(renders.get(), 0);
//!
//! count.set(json!(1)).unwrap();
//! assert_eq!(renders.get(), 1);
//! ```

use std::fmt;
use std::rc::Rc;

use crate::access::State;
use crate::config::Config;
use crate::error::StateError;
use crate::store::{SetValue, Store};
use crate::tracking::{Rerender, TrackingNode};

enum Attachment {
    Store,
    Parent(Rc<TrackingNode>),
}

/// One mounted consumer of a store.
pub struct Binding {
    node: Rc<TrackingNode>,
    rerender: Rc<Rerender>,
    attachment: Attachment,
    owns_store: bool,
}

impl Binding {
    /// Bind to an existing handle: scoped when a mounted consumer owns it,
    /// global otherwise.
    pub fn attach<F>(source: &State, on_rerender: F) -> Binding
    where
        F: Fn() + 'static,
    {
        if source.node().is_mounted() {
            Self::scoped(source, on_rerender)
        } else {
            Self::global(source, on_rerender)
        }
    }

    /// Bind directly to the store behind `source`.
    pub fn global<F>(source: &State, on_rerender: F) -> Binding
    where
        F: Fn() + 'static,
    {
        let rerender = Rerender::new(on_rerender);
        let node = mounted_node(source.store(), source, &rerender);
        source.store().subscribe(node.clone());
        tracing::trace!(path = %source.path(), "global binding mounted");

        Binding {
            node,
            rerender,
            attachment: Attachment::Store,
            owns_store: false,
        }
    }

    /// Bind below the consumer that owns `parent`.
    pub fn scoped<F>(parent: &State, on_rerender: F) -> Binding
    where
        F: Fn() + 'static,
    {
        let rerender = Rerender::new(on_rerender);
        let node = mounted_node(parent.store(), parent, &rerender);
        parent.node().subscribe(node.clone());
        tracing::trace!(path = %parent.path(), "scoped binding mounted");

        Binding {
            node,
            rerender,
            attachment: Attachment::Parent(Rc::clone(parent.node())),
            owns_store: false,
        }
    }

    /// Create a store owned by this consumer. It is destroyed on unmount.
    pub fn local<F>(initial: impl Into<SetValue>, on_rerender: F) -> Result<Binding, StateError>
    where
        F: Fn() + 'static,
    {
        Self::local_with_config(initial, Config::default(), on_rerender)
    }

    pub fn local_with_config<F>(
        initial: impl Into<SetValue>,
        config: Config,
        on_rerender: F,
    ) -> Result<Binding, StateError>
    where
        F: Fn() + 'static,
    {
        let state = State::with_config(initial, config)?;
        let mut binding = Self::global(&state, on_rerender);
        binding.owns_store = true;
        Ok(binding)
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self.attachment, Attachment::Parent(_))
    }

    /// One render pass: forget what the previous pass read and hand out the
    /// handle to read through.
    pub fn render(&self) -> State {
        self.node.reconstruct();
        State::from_node(Rc::clone(&self.node))
    }

    /// Render a scoped binding whose parent handle may have been replaced
    /// since the last pass.
    pub fn render_scoped(&mut self, parent: &State) -> State {
        let moved = match &self.attachment {
            Attachment::Parent(current) => !Rc::ptr_eq(current, parent.node()),
            Attachment::Store => false,
        };
        if moved {
            self.detach();
            if parent.path() != self.node.path()
                || !Rc::ptr_eq(parent.store(), self.node.store())
            {
                self.node = mounted_node(parent.store(), parent, &self.rerender);
            }
            parent.node().subscribe(self.node.clone());
            self.attachment = Attachment::Parent(Rc::clone(parent.node()));
            tracing::trace!(path = %parent.path(), "scoped binding moved to a new parent");
        }
        self.render()
    }

    /// Unmount explicitly. Dropping the binding does the same.
    pub fn unmount(self) {}

    fn detach(&self) {
        match &self.attachment {
            Attachment::Store => {
                self.node.store().unsubscribe(self.node.id());
            }
            Attachment::Parent(parent) => parent.unsubscribe(self.node.id()),
        }
    }
}

fn mounted_node(store: &Rc<Store>, source: &State, rerender: &Rc<Rerender>) -> Rc<TrackingNode> {
    TrackingNode::new(
        Rc::clone(store),
        source.path().clone(),
        Some(Rc::clone(rerender)),
        false,
    )
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.detach();
        self.node.release();
        self.rerender.mark_inert();
        if self.owns_store {
            self.node.store().destroy();
        }
        tracing::trace!(path = %self.node.path(), "binding unmounted");
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("node", &self.node)
            .field("scoped", &self.is_scoped())
            .field("owns_store", &self.owns_store)
            .finish()
    }
}
