//! Pathstate Core
//!
//! A path-tracked state container for component-based UIs. One store holds
//! a root value; consumers read nested paths through handles, and a write
//! asks exactly the consumers that read an affected path to render again.
//!
//! It implements:
//!
//! - A store with an edition counter, partial merges and pending root
//!   futures
//! - Per-path tracking nodes deciding which consumers a write affects
//! - Read-only views that track element reads individually
//! - Consumer bindings (global and scoped) and a plugin contract
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `path`: locations inside the value tree
//! - `store`: the root value, the write algorithm and plugins
//! - `tracking`: tracking nodes, change descriptions and re-render batching
//! - `access`: state handles and views
//! - `binding`: mounting a consumer on a store
//! - `deps`: dependency-list interception for memoized callbacks
//!
//! Everything is single-threaded. The only asynchronous input is a root
//! future, settled through the [`Spawner`] in the store's [`Config`].
//!
//! # Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use pathstate_core::{Binding, State};
//! use serde_json::json;
//!
//! let state = State::create(json!({"user": {"name": "Ada"}, "theme": "dark"})).unwrap();
//!
//! // Mount a consumer that reads only the user's name.
//! let renders = Rc::new(Cell::new(0));
//! let counter = renders.clone();
//! let consumer = Binding::attach(&state, move || counter.set(counter.get() + 1));
//! let view = consumer.render();
//! assert_eq!(view.nested("user").nested("name").value().unwrap(), json!("Ada"));
//!
//! // Writing the theme leaves it alone; writing the name does not.
//! state.nested("theme").set(json!("light")).unwrap();
//! assert_eq!(renders.get(), 0);
//! state.nested("user").nested("name").set(json!("Grace")).unwrap();
//! assert_eq!(renders.get(), 1);
//! ```

pub mod access;
pub mod binding;
pub mod config;
pub mod deps;
pub mod error;
pub mod path;
pub mod store;
pub mod tracking;

pub use access::{ArrayView, ObjectView, State, View};
pub use binding::Binding;
pub use config::{Config, LocalQueue, Spawner, TokioSpawner};
pub use deps::{intercept_dependencies, Dependency, DependencyMode, DEPENDENCY_MODE_ENV};
pub use error::{Rejection, StateError};
pub use path::{Path, Segment};
pub use store::{
    DestroyInfo, Partial, Plugin, PluginId, PluginInstance, RootFuture, SetValue, TraceWrites,
    WriteInfo, WriteTracer,
};
pub use tracking::{Action, Change, Rerender, RerenderQueue, Subscriber, SubscriberId};
