//! Usage tracking and change notification.
//!
//! This module decides *whether* a consumer renders again after a write.
//! It has two parts:
//!
//! - `subscriber`: the change description handed out by the store, the
//!   subscriber contract, and the queue that batches re-render callbacks.
//! - `node`: per-path tracking nodes recording what a consumer read.
//!
//! # How It Works
//!
//! 1. A consumer renders and reads through its state handles; each access
//!    creates or reuses a tracking node and records the read.
//! 2. A write produces a [`Change`]. The store hands it to every subscribed
//!    root node, which walks it down the tree of nodes that were read.
//! 3. Nodes whose reads overlap the change queue their consumer's
//!    [`Rerender`] callback.
//! 4. Once every subscriber has seen the change, each queued callback runs
//!    exactly once.

mod node;
mod subscriber;

pub(crate) use node::{ReadLevel, TrackingNode, ViewStamp};
pub use subscriber::{Action, Change, Rerender, RerenderQueue, Subscriber, SubscriberId};
