//! Error types.
//!
//! Every variant except [`StateError::Rejected`] is a usage violation by the
//! calling code. Rejections come from the root future and are surfaced
//! through reads.

use thiserror::Error;

use crate::path::Path;
use crate::store::PluginId;

/// Reason a root future failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Rejection {
    message: String,
}

impl Rejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised by state operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    /// A write reached a store that was already destroyed.
    #[error("cannot set state at {path}: the store has been destroyed")]
    DestroyedStore {
        /// Target of the rejected write
        path: Path,
    },

    /// A value was written while the root still waits on its future.
    #[error("cannot set state at {path}: the root value is still pending")]
    SetWhilePending {
        /// Target of the rejected write
        path: Path,
    },

    /// Futures are only accepted for the root value.
    #[error("cannot set a future at {path}: only the root value may be pending")]
    NestedFuture {
        /// Target of the rejected write
        path: Path,
    },

    /// The value was read before the root future settled.
    #[error("cannot read state at {path}: the root value is still pending")]
    ReadWhilePending {
        /// Location that was read
        path: Path,
    },

    /// The root future failed and the value was read anyway.
    #[error("root value was rejected: {0}")]
    Rejected(Rejection),

    /// A proxy was asked to mutate its value in place.
    #[error("cannot mutate state at {path} directly: use set or merge")]
    DirectMutation {
        /// Location of the proxy
        path: Path,
    },

    /// An array view was asked for a property that is neither `length` nor
    /// an index. `serde_json` values hold no functions, so any other name
    /// would be a method; array methods are the view's own methods
    /// (`len`, `get`, `items`, ...).
    #[error("property '{property}' at {path} is not an element or length; use the view's methods")]
    UnsupportedMethodProperty {
        /// Location of the proxy
        path: Path,
        /// Requested property name
        property: String,
    },

    /// The plugin was never attached to this store.
    #[error("plugin {id} is not attached")]
    UnknownPlugin {
        /// Requested plugin
        id: PluginId,
    },

    /// A state handle showed up in a dependency list in strict mode.
    #[error("state at {path} was passed in a dependency list; pass its value instead")]
    StateInDependencyList {
        /// Location of the offending handle
        path: Path,
    },

    /// A store was created from another state handle.
    #[error("cannot create state from the state handle at {path}; pass its value instead")]
    InitializedFromHandle {
        /// Location of the offending handle
        path: Path,
    },

    /// A value was set from another state handle.
    #[error("cannot set state at {path} from the state handle at {source_path}; pass its value instead")]
    SetFromHandle {
        /// Target of the rejected write
        path: Path,
        /// Location of the offending handle
        source_path: Path,
    },

    /// The write target has no enclosing container.
    #[error("cannot set state at {path}: no container to hold it")]
    InvalidPath {
        /// Target of the rejected write
        path: Path,
    },

    /// Typed conversion through serde failed.
    #[error("cannot convert state at {path}: {message}")]
    Conversion {
        /// Location of the value
        path: Path,
        /// Serde error text
        message: String,
    },
}
