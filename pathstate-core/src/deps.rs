//! Dependency-list interception.
//!
//! Memoized callbacks in a UI framework are keyed by a list of
//! dependencies. When a state handle ends up in such a list, the callback
//! may read through the handle long after the render that produced it, and
//! reads recorded by that render are already gone. The integration layer
//! calls [`intercept_dependencies`] with the list before handing it to the
//! framework.

use std::str::FromStr;

use serde_json::Value;

use crate::access::State;
use crate::error::StateError;

/// Environment variable selecting the [`DependencyMode`] default.
pub const DEPENDENCY_MODE_ENV: &str = "PATHSTATE_DEPENDENCIES";

/// What to do with a state handle found in a dependency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyMode {
    /// Bring back the handle's previous reads so the memoized callback
    /// keeps being tracked.
    #[default]
    Reconnect,
    /// Fail with [`StateError::StateInDependencyList`].
    Reject,
}

impl DependencyMode {
    /// Mode named by `PATHSTATE_DEPENDENCIES`; unset or unknown values give
    /// [`DependencyMode::Reconnect`].
    pub fn from_env() -> Self {
        std::env::var(DEPENDENCY_MODE_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for DependencyMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reconnect" | "default" => Ok(DependencyMode::Reconnect),
            "reject" | "strict" => Ok(DependencyMode::Reject),
            other => Err(format!("unknown dependency mode '{other}'")),
        }
    }
}

/// One entry of a dependency list.
#[derive(Debug, Clone)]
pub enum Dependency {
    State(State),
    Value(Value),
}

impl From<&State> for Dependency {
    fn from(state: &State) -> Self {
        Dependency::State(state.clone())
    }
}

impl From<Value> for Dependency {
    fn from(value: Value) -> Self {
        Dependency::Value(value)
    }
}

/// Process the state handles in a dependency list according to each
/// store's [`DependencyMode`].
pub fn intercept_dependencies(dependencies: &[Dependency]) -> Result<(), StateError> {
    for dependency in dependencies {
        let Dependency::State(state) = dependency else {
            continue;
        };
        match state.store().config().dependency_mode() {
            DependencyMode::Reconnect => {
                tracing::trace!(path = %state.path(), "dependency reconnected");
                state.reconnect();
            }
            DependencyMode::Reject => {
                return Err(StateError::StateInDependencyList {
                    path: state.path().clone(),
                });
            }
        }
    }
    Ok(())
}
