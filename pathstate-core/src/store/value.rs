//! Write inputs and value-tree navigation.

use std::fmt;
use std::future::Future;

use futures_util::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;

use crate::error::Rejection;
use crate::path::{Path, Segment};

/// Future that produces the root value.
pub type RootFuture = LocalBoxFuture<'static, Result<Value, Rejection>>;

/// Input to a write.
pub enum SetValue {
    /// A plain value.
    Value(Value),
    /// Delete the key; at the root, leave the value absent until the next
    /// explicit write.
    None,
    /// Root value that arrives later.
    Future(RootFuture),
    /// A state handle passed where its value was expected. Always rejected.
    Handle(Path),
}

impl SetValue {
    /// Wrap any local future as a root value.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, Rejection>> + 'static,
    {
        SetValue::Future(future.boxed_local())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, SetValue::None)
    }
}

impl From<Value> for SetValue {
    fn from(value: Value) -> Self {
        SetValue::Value(value)
    }
}

impl From<Option<Value>> for SetValue {
    fn from(value: Option<Value>) -> Self {
        match value {
            Some(value) => SetValue::Value(value),
            None => SetValue::None,
        }
    }
}

impl fmt::Debug for SetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
            SetValue::None => f.write_str("None"),
            SetValue::Future(_) => f.write_str("Future(..)"),
            SetValue::Handle(path) => f.debug_tuple("Handle").field(path).finish(),
        }
    }
}

/// Input to a merge.
#[derive(Debug)]
pub enum Partial {
    /// Elements appended to an array.
    Items(Vec<Value>),
    /// Per-key inserts, updates and deletes.
    Entries(Vec<(Segment, SetValue)>),
    /// Text appended to a string.
    Text(String),
    /// Anything else replaces the value.
    Value(Value),
}

impl Partial {
    /// Start an empty keyed partial.
    pub fn entries() -> Self {
        Partial::Entries(Vec::new())
    }

    /// Add an insert or update to a keyed partial.
    pub fn with(self, key: impl Into<Segment>, value: Value) -> Self {
        self.with_entry(key.into(), SetValue::Value(value))
    }

    /// Add a delete to a keyed partial.
    pub fn without(self, key: impl Into<Segment>) -> Self {
        self.with_entry(key.into(), SetValue::None)
    }

    fn with_entry(self, key: Segment, value: SetValue) -> Self {
        let mut entries = match self {
            Partial::Entries(entries) => entries,
            Partial::Items(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| (Segment::Index(index), SetValue::Value(item)))
                .collect(),
            Partial::Text(_) | Partial::Value(_) => Vec::new(),
        };
        entries.retain(|(existing, _)| *existing != key);
        entries.push((key, value));
        Partial::Entries(entries)
    }

    /// The plain-data form handed to plugins as the merged input.
    /// Deletes show up as `null`.
    pub fn to_value(&self) -> Value {
        match self {
            Partial::Items(items) => Value::Array(items.clone()),
            Partial::Entries(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| {
                        let value = match value {
                            SetValue::Value(value) => value.clone(),
                            _ => Value::Null,
                        };
                        (key.to_string(), value)
                    })
                    .collect(),
            ),
            Partial::Text(text) => Value::String(text.clone()),
            Partial::Value(value) => value.clone(),
        }
    }
}

impl From<Value> for Partial {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Partial::Items(items),
            Value::Object(map) => Partial::Entries(
                map.into_iter()
                    .map(|(key, value)| (Segment::Key(key), SetValue::Value(value)))
                    .collect(),
            ),
            Value::String(text) => Partial::Text(text),
            other => Partial::Value(other),
        }
    }
}

/// What a read found at a path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    /// The root itself is absent (pending).
    Absent,
    /// The root is present but the path leads nowhere.
    Missing,
    Present(Value),
}

pub(crate) fn child_value<'a>(container: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match container {
        Value::Array(items) => segment.as_index().and_then(|index| items.get(index)),
        Value::Object(map) => map.get(&segment.to_string()),
        _ => None,
    }
}

pub(crate) fn child_value_mut<'a>(
    container: &'a mut Value,
    segment: &Segment,
) -> Option<&'a mut Value> {
    match container {
        Value::Array(items) => segment.as_index().and_then(|index| items.get_mut(index)),
        Value::Object(map) => map.get_mut(&segment.to_string()),
        _ => None,
    }
}

pub(crate) fn lookup<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |value, segment| child_value(value, segment))
}

/// Keys of a container in iteration order.
pub(crate) fn container_keys(value: &Value) -> Option<Vec<Segment>> {
    match value {
        Value::Array(items) => Some((0..items.len()).map(Segment::Index).collect()),
        Value::Object(map) => Some(map.keys().cloned().map(Segment::Key).collect()),
        _ => None,
    }
}

pub(crate) fn is_container(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}
