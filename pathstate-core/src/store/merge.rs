//! Merge planning.
//!
//! A merge is turned into one write: the new container value plus the
//! per-key actions that describe it. Planning is pure; the caller commits
//! the plan through the store.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::StateError;
use crate::path::{Path, Segment};
use crate::tracking::Action;

use super::value::{Partial, SetValue};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MergePlan {
    /// Replace the value wholesale.
    Replace(Value),
    /// Rewrite the container; only the listed keys changed.
    Keyed {
        value: Value,
        actions: IndexMap<Segment, Action>,
    },
    /// The merge changes nothing.
    Nothing,
}

pub(crate) fn plan_merge(
    path: &Path,
    current: Option<&Value>,
    partial: Partial,
) -> Result<MergePlan, StateError> {
    match (current, partial) {
        (Some(Value::Array(items)), Partial::Items(extra)) => {
            if extra.is_empty() {
                return Ok(MergePlan::Nothing);
            }
            let start = items.len();
            let actions = (start..start + extra.len())
                .map(|index| (Segment::Index(index), Action::Insert))
                .collect();
            let mut value = items.clone();
            value.extend(extra);
            Ok(MergePlan::Keyed {
                value: Value::Array(value),
                actions,
            })
        }
        (Some(Value::Array(items)), Partial::Entries(entries)) => {
            merge_array_entries(path, items, entries)
        }
        (Some(Value::Object(map)), Partial::Entries(entries)) => {
            merge_object_entries(path, map, entries)
        }
        (Some(Value::Object(map)), Partial::Items(items)) => {
            let entries = items
                .into_iter()
                .enumerate()
                .map(|(index, item)| (Segment::Key(index.to_string()), SetValue::Value(item)))
                .collect();
            merge_object_entries(path, map, entries)
        }
        (Some(Value::String(text)), Partial::Text(extra)) => {
            Ok(MergePlan::Replace(Value::String(format!("{text}{extra}"))))
        }
        // Numbers, booleans and null append their JSON text.
        (Some(Value::String(text)), Partial::Value(extra)) => {
            Ok(MergePlan::Replace(Value::String(format!("{text}{extra}"))))
        }
        (_, partial) => Ok(MergePlan::Replace(replacement(path, partial)?)),
    }
}

fn merge_array_entries(
    path: &Path,
    items: &[Value],
    entries: Vec<(Segment, SetValue)>,
) -> Result<MergePlan, StateError> {
    let mut indexed = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let index = key.as_index().ok_or_else(|| StateError::InvalidPath {
            path: path.child(key.clone()),
        })?;
        indexed.push((index, value));
    }
    indexed.sort_by_key(|(index, _)| *index);

    let original_len = items.len();
    let mut value = items.to_vec();
    let mut actions = IndexMap::new();
    let mut deleted = Vec::new();

    for (index, entry) in indexed {
        match entry {
            SetValue::None => {
                if index < original_len {
                    deleted.push(index);
                }
            }
            SetValue::Value(item) => {
                if index < value.len() {
                    value[index] = item;
                } else {
                    value.resize(index, Value::Null);
                    value.push(item);
                }
                let action = if index < original_len {
                    Action::Update
                } else {
                    Action::Insert
                };
                actions.insert(Segment::Index(index), action);
            }
            other => return Err(reject_entry(path.child(index), other)),
        }
    }

    // Splice from the highest index down so the lower positions still name
    // the elements they named before the merge.
    deleted.dedup();
    for index in deleted.into_iter().rev() {
        value.remove(index);
        actions.insert(Segment::Index(index), Action::Delete);
    }

    if actions.is_empty() {
        return Ok(MergePlan::Nothing);
    }
    Ok(MergePlan::Keyed {
        value: Value::Array(value),
        actions,
    })
}

fn merge_object_entries(
    path: &Path,
    map: &Map<String, Value>,
    entries: Vec<(Segment, SetValue)>,
) -> Result<MergePlan, StateError> {
    let mut value = map.clone();
    let mut actions = IndexMap::new();

    for (key, entry) in entries {
        let name = key.to_string();
        match entry {
            SetValue::None => {
                if value.contains_key(&name) {
                    value.retain(|existing, _| *existing != name);
                    actions.insert(Segment::Key(name), Action::Delete);
                }
            }
            SetValue::Value(item) => {
                let action = if value.contains_key(&name) {
                    Action::Update
                } else {
                    Action::Insert
                };
                value.insert(name.clone(), item);
                actions.insert(Segment::Key(name), action);
            }
            other => return Err(reject_entry(path.child(name), other)),
        }
    }

    if actions.is_empty() {
        return Ok(MergePlan::Nothing);
    }
    Ok(MergePlan::Keyed {
        value: Value::Object(value),
        actions,
    })
}

/// Value used when a merge cannot be applied key by key.
fn replacement(path: &Path, partial: Partial) -> Result<Value, StateError> {
    match partial {
        Partial::Items(items) => Ok(Value::Array(items)),
        Partial::Text(text) => Ok(Value::String(text)),
        Partial::Value(value) => Ok(value),
        Partial::Entries(entries) => {
            let mut map = Map::new();
            for (key, entry) in entries {
                match entry {
                    SetValue::Value(item) => {
                        map.insert(key.to_string(), item);
                    }
                    SetValue::None => {}
                    other => return Err(reject_entry(path.child(key), other)),
                }
            }
            Ok(Value::Object(map))
        }
    }
}

fn reject_entry(path: Path, entry: SetValue) -> StateError {
    match entry {
        SetValue::Handle(source_path) => StateError::SetFromHandle { path, source_path },
        _ => StateError::NestedFuture { path },
    }
}
