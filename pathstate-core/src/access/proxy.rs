//! Read-only views over containers.
//!
//! A view stands in for an object or array value. Element reads go through
//! child handles and are tracked one by one; length, keys and membership
//! are answered from the live value, never from a copy taken when the view
//! was built. Views cannot be written to: every mutating method fails with
//! [`StateError::DirectMutation`].

use std::rc::Rc;

use serde_json::Value;

use crate::error::StateError;
use crate::path::{Path, Segment};
use crate::tracking::ViewStamp;

use super::State;

/// What a handle's value looks like.
#[derive(Debug, Clone)]
pub enum View {
    Object(ObjectView),
    Array(ArrayView),
    /// Primitives are handed out as plain values.
    Leaf(Value),
}

impl View {
    pub(crate) fn build(state: &State) -> Result<Option<View>, StateError> {
        let Some(value) = state.node().read(crate::tracking::ReadLevel::Shallow)? else {
            return Ok(None);
        };
        let stamp = state.node().view_stamp();
        Ok(Some(match value {
            Value::Object(_) => View::Object(ObjectView {
                state: state.clone(),
                stamp,
            }),
            Value::Array(_) => View::Array(ArrayView {
                state: state.clone(),
                stamp,
            }),
            leaf => View::Leaf(leaf),
        }))
    }

    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            View::Leaf(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectView> {
        match self {
            View::Object(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayView> {
        match self {
            View::Array(view) => Some(view),
            _ => None,
        }
    }
}

/// View over an object value.
#[derive(Debug, Clone)]
pub struct ObjectView {
    state: State,
    stamp: Rc<ViewStamp>,
}

impl ObjectView {
    pub fn path(&self) -> &Path {
        self.state.path()
    }

    /// Edition of the store when this view was built.
    pub fn edition(&self) -> i64 {
        self.stamp.edition
    }

    /// True when both views were built from the same, unchanged value.
    pub fn same_as(&self, other: &ObjectView) -> bool {
        Rc::ptr_eq(&self.stamp, &other.stamp)
    }

    pub fn keys(&self) -> Result<Vec<String>, StateError> {
        Ok(live_keys(&self.state)?
            .into_iter()
            .map(|key| key.to_string())
            .collect())
    }

    pub fn len(&self) -> Result<usize, StateError> {
        Ok(live_keys(&self.state)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StateError> {
        Ok(self.len()? == 0)
    }

    pub fn contains_key(&self, key: &str) -> Result<bool, StateError> {
        Ok(live_keys(&self.state)?
            .iter()
            .any(|existing| matches!(existing, Segment::Key(name) if name == key)))
    }

    /// View of one property; `None` when the key is absent.
    pub fn get(&self, key: &str) -> Result<Option<View>, StateError> {
        self.nested(key).view()
    }

    pub fn nested(&self, key: &str) -> State {
        self.state.nested(key)
    }

    /// Copy of the whole object. Counts as reading all of it.
    pub fn to_value(&self) -> Result<Value, StateError> {
        self.state.value()
    }

    pub fn insert(&self, _key: &str, _value: Value) -> Result<(), StateError> {
        Err(direct_mutation(&self.state))
    }

    pub fn remove(&self, _key: &str) -> Result<(), StateError> {
        Err(direct_mutation(&self.state))
    }
}

/// View over an array value.
#[derive(Debug, Clone)]
pub struct ArrayView {
    state: State,
    stamp: Rc<ViewStamp>,
}

impl ArrayView {
    pub fn path(&self) -> &Path {
        self.state.path()
    }

    /// Edition of the store when this view was built.
    pub fn edition(&self) -> i64 {
        self.stamp.edition
    }

    pub fn same_as(&self, other: &ArrayView) -> bool {
        Rc::ptr_eq(&self.stamp, &other.stamp)
    }

    pub fn len(&self) -> Result<usize, StateError> {
        Ok(live_keys(&self.state)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StateError> {
        Ok(self.len()? == 0)
    }

    /// View of one element; `None` past the end.
    pub fn get(&self, index: usize) -> Result<Option<View>, StateError> {
        self.nested(index).view()
    }

    pub fn nested(&self, index: usize) -> State {
        self.state.nested(index)
    }

    /// Handles for every element, in order.
    pub fn items(&self) -> Result<Vec<State>, StateError> {
        Ok((0..self.len()?).map(|index| self.nested(index)).collect())
    }

    /// Property lookup by name: `length` or a decimal index. Any other name
    /// fails with [`StateError::UnsupportedMethodProperty`].
    pub fn property(&self, name: &str) -> Result<Option<View>, StateError> {
        if name == "length" {
            return Ok(Some(View::Leaf(Value::from(self.len()?))));
        }
        match name.parse::<usize>() {
            Ok(index) => self.get(index),
            Err(_) => Err(StateError::UnsupportedMethodProperty {
                path: self.path().clone(),
                property: name.to_owned(),
            }),
        }
    }

    /// Copy of the whole array. Counts as reading all of it.
    pub fn to_value(&self) -> Result<Value, StateError> {
        self.state.value()
    }

    pub fn push(&self, _value: Value) -> Result<(), StateError> {
        Err(direct_mutation(&self.state))
    }

    pub fn set(&self, _index: usize, _value: Value) -> Result<(), StateError> {
        Err(direct_mutation(&self.state))
    }

    pub fn remove(&self, _index: usize) -> Result<(), StateError> {
        Err(direct_mutation(&self.state))
    }
}

fn live_keys(state: &State) -> Result<Vec<Segment>, StateError> {
    Ok(state.keys()?.unwrap_or_default())
}

fn direct_mutation(state: &State) -> StateError {
    StateError::DirectMutation {
        path: state.path().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_view_reads_live_structure() {
        let state = State::create(json!({"a": 1, "b": {"c": true}})).unwrap();
        let view = state.view().unwrap().unwrap();
        let object = view.as_object().unwrap();

        assert_eq!(object.keys().unwrap(), vec!["a", "b"]);
        state.nested("d").set(json!(null)).unwrap();
        assert_eq!(object.len().unwrap(), 3);
        assert!(object.contains_key("d").unwrap());

        let nested = object.get("b").unwrap().unwrap();
        assert_eq!(
            nested.as_object().unwrap().get("c").unwrap().unwrap().as_leaf(),
            Some(&json!(true))
        );
        assert!(object.get("zz").unwrap().is_none());
    }

    #[test]
    fn array_view_properties() {
        let state = State::create(json!([10, 20])).unwrap();
        let view = state.view().unwrap().unwrap();
        let array = view.as_array().unwrap();

        assert_eq!(
            array.property("length").unwrap().unwrap().as_leaf(),
            Some(&json!(2))
        );
        assert_eq!(array.property("1").unwrap().unwrap().as_leaf(), Some(&json!(20)));
        let err = array.property("map").unwrap_err();
        assert!(matches!(err, StateError::UnsupportedMethodProperty { .. }));
        assert_eq!(
            err.to_string(),
            "property 'map' at / is not an element or length; use the view's methods"
        );
        assert_eq!(array.items().unwrap().len(), 2);
    }

    #[test]
    fn views_reject_mutation() {
        let state = State::create(json!({"list": [1]})).unwrap();
        let view = state.view().unwrap().unwrap();
        let object = view.as_object().unwrap();
        assert_eq!(
            object.insert("x", json!(1)),
            Err(StateError::DirectMutation { path: Path::root() })
        );

        let list = object.get("list").unwrap().unwrap();
        let array = list.as_array().unwrap();
        assert!(matches!(array.push(json!(2)), Err(StateError::DirectMutation { .. })));
        assert!(matches!(array.remove(0), Err(StateError::DirectMutation { .. })));
        assert_eq!(state.edition(), 1);
    }

    #[test]
    fn leaves_are_plain_values() {
        let state = State::create(json!({"n": 3})).unwrap();
        let view = state.nested("n").view().unwrap().unwrap();
        assert_eq!(view.as_leaf(), Some(&json!(3)));
        assert!(view.as_object().is_none());
    }
}
