//! Paths into the state tree.
//!
//! A [`Path`] is an ordered list of [`Segment`]s leading from the root value
//! to a nested location. The empty path is the root.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

/// One step of a path: an array index or an object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    /// Position inside an array.
    Index(usize),
    /// Key inside an object.
    Key(String),
}

impl Segment {
    /// Interpret the segment as an array index.
    ///
    /// Keys made only of decimal digits are accepted, so `"2"` and `2`
    /// address the same array slot.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(index) => Some(*index),
            Segment::Key(key) => key.parse().ok(),
        }
    }

    /// Rewrite the segment into the form the given container uses.
    ///
    /// Objects are keyed by strings and arrays by positions; anything else
    /// leaves the segment untouched.
    pub fn normalized_for(&self, container: &Value) -> Segment {
        match (self, container) {
            (Segment::Index(index), Value::Object(_)) => Segment::Key(index.to_string()),
            (Segment::Key(_), Value::Array(_)) => match self.as_index() {
                Some(index) => Segment::Index(index),
                None => self.clone(),
            },
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(index) => write!(f, "{index}"),
            Segment::Key(key) => f.write_str(key),
        }
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_owned())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

/// Location of a value inside the state tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(SmallVec<[Segment; 4]>);

impl Path {
    /// The empty path.
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn get(&self, position: usize) -> Option<&Segment> {
        self.0.get(position)
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// Path of a direct child of this location.
    pub fn child(&self, segment: impl Into<Segment>) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Path(segments)
    }

    /// Path of the enclosing container, `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            return None;
        }
        Some(Path(self.0[..self.0.len() - 1].iter().cloned().collect()))
    }

    /// True when `self` is equal to `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Path(SmallVec::from_vec(segments))
    }
}
