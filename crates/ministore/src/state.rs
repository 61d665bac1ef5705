#![forbid(unsafe_code)]

//! The state snapshot: an immutable record of data fields.

use im::OrdMap;

use crate::error::MutationError;
use crate::value::{Path, Value};

/// Immutable snapshot of a store's data fields.
///
/// Cloning is O(1) and yields a handle that is [`ptr_eq`](State::ptr_eq) to
/// the original. A partial update is also a `State` holding only the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct State(OrdMap<String, Value>);

impl State {
    #[must_use]
    pub fn new() -> Self {
        Self(OrdMap::new())
    }

    #[must_use]
    pub fn from_map(map: OrdMap<String, Value>) -> Self {
        Self(map)
    }

    #[must_use]
    pub fn as_map(&self) -> &OrdMap<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_map(self) -> OrdMap<String, Value> {
        self.0
    }

    /// Builder-style field insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a nested value, e.g. `"parent.child.count"`.
    #[must_use]
    pub fn get_path(&self, path: impl Into<Path>) -> Option<&Value> {
        let path = path.into();
        let (first, rest) = path.segments().split_first()?;
        rest.iter()
            .try_fold(self.0.get(first.as_str())?, |node, segment| node.child(segment))
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shallow merge: every top-level key of `partial` replaces the key in
    /// `self`; all other fields keep their exact value.
    ///
    /// An empty partial returns a handle identical to `self`.
    #[must_use]
    pub fn merge(&self, partial: &State) -> State {
        if partial.is_empty() {
            return self.clone();
        }
        let mut next = self.0.clone();
        for (key, value) in partial.iter() {
            next.insert(key.clone(), value.clone());
        }
        Self(next)
    }

    /// Snapshot identity: true when both handles share the same root.
    #[must_use]
    pub fn ptr_eq(&self, other: &State) -> bool {
        self.0.ptr_eq(&other.0)
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for State {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl TryFrom<serde_json::Value> for State {
    type Error = MutationError;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        match Value::from(json) {
            Value::Map(map) => Ok(Self(map)),
            other => Err(MutationError::TypeMismatch {
                path: String::new(),
                expected: "map",
                found: other.kind(),
            }),
        }
    }
}

impl From<State> for Value {
    fn from(state: State) -> Self {
        Value::Map(state.0)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for State {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for State {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = <serde_json::Value as serde::Deserialize>::deserialize(deserializer)?;
        Self::try_from(json).map_err(serde::de::Error::custom)
    }
}
