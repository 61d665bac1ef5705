#![forbid(unsafe_code)]

//! Draft-based updates with structural sharing.
//!
//! # Design
//!
//! [`produce`] hands the mutator a [`Draft`]: an O(1) clone of the current
//! snapshot. Every write walks the persistent maps with `get_mut`, which
//! copies exactly the nodes on the written path. Nodes the mutator never
//! wrote are still the originals when the draft is finished, so the next
//! snapshot shares them by reference.
//!
//! Reads never copy. Each write first validates its path read-only, so a
//! rejected write leaves the draft untouched.
//!
//! # Invariants
//!
//! 1. Untouched subtrees of the result are [`Value::identical`] to the input.
//! 2. A draft with no effective writes produces a snapshot `ptr_eq` to the
//!    input.
//! 3. Writing a value equal to the one present is not a write.
//! 4. A failing mutator leaves no trace: the input is never modified and the
//!    error is returned as-is.

use im::OrdMap;

use crate::error::{MutationError, StoreError};
use crate::state::State;
use crate::store::Update;
use crate::value::{Path, Value};

/// Mutable view over a snapshot, alive for one update call.
#[derive(Debug)]
pub struct Draft {
    root: OrdMap<String, Value>,
    writes: usize,
}

/// Apply `mutate` to a draft of `current` and return the resulting snapshot.
///
/// On error the draft is dropped and `current` is left as it was.
pub fn produce<F>(current: &State, mutate: F) -> Result<State, MutationError>
where
    F: FnOnce(&mut Draft) -> Result<(), MutationError>,
{
    produce_with(current, mutate)
}

pub(crate) fn produce_with<F, E>(current: &State, mutate: F) -> Result<State, E>
where
    F: FnOnce(&mut Draft) -> Result<(), E>,
{
    let span = tracing::trace_span!("draft.produce", writes = tracing::field::Empty);
    let _guard = span.enter();

    let mut draft = Draft::new(current);
    mutate(&mut draft)?;
    span.record("writes", draft.writes);
    if draft.writes == 0 {
        return Ok(current.clone());
    }
    Ok(State::from_map(draft.root))
}

impl Draft {
    pub(crate) fn new(base: &State) -> Self {
        Self {
            root: base.as_map().clone(),
            writes: 0,
        }
    }

    /// Read a nested value as the draft currently sees it.
    #[must_use]
    pub fn get(&self, path: impl Into<Path>) -> Option<&Value> {
        lookup(&self.root, &path.into())
    }

    /// Snapshot of the draft so far. The draft stays usable.
    #[must_use]
    pub fn current(&self) -> State {
        State::from_map(self.root.clone())
    }

    /// Number of effective writes so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Write `value` at `path`.
    ///
    /// Map parents gain the key if it is absent. A list parent accepts an
    /// existing index or `len` (append).
    pub fn set(&mut self, path: impl Into<Path>, value: impl Into<Value>) -> Result<(), MutationError> {
        let path = path.into();
        let value = value.into();
        let (last, parents) = path.split_last().ok_or(MutationError::EmptyPath)?;

        if lookup(&self.root, &path) == Some(&value) {
            return Ok(());
        }
        if let Some(parent) = self.parent(parents, &path)? {
            check_slot(parent, last, &path, true)?;
        }

        if parents.is_empty() {
            self.root.insert(last.clone(), value);
        } else {
            let parent = node_mut(&mut self.root, parents, &path)?;
            write_child(parent, last, value, &path)?;
        }
        self.writes += 1;
        Ok(())
    }

    /// Read-modify-write of the value at `path`. The closure works on a copy;
    /// the result is written back only if it differs.
    pub fn update<F>(&mut self, path: impl Into<Path>, f: F) -> Result<(), MutationError>
    where
        F: FnOnce(&mut Value) -> Result<(), MutationError>,
    {
        let path = path.into();
        if path.is_empty() {
            return Err(MutationError::EmptyPath);
        }
        let mut value = lookup(&self.root, &path)
            .cloned()
            .ok_or_else(|| MutationError::missing(&path))?;
        f(&mut value)?;
        self.set(path, value)
    }

    /// Remove the value at `path`, returning it. Removing an absent map key
    /// is not a write.
    pub fn remove(&mut self, path: impl Into<Path>) -> Result<Option<Value>, MutationError> {
        let path = path.into();
        let (last, parents) = path.split_last().ok_or(MutationError::EmptyPath)?;

        if let Some(parent) = self.parent(parents, &path)? {
            check_slot(parent, last, &path, false)?;
        }
        if lookup(&self.root, &path).is_none() {
            return Ok(None);
        }

        let removed = if parents.is_empty() {
            self.root.remove(last.as_str())
        } else {
            match node_mut(&mut self.root, parents, &path)? {
                Value::Map(map) => map.remove(last.as_str()),
                Value::List(list) => Some(list.remove(parse_index(last, &path)?)),
                other => return Err(mismatch(&path, "map or list", other)),
            }
        };
        self.writes += 1;
        Ok(removed)
    }

    /// Append to the list at `path`.
    pub fn push(&mut self, path: impl Into<Path>, value: impl Into<Value>) -> Result<(), MutationError> {
        let path = path.into();
        match lookup(&self.root, &path) {
            Some(Value::List(_)) => {}
            Some(other) => return Err(mismatch(&path, "list", other)),
            None if path.is_empty() => return Err(MutationError::EmptyPath),
            None => return Err(MutationError::missing(&path)),
        }
        if let Value::List(list) = node_mut(&mut self.root, path.segments(), &path)? {
            list.push_back(value.into());
        }
        self.writes += 1;
        Ok(())
    }

    /// Shallow-merge a partial into the draft.
    pub fn merge(&mut self, partial: &State) {
        for (key, value) in partial.iter() {
            if self.root.get(key.as_str()) != Some(value) {
                self.root.insert(key.clone(), value.clone());
                self.writes += 1;
            }
        }
    }

    /// Swap the whole draft for `state`.
    pub fn replace(&mut self, state: State) {
        if !self.current().ptr_eq(&state) {
            self.root = state.into_map();
            self.writes += 1;
        }
    }

    /// Apply a store update to the draft instead of a live store.
    pub(crate) fn apply(&mut self, update: Update) -> Result<(), StoreError> {
        match update {
            Update::Merge(partial) => self.merge(&partial),
            Update::MergeWith(f) => {
                let partial = f(&self.current());
                self.merge(&partial);
            }
            Update::Replace(state) => self.replace(state),
            Update::ReplaceWith(f) => {
                let state = f(&self.current())?;
                self.replace(state);
            }
            Update::Draft(f) => f(self)?,
        }
        Ok(())
    }

    /// Resolve the parent container of a path read-only. `None` means the
    /// root map.
    fn parent(&self, parents: &[String], path: &Path) -> Result<Option<&Value>, MutationError> {
        let Some((first, rest)) = parents.split_first() else {
            return Ok(None);
        };
        let mut node = self
            .root
            .get(first.as_str())
            .ok_or_else(|| MutationError::missing(path))?;
        for segment in rest {
            node = child(node, segment, path)?;
        }
        Ok(Some(node))
    }
}

fn lookup<'a>(root: &'a OrdMap<String, Value>, path: &Path) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    rest.iter()
        .try_fold(root.get(first.as_str())?, |node, segment| node.child(segment))
}

fn mismatch(path: &Path, expected: &'static str, found: &Value) -> MutationError {
    MutationError::TypeMismatch {
        path: path.to_string(),
        expected,
        found: found.kind(),
    }
}

fn parse_index(segment: &str, path: &Path) -> Result<usize, MutationError> {
    segment.parse().map_err(|_| MutationError::InvalidIndex {
        path: path.to_string(),
        segment: segment.to_owned(),
    })
}

fn child<'a>(node: &'a Value, segment: &str, path: &Path) -> Result<&'a Value, MutationError> {
    match node {
        Value::Map(map) => map.get(segment).ok_or_else(|| MutationError::missing(path)),
        Value::List(list) => {
            let index = parse_index(segment, path)?;
            list.get(index).ok_or(MutationError::IndexOutOfBounds {
                path: path.to_string(),
                index,
                len: list.len(),
            })
        }
        other => Err(mismatch(path, "map or list", other)),
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &str, path: &Path) -> Result<&'a mut Value, MutationError> {
    match node {
        Value::Map(map) => map.get_mut(segment).ok_or_else(|| MutationError::missing(path)),
        Value::List(list) => {
            let index = parse_index(segment, path)?;
            let len = list.len();
            list.get_mut(index).ok_or(MutationError::IndexOutOfBounds {
                path: path.to_string(),
                index,
                len,
            })
        }
        other => Err(mismatch(path, "map or list", other)),
    }
}

fn node_mut<'a>(
    root: &'a mut OrdMap<String, Value>,
    segments: &[String],
    path: &Path,
) -> Result<&'a mut Value, MutationError> {
    let (first, rest) = segments.split_first().ok_or(MutationError::EmptyPath)?;
    let mut node = root
        .get_mut(first.as_str())
        .ok_or_else(|| MutationError::missing(path))?;
    for segment in rest {
        node = child_mut(node, segment, path)?;
    }
    Ok(node)
}

/// Check that `parent` can take a write (or removal) at `segment`.
fn check_slot(parent: &Value, segment: &str, path: &Path, allow_append: bool) -> Result<(), MutationError> {
    match parent {
        Value::Map(_) => Ok(()),
        Value::List(list) => {
            let index = parse_index(segment, path)?;
            let limit = if allow_append { list.len() + 1 } else { list.len() };
            if index < limit {
                Ok(())
            } else {
                Err(MutationError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len: list.len(),
                })
            }
        }
        other => Err(mismatch(path, "map or list", other)),
    }
}

fn write_child(parent: &mut Value, segment: &str, value: Value, path: &Path) -> Result<(), MutationError> {
    match parent {
        Value::Map(map) => {
            map.insert(segment.to_owned(), value);
            Ok(())
        }
        Value::List(list) => {
            let index = parse_index(segment, path)?;
            if index == list.len() {
                list.push_back(value);
            } else {
                list.set(index, value);
            }
            Ok(())
        }
        other => Err(mismatch(path, "map or list", other)),
    }
}
