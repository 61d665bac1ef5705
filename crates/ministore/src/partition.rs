#![forbid(unsafe_code)]

//! One-time split of an initial field map into state data and actions.
//!
//! Each field is a tagged [`Field`]: either plain data or an action body.
//! Classification reads the tag of top-level fields only; values are data
//! trees and cannot contain callables, so nothing below the top level needs
//! inspecting.

use std::collections::BTreeMap;
use std::fmt;

use crate::actions::{ActionContext, ActionFn};
use crate::error::{ConflictReason, Result, StoreError};
use crate::state::State;
use crate::value::Value;

/// Classification of a top-level field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Data,
    Action,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Action => write!(f, "action"),
        }
    }
}

/// A top-level field of the initial map.
#[derive(Clone)]
pub enum Field {
    Data(Value),
    Action(ActionFn),
}

impl Field {
    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Data(_) => FieldKind::Data,
            Self::Action(_) => FieldKind::Action,
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Self::Action(_) => f.write_str("Action(<fn>)"),
        }
    }
}

/// Initial field map, as produced by a store factory.
///
/// Inserting a key twice keeps the last field.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    fields: BTreeMap<String, Field>,
}

impl FieldMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a data field.
    #[must_use]
    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), Field::Data(value.into()));
        self
    }

    /// Add an action field.
    #[must_use]
    pub fn action<F>(mut self, key: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>, &[Value]) -> Result<()> + 'static,
    {
        self.fields
            .insert(key.into(), Field::Action(std::rc::Rc::new(body)));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, field: Field) {
        self.fields.insert(key.into(), field);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Field)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, Field)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, f)| (k.into(), f)).collect(),
        }
    }
}

/// Action bodies by name, before they are bound to a store.
#[derive(Clone, Default)]
pub struct ActionTable {
    entries: BTreeMap<String, ActionFn>,
}

impl ActionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, body: ActionFn) {
        self.entries.insert(name.into(), body);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ActionFn> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for ActionTable {
    type Item = (String, ActionFn);
    type IntoIter = std::collections::btree_map::IntoIter<String, ActionFn>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Result of [`partition`]: disjoint state and action sets.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub state: State,
    pub actions: ActionTable,
}

/// Split `fields` into state data and actions by their tag.
#[must_use]
pub fn partition(fields: FieldMap) -> Partition {
    let mut state = im::OrdMap::new();
    let mut actions = ActionTable::new();
    for (key, field) in fields.fields {
        match field {
            Field::Data(value) => {
                state.insert(key, value);
            }
            Field::Action(body) => actions.insert(key, body),
        }
    }
    Partition {
        state: State::from_map(state),
        actions,
    }
}

/// [`partition`], checked against an explicit list of action keys.
///
/// Fails on the first key where the list and the field tags disagree.
pub fn partition_declared(fields: FieldMap, declared_actions: &[&str]) -> Result<Partition> {
    for key in declared_actions {
        match fields.get(key).map(Field::kind) {
            Some(FieldKind::Action) => {}
            Some(FieldKind::Data) => return Err(conflict(key, ConflictReason::DeclaredActionIsData)),
            None => return Err(conflict(key, ConflictReason::DeclaredActionMissing)),
        }
    }
    if let Some((key, _)) = fields
        .fields
        .iter()
        .find(|(key, field)| field.kind() == FieldKind::Action && !declared_actions.contains(&key.as_str()))
    {
        return Err(conflict(key, ConflictReason::UndeclaredAction));
    }
    Ok(partition(fields))
}

fn conflict(key: &str, reason: ConflictReason) -> StoreError {
    StoreError::PartitionConflict {
        key: key.to_owned(),
        reason,
    }
}
