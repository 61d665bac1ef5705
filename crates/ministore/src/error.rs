#![forbid(unsafe_code)]

use std::fmt;

use thiserror::Error;

use crate::middleware::CapabilityTag;
use crate::partition::FieldKind;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors surfaced by store operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("store `{store}` is destroyed: `{operation}` rejected")]
    InvalidState {
        store: String,
        operation: &'static str,
    },

    #[error("field `{key}` cannot be classified: {reason}")]
    PartitionConflict { key: String, reason: ConflictReason },

    /// A draft mutator failed. The inner error is passed through untouched.
    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error("capability `{0}` is already installed")]
    CapabilityConflict(CapabilityTag),

    #[error("capability `{0}` is not installed beneath this layer")]
    MissingCapability(CapabilityTag),

    #[error("unknown action `{0}`")]
    UnknownAction(String),
}

impl StoreError {
    #[must_use]
    pub fn invalid_state(store: impl Into<String>, operation: &'static str) -> Self {
        Self::InvalidState {
            store: store.into(),
            operation,
        }
    }

    /// True for use-after-destroy failures.
    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

/// Why an explicit action-key list disagrees with the field classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Listed as an action, but the field holds data.
    DeclaredActionIsData,
    /// Holds an action, but is not listed.
    UndeclaredAction,
    /// Listed as an action, but no such field exists.
    DeclaredActionMissing,
}

impl ConflictReason {
    /// The classification that was detected for the key, if any.
    #[must_use]
    pub const fn detected(self) -> Option<FieldKind> {
        match self {
            Self::DeclaredActionIsData => Some(FieldKind::Data),
            Self::UndeclaredAction => Some(FieldKind::Action),
            Self::DeclaredActionMissing => None,
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeclaredActionIsData => write!(f, "declared as action but holds data"),
            Self::UndeclaredAction => write!(f, "holds an action but was not declared"),
            Self::DeclaredActionMissing => write!(f, "declared as action but not present"),
        }
    }
}

/// Failure inside a draft mutation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutationError {
    #[error("empty path")]
    EmptyPath,

    #[error("no value at `{path}`")]
    MissingPath { path: String },

    #[error("expected {expected} at `{path}`, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("index {index} out of bounds at `{path}` (len {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("`{segment}` is not a list index in `{path}`")]
    InvalidIndex { path: String, segment: String },

    /// Raised by the mutator itself.
    #[error("{0}")]
    Aborted(String),
}

impl MutationError {
    #[must_use]
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted(message.into())
    }

    pub(crate) fn missing(path: impl fmt::Display) -> Self {
        Self::MissingPath {
            path: path.to_string(),
        }
    }
}
