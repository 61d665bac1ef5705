#![forbid(unsafe_code)]

//! Minimal reactive snapshot container.
//!
//! # Design
//!
//! [`Store`] is a cheap handle over `Rc<StoreInner>`: single-threaded shared
//! ownership with `Cell`/`RefCell` interior state, the same model the rest
//! of the crate uses. The current snapshot is an immutable [`State`]; every
//! committed update swaps it wholesale.
//!
//! # Invariants
//!
//! 1. Listeners run in subscription order, each exactly once per commit.
//! 2. The listener list is snapshotted before a notification loop starts;
//!    subscribing or unsubscribing from inside a listener affects only later
//!    commits.
//! 3. No `RefCell` borrow is held while user code runs, so updaters and
//!    listeners may call back into the store. A nested `set_state` commits
//!    and notifies to completion before the outer loop resumes.
//! 4. After [`destroy`](Store::destroy), `set_state` and `subscribe` fail
//!    with [`StoreError::InvalidState`]; `get_state` keeps returning the last
//!    committed snapshot.
//!
//! # Failure Modes
//!
//! - **Updater returns an error**: nothing is committed, nobody is notified,
//!   the error is returned to the caller.
//! - **Listener panics**: the commit has already happened. The panic unwinds
//!   out of `set_state` and the remaining listeners of that loop are skipped.
//!   The store stays usable.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::config::StoreConfig;
use crate::draft::Draft;
use crate::error::{MutationError, Result, StoreError};
use crate::middleware::CapabilityTag;
use crate::state::State;

/// Callback invoked with `(next, prev)` after every commit.
pub type Listener = Rc<dyn Fn(&State, &State)>;

/// A requested state change.
pub enum Update {
    /// Shallow-merge a partial into the current snapshot.
    Merge(State),
    /// Compute a partial from the current snapshot, then merge it.
    MergeWith(Box<dyn FnOnce(&State) -> State>),
    /// Replace the snapshot wholesale.
    Replace(State),
    /// Compute the replacement from the current snapshot.
    ReplaceWith(Box<dyn FnOnce(&State) -> Result<State>>),
    /// Mutate a draft of the current snapshot. Requires the draft layer.
    Draft(Box<dyn FnOnce(&mut Draft) -> Result<(), MutationError>>),
}

impl Update {
    #[must_use]
    pub fn merge(partial: State) -> Self {
        Self::Merge(partial)
    }

    #[must_use]
    pub fn merge_with(f: impl FnOnce(&State) -> State + 'static) -> Self {
        Self::MergeWith(Box::new(f))
    }

    #[must_use]
    pub fn replace(state: State) -> Self {
        Self::Replace(state)
    }

    #[must_use]
    pub fn replace_with(f: impl FnOnce(&State) -> Result<State> + 'static) -> Self {
        Self::ReplaceWith(Box::new(f))
    }

    #[must_use]
    pub fn draft(f: impl FnOnce(&mut Draft) -> Result<(), MutationError> + 'static) -> Self {
        Self::Draft(Box::new(f))
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Merge(_) => "merge",
            Self::MergeWith(_) => "merge_with",
            Self::Replace(_) => "replace",
            Self::ReplaceWith(_) => "replace_with",
            Self::Draft(_) => "draft",
        }
    }

    /// Compute the next snapshot against `current`.
    fn resolve(self, current: &State) -> Result<State> {
        match self {
            Self::Merge(partial) => Ok(current.merge(&partial)),
            Self::MergeWith(f) => Ok(current.merge(&f(current))),
            Self::Replace(state) => Ok(state),
            Self::ReplaceWith(f) => f(current),
            Self::Draft(_) => Err(StoreError::MissingCapability(CapabilityTag::DRAFT)),
        }
    }
}

impl From<State> for Update {
    fn from(partial: State) -> Self {
        Self::Merge(partial)
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Merge(partial) => f.debug_tuple("Merge").field(partial).finish(),
            Self::Replace(state) => f.debug_tuple("Replace").field(state).finish(),
            other => write!(f, "{}(<fn>)", other.kind()),
        }
    }
}

/// The base store contract every layer preserves.
pub trait StoreApi {
    /// Label used in errors and log events.
    fn name(&self) -> &str;

    /// Current snapshot. O(1); the handle is `ptr_eq` to the committed one.
    fn get_state(&self) -> State;

    /// Snapshot the store was seeded with.
    fn get_initial_state(&self) -> State;

    fn set_state(&self, update: Update) -> Result<()>;

    /// Register a listener. Registering the same `Rc` twice is a no-op that
    /// returns a handle to the existing registration.
    fn add_listener(&self, listener: Listener) -> Result<Subscription>;

    fn destroy(&self);

    /// Installed capabilities, innermost first.
    fn capabilities(&self) -> Vec<CapabilityTag>;

    fn has_capability(&self, tag: CapabilityTag) -> bool {
        self.capabilities().contains(&tag)
    }

    fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&State, &State) + 'static,
        Self: Sized,
    {
        self.add_listener(Rc::new(listener))
    }
}

/// Derive a value from the current snapshot.
pub fn select<S, T>(api: &S, selector: impl FnOnce(&State) -> T) -> T
where
    S: StoreApi + ?Sized,
{
    selector(&api.get_state())
}

struct ListenerEntry {
    id: u64,
    listener: Listener,
}

struct StoreInner {
    config: StoreConfig,
    initial: State,
    state: RefCell<State>,
    listeners: RefCell<Vec<ListenerEntry>>,
    next_listener_id: Cell<u64>,
    version: Cell<u64>,
    destroyed: Cell<bool>,
}

/// Handle to a listener registration.
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    store: Weak<StoreInner>,
}

impl Subscription {
    /// Remove the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.store.upgrade() {
            let removed: Vec<ListenerEntry> = {
                let mut listeners = inner.listeners.borrow_mut();
                let (gone, kept): (Vec<ListenerEntry>, Vec<ListenerEntry>) =
                    std::mem::take(&mut *listeners)
                    .into_iter()
                    .partition(|e| e.id == self.id);
                *listeners = kept;
                gone
            };
            // Closures are dropped outside the borrow.
            drop(removed);
        }
    }

    /// Whether the listener is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let Some(inner) = self.store.upgrade() else {
            return false;
        };
        let active = inner.listeners.borrow().iter().any(|e| e.id == self.id);
        active
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// The reactive core: one snapshot, ordered listeners, explicit destroy.
///
/// Cloning a `Store` creates a new handle to the **same** store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    #[must_use]
    pub fn new(initial: State) -> Self {
        Self::with_config(StoreConfig::default(), initial)
    }

    #[must_use]
    pub fn with_config(config: StoreConfig, initial: State) -> Self {
        tracing::debug!(
            message = "store.create",
            store = %config.name,
            fields = initial.len()
        );
        Self {
            inner: Rc::new(StoreInner {
                config,
                initial: initial.clone(),
                state: RefCell::new(initial),
                listeners: RefCell::new(Vec::new()),
                next_listener_id: Cell::new(1),
                version: Cell::new(0),
                destroyed: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Number of commits so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Whether two handles address the same store.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn ensure_live(&self, operation: &'static str) -> Result<()> {
        if self.inner.destroyed.get() {
            tracing::warn!(
                message = "store.rejected",
                store = %self.inner.config.name,
                operation
            );
            return Err(StoreError::invalid_state(
                self.inner.config.name.clone(),
                operation,
            ));
        }
        Ok(())
    }

    fn notify(&self, next: &State, prev: &State) {
        let snapshot: Vec<Listener> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|e| Rc::clone(&e.listener))
            .collect();
        for listener in &snapshot {
            if self.inner.config.stop_on_destroy && self.inner.destroyed.get() {
                break;
            }
            listener(next, prev);
        }
    }
}

impl StoreApi for Store {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn get_state(&self) -> State {
        self.inner.state.borrow().clone()
    }

    fn get_initial_state(&self) -> State {
        self.inner.initial.clone()
    }

    fn set_state(&self, update: Update) -> Result<()> {
        self.ensure_live("set_state")?;
        let kind = update.kind();
        let prev = self.get_state();
        let next = update.resolve(&prev)?;

        if self.inner.config.skip_identical && next.ptr_eq(&prev) {
            tracing::trace!(
                message = "store.skip_identical",
                store = %self.inner.config.name,
                kind
            );
            return Ok(());
        }
        // The updater may have destroyed the store.
        self.ensure_live("set_state")?;

        *self.inner.state.borrow_mut() = next.clone();
        let version = self.inner.version.get() + 1;
        self.inner.version.set(version);
        tracing::debug!(
            message = "store.commit",
            store = %self.inner.config.name,
            kind,
            version,
            listeners = self.inner.listeners.borrow().len()
        );

        self.notify(&next, &prev);
        Ok(())
    }

    fn add_listener(&self, listener: Listener) -> Result<Subscription> {
        self.ensure_live("subscribe")?;
        let mut listeners = self.inner.listeners.borrow_mut();
        let existing = listeners
            .iter()
            .find(|e| std::ptr::addr_eq(Rc::as_ptr(&e.listener), Rc::as_ptr(&listener)))
            .map(|e| e.id);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.inner.next_listener_id.get();
                self.inner.next_listener_id.set(id + 1);
                listeners.push(ListenerEntry { id, listener });
                id
            }
        };
        Ok(Subscription {
            id,
            store: Rc::downgrade(&self.inner),
        })
    }

    fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        let dropped = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        tracing::debug!(
            message = "store.destroy",
            store = %self.inner.config.name,
            listeners = dropped.len()
        );
        drop(dropped);
    }

    fn capabilities(&self) -> Vec<CapabilityTag> {
        Vec::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.config.name)
            .field("state", &*self.inner.state.borrow())
            .field("version", &self.inner.version.get())
            .field("listeners", &self.inner.listeners.borrow().len())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}
