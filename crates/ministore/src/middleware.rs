#![forbid(unsafe_code)]

//! Layered composition of store capabilities.
//!
//! # Design
//!
//! A [`Middleware`] turns a store API `S` into a wider one. The result wraps
//! the base contract ([`StoreApi`]) and may add members through extension
//! traits ([`HasDraft`], [`HasActions`](crate::HasActions)). Layers are
//! plain structs owning the layer beneath, so composition is an ordinary
//! nested type: `ActionsLayer<DraftLayer<Store>>`.
//!
//! Each middleware names its capability with a [`CapabilityTag`]. The
//! installed tags form an ordered list ([`StoreApi::capabilities`]), and
//! [`Pipeline::layer`] refuses a tag that is already present.
//!
//! # Invariants
//!
//! 1. Every layer forwards `get_state`/`set_state`/`add_listener`/`destroy`
//!    to the layer beneath, translating only what it owns.
//! 2. `capabilities()` lists tags innermost first, each at most once.

use std::fmt;

use crate::actions::{Actions, HasActions};
use crate::draft::{self, Draft};
use crate::error::{MutationError, Result, StoreError};
use crate::state::State;
use crate::store::{Listener, StoreApi, Subscription, Update};

/// Name of a capability a middleware adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityTag(&'static str);

impl CapabilityTag {
    /// Draft updates (`update_state`, [`Update::Draft`]).
    pub const DRAFT: Self = Self("ministore/draft");
    /// Bound actions (`get_actions`).
    pub const ACTIONS: Self = Self("ministore/actions");

    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A transform from one store API to a wider one.
pub trait Middleware<S: StoreApi> {
    /// Capability this layer installs.
    const TAG: CapabilityTag;

    /// What the capability exposes to callers.
    type Payload;

    /// The wrapped store.
    type Output: StoreApi;

    fn wrap(self, inner: S) -> Result<Self::Output>;

    /// Extract the capability payload from a wrapped store.
    fn payload(output: &Self::Output) -> Self::Payload;
}

/// Wrap `inner` with `middleware`, refusing a capability already installed.
pub fn apply<S, M>(inner: S, middleware: M) -> Result<M::Output>
where
    S: StoreApi,
    M: Middleware<S>,
{
    let tag = M::TAG;
    if inner.has_capability(tag) {
        tracing::warn!(
            message = "pipeline.duplicate",
            store = %inner.name(),
            capability = %tag
        );
        return Err(StoreError::CapabilityConflict(tag));
    }
    let output = middleware.wrap(inner)?;
    tracing::debug!(
        message = "pipeline.layer",
        store = %output.name(),
        capability = %tag,
        depth = output.capabilities().len()
    );
    Ok(output)
}

/// Left-to-right builder over [`apply`].
///
/// ```
/// use ministore::{Pipeline, State, Store, StoreApi, WithDraft};
///
/// let store = Pipeline::new(Store::new(State::new()))
///     .layer(WithDraft)?
///     .build();
/// assert_eq!(store.capabilities().len(), 1);
/// # Ok::<(), ministore::StoreError>(())
/// ```
#[derive(Debug)]
pub struct Pipeline<S> {
    store: S,
}

impl<S: StoreApi> Pipeline<S> {
    #[must_use]
    pub fn new(core: S) -> Self {
        Self { store: core }
    }

    /// Wrap the current store with `middleware`.
    pub fn layer<M>(self, middleware: M) -> Result<Pipeline<M::Output>>
    where
        M: Middleware<S>,
    {
        Ok(Pipeline {
            store: apply(self.store, middleware)?,
        })
    }

    #[must_use]
    pub fn capabilities(&self) -> Vec<CapabilityTag> {
        self.store.capabilities()
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn build(self) -> S {
        self.store
    }
}

/// Draft update entry point.
pub trait HasDraft: StoreApi {
    /// Mutate a draft of the current snapshot and commit the result.
    fn update_state<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Draft) -> Result<(), MutationError> + 'static;
}

/// Middleware translating [`Update::Draft`] into a replace.
#[derive(Debug, Clone, Copy, Default)]
pub struct WithDraft;

impl<S: StoreApi> Middleware<S> for WithDraft {
    const TAG: CapabilityTag = CapabilityTag::DRAFT;
    type Payload = ();
    type Output = DraftLayer<S>;

    fn wrap(self, inner: S) -> Result<Self::Output> {
        Ok(DraftLayer { inner })
    }

    fn payload(_output: &Self::Output) -> Self::Payload {}
}

#[derive(Debug)]
pub struct DraftLayer<S> {
    inner: S,
}

impl<S> DraftLayer<S> {
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: StoreApi> StoreApi for DraftLayer<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get_state(&self) -> State {
        self.inner.get_state()
    }

    fn get_initial_state(&self) -> State {
        self.inner.get_initial_state()
    }

    fn set_state(&self, update: Update) -> Result<()> {
        match update {
            Update::Draft(mutate) => self.inner.set_state(Update::replace_with(move |current| {
                Ok(draft::produce(current, mutate)?)
            })),
            other => self.inner.set_state(other),
        }
    }

    fn add_listener(&self, listener: Listener) -> Result<Subscription> {
        self.inner.add_listener(listener)
    }

    fn destroy(&self) {
        self.inner.destroy();
    }

    fn capabilities(&self) -> Vec<CapabilityTag> {
        let mut tags = self.inner.capabilities();
        tags.push(CapabilityTag::DRAFT);
        tags
    }
}

impl<S: StoreApi> HasDraft for DraftLayer<S> {
    fn update_state<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Draft) -> Result<(), MutationError> + 'static,
    {
        self.set_state(Update::draft(mutate))
    }
}

impl<S: HasActions> HasActions for DraftLayer<S> {
    fn get_actions(&self) -> &Actions {
        self.inner.get_actions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::WithActions;
    use crate::partition::{FieldMap, Partition, partition};
    use crate::store::Store;
    use crate::value::Value;
    use std::cell::Cell;
    use std::rc::Rc;
    use tracing_test::traced_test;

    fn nested() -> State {
        State::try_from(serde_json::json!({
            "a": {"x": 1},
            "b": {"y": 2},
        }))
        .unwrap()
    }

    #[test]
    fn draft_layer_commits_a_draft_update() {
        let store = Pipeline::new(Store::new(nested()))
            .layer(WithDraft)
            .unwrap()
            .build();
        let prev = store.get_state();
        store.update_state(|d| d.set("a.x", 2)).unwrap();
        let next = store.get_state();

        assert_eq!(next.get_path("a.x"), Some(&Value::Int(2)));
        assert!(next.get("b").unwrap().identical(prev.get("b").unwrap()));
        assert!(!next.get("a").unwrap().identical(prev.get("a").unwrap()));
    }

    #[test]
    fn failing_draft_leaves_store_untouched() {
        let store = Pipeline::new(Store::new(nested()))
            .layer(WithDraft)
            .unwrap()
            .build();
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        store.subscribe(move |_, _| sink.set(sink.get() + 1)).unwrap();

        let before = store.get_state();
        let err = store
            .update_state(|d| {
                d.set("a.x", 99)?;
                Err(MutationError::aborted("nope"))
            })
            .unwrap_err();
        assert_eq!(err, StoreError::Mutation(MutationError::aborted("nope")));
        assert_eq!(store.get_state(), before);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn other_updates_pass_through() {
        let store = Pipeline::new(Store::new(State::new().with("n", 1)))
            .layer(WithDraft)
            .unwrap()
            .build();
        store.set_state(State::new().with("n", 2).into()).unwrap();
        assert_eq!(store.get_state().get("n"), Some(&Value::Int(2)));
        assert_eq!(store.inner().version(), 1);
    }

    #[test]
    fn duplicate_layer_is_rejected() {
        let err = Pipeline::new(Store::new(State::new()))
            .layer(WithDraft)
            .unwrap()
            .layer(WithDraft)
            .unwrap_err();
        assert_eq!(err, StoreError::CapabilityConflict(CapabilityTag::DRAFT));
    }

    #[test]
    fn capabilities_list_innermost_first() {
        let Partition { state, actions } = partition(FieldMap::new().data("n", 0));
        let pipeline = Pipeline::new(Store::new(state))
            .layer(WithActions::new(actions))
            .unwrap()
            .layer(WithDraft)
            .unwrap();
        assert_eq!(
            pipeline.capabilities(),
            [CapabilityTag::ACTIONS, CapabilityTag::DRAFT]
        );
        let store = pipeline.build();
        assert!(store.has_capability(CapabilityTag::DRAFT));
        assert!(store.get_actions().is_empty());
    }

    #[test]
    fn members_reachable_in_either_order() {
        let fields = || {
            FieldMap::new()
                .data("n", 0)
                .action("inc", |ctx, _| {
                    ctx.set(Update::merge_with(|s| {
                        let n = s.get("n").and_then(Value::as_i64).unwrap_or(0);
                        State::new().with("n", n + 1)
                    }))
                })
        };

        let Partition { state, actions } = partition(fields());
        let draft_outer = Pipeline::new(Store::new(state))
            .layer(WithActions::new(actions))
            .unwrap()
            .layer(WithDraft)
            .unwrap()
            .build();
        draft_outer.get_actions().dispatch("inc", &[]).unwrap();
        draft_outer.update_state(|d| d.set("n", 10)).unwrap();
        assert_eq!(draft_outer.get_state().get("n"), Some(&Value::Int(10)));

        let Partition { state, actions } = partition(fields());
        let actions_outer = Pipeline::new(Store::new(state))
            .layer(WithDraft)
            .unwrap()
            .layer(WithActions::new(actions))
            .unwrap()
            .build();
        actions_outer.update_state(|d| d.set("n", 10)).unwrap();
        actions_outer.get_actions().dispatch("inc", &[]).unwrap();
        assert_eq!(actions_outer.get_state().get("n"), Some(&Value::Int(11)));
    }

    struct Counting {
        commits: Rc<Cell<usize>>,
    }

    struct CountingLayer<S> {
        inner: S,
        commits: Rc<Cell<usize>>,
    }

    const COUNTING: CapabilityTag = CapabilityTag::new("test/counting");

    impl<S: StoreApi> Middleware<S> for Counting {
        const TAG: CapabilityTag = COUNTING;
        type Payload = Rc<Cell<usize>>;
        type Output = CountingLayer<S>;

        fn wrap(self, inner: S) -> Result<Self::Output> {
            Ok(CountingLayer {
                inner,
                commits: self.commits,
            })
        }

        fn payload(output: &Self::Output) -> Self::Payload {
            Rc::clone(&output.commits)
        }
    }

    impl<S: StoreApi> StoreApi for CountingLayer<S> {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn get_state(&self) -> State {
            self.inner.get_state()
        }
        fn get_initial_state(&self) -> State {
            self.inner.get_initial_state()
        }
        fn set_state(&self, update: Update) -> Result<()> {
            self.commits.set(self.commits.get() + 1);
            self.inner.set_state(update)
        }
        fn add_listener(&self, listener: Listener) -> Result<Subscription> {
            self.inner.add_listener(listener)
        }
        fn destroy(&self) {
            self.inner.destroy();
        }
        fn capabilities(&self) -> Vec<CapabilityTag> {
            let mut tags = self.inner.capabilities();
            tags.push(COUNTING);
            tags
        }
    }

    #[test]
    fn custom_layer_sees_translated_updates() {
        let store = Pipeline::new(Store::new(State::new().with("n", 0)))
            .layer(Counting {
                commits: Rc::new(Cell::new(0)),
            })
            .unwrap()
            .layer(WithDraft)
            .unwrap()
            .build();
        store.update_state(|d| d.set("n", 1)).unwrap();
        store.set_state(State::new().with("n", 2).into()).unwrap();

        let counter = <Counting as Middleware<Store>>::payload(store.inner());
        assert_eq!(counter.get(), 2);
        assert_eq!(store.capabilities(), [COUNTING, CapabilityTag::DRAFT]);
    }

    #[test]
    fn tag_display_and_order() {
        assert_eq!(CapabilityTag::DRAFT.to_string(), "ministore/draft");
        assert_eq!(CapabilityTag::new("x").name(), "x");
        assert!(CapabilityTag::ACTIONS < CapabilityTag::DRAFT);
    }

    #[test]
    #[traced_test]
    fn layering_is_logged() {
        let _ = Pipeline::new(Store::new(State::new()))
            .layer(WithDraft)
            .unwrap()
            .layer(WithDraft);
        assert!(logs_contain("pipeline.layer"));
        assert!(logs_contain("pipeline.duplicate"));
        assert!(logs_contain("ministore/draft"));
    }
}
