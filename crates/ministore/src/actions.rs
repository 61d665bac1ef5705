#![forbid(unsafe_code)]

//! Actions bound to a live store.
//!
//! # Design
//!
//! An action body is a plain function of an [`ActionContext`] and its
//! arguments. It never captures the store: the context is built at call time
//! and routes `get`/`set`/`mutate` to the layer beneath the actions layer, so
//! an action always sees the current snapshot.
//!
//! [`Actions`] is built once per store. Each [`BoundAction`] holds a `Weak`
//! back-reference to the shared dispatcher, so the set of bound actions has
//! no reference cycle and cloned handles compare `ptr_eq` for the whole life
//! of the store.
//!
//! A context is either *live* (writes commit immediately) or *drafting*
//! (writes land in one shared [`Draft`] that commits once, see
//! [`Actions::transaction`]).
//!
//! # Invariants
//!
//! 1. `get_actions()` returns the same `Actions` and the same `BoundAction`
//!    handles on every call.
//! 2. Action names are disjoint from state keys.
//! 3. Nested calls (an action calling another action, or a listener calling
//!    an action) run synchronously to completion.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::draft::{self, Draft};
use crate::error::{ConflictReason, MutationError, Result, StoreError};
use crate::middleware::{CapabilityTag, HasDraft, Middleware};
use crate::partition::ActionTable;
use crate::state::State;
use crate::store::{Listener, StoreApi, Subscription, Update};
use crate::value::Value;

/// An action body.
pub type ActionFn = Rc<dyn Fn(&mut ActionContext<'_>, &[Value]) -> Result<()>>;

/// Box a closure as an [`ActionFn`].
pub fn action<F>(body: F) -> ActionFn
where
    F: Fn(&mut ActionContext<'_>, &[Value]) -> Result<()> + 'static,
{
    Rc::new(body)
}

enum Target<'a> {
    Live(&'a dyn StoreApi),
    Drafting(&'a mut Draft),
}

/// What an action body sees while it runs.
pub struct ActionContext<'a> {
    actions: &'a Actions,
    target: Target<'a>,
    depth: usize,
}

impl<'a> ActionContext<'a> {
    fn live(actions: &'a Actions) -> Self {
        Self {
            actions,
            target: Target::Live(actions.dispatcher.api.as_ref()),
            depth: 0,
        }
    }

    fn drafting(actions: &'a Actions, draft: &'a mut Draft) -> Self {
        Self {
            actions,
            target: Target::Drafting(draft),
            depth: 0,
        }
    }

    /// Current snapshot (or the draft so far).
    #[must_use]
    pub fn get(&self) -> State {
        match &self.target {
            Target::Live(api) => api.get_state(),
            Target::Drafting(draft) => draft.current(),
        }
    }

    /// Issue an update.
    pub fn set(&mut self, update: impl Into<Update>) -> Result<()> {
        match &mut self.target {
            Target::Live(api) => api.set_state(update.into()),
            Target::Drafting(draft) => draft.apply(update.into()),
        }
    }

    /// Nested mutation through a draft.
    ///
    /// A live context hands the draft to the draft layer when one sits
    /// beneath the actions layer, and produces it here otherwise.
    pub fn mutate<F>(&mut self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Draft) -> Result<(), MutationError> + 'static,
    {
        match &mut self.target {
            Target::Live(api) if api.has_capability(CapabilityTag::DRAFT) => {
                api.set_state(Update::draft(mutate))
            }
            Target::Live(api) => api.set_state(Update::replace_with(move |current| {
                Ok(draft::produce(current, mutate)?)
            })),
            Target::Drafting(draft) => Ok(mutate(&mut **draft)?),
        }
    }

    /// Call another action of the same store with this context.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<()> {
        let actions = self.actions;
        let action = actions
            .get(name)
            .ok_or_else(|| StoreError::UnknownAction(name.to_owned()))?;
        self.depth += 1;
        let result = action.run(self, args);
        self.depth -= 1;
        result
    }

    #[must_use]
    pub fn actions(&self) -> &Actions {
        self.actions
    }

    /// Whether writes go to a shared draft instead of the live store.
    #[must_use]
    pub fn is_drafting(&self) -> bool {
        matches!(self.target, Target::Drafting(_))
    }

    /// Nesting depth of action calls within this context.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

struct Dispatcher {
    api: Rc<dyn StoreApi>,
    bound: BTreeMap<String, BoundAction>,
}

struct BoundInner {
    name: String,
    store: String,
    body: ActionFn,
    dispatcher: Weak<Dispatcher>,
}

/// One action, bound to its store.
#[derive(Clone)]
pub struct BoundAction {
    inner: Rc<BoundInner>,
}

impl BoundAction {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Invoke the action against the live store.
    pub fn call(&self, args: &[Value]) -> Result<()> {
        let dispatcher = self
            .inner
            .dispatcher
            .upgrade()
            .ok_or_else(|| StoreError::invalid_state(self.inner.store.clone(), "action"))?;
        let actions = Actions { dispatcher };
        let mut ctx = ActionContext::live(&actions);
        self.run(&mut ctx, args)
    }

    /// Whether both handles are the same bound action.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn run(&self, ctx: &mut ActionContext<'_>, args: &[Value]) -> Result<()> {
        let span = tracing::trace_span!(
            "actions.dispatch",
            action = %self.inner.name,
            depth = ctx.depth,
            drafting = ctx.is_drafting()
        );
        let _guard = span.enter();
        (self.inner.body)(ctx, args)
    }
}

impl fmt::Debug for BoundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundAction")
            .field("name", &self.inner.name)
            .finish()
    }
}

/// The stable set of bound actions of a store.
#[derive(Clone)]
pub struct Actions {
    dispatcher: Rc<Dispatcher>,
}

impl Actions {
    fn bind(api: Rc<dyn StoreApi>, table: ActionTable) -> Self {
        let store = api.name().to_owned();
        let dispatcher = Rc::new_cyclic(|weak: &Weak<Dispatcher>| Dispatcher {
            bound: table
                .into_iter()
                .map(|(name, body)| {
                    let action = BoundAction {
                        inner: Rc::new(BoundInner {
                            name: name.clone(),
                            store: store.clone(),
                            body,
                            dispatcher: Weak::clone(weak),
                        }),
                    };
                    (name, action)
                })
                .collect(),
            api,
        });
        Self { dispatcher }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BoundAction> {
        self.dispatcher.bound.get(name)
    }

    /// Invoke an action by name.
    pub fn dispatch(&self, name: &str, args: &[Value]) -> Result<()> {
        let action = self
            .get(name)
            .ok_or_else(|| StoreError::UnknownAction(name.to_owned()))?;
        let mut ctx = ActionContext::live(self);
        action.run(&mut ctx, args)
    }

    /// Run `updater` against one draft of the current snapshot; action calls
    /// made through the context all write that draft. Commits once, or not
    /// at all if the updater fails.
    pub fn transaction<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut ActionContext<'_>) -> Result<()>,
    {
        let api = &self.dispatcher.api;
        let current = api.get_state();
        let next = draft::produce_with(&current, |draft| {
            let mut ctx = ActionContext::drafting(self, draft);
            updater(&mut ctx)
        })?;
        api.set_state(Update::Replace(next))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dispatcher.bound.keys().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.dispatcher.bound.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dispatcher.bound.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dispatcher.bound.is_empty()
    }

    /// Whether both handles are the same action set.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.dispatcher, &other.dispatcher)
    }
}

impl fmt::Debug for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Middleware exposing a table of actions as [`Actions`].
pub struct WithActions {
    table: ActionTable,
}

impl WithActions {
    #[must_use]
    pub fn new(table: ActionTable) -> Self {
        Self { table }
    }
}

impl<S: StoreApi + 'static> Middleware<S> for WithActions {
    const TAG: CapabilityTag = CapabilityTag::ACTIONS;
    type Payload = Actions;
    type Output = ActionsLayer<S>;

    fn wrap(self, inner: S) -> Result<Self::Output> {
        let state = inner.get_state();
        if let Some(name) = self.table.names().find(|name| state.contains_key(name)) {
            return Err(StoreError::PartitionConflict {
                key: name.to_owned(),
                reason: ConflictReason::DeclaredActionIsData,
            });
        }
        let inner = Rc::new(inner);
        let api: Rc<dyn StoreApi> = Rc::clone(&inner) as Rc<dyn StoreApi>;
        let actions = Actions::bind(api, self.table);
        Ok(ActionsLayer { inner, actions })
    }

    fn payload(output: &Self::Output) -> Self::Payload {
        output.actions.clone()
    }
}

/// Store wrapper adding [`HasActions::get_actions`].
pub struct ActionsLayer<S> {
    inner: Rc<S>,
    actions: Actions,
}

impl<S> ActionsLayer<S> {
    /// The wrapped layer.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// See [`Actions::transaction`].
    pub fn transaction<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut ActionContext<'_>) -> Result<()>,
    {
        self.actions.transaction(updater)
    }
}

/// Access to a store's bound actions.
pub trait HasActions {
    fn get_actions(&self) -> &Actions;
}

impl<S> HasActions for ActionsLayer<S> {
    fn get_actions(&self) -> &Actions {
        &self.actions
    }
}

impl<S: StoreApi> StoreApi for ActionsLayer<S> {
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
        tags.push(CapabilityTag::ACTIONS);
        tags
    }
}

impl<S: HasDraft> HasDraft for ActionsLayer<S> {
    fn update_state<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Draft) -> Result<(), MutationError> + 'static,
    {
        self.inner.update_state(mutate)
    }
}

impl<S> fmt::Debug for ActionsLayer<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionsLayer")
            .field("inner", &self.inner)
            .field("actions", &self.actions)
            .finish()
    }
}
