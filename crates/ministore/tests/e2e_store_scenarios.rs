//! End-to-end scenarios over the fully composed store.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ministore::{
    FieldMap, HasActions, HasDraft, MutationError, State, StoreApi, StoreConfig, StoreError,
    Update, Value, create, create_with, select,
};

fn count(state: &State) -> i64 {
    state.get("count").and_then(Value::as_i64).unwrap_or_default()
}

fn increment_by_merge() -> FieldMap {
    FieldMap::new()
        .data("count", 0)
        .action("increment", |ctx, _| {
            ctx.set(Update::merge_with(|s| State::new().with("count", count(s) + 1)))
        })
}

#[test]
fn counter_increments_through_its_action() {
    let store = create(increment_by_merge()).unwrap();

    assert_eq!(store.get_state(), State::new().with("count", 0));
    assert_eq!(store.get_actions().names().collect::<Vec<_>>(), ["increment"]);
    assert!(!store.get_state().contains_key("increment"));

    store.get_actions().dispatch("increment", &[]).unwrap();
    assert_eq!(count(&store.get_state()), 1);
}

#[test]
fn nested_increment_shares_untouched_fields() {
    let initial = Value::from(serde_json::json!({"child": {"count": 0}}));
    let store = create(
        FieldMap::new()
            .data("parent", initial)
            .data("other", Value::map().with("flag", true))
            .action("increment", |ctx, _| {
                ctx.mutate(|d| {
                    d.update("parent.child.count", |v| {
                        *v = Value::Int(v.as_i64().unwrap_or(0) + 1);
                        Ok(())
                    })
                })
            }),
    )
    .unwrap();
    let prev = store.get_state();

    store.get_actions().dispatch("increment", &[]).unwrap();
    let next = store.get_state();

    assert_eq!(next.get_path("parent.child.count"), Some(&Value::Int(1)));
    assert!(next.get("other").unwrap().identical(prev.get("other").unwrap()));
    assert!(!next.get("parent").unwrap().identical(prev.get("parent").unwrap()));
    assert_eq!(prev.get_path("parent.child.count"), Some(&Value::Int(0)));
}

#[test]
fn destroyed_store_rejects_updates_and_keeps_last_state() {
    let store = create(increment_by_merge()).unwrap();
    store.get_actions().dispatch("increment", &[]).unwrap();
    store.destroy();

    let err = store
        .set_state(State::new().with("count", 5).into())
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidState { .. }));
    assert!(store.get_actions().dispatch("increment", &[]).is_err());
    assert!(store.update_state(|d| d.set("count", 9)).is_err());
    assert_eq!(count(&store.get_state()), 1);
}

#[test]
fn actions_read_state_set_by_other_paths() {
    let store = create(increment_by_merge()).unwrap();
    let increment = store.get_actions().get("increment").unwrap().clone();

    store.update_state(|d| d.set("count", 40)).unwrap();
    store.set_state(State::new().with("count", 41).into()).unwrap();
    increment.call(&[]).unwrap();
    assert_eq!(count(&store.get_state()), 42);
}

#[test]
fn subscriber_sees_every_action_commit() {
    let store = create(increment_by_merge()).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let sub = store
        .subscribe(move |next, prev| sink.borrow_mut().push((count(prev), count(next))))
        .unwrap();

    for _ in 0..3 {
        store.get_actions().dispatch("increment", &[]).unwrap();
    }
    sub.unsubscribe();
    store.get_actions().dispatch("increment", &[]).unwrap();

    assert_eq!(*seen.borrow(), [(0, 1), (1, 2), (2, 3)]);
}

#[test]
fn transaction_batches_actions_into_one_commit() {
    let store = create(
        increment_by_merge().action("reset", |ctx, _| {
            ctx.set(Update::replace(State::new().with("count", 0)))
        }),
    )
    .unwrap();
    let commits = Rc::new(Cell::new(0));
    let sink = Rc::clone(&commits);
    store.subscribe(move |_, _| sink.set(sink.get() + 1)).unwrap();

    store
        .transaction(|ctx| {
            for _ in 0..5 {
                ctx.call("increment", &[])?;
            }
            ctx.call("reset", &[])?;
            ctx.call("increment", &[])
        })
        .unwrap();

    assert_eq!(count(&store.get_state()), 1);
    assert_eq!(commits.get(), 1);
}

#[test]
fn failing_action_surfaces_its_error() {
    let store = create(increment_by_merge().action("guarded", |ctx, args| {
        let limit = args.first().and_then(Value::as_i64).unwrap_or(0);
        ctx.mutate(move |d| {
            let current = d.get("count").and_then(Value::as_i64).unwrap_or(0);
            if current >= limit {
                return Err(MutationError::aborted("limit reached"));
            }
            d.set("count", current + 1)
        })
    }))
    .unwrap();

    store
        .get_actions()
        .dispatch("guarded", &[Value::Int(1)])
        .unwrap();
    let err = store
        .get_actions()
        .dispatch("guarded", &[Value::Int(1)])
        .unwrap_err();
    assert_eq!(err, StoreError::Mutation(MutationError::aborted("limit reached")));
    assert_eq!(count(&store.get_state()), 1);
}

#[test]
fn listener_driven_action_chain_settles() {
    let store = Rc::new(create(increment_by_merge()).unwrap());
    let weak = Rc::downgrade(&store);
    store
        .subscribe(move |next, _| {
            if count(next) < 3
                && let Some(store) = weak.upgrade()
            {
                store.get_actions().dispatch("increment", &[]).unwrap();
            }
        })
        .unwrap();

    store.get_actions().dispatch("increment", &[]).unwrap();
    assert_eq!(count(&store.get_state()), 3);
}

#[test]
fn initial_state_and_select() {
    let store = create_with(StoreConfig::named("counter"), increment_by_merge()).unwrap();
    store.get_actions().dispatch("increment", &[]).unwrap();

    assert_eq!(count(&store.get_initial_state()), 0);
    assert_eq!(select(&store, count), 1);
    assert_eq!(store.name(), "counter");
}

#[test]
fn snapshot_round_trips_through_json() {
    let store = create(
        FieldMap::new()
            .data("todos", vec![Value::from("write"), Value::from("test")])
            .data("done", 0),
    )
    .unwrap();
    store.update_state(|d| d.push("todos", "ship")).unwrap();

    let json = store.get_state().to_json();
    assert_eq!(
        json,
        serde_json::json!({"done": 0, "todos": ["write", "test", "ship"]})
    );
    assert_eq!(State::try_from(json).unwrap(), store.get_state());
}
