//! Integration Tests for the State Container
//!
//! These tests drive stores, bindings and plugins together through the
//! public API, the way a UI integration would.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pathstate_core::{
    intercept_dependencies, Binding, Config, Dependency, DependencyMode, DestroyInfo, LocalQueue,
    Partial, Plugin, PluginId, PluginInstance, Rejection, SetValue, State, StateError,
    TokioSpawner, TraceWrites, WriteInfo, WriteTracer,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// Mount a consumer on `state` and count its re-renders.
fn mount(state: &State) -> (Binding, Rc<Cell<u32>>) {
    let renders = Rc::new(Cell::new(0));
    let counter = renders.clone();
    let binding = Binding::attach(state, move || counter.set(counter.get() + 1));
    (binding, renders)
}

/// Test that every successful write is readable and bumps the edition once.
#[test]
fn read_after_write_and_edition() {
    let state = State::create(json!({"a": {"b": [1, 2]}})).unwrap();
    let paths = [
        state.nested("a").nested("b").nested(1usize),
        state.nested("a").nested("c"),
        state.nested("a"),
        state.clone(),
    ];

    for (step, handle) in paths.iter().enumerate() {
        let before = state.edition();
        let value = json!({"step": step});
        handle.set(value.clone()).unwrap();

        assert_eq!(handle.get().unwrap(), Some(value));
        assert_eq!(state.edition(), before + 1);
    }
}

/// Test that setting a primitive to its current value is not a write.
#[test]
fn idempotent_primitive_set() {
    let state = State::create(json!({"count": 3})).unwrap();
    let (binding, renders) = mount(&state);
    binding.render().nested("count").value().unwrap();

    state.nested("count").set(json!(3)).unwrap();
    assert_eq!(state.edition(), 1);
    assert_eq!(renders.get(), 0);
}

/// Test that appending to an array is one insert at the next index.
#[test]
fn array_merge_appends() {
    let state = State::create(json!([1, 2, 3])).unwrap();
    let (binding, renders) = mount(&state);
    let view = binding.render();
    view.nested(0usize).value().unwrap();

    state.merge(json!([9])).unwrap();

    assert_eq!(state.get().unwrap(), Some(json!([1, 2, 3, 9])));
    assert_eq!(state.edition(), 2);
    // The array's shape changed, and its reader hears about it.
    assert_eq!(renders.get(), 1);
}

/// Test that array deletes shift later elements down and invalidate their
/// tracking.
#[test]
fn array_merge_deletes_shift_indices() {
    let state = State::create(json!({"items": ["a", "b", "c", "d"]})).unwrap();
    let (binding, renders) = mount(&state);
    let view = binding.render();
    let third = view.nested("items").nested(2usize);
    assert_eq!(third.value().unwrap(), json!("c"));

    state
        .nested("items")
        .merge(Partial::entries().without(0usize).without(1usize))
        .unwrap();

    assert_eq!(state.nested("items").get().unwrap(), Some(json!(["c", "d"])));
    assert_eq!(state.edition(), 2);
    assert_eq!(renders.get(), 1);

    // After the next render the same index names the shifted element.
    let view = binding.render();
    assert_eq!(view.nested("items").nested(0usize).value().unwrap(), json!("c"));
    assert_eq!(view.nested("items").nested(2usize).get().unwrap(), None);
}

/// Test that object merges update, insert and delete in one write.
#[test]
fn object_merge_updates_and_deletes() {
    let state = State::create(json!({"a": 1, "b": 2})).unwrap();
    state
        .merge(Partial::entries().with("a", json!(5)).without("b"))
        .unwrap();

    assert_eq!(state.get().unwrap(), Some(json!({"a": 5})));
    assert_eq!(state.edition(), 2);
}

/// Test that a merge of updates only notifies readers of the touched keys.
#[test]
fn update_only_merge_is_split_per_key() {
    let state = State::create(json!({"a": 1, "b": 2, "c": 3})).unwrap();
    let (binding, renders) = mount(&state);
    binding.render().nested("a").value().unwrap();

    state.merge(json!({"b": 20, "c": 30})).unwrap();
    assert_eq!(renders.get(), 0);

    state.merge(json!({"a": 10, "b": 21})).unwrap();
    assert_eq!(renders.get(), 1);
}

/// Test that merging text appends to a string.
#[test]
fn string_merge_concatenates() {
    let state = State::create(json!({"log": "a"})).unwrap();
    state.nested("log").merge(json!("b")).unwrap();
    assert_eq!(state.nested("log").value().unwrap(), json!("ab"));

    state.nested("log").merge(json!(5)).unwrap();
    assert_eq!(state.nested("log").value().unwrap(), json!("ab5"));
}

/// Test notification scoping: sibling writes are ignored, ancestor
/// replacement and direct writes are not.
#[test]
fn notification_scoping() {
    let state = State::create(json!({"a": {"x": 1}, "b": {"y": 1}})).unwrap();
    let (binding, renders) = mount(&state);
    binding.render().nested("a").nested("x").value().unwrap();

    state.nested("b").nested("y").set(json!(2)).unwrap();
    state.nested("b").set(json!({"z": 1})).unwrap();
    assert_eq!(renders.get(), 0);

    state.nested("a").nested("x").set(json!(2)).unwrap();
    assert_eq!(renders.get(), 1);

    state.set(json!({"a": {"x": 2}})).unwrap();
    assert_eq!(renders.get(), 2);
}

/// Test that each re-render callback runs once per write, after the whole
/// fan-out, even when several nodes of the consumer are affected.
#[test]
fn rerender_runs_once_per_write() {
    let state = State::create(json!({"a": 1, "b": 2})).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let reader = state.clone();
    let binding = Binding::attach(&state, move || {
        // The store is consistent by the time any callback runs.
        log.borrow_mut().push(reader.get_untracked().unwrap());
    });
    let view = binding.render();
    view.nested("a").value().unwrap();
    view.nested("b").value().unwrap();

    state.merge(json!({"a": 10, "b": 20})).unwrap();
    assert_eq!(*seen.borrow(), vec![Some(json!({"a": 10, "b": 20}))]);
}

/// Test the root future flow on a host-driven queue.
#[test]
fn root_future_resolves() {
    let queue = LocalQueue::new();
    let config = Config::default().with_spawner(queue.clone());
    let (tx, rx) = oneshot::channel::<Value>();
    let state = State::with_config(
        SetValue::future(async move { rx.await.map_err(|_| Rejection::new("sender dropped")) }),
        config,
    )
    .unwrap();

    assert!(state.promised());
    assert!(matches!(state.get(), Err(StateError::ReadWhilePending { .. })));
    assert!(matches!(
        state.set(json!("early")),
        Err(StateError::SetWhilePending { .. })
    ));
    assert!(matches!(
        state.nested("a").set(json!(1)),
        Err(StateError::SetWhilePending { .. })
    ));

    let (binding, renders) = mount(&state);
    assert!(binding.render().promised());
    let edition = state.edition();

    tx.send(json!({"ready": true})).unwrap();
    assert_eq!(queue.run_pending(), 1);

    assert!(!state.promised());
    assert_eq!(state.value().unwrap(), json!({"ready": true}));
    assert_eq!(state.edition(), edition + 1);
    assert_eq!(renders.get(), 1);
}

/// Test that a rejected root future is surfaced through `error` and reads.
#[test]
fn root_future_rejects() {
    let queue = LocalQueue::new();
    let config = Config::default().with_spawner(queue.clone());
    let state = State::with_config(
        SetValue::future(async { Err(Rejection::new("offline")) }),
        config,
    )
    .unwrap();

    let (binding, renders) = mount(&state);
    assert!(binding.render().error().is_none());
    let edition = state.edition();

    queue.run_pending();
    assert_eq!(renders.get(), 1);
    // One edition for the rejection, and the root stays absent.
    assert_eq!(state.edition(), edition + 1);
    assert_eq!(state.get_untracked(), Err(StateError::Rejected(Rejection::new("offline"))));
    assert!(!state.promised());
    assert_eq!(state.error(), Some(Rejection::new("offline")));
    assert_eq!(
        state.get(),
        Err(StateError::Rejected(Rejection::new("offline")))
    );

    // A failed root can be replaced with a value.
    state.set(json!(1)).unwrap();
    assert_eq!(state.value().unwrap(), json!(1));
    assert_eq!(state.error(), None);
}

/// Test the root future flow with tokio's `LocalSet` as the task queue.
#[tokio::test(flavor = "current_thread")]
async fn root_future_on_local_set() {
    let local = Rc::new(tokio::task::LocalSet::new());
    let config = Config::default().with_spawner(Rc::new(TokioSpawner::new(local.clone())));
    local
        .run_until(async {
            let (tx, rx) = oneshot::channel::<Value>();
            let state = State::with_config(
                SetValue::future(async move {
                    rx.await.map_err(|_| Rejection::new("sender dropped"))
                }),
                config,
            )
            .unwrap();
            assert!(state.promised());

            tx.send(json!([1, 2])).unwrap();
            for _ in 0..100 {
                if !state.promised() {
                    break;
                }
                tokio::task::yield_now().await;
            }

            assert_eq!(state.value().unwrap(), json!([1, 2]));
            assert_eq!(state.edition(), 2);
        })
        .await;
}

/// Test that a root future with the default config waits on the thread's
/// queue instead of needing a runtime.
#[test]
fn root_future_without_runtime() {
    let state = State::create(SetValue::future(async { Ok(json!(1)) })).unwrap();
    assert!(state.promised());

    assert_eq!(LocalQueue::current().run_pending(), 1);
    assert!(!state.promised());
    assert_eq!(state.value().unwrap(), json!(1));

    // Replacing the root with a future goes through the same queue.
    state.set(SetValue::future(async { Ok(json!(2)) })).unwrap();
    assert!(state.promised());
    LocalQueue::current().run_pending();
    assert_eq!(state.value().unwrap(), json!(2));
}

/// Test that a settlement landing after the consumer unmounted re-renders
/// nothing.
#[test]
fn settlement_after_unmount() {
    let queue = LocalQueue::new();
    let config = Config::default().with_spawner(queue.clone());
    let (tx, rx) = oneshot::channel::<Value>();
    let state = State::with_config(
        SetValue::future(async move { rx.await.map_err(|_| Rejection::new("sender dropped")) }),
        config,
    )
    .unwrap();

    let (binding, renders) = mount(&state);
    assert!(binding.render().promised());
    drop(binding);

    tx.send(json!({"late": true})).unwrap();
    assert_eq!(queue.run_pending(), 1);
    assert_eq!(renders.get(), 0);
    assert_eq!(state.value().unwrap(), json!({"late": true}));
}

/// Test that a settlement landing after a locally owned store is gone is
/// dropped.
#[test]
fn settlement_after_local_unmount() {
    let queue = LocalQueue::new();
    let config = Config::default().with_spawner(queue.clone());
    let (tx, rx) = oneshot::channel::<Value>();
    let renders = Rc::new(Cell::new(0));
    let counter = renders.clone();
    let binding = Binding::local_with_config(
        SetValue::future(async move { rx.await.map_err(|_| Rejection::new("sender dropped")) }),
        config,
        move || counter.set(counter.get() + 1),
    )
    .unwrap();
    assert!(binding.render().promised());
    drop(binding);

    tx.send(json!(1)).unwrap();
    assert_eq!(queue.run_pending(), 1);
    assert_eq!(renders.get(), 0);
}

/// Test that a root deleted by a write waits for the next explicit value.
#[test]
fn deleted_root_is_completed_by_write() {
    let state = State::create(json!({"a": 1})).unwrap();
    state.set(SetValue::None).unwrap();

    assert!(state.promised());
    assert!(matches!(state.get(), Err(StateError::ReadWhilePending { .. })));

    state.set(json!({"b": 2})).unwrap();
    assert!(!state.promised());
    assert_eq!(state.value().unwrap(), json!({"b": 2}));
    assert_eq!(state.edition(), 3);
}

#[derive(Default)]
struct Recorder {
    writes: RefCell<Vec<WriteInfo>>,
    destroys: RefCell<Vec<DestroyInfo>>,
}

impl PluginInstance for Recorder {
    fn on_write(&self, info: &WriteInfo) {
        self.writes.borrow_mut().push(info.clone());
    }

    fn on_destroy(&self, info: &DestroyInfo) {
        self.destroys.borrow_mut().push(info.clone());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct RecorderPlugin {
    id: PluginId,
}

impl Plugin for RecorderPlugin {
    fn id(&self) -> PluginId {
        self.id
    }

    fn init(&self, root: &State) -> Option<Rc<dyn PluginInstance>> {
        assert!(root.path().is_root());
        Some(Rc::new(Recorder::default()))
    }
}

fn recorder(state: &State, id: PluginId) -> Rc<dyn PluginInstance> {
    state.plugin(id).unwrap().unwrap()
}

/// Test that plugins see every write with only the meaningful fields set.
#[test]
fn plugins_observe_writes() {
    let state = State::create(json!({"a": 1})).unwrap();
    let plugin = RecorderPlugin {
        id: PluginId::new("recorder"),
    };
    state.attach(&plugin).unwrap();
    state.attach(&plugin).unwrap();

    state.nested("b").set(json!(2)).unwrap();
    state.nested("a").set(SetValue::None).unwrap();
    state.merge(Partial::entries().with("c", json!(3))).unwrap();

    let instance = recorder(&state, plugin.id);
    let recorded = instance.as_any().downcast_ref::<Recorder>().unwrap();
    let writes = recorded.writes.borrow();
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[0].previous, None);
    assert_eq!(writes[0].value, Some(json!(2)));
    assert_eq!(writes[1].previous, Some(json!(1)));
    assert_eq!(writes[1].value, None);
    assert_eq!(writes[2].merged, Some(json!({"c": 3})));
}

/// Test that querying a plugin that was never attached is an error value.
#[test]
fn unknown_plugin_is_reported() {
    let state = State::create(json!(null)).unwrap();
    let id = PluginId::new("missing");
    assert_eq!(state.plugin(id).err(), Some(StateError::UnknownPlugin { id }));
}

/// Test the built-in tracing plugin.
#[test]
fn trace_writes_counts() {
    let state = State::create(json!({"n": 0})).unwrap();
    let tracer = TraceWrites::new();
    state.attach(&tracer).unwrap();

    for n in 1..=3 {
        state.nested("n").set(json!(n)).unwrap();
    }

    let instance = state.plugin(tracer.id()).unwrap().unwrap();
    let tracer = instance.as_any().downcast_ref::<WriteTracer>().unwrap();
    assert_eq!(tracer.writes(), 3);
}

/// Test that destroy is terminal and its callbacks fire exactly once.
#[test]
fn destroy_is_terminal() {
    let state = State::create(json!({"last": true})).unwrap();
    let plugin = RecorderPlugin {
        id: PluginId::new("recorder"),
    };
    state.attach(&plugin).unwrap();
    let instance = recorder(&state, plugin.id);

    state.destroy();
    state.destroy();

    let recorded = instance.as_any().downcast_ref::<Recorder>().unwrap();
    assert_eq!(
        *recorded.destroys.borrow(),
        vec![DestroyInfo {
            value: Some(json!({"last": true}))
        }]
    );
    assert!(matches!(
        state.nested("last").set(json!(false)),
        Err(StateError::DestroyedStore { .. })
    ));
    assert!(matches!(
        state.merge(json!({"x": 1})),
        Err(StateError::DestroyedStore { .. })
    ));
    assert!(matches!(state.attach(&plugin), Err(StateError::DestroyedStore { .. })));
}

/// Test that views refuse direct mutation and stay read-only.
#[test]
fn views_reject_direct_mutation() {
    let state = State::create(json!({"list": [1, 2]})).unwrap();
    let view = state.nested("list").view().unwrap().unwrap();
    let array = view.as_array().unwrap();

    assert!(matches!(
        array.set(0, json!(5)),
        Err(StateError::DirectMutation { .. })
    ));
    assert_eq!(array.len().unwrap(), 2);
    assert_eq!(state.edition(), 1);
}

/// Test that view identity only changes when the viewed value is affected.
#[test]
fn view_identity_is_stable_across_unrelated_writes() {
    let state = State::create(json!({"a": {"x": 1}, "b": 1})).unwrap();
    let (binding, _renders) = mount(&state);
    let handle = binding.render().nested("a");

    let first = handle.view().unwrap().unwrap();
    state.nested("b").set(json!(2)).unwrap();
    let second = handle.view().unwrap().unwrap();
    assert!(first.as_object().unwrap().same_as(second.as_object().unwrap()));

    state.nested("a").set(json!({"x": 2})).unwrap();
    let third = handle.view().unwrap().unwrap();
    assert!(!first.as_object().unwrap().same_as(third.as_object().unwrap()));
}

/// Test dependency-list interception in both modes.
#[test]
fn dependency_interception() {
    let state = State::create(json!({"a": 1})).unwrap();
    let (binding, renders) = mount(&state);
    binding.render().nested("a").value().unwrap();
    let current = binding.render();

    intercept_dependencies(&[Dependency::from(&current)]).unwrap();
    state.nested("a").set(json!(2)).unwrap();
    assert_eq!(renders.get(), 1);

    let strict = State::with_config(
        json!({}),
        Config::default().with_dependency_mode(DependencyMode::Reject),
    )
    .unwrap();
    assert!(matches!(
        intercept_dependencies(&[Dependency::from(&strict)]),
        Err(StateError::StateInDependencyList { .. })
    ));
}
