//! Scheduler ordering, dedup and the runaway-update guard.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use spark_view::runtime::scheduler::MAX_UPDATE_COUNT;
use spark_view::{
    ComponentOptions, Instance, MemoryDom, Patcher, ReactiveObject, Value, VNodeData, Watcher, WatcherFlags,
    WatcherOptions, configure, observe, reset_runtime, run_until_idle,
};

#[test]
fn test_user_watchers_run_before_render() {
    reset_runtime();
    let log: Rc<RefCell<Vec<String>>> = Rc::default();
    let watch_log = log.clone();
    let render_log = log.clone();
    let def = ComponentOptions::new()
        .data(|_| Ok(ReactiveObject::new().with("n", 0)))
        .watch("n", move |_, new, _| {
            watch_log.borrow_mut().push(format!("watch {new}"));
            Ok(())
        })
        .render(move |h| {
            render_log.borrow_mut().push(format!("render {}", h.get("n")));
            Ok(h.element("i", VNodeData::new(), vec![]).into())
        })
        .build();
    let vm = Instance::new(&def, Patcher::new(MemoryDom::new())).unwrap();
    vm.mount(None).unwrap();

    vm.assign("n", 1);
    run_until_idle();
    assert_eq!(*log.borrow(), vec!["render 0", "watch 1", "render 1"]);
}

#[test]
fn test_self_triggering_watcher_is_halted() {
    reset_runtime();
    let warnings: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = warnings.clone();
    configure(|c| c.warn_handler = Some(Rc::new(move |msg, _| sink.borrow_mut().push(msg.to_string()))));

    let def = ComponentOptions::new()
        .data(|_| Ok(ReactiveObject::new().with("n", 0)))
        .watch("n", |vm, new, _| {
            vm.assign("n", new.as_number().unwrap_or(0.0) + 1.0);
            Ok(())
        })
        .build();
    let vm = Instance::new(&def, Patcher::new(MemoryDom::new())).unwrap();

    vm.assign("n", 1);
    run_until_idle();

    assert_eq!(warnings.borrow().len(), 1);
    assert!(warnings.borrow()[0].contains("infinite update loop in watcher with expression \"n\""));
    // Initial run plus the allowed re-queues, each bumping by one.
    assert_eq!(vm.get("n"), Value::from((MAX_UPDATE_COUNT + 2) as f64));
}

/// Builds a user unit logging `label {value}` each time `key` changes and
/// running `react` with the new value.
fn logging_watcher(
    state: &ReactiveObject,
    key: &'static str,
    label: &'static str,
    log: &Rc<RefCell<Vec<String>>>,
    react: impl Fn(&Value) + 'static,
) -> Watcher {
    let source = state.clone();
    let sink = log.clone();
    Watcher::new(
        None,
        move || Ok(source.get(key)),
        Some(Rc::new(move |new: &Value, _: &Value| {
            sink.borrow_mut().push(format!("{label} {new}"));
            react(new);
            Ok(())
        })),
        WatcherOptions::with_flags(WatcherFlags::USER),
    )
    .unwrap()
}

#[test]
fn test_units_queued_mid_flush_run_in_same_flush() {
    reset_runtime();
    let state = ReactiveObject::new().with("x", 0).with("y", 0);
    observe(&Value::from(state.clone()), false);
    let log: Rc<RefCell<Vec<String>>> = Rc::default();

    let writes_y = state.clone();
    let w1 = logging_watcher(&state, "x", "w1", &log, move |new| {
        if *new == Value::from(1) {
            writes_y.assign("y", 1);
        }
    });
    let writes_x = state.clone();
    let w2 = logging_watcher(&state, "y", "w2", &log, move |new| {
        if *new == Value::from(1) {
            writes_x.assign("x", 2);
        }
    });
    assert!(w1.id() < w2.id());

    state.assign("x", 1);
    // w2 is spliced in after w1; w1's slot has passed, so it runs right after.
    assert_eq!(run_until_idle(), 1);
    assert_eq!(*log.borrow(), vec!["w1 1", "w2 1", "w1 2"]);
}

proptest! {
    /// Whatever the mutation order, each affected unit runs once and units
    /// run in creation order.
    #[test]
    fn flush_dedupes_and_sorts(writes in proptest::collection::vec(0usize..6, 1..30)) {
        reset_runtime();
        let state = ReactiveObject::from_entries((0..6).map(|i| (format!("k{i}"), 0)));
        observe(&Value::from(state.clone()), false);

        let runs: Rc<RefCell<Vec<usize>>> = Rc::default();
        let watchers: Vec<Watcher> = (0..6)
            .map(|i| {
                let source = state.clone();
                let sink = runs.clone();
                Watcher::new(
                    None,
                    move || Ok(source.get(&format!("k{i}"))),
                    Some(Rc::new(move |_: &Value, _: &Value| {
                        sink.borrow_mut().push(i);
                        Ok(())
                    })),
                    WatcherOptions::with_flags(WatcherFlags::USER),
                )
                .unwrap()
            })
            .collect();

        for (step, key) in writes.iter().enumerate() {
            state.assign(&format!("k{key}"), step + 1);
        }
        run_until_idle();

        let mut expected: Vec<usize> = writes.clone();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(runs.borrow().clone(), expected);
        drop(watchers);
    }
}
