//! Deep traversal for `deep` watchers.

use std::collections::HashSet;

use super::value::Value;

/// Read every nested slot of `value` so the current unit depends on all of
/// them. Each container is visited once by identity, observed or not, so
/// cyclic structures terminate.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut HashSet<*const ()>) {
    match value {
        Value::Object(obj) => {
            if obj.is_frozen() || !seen.insert(obj.as_ptr()) {
                return;
            }
            for key in obj.keys() {
                walk(&obj.get(&key), seen);
            }
        }
        Value::Array(arr) => {
            if arr.is_frozen() || !seen.insert(arr.as_ptr()) {
                return;
            }
            for item in arr.to_vec() {
                walk(&item, seen);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ReactiveArray, ReactiveObject, Watcher, WatcherFlags, WatcherOptions, observe, toggle_observing};
    use crate::runtime::reset_runtime;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_deep_watcher_sees_nested_writes() {
        reset_runtime();
        let leaf = ReactiveObject::new().with("v", 1);
        let state = ReactiveObject::new().with("nested", ReactiveObject::new().with("leaf", leaf.clone()));
        observe(&Value::from(state.clone()), false);

        let src = state.clone();
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let _w = Watcher::new(
            None,
            move || Ok(src.get("nested")),
            Some(Rc::new(move |_: &Value, _: &Value| {
                counter.set(counter.get() + 1);
                Ok(())
            })),
            WatcherOptions::with_flags(WatcherFlags::DEEP | WatcherFlags::SYNC | WatcherFlags::USER),
        )
        .unwrap();

        leaf.assign("v", 2);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_cycles_terminate() {
        reset_runtime();
        let a = ReactiveObject::new();
        let b = ReactiveObject::new().with("a", a.clone());
        a.assign("b", b.clone());
        observe(&Value::from(a.clone()), false);
        traverse(&Value::from(a.clone()));
        a.remove_entry("b");
    }

    #[test]
    fn test_unobserved_cycles_terminate() {
        reset_runtime();
        toggle_observing(false);
        let obj = ReactiveObject::new();
        let list = ReactiveArray::new();
        obj.assign("list", list.clone());
        list.push(obj.clone());
        list.push(list.clone());
        toggle_observing(true);
        assert!(!obj.is_observed());
        assert!(!list.is_observed());

        traverse(&Value::from(obj.clone()));
        obj.remove_entry("list");
        list.splice(0, 2, Vec::new());
    }
}
