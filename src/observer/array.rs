//! Sequence reactive containers.
//!
//! Index reads and writes on a [`ReactiveArray`] are not tracked. Changes
//! are made through the mutating methods, which observe inserted items and
//! notify the array's container-level dep once observed. Readers subscribe
//! to that dep by reading the slot that holds the array.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::Observer;
use super::observe;
use super::value::Value;
use crate::error::dev_warn;

#[derive(Default)]
struct ArrayInner {
    items: RefCell<Vec<Value>>,
    observer: RefCell<Option<Rc<Observer>>>,
    frozen: Cell<bool>,
}

/// Shared reactive sequence.
#[derive(Clone, Default)]
pub struct ReactiveArray {
    inner: Rc<ArrayInner>,
}

impl ReactiveArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        let arr = Self::new();
        *arr.inner.items.borrow_mut() = items;
        arr
    }

    pub fn ptr_eq(&self, other: &ReactiveArray) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.inner).cast()
    }

    pub fn get(&self, index: usize) -> Value {
        self.inner.items.borrow().get(index).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        self.inner.items.borrow().iter().position(|v| v.same_value(needle))
    }

    pub fn freeze(&self) {
        self.inner.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get()
    }

    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.inner.observer.borrow().clone()
    }

    pub fn is_observed(&self) -> bool {
        self.inner.observer.borrow().is_some()
    }

    pub(crate) fn attach_observer(&self) -> Rc<Observer> {
        let observer = Rc::new(Observer::new());
        *self.inner.observer.borrow_mut() = Some(observer.clone());
        for item in self.to_vec() {
            observe(&item, false);
        }
        observer
    }

    fn writable(&self, method: &str) -> bool {
        if self.is_frozen() {
            dev_warn(&format!("Cannot call {method}() on a frozen array"), None);
            return false;
        }
        true
    }

    fn mutated(&self, inserted: &[Value]) {
        if let Some(ob) = self.observer() {
            for item in inserted {
                observe(item, false);
            }
            ob.dep().notify();
        }
    }

    // =========================================================================
    // Mutating methods
    // =========================================================================

    /// Append, returning the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        if !self.writable("push") {
            return self.len();
        }
        let value = value.into();
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.push(value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    /// Remove the last item (`Undefined` if empty).
    pub fn pop(&self) -> Value {
        if !self.writable("pop") {
            return Value::Undefined;
        }
        let removed = self.inner.items.borrow_mut().pop().unwrap_or_default();
        self.mutated(&[]);
        removed
    }

    /// Remove the first item (`Undefined` if empty).
    pub fn shift(&self) -> Value {
        if !self.writable("shift") {
            return Value::Undefined;
        }
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            if items.is_empty() { Value::Undefined } else { items.remove(0) }
        };
        self.mutated(&[]);
        removed
    }

    /// Prepend `values` in order, returning the new length.
    pub fn unshift(&self, values: Vec<Value>) -> usize {
        if !self.writable("unshift") {
            return self.len();
        }
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.splice(0..0, values.iter().cloned());
            items.len()
        };
        self.mutated(&values);
        len
    }

    /// Remove `delete_count` items at `start` and insert `values` there.
    /// Out-of-range bounds are clamped. Returns the removed items.
    pub fn splice(&self, start: usize, delete_count: usize, values: Vec<Value>) -> Vec<Value> {
        if !self.writable("splice") {
            return Vec::new();
        }
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, values.iter().cloned()).collect()
        };
        self.mutated(&values);
        removed
    }

    /// Insert `value` before `index` (clamped to the length).
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        self.splice(index, 0, vec![value.into()]);
    }

    /// Replace the item at `index`, notifying. Extends with `Undefined` when
    /// `index` is past the end.
    pub fn set_index(&self, index: usize, value: impl Into<Value>) {
        if !self.writable("set") {
            return;
        }
        let value = value.into();
        {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value.clone();
        }
        self.mutated(&[value]);
    }

    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) {
        if !self.writable("sort") {
            return;
        }
        self.inner.items.borrow_mut().sort_by(compare);
        self.mutated(&[]);
    }

    pub fn reverse(&self) {
        if !self.writable("reverse") {
            return;
        }
        self.inner.items.borrow_mut().reverse();
        self.mutated(&[]);
    }
}

impl From<Vec<Value>> for ReactiveArray {
    fn from(items: Vec<Value>) -> Self {
        Self::from_vec(items)
    }
}

impl fmt::Debug for ReactiveArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

/// Subscribe the current unit to every observed container inside `arr`.
///
/// Array elements have no slot deps of their own, so readers of the array
/// depend on nested containers directly.
pub(crate) fn depend_array(arr: &ReactiveArray) {
    for item in arr.to_vec() {
        if let Some(ob) = item.observer() {
            ob.dep().depend();
        }
        if let Value::Array(nested) = &item {
            depend_array(nested);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ReactiveObject, Watcher, WatcherFlags, WatcherOptions};
    use crate::runtime::reset_runtime;

    fn watched_list() -> (ReactiveObject, ReactiveArray, Watcher, Rc<Cell<usize>>) {
        let list = ReactiveArray::from_vec(vec![Value::from(1), Value::from(2)]);
        let state = ReactiveObject::new().with("list", list.clone());
        observe(&Value::from(state.clone()), false);
        let src = state.clone();
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let w = Watcher::new(
            None,
            move || {
                counter.set(counter.get() + 1);
                Ok(src.get("list"))
            },
            None,
            WatcherOptions::with_flags(WatcherFlags::SYNC),
        )
        .unwrap();
        (state, list, w, runs)
    }

    #[test]
    fn test_mutators_notify() {
        reset_runtime();
        let (_state, list, _w, runs) = watched_list();
        assert_eq!(list.push(3), 3);
        assert_eq!(runs.get(), 2);
        assert_eq!(list.pop(), Value::from(3));
        assert_eq!(runs.get(), 3);
        list.reverse();
        assert_eq!(list.to_vec(), vec![Value::from(2), Value::from(1)]);
        assert_eq!(runs.get(), 4);
    }

    #[test]
    fn test_splice_clamps_and_returns_removed() {
        reset_runtime();
        let list = ReactiveArray::from_vec(vec![Value::from(1), Value::from(2), Value::from(3)]);
        let removed = list.splice(1, 10, vec![Value::from("x")]);
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        assert_eq!(list.to_vec(), vec![Value::from(1), Value::from("x")]);

        let removed = list.splice(99, 1, vec![Value::from(9)]);
        assert!(removed.is_empty());
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_inserted_items_are_observed() {
        reset_runtime();
        let (_state, list, _w, _runs) = watched_list();
        let item = ReactiveObject::new().with("a", 1);
        list.push(item.clone());
        assert!(item.is_observed());
    }

    #[test]
    fn test_unobserved_array_mutates_quietly() {
        reset_runtime();
        let list = ReactiveArray::new();
        list.push(1);
        list.unshift(vec![Value::from(0)]);
        assert_eq!(list.to_vec(), vec![Value::from(0), Value::from(1)]);
        assert_eq!(list.shift(), Value::from(0));
    }

    #[test]
    fn test_nested_element_mutation_reaches_reader() {
        reset_runtime();
        let (_state, list, _w, runs) = watched_list();
        let nested = ReactiveArray::new();
        list.push(nested.clone());
        assert_eq!(runs.get(), 2);
        nested.push(1);
        assert_eq!(runs.get(), 3);
    }
}
