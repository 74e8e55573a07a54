//! Keyed reactive containers.
//!
//! A [`ReactiveObject`] is an ordered map of slots. A slot becomes *tracked*
//! once it carries its own [`Dep`]: reads then subscribe the current unit and
//! writes of a different value notify. Slots are made tracked by observing
//! the object (every key at that moment) or by [`define_reactive`] /
//! [`set`](super::set) later on.
//!
//! Keys added by plain assignment after observation stay untracked, as does
//! everything in a frozen object.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::Observer;
use super::array::depend_array;
use super::dep::{Dep, has_target};
use super::observe;
use super::value::Value;
use crate::error::dev_warn;

struct Slot {
    value: Value,
    dep: Option<Dep>,
}

#[derive(Default)]
struct ObjectInner {
    slots: RefCell<IndexMap<String, Slot>>,
    observer: RefCell<Option<Rc<Observer>>>,
    frozen: Cell<bool>,
}

/// Shared, insertion-ordered object.
#[derive(Clone, Default)]
pub struct ReactiveObject {
    inner: Rc<ObjectInner>,
}

impl ReactiveObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style plain insert.
    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        self.assign(key, value);
        self
    }

    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let obj = Self::new();
        {
            let mut slots = obj.inner.slots.borrow_mut();
            for (k, v) in entries {
                slots.insert(k.into(), Slot { value: v.into(), dep: None });
            }
        }
        obj
    }

    pub fn ptr_eq(&self, other: &ReactiveObject) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the shared container, for identity sets.
    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.inner).cast()
    }

    /// Read a key, subscribing the current unit if the slot is tracked.
    ///
    /// Nested observed containers are subscribed at container level as well,
    /// so in-place mutation of the child re-triggers the reader.
    pub fn get(&self, key: &str) -> Value {
        let (value, dep) = match self.inner.slots.borrow().get(key) {
            Some(slot) => (slot.value.clone(), slot.dep.clone()),
            None => return Value::Undefined,
        };
        if let Some(dep) = dep {
            if has_target() {
                dep.depend();
                if let Some(child) = value.observer() {
                    child.dep().depend();
                    if let Value::Array(arr) = &value {
                        depend_array(arr);
                    }
                }
            }
        }
        value
    }

    /// Read without subscribing.
    pub fn peek(&self, key: &str) -> Value {
        self.inner
            .slots
            .borrow()
            .get(key)
            .map(|slot| slot.value.clone())
            .unwrap_or_default()
    }

    /// Write a key.
    ///
    /// Tracked slots notify when the value changes and observe the new value.
    /// Untracked or new keys are plain writes. Frozen objects refuse new keys
    /// and untracked writes.
    pub fn assign(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let tracked = self.inner.slots.borrow().get(key).and_then(|slot| slot.dep.clone());
        match tracked {
            Some(dep) => self.write_tracked(key, value, &dep),
            None => {
                if self.is_frozen() {
                    dev_warn(&format!("Cannot assign \"{key}\" on a frozen object"), None);
                    return;
                }
                let mut slots = self.inner.slots.borrow_mut();
                match slots.get_mut(key) {
                    Some(slot) => slot.value = value,
                    None => {
                        slots.insert(key.to_string(), Slot { value, dep: None });
                    }
                }
            }
        }
    }

    fn write_tracked(&self, key: &str, value: Value, dep: &Dep) {
        let old = self.peek(key);
        if value.same_value(&old) {
            return;
        }
        observe(&value, false);
        if let Some(slot) = self.inner.slots.borrow_mut().get_mut(key) {
            slot.value = value;
        }
        dep.notify();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.slots.borrow().contains_key(key)
    }

    /// Whether the key exists and carries its own dep.
    pub fn is_tracked(&self, key: &str) -> bool {
        self.inner
            .slots
            .borrow()
            .get(key)
            .is_some_and(|slot| slot.dep.is_some())
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.slots.borrow().keys().cloned().collect()
    }

    /// Untracked snapshot of all entries.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .slots
            .borrow()
            .iter()
            .map(|(k, slot)| (k.clone(), slot.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.borrow().is_empty()
    }

    /// Mark as non-extensible. Frozen objects are never observed.
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

    /// Attach an observer and make every current key tracked.
    pub(crate) fn attach_observer(&self) -> Rc<Observer> {
        let observer = Rc::new(Observer::new());
        // Attach first so cycles through this object terminate.
        *self.inner.observer.borrow_mut() = Some(observer.clone());
        for (key, value) in self.entries() {
            self.define_tracked(&key, value);
        }
        observer
    }

    /// Install a tracked slot holding `value`.
    pub(crate) fn define_tracked(&self, key: &str, value: Value) {
        observe(&value, false);
        let mut slots = self.inner.slots.borrow_mut();
        slots.insert(
            key.to_string(),
            Slot {
                value,
                dep: Some(Dep::new()),
            },
        );
    }

    /// Remove a key, returning whether it existed. No notification.
    pub(crate) fn remove_entry(&self, key: &str) -> bool {
        self.inner.slots.borrow_mut().shift_remove(key).is_some()
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{Watcher, WatcherFlags, WatcherOptions};
    use crate::runtime::reset_runtime;

    fn sync_reader(obj: &ReactiveObject, key: &'static str) -> (Watcher, Rc<Cell<usize>>) {
        let src = obj.clone();
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let w = Watcher::new(
            None,
            move || {
                counter.set(counter.get() + 1);
                Ok(src.get(key))
            },
            None,
            WatcherOptions::with_flags(WatcherFlags::SYNC),
        )
        .unwrap();
        (w, runs)
    }

    #[test]
    fn test_same_value_write_does_not_notify() {
        reset_runtime();
        let obj = ReactiveObject::new().with("a", 1);
        observe(&Value::from(obj.clone()), false);
        let (_w, runs) = sync_reader(&obj, "a");

        obj.assign("a", 1);
        assert_eq!(runs.get(), 1);
        obj.assign("a", 2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_nan_write_does_not_notify() {
        reset_runtime();
        let obj = ReactiveObject::new().with("x", f64::NAN);
        observe(&Value::from(obj.clone()), false);
        let (_w, runs) = sync_reader(&obj, "x");

        obj.assign("x", f64::NAN);
        assert_eq!(runs.get(), 1);
        obj.assign("x", 0.0);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_untracked_key_does_not_notify() {
        reset_runtime();
        let obj = ReactiveObject::new();
        observe(&Value::from(obj.clone()), false);
        obj.assign("late", 1);
        assert!(!obj.is_tracked("late"));

        let (_w, runs) = sync_reader(&obj, "late");
        obj.assign("late", 2);
        assert_eq!(runs.get(), 1);
        assert_eq!(obj.peek("late"), Value::from(2));
    }

    #[test]
    fn test_nested_container_dep_is_collected() {
        reset_runtime();
        let inner = ReactiveObject::new().with("x", 1);
        let outer = ReactiveObject::new().with("inner", inner.clone());
        observe(&Value::from(outer.clone()), false);
        assert!(inner.is_observed());

        let (_w, runs) = sync_reader(&outer, "inner");
        // Container-level notification reaches the reader of "inner".
        inner.observer().unwrap().dep().notify();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_assigned_container_gets_observed() {
        reset_runtime();
        let obj = ReactiveObject::new().with("child", Value::Null);
        observe(&Value::from(obj.clone()), false);
        let child = ReactiveObject::new().with("y", 1);
        obj.assign("child", child.clone());
        assert!(child.is_observed());
        assert!(child.is_tracked("y"));
    }

    #[test]
    fn test_frozen_object_refuses_new_keys() {
        reset_runtime();
        crate::config::configure(|c| c.silent = true);
        let obj = ReactiveObject::new().with("a", 1);
        obj.freeze();
        obj.assign("b", 2);
        assert!(!obj.contains_key("b"));
        assert!(observe(&Value::from(obj.clone()), false).is_none());
    }

    #[test]
    fn test_cyclic_object_observes_once() {
        reset_runtime();
        let obj = ReactiveObject::new();
        obj.assign("me", obj.clone());
        let ob = observe(&Value::from(obj.clone()), false).unwrap();
        let again = observe(&Value::from(obj.clone()), false).unwrap();
        assert!(Rc::ptr_eq(&ob, &again));
        // Break the cycle so the test doesn't leak.
        obj.remove_entry("me");
    }
}
