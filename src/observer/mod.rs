//! Reactive state tracking.
//!
//! This module turns plain containers into observed ones and records which
//! units read which slots:
//!
//! - [`Dep`]: subscription cell, one per tracked slot plus one per container
//! - [`Observer`]: marker attached to an observed container
//! - [`Watcher`]: a unit of work re-run when its deps change
//! - [`observe`] / [`define_reactive`]: make containers and slots tracked
//! - [`set`] / [`del`]: add or remove keys so that readers are notified
//!
//! # Example
//!
//! ```ignore
//! let state = ReactiveObject::new().with("count", 0);
//! observe(&Value::from(state.clone()), false);
//!
//! let reader = state.clone();
//! let w = Watcher::new(None, move || Ok(reader.get("count")), None,
//!     WatcherOptions::with_flags(WatcherFlags::SYNC))?;
//!
//! state.assign("count", 1); // w re-runs
//! ```

pub mod array;
pub mod dep;
pub mod object;
pub mod traverse;
pub mod value;
pub mod watcher;

use std::cell::Cell;
use std::rc::Rc;

pub use array::ReactiveArray;
pub use dep::{Dep, DepId, current_target, has_target, untracked};
pub use object::ReactiveObject;
pub use traverse::traverse;
pub use value::Value;
pub use watcher::{Getter, Watcher, WatcherCallback, WatcherFlags, WatcherId, WatcherOptions};

use crate::component::Instance;
use crate::error::{MutationError, warn};
use crate::runtime::with_context;

// =============================================================================
// Observer
// =============================================================================

/// Marker attached to an observed container.
///
/// Its dep is notified on structural change (array mutators, [`set`] and
/// [`del`]). `vm_count` counts the instances using the container as root
/// data.
#[derive(Debug)]
pub struct Observer {
    dep: Dep,
    vm_count: Cell<usize>,
}

impl Observer {
    pub(crate) fn new() -> Self {
        Self {
            dep: Dep::new(),
            vm_count: Cell::new(0),
        }
    }

    pub fn dep(&self) -> &Dep {
        &self.dep
    }

    pub fn vm_count(&self) -> usize {
        self.vm_count.get()
    }

    pub(crate) fn release_root(&self) {
        self.vm_count.set(self.vm_count.get().saturating_sub(1));
    }
}

/// Globally enable or disable observation of new containers.
///
/// Used while assigning parent-owned prop values so they stay as they are.
pub fn toggle_observing(enabled: bool) {
    with_context(|ctx| ctx.should_observe = enabled);
}

pub fn should_observe() -> bool {
    with_context(|ctx| ctx.should_observe)
}

/// Attach an observer to `value` if it is an unobserved, non-frozen
/// container and observation is enabled. Returns the container's observer.
///
/// `as_root` marks the container as some instance's root data.
pub fn observe(value: &Value, as_root: bool) -> Option<Rc<Observer>> {
    let observer = match value {
        Value::Object(obj) => obj
            .observer()
            .or_else(|| (should_observe() && !obj.is_frozen()).then(|| obj.attach_observer())),
        Value::Array(arr) => arr
            .observer()
            .or_else(|| (should_observe() && !arr.is_frozen()).then(|| arr.attach_observer())),
        _ => None,
    };
    if as_root {
        if let Some(ob) = &observer {
            ob.vm_count.set(ob.vm_count.get() + 1);
        }
    }
    observer
}

/// Install `key` on `obj` as a tracked slot holding `value`.
pub fn define_reactive(obj: &ReactiveObject, key: &str, value: impl Into<Value>) {
    obj.define_tracked(key, value.into());
}

// =============================================================================
// Explicit mutation API
// =============================================================================

/// Key used by [`set`] and [`del`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKey {
    Index(usize),
    Name(String),
}

impl From<usize> for PropertyKey {
    fn from(i: usize) -> Self {
        PropertyKey::Index(i)
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::Name(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        PropertyKey::Name(s)
    }
}

impl PropertyKey {
    fn as_index(&self) -> Option<usize> {
        match self {
            PropertyKey::Index(i) => Some(*i),
            PropertyKey::Name(s) => s.parse().ok(),
        }
    }

    fn to_name(&self) -> String {
        match self {
            PropertyKey::Index(i) => i.to_string(),
            PropertyKey::Name(s) => s.clone(),
        }
    }
}

/// Receiver of [`set`] / [`del`].
pub enum SetTarget {
    Value(Value),
    Instance(Instance),
}

impl From<Value> for SetTarget {
    fn from(v: Value) -> Self {
        SetTarget::Value(v)
    }
}

impl From<&ReactiveObject> for SetTarget {
    fn from(o: &ReactiveObject) -> Self {
        SetTarget::Value(Value::Object(o.clone()))
    }
}

impl From<&ReactiveArray> for SetTarget {
    fn from(a: &ReactiveArray) -> Self {
        SetTarget::Value(Value::Array(a.clone()))
    }
}

impl From<&Instance> for SetTarget {
    fn from(vm: &Instance) -> Self {
        SetTarget::Instance(vm.clone())
    }
}

fn refuse(err: MutationError, vm: Option<&Instance>) -> Result<(), MutationError> {
    warn(&err.to_string(), vm);
    Err(err)
}

/// Set a key so that readers are notified even if the key is new.
///
/// Arrays grow as needed and replace the item at the index. New keys on an
/// observed object become tracked and notify the container dep. Refuses
/// component instances and root data objects.
pub fn set(
    target: impl Into<SetTarget>,
    key: impl Into<PropertyKey>,
    value: impl Into<Value>,
) -> Result<Value, MutationError> {
    let key = key.into();
    let value = value.into();
    match target.into() {
        SetTarget::Instance(vm) => refuse(MutationError::InstanceTarget, Some(&vm)).map(|_| value),
        SetTarget::Value(Value::Array(arr)) => {
            let Some(index) = key.as_index() else {
                return refuse(MutationError::InvalidArrayKey(key.to_name()), None).map(|_| value);
            };
            arr.set_index(index, value.clone());
            Ok(value)
        }
        SetTarget::Value(Value::Object(obj)) => {
            let name = key.to_name();
            if obj.contains_key(&name) {
                obj.assign(&name, value.clone());
                return Ok(value);
            }
            let Some(ob) = obj.observer() else {
                obj.assign(&name, value.clone());
                return Ok(value);
            };
            if ob.vm_count() > 0 {
                return refuse(MutationError::RootData, None).map(|_| value);
            }
            obj.define_tracked(&name, value.clone());
            ob.dep().notify();
            Ok(value)
        }
        SetTarget::Value(other) => refuse(MutationError::PrimitiveTarget(other.type_name()), None).map(|_| value),
    }
}

/// Delete a key and notify readers of the container.
pub fn del(target: impl Into<SetTarget>, key: impl Into<PropertyKey>) -> Result<(), MutationError> {
    let key = key.into();
    match target.into() {
        SetTarget::Instance(vm) => refuse(MutationError::InstanceTarget, Some(&vm)),
        SetTarget::Value(Value::Array(arr)) => {
            let Some(index) = key.as_index() else {
                return refuse(MutationError::InvalidArrayKey(key.to_name()), None);
            };
            if index < arr.len() {
                arr.splice(index, 1, Vec::new());
            }
            Ok(())
        }
        SetTarget::Value(Value::Object(obj)) => {
            let ob = obj.observer();
            if ob.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                return refuse(MutationError::RootData, None);
            }
            if !obj.remove_entry(&key.to_name()) {
                return Ok(());
            }
            if let Some(ob) = ob {
                ob.dep().notify();
            }
            Ok(())
        }
        SetTarget::Value(other) => refuse(MutationError::PrimitiveTarget(other.type_name()), None),
    }
}
