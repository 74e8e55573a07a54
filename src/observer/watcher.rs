//! Watchers: units of reactive work.
//!
//! A [`Watcher`] wraps a getter. Evaluating it with the unit on top of the
//! target stack records every dep the getter reads; a later notification on
//! any of those deps schedules the unit again.
//!
//! Behaviour is selected by [`WatcherFlags`]:
//!
//! - `LAZY`: computed property. Notification only marks the unit dirty; the
//!   value is recomputed on next read.
//! - `SYNC`: re-run immediately on notification instead of queueing.
//! - `USER`: user watcher. Getter and callback errors are reported through
//!   the error chain instead of propagated.
//! - `DEEP`: after evaluation, walk the value so nested mutations also
//!   trigger.
//! - `RENDER`: the component's render unit.
//!
//! Each evaluation swaps the fresh dep set in and unsubscribes from any dep
//! not read this time, so conditional reads never leave stale subscriptions.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use super::dep::{Dep, DepId, TargetGuard};
use super::traverse::traverse;
use super::value::Value;
use crate::component::{Instance, InstanceInner};
use crate::error::{Result, handle_error};
use crate::runtime::scheduler::queue_watcher;
use crate::runtime::with_context;

bitflags::bitflags! {
    /// Watcher behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WatcherFlags: u8 {
        const DEEP = 1 << 0;
        const USER = 1 << 1;
        const LAZY = 1 << 2;
        const SYNC = 1 << 3;
        const RENDER = 1 << 4;
    }
}

/// Creation-ordered watcher id. Flushes run in ascending id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Getter evaluated under dependency collection.
pub type Getter = Rc<dyn Fn() -> Result<Value>>;

/// Change callback: `(new, old)`.
pub type WatcherCallback = Rc<dyn Fn(&Value, &Value) -> Result<()>>;

/// Construction options.
#[derive(Clone, Default)]
pub struct WatcherOptions {
    pub flags: WatcherFlags,
    /// Runs right before the scheduler re-runs this unit.
    pub before: Option<Rc<dyn Fn()>>,
    /// Label used in diagnostics.
    pub expression: Option<String>,
}

impl WatcherOptions {
    pub fn with_flags(flags: WatcherFlags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    flags: WatcherFlags,
    owner: Option<Weak<InstanceInner>>,
    getter: Getter,
    callback: Option<WatcherCallback>,
    before: Option<Rc<dyn Fn()>>,
    expression: String,
    active: Cell<bool>,
    dirty: Cell<bool>,
    value: RefCell<Value>,
    deps: RefCell<Vec<Dep>>,
    dep_ids: RefCell<HashSet<DepId>>,
    new_deps: RefCell<Vec<Dep>>,
    new_dep_ids: RefCell<HashSet<DepId>>,
}

/// Shared handle to a unit of reactive work.
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl PartialEq for Watcher {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("flags", &self.inner.flags)
            .field("expression", &self.inner.expression)
            .field("active", &self.inner.active.get())
            .finish()
    }
}

impl Watcher {
    /// Create a unit and, unless it is lazy, evaluate it once.
    ///
    /// With an owner, the unit is registered on the instance (and becomes its
    /// render unit when `RENDER` is set) before the first evaluation, so
    /// anything the getter triggers can already see it.
    pub fn new(
        owner: Option<&Instance>,
        getter: impl Fn() -> Result<Value> + 'static,
        callback: Option<WatcherCallback>,
        options: WatcherOptions,
    ) -> Result<Watcher> {
        let id = WatcherId(with_context(|ctx| ctx.alloc_watcher_id()));
        let lazy = options.flags.contains(WatcherFlags::LAZY);
        let watcher = Watcher {
            inner: Rc::new(WatcherInner {
                id,
                flags: options.flags,
                owner: owner.map(Instance::downgrade),
                getter: Rc::new(getter),
                callback,
                before: options.before,
                expression: options.expression.unwrap_or_default(),
                active: Cell::new(true),
                dirty: Cell::new(lazy),
                value: RefCell::new(Value::Undefined),
                deps: RefCell::new(Vec::new()),
                dep_ids: RefCell::new(HashSet::new()),
                new_deps: RefCell::new(Vec::new()),
                new_dep_ids: RefCell::new(HashSet::new()),
            }),
        };

        if let Some(vm) = owner {
            if options.flags.contains(WatcherFlags::RENDER) {
                vm.set_render_watcher(watcher.clone());
            }
            vm.push_watcher(watcher.clone());
        }

        if !lazy {
            let value = watcher.get()?;
            *watcher.inner.value.borrow_mut() = value;
        }
        Ok(watcher)
    }

    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    pub fn flags(&self) -> WatcherFlags {
        self.inner.flags
    }

    pub fn is_user(&self) -> bool {
        self.inner.flags.contains(WatcherFlags::USER)
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.flags.contains(WatcherFlags::LAZY)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Last evaluated value.
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    /// Owning instance, if it is still alive.
    pub fn owner(&self) -> Option<Instance> {
        self.inner.owner.as_ref().and_then(Instance::upgrade)
    }

    /// Number of deps recorded by the last evaluation.
    pub fn dep_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    pub(crate) fn downgrade(&self) -> WeakWatcher {
        WeakWatcher {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Evaluate the getter under collection and prune stale deps.
    pub(crate) fn get(&self) -> Result<Value> {
        let outcome = {
            let _target = TargetGuard::push(Some(self.clone()));
            let result = match (self.inner.getter)() {
                Ok(value) => Ok(value),
                Err(err) if self.is_user() => {
                    let owner = self.owner();
                    let info = format!("getter for watcher \"{}\"", self.inner.expression);
                    handle_error(&err, owner.as_ref(), &info);
                    Ok(Value::Undefined)
                }
                Err(err) => Err(err),
            };
            if let Ok(value) = &result {
                if self.inner.flags.contains(WatcherFlags::DEEP) {
                    traverse(value);
                }
            }
            result
        };
        self.cleanup_deps();
        outcome
    }

    /// Record `dep` for the current evaluation.
    pub(crate) fn add_dep(&self, dep: &Dep) {
        let id = dep.id();
        if self.inner.new_dep_ids.borrow_mut().insert(id) {
            self.inner.new_deps.borrow_mut().push(dep.clone());
            if !self.inner.dep_ids.borrow().contains(&id) {
                dep.add_sub(self);
            }
        }
    }

    fn cleanup_deps(&self) {
        let fresh_ids = std::mem::take(&mut *self.inner.new_dep_ids.borrow_mut());
        let fresh = std::mem::take(&mut *self.inner.new_deps.borrow_mut());
        let stale = std::mem::replace(&mut *self.inner.deps.borrow_mut(), fresh);
        *self.inner.dep_ids.borrow_mut() = fresh_ids;

        let ids = self.inner.dep_ids.borrow();
        for dep in stale {
            if !ids.contains(&dep.id()) {
                dep.remove_sub(self);
            }
        }
    }

    /// React to a notification from one of our deps.
    pub fn update(&self) {
        let flags = self.inner.flags;
        if flags.contains(WatcherFlags::LAZY) {
            self.inner.dirty.set(true);
        } else if flags.contains(WatcherFlags::SYNC) {
            if let Err(err) = self.run() {
                handle_error(&err, self.owner().as_ref(), "sync watcher");
            }
        } else {
            queue_watcher(self);
        }
    }

    /// Re-evaluate and fire the callback if the value changed.
    ///
    /// Objects and arrays always fire, as do deep units, because they may
    /// have been mutated in place. A torn-down unit does nothing.
    pub fn run(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let value = self.get()?;
        let old = self.inner.value.borrow().clone();
        if !value.same_value(&old) || value.is_object() || self.inner.flags.contains(WatcherFlags::DEEP) {
            *self.inner.value.borrow_mut() = value.clone();
            if let Some(callback) = self.inner.callback.clone() {
                if self.is_user() {
                    if let Err(err) = callback(&value, &old) {
                        let info = format!("callback for watcher \"{}\"", self.inner.expression);
                        handle_error(&err, self.owner().as_ref(), &info);
                    }
                } else {
                    callback(&value, &old)?;
                }
            }
        }
        Ok(())
    }

    /// Recompute a lazy unit and clear its dirty flag.
    pub fn evaluate(&self) -> Result<()> {
        let value = self.get()?;
        *self.inner.value.borrow_mut() = value;
        self.inner.dirty.set(false);
        Ok(())
    }

    /// Make the current target depend on everything this unit depends on.
    pub fn depend(&self) {
        let deps = self.inner.deps.borrow().clone();
        for dep in deps {
            dep.depend();
        }
    }

    pub(crate) fn run_before(&self) {
        if let Some(before) = self.inner.before.clone() {
            before();
        }
    }

    /// Unsubscribe from every dep and deactivate. Idempotent.
    pub fn teardown(&self) {
        if !self.is_active() {
            return;
        }
        if let Some(vm) = self.owner() {
            // Skipped while the owner is being destroyed; it drops the list.
            if !vm.is_being_destroyed() {
                vm.remove_watcher(self);
            }
        }
        let deps = std::mem::take(&mut *self.inner.deps.borrow_mut());
        self.inner.dep_ids.borrow_mut().clear();
        for dep in deps {
            dep.remove_sub(self);
        }
        self.inner.active.set(false);
    }
}

/// Non-owning subscriber reference kept by deps.
#[derive(Clone)]
pub(crate) struct WeakWatcher {
    id: WatcherId,
    inner: Weak<WatcherInner>,
}

impl WeakWatcher {
    pub(crate) fn id(&self) -> WatcherId {
        self.id
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub(crate) fn upgrade(&self) -> Option<Watcher> {
        self.inner.upgrade().map(|inner| Watcher { inner })
    }
}
