//! Dependency cells.
//!
//! A [`Dep`] is the subscription point for one reactive slot (a tracked key,
//! or the container-level dep of an [`Observer`](super::Observer)). Readers
//! call [`Dep::depend`] while a unit is on top of the target stack; writers
//! call [`Dep::notify`].
//!
//! Subscribers are held weakly: a dropped watcher silently leaves every dep
//! it was subscribed to.

use std::cell::RefCell;
use std::rc::Rc;

use super::watcher::{WeakWatcher, Watcher};
use crate::config::with_config;
use crate::runtime::with_context;

/// Stable identity of a dep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

struct DepInner {
    id: DepId,
    subs: RefCell<Vec<WeakWatcher>>,
}

/// A subscription cell.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl Dep {
    pub fn new() -> Self {
        let id = DepId(with_context(|ctx| ctx.alloc_dep_id()));
        Self {
            inner: Rc::new(DepInner {
                id,
                subs: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.borrow().iter().filter(|w| w.is_alive()).count()
    }

    /// Subscribe `watcher`. Callers guarantee it isn't already subscribed.
    pub(crate) fn add_sub(&self, watcher: &Watcher) {
        self.inner.subs.borrow_mut().push(watcher.downgrade());
    }

    pub(crate) fn remove_sub(&self, watcher: &Watcher) {
        let id = watcher.id();
        let mut subs = self.inner.subs.borrow_mut();
        if let Some(pos) = subs.iter().position(|w| w.id() == id) {
            subs.remove(pos);
        }
    }

    /// Register this dep with the unit currently collecting, if any.
    pub fn depend(&self) {
        if let Some(target) = current_target() {
            target.add_dep(self);
        }
    }

    /// Tell every subscriber that the slot changed.
    ///
    /// The subscriber list is snapshotted first, so units subscribing during
    /// notification are not notified this round.
    pub fn notify(&self) {
        let mut subs: Vec<Watcher> = {
            let mut list = self.inner.subs.borrow_mut();
            list.retain(WeakWatcher::is_alive);
            list.iter().filter_map(WeakWatcher::upgrade).collect()
        };
        if !with_config(|c| c.async_updates) {
            // Without the scheduler there is no sort, so keep creation order.
            subs.sort_by_key(Watcher::id);
        }
        for sub in subs {
            sub.update();
        }
    }

    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("subs", &self.inner.subs.borrow().len())
            .finish()
    }
}

// =============================================================================
// Target stack
// =============================================================================

pub(crate) fn push_target(target: Option<Watcher>) {
    with_context(|ctx| ctx.targets.push(target));
}

pub(crate) fn pop_target() {
    with_context(|ctx| {
        ctx.targets.pop();
    });
}

/// The unit currently collecting dependencies.
pub fn current_target() -> Option<Watcher> {
    with_context(|ctx| ctx.targets.last().cloned().flatten())
}

/// Whether reads right now are being recorded.
pub fn has_target() -> bool {
    with_context(|ctx| matches!(ctx.targets.last(), Some(Some(_))))
}

/// Pops the target stack on drop.
pub(crate) struct TargetGuard(());

impl TargetGuard {
    pub(crate) fn push(target: Option<Watcher>) -> Self {
        push_target(target);
        TargetGuard(())
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        pop_target();
    }
}

/// Run `f` with dependency collection suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = TargetGuard::push(None);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{Value, WatcherFlags, WatcherOptions};
    use crate::runtime::reset_runtime;
    use std::cell::Cell;

    fn lazy_watcher(dep: &Dep) -> Watcher {
        let dep = dep.clone();
        Watcher::new(
            None,
            move || {
                dep.depend();
                Ok(Value::Undefined)
            },
            None,
            WatcherOptions::with_flags(WatcherFlags::LAZY),
        )
        .unwrap()
    }

    #[test]
    fn test_depend_outside_collection_is_noop() {
        reset_runtime();
        let dep = Dep::new();
        dep.depend();
        assert_eq!(dep.subscriber_count(), 0);
        assert!(!has_target());
    }

    #[test]
    fn test_collects_once_per_evaluation() {
        reset_runtime();
        let dep = Dep::new();
        let watcher = lazy_watcher(&dep);
        watcher.evaluate().unwrap();
        watcher.evaluate().unwrap();
        assert_eq!(dep.subscriber_count(), 1);
        assert_eq!(watcher.dep_count(), 1);
    }

    #[test]
    fn test_untracked_suspends_collection() {
        reset_runtime();
        let dep = Dep::new();
        let inner = dep.clone();
        let watcher = Watcher::new(
            None,
            move || {
                untracked(|| inner.depend());
                Ok(Value::Undefined)
            },
            None,
            WatcherOptions::default(),
        )
        .unwrap();
        assert_eq!(watcher.dep_count(), 0);
        assert_eq!(dep.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_watcher_leaves_dep() {
        reset_runtime();
        let dep = Dep::new();
        let watcher = lazy_watcher(&dep);
        watcher.evaluate().unwrap();
        assert_eq!(dep.subscriber_count(), 1);
        drop(watcher);
        assert_eq!(dep.subscriber_count(), 0);
        dep.notify();
    }

    #[test]
    fn test_notify_marks_lazy_dirty() {
        reset_runtime();
        let dep = Dep::new();
        let watcher = lazy_watcher(&dep);
        watcher.evaluate().unwrap();
        assert!(!watcher.is_dirty());
        dep.notify();
        assert!(watcher.is_dirty());

        let flag = Cell::new(false);
        untracked(|| flag.set(has_target()));
        assert!(!flag.get());
    }
}
