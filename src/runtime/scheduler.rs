//! Update scheduler.
//!
//! Non-lazy, non-sync watchers enqueue themselves here when notified. The
//! queue is deduplicated by watcher id and flushed once per tick:
//!
//! - sorted by id so parents update before children and user watchers
//!   before the render watcher of their component
//! - units enqueued during the flush are spliced in by id, or run next if
//!   their slot has already passed
//! - a unit re-queued more than [`MAX_UPDATE_COUNT`] times in one flush is
//!   dropped for the rest of that flush with a single warning
//!
//! After the queue drains, `activated` hooks fire for kept-alive components
//! that were re-inserted, then `updated` hooks fire child-first.

use std::collections::{HashMap, HashSet};

use super::next_tick::next_tick;
use super::with_context;
use crate::component::{Instance, LifecycleHook};
use crate::component::lifecycle::{activate_child_component, call_hook};
use crate::config::with_config;
use crate::error::{component_label, handle_error, warn};
use crate::observer::{Watcher, WatcherId};

/// Re-queues of one unit allowed within a single flush.
pub const MAX_UPDATE_COUNT: usize = 100;

#[derive(Default)]
pub(crate) struct SchedulerState {
    queue: Vec<Watcher>,
    activated_children: Vec<Instance>,
    has: HashSet<WatcherId>,
    circular: HashMap<WatcherId, usize>,
    halted: HashSet<WatcherId>,
    waiting: bool,
    flushing: bool,
    index: usize,
}

/// Whether a flush is in progress.
pub fn is_flushing() -> bool {
    with_context(|ctx| ctx.scheduler.flushing)
}

/// Number of units waiting in the queue (including those already run in an
/// in-progress flush).
pub fn queue_len() -> usize {
    with_context(|ctx| ctx.scheduler.queue.len())
}

/// Enqueue a unit for the next flush.
///
/// Duplicate ids are ignored. The first enqueue of an idle scheduler
/// schedules the flush on the next tick, or flushes immediately when
/// `async_updates` is off.
pub(crate) fn queue_watcher(watcher: &Watcher) {
    let id = watcher.id();
    let schedule = with_context(|ctx| {
        let s = &mut ctx.scheduler;
        if s.has.contains(&id) || (s.flushing && s.halted.contains(&id)) {
            return None;
        }
        s.has.insert(id);
        if !s.flushing {
            s.queue.push(watcher.clone());
        } else {
            let mut pos = s.queue.len();
            while pos > s.index + 1 && s.queue[pos - 1].id() > id {
                pos -= 1;
            }
            s.queue.insert(pos, watcher.clone());
        }
        if s.waiting {
            return None;
        }
        s.waiting = true;
        Some(with_config(|c| c.async_updates))
    });

    match schedule {
        Some(true) => next_tick(flush_scheduler_queue),
        Some(false) => flush_scheduler_queue(),
        None => {}
    }
}

/// Queue a kept-alive component whose `activated` hook must fire after the
/// whole tree has been patched.
pub(crate) fn queue_activated_component(vm: &Instance) {
    // Marked inactive-false now so its render can tell it is being revived.
    vm.set_inactive(Some(false));
    let vm = vm.clone();
    with_context(|ctx| ctx.scheduler.activated_children.push(vm));
}

/// Drain the queue.
pub(crate) fn flush_scheduler_queue() {
    let queued = with_context(|ctx| {
        let s = &mut ctx.scheduler;
        s.flushing = true;
        s.queue.sort_by_key(Watcher::id);
        s.queue.len()
    });
    tracing::trace!(queued, "flushing scheduler queue");

    let mut index = 0;
    loop {
        let next = with_context(|ctx| {
            let s = &mut ctx.scheduler;
            s.index = index;
            s.queue.get(index).cloned()
        });
        let Some(watcher) = next else { break };

        watcher.run_before();
        let id = watcher.id();
        with_context(|ctx| ctx.scheduler.has.remove(&id));

        if let Err(err) = watcher.run() {
            handle_error(&err, watcher.owner().as_ref(), "render watcher");
        }

        let runaway = with_context(|ctx| {
            let s = &mut ctx.scheduler;
            if !s.has.contains(&id) {
                return false;
            }
            let count = s.circular.entry(id).or_insert(0);
            *count += 1;
            if *count <= MAX_UPDATE_COUNT {
                return false;
            }
            s.halted.insert(id);
            s.has.remove(&id);
            let mut i = index + 1;
            while i < s.queue.len() {
                if s.queue[i].id() == id {
                    s.queue.remove(i);
                } else {
                    i += 1;
                }
            }
            true
        });

        if runaway {
            let owner = watcher.owner();
            let message = if watcher.is_user() {
                format!(
                    "You may have an infinite update loop in watcher with expression \"{}\"",
                    watcher.expression()
                )
            } else {
                format!(
                    "You may have an infinite update loop in a component render function of {}",
                    component_label(owner.as_ref())
                )
            };
            warn(&message, owner.as_ref());
        }

        index += 1;
    }

    let (activated, updated) = with_context(|ctx| {
        let s = &mut ctx.scheduler;
        let activated = std::mem::take(&mut s.activated_children);
        let updated = std::mem::take(&mut s.queue);
        s.has.clear();
        s.circular.clear();
        s.halted.clear();
        s.waiting = false;
        s.flushing = false;
        s.index = 0;
        (activated, updated)
    });

    call_activated_hooks(&activated);
    call_updated_hooks(&updated);
}

fn call_activated_hooks(queue: &[Instance]) {
    for vm in queue {
        vm.set_inactive(Some(true));
        activate_child_component(vm, true);
    }
}

fn call_updated_hooks(queue: &[Watcher]) {
    for watcher in queue.iter().rev() {
        let Some(vm) = watcher.owner() else { continue };
        let is_render = vm.render_watcher().is_some_and(|w| w.id() == watcher.id());
        if is_render && vm.is_mounted() && !vm.is_destroyed() {
            call_hook(&vm, LifecycleHook::Updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::configure;
    use crate::observer::{ReactiveObject, Value, WatcherFlags, WatcherOptions, observe};
    use crate::runtime::next_tick::run_until_idle;
    use crate::runtime::reset_runtime;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn user_watch(
        state: &ReactiveObject,
        key: &'static str,
        log: Rc<RefCell<Vec<String>>>,
        label: &'static str,
    ) -> Watcher {
        let source = state.clone();
        Watcher::new(
            None,
            move || Ok(source.get(key)),
            Some(Rc::new(move |new: &Value, _old: &Value| {
                log.borrow_mut().push(format!("{label}={new}"));
                Ok(())
            })),
            WatcherOptions::with_flags(WatcherFlags::USER),
        )
        .unwrap()
    }

    #[test]
    fn test_dedupes_and_defers() {
        reset_runtime();
        let state = ReactiveObject::new().with("a", 1);
        observe(&Value::Object(state.clone()), false);
        let log = Rc::new(RefCell::new(Vec::new()));
        let _w = user_watch(&state, "a", log.clone(), "a");

        state.assign("a", 2);
        state.assign("a", 3);
        assert!(log.borrow().is_empty());
        assert_eq!(queue_len(), 1);

        run_until_idle();
        assert_eq!(*log.borrow(), vec!["a=3".to_string()]);
        assert_eq!(queue_len(), 0);
    }

    #[test]
    fn test_flushes_in_id_order() {
        reset_runtime();
        let state = ReactiveObject::new().with("x", 0).with("y", 0);
        observe(&Value::Object(state.clone()), false);
        let log = Rc::new(RefCell::new(Vec::new()));
        let _first = user_watch(&state, "x", log.clone(), "first");
        let _second = user_watch(&state, "y", log.clone(), "second");

        state.assign("y", 1);
        state.assign("x", 1);
        run_until_idle();

        assert_eq!(*log.borrow(), vec!["first=1".to_string(), "second=1".to_string()]);
    }

    #[test]
    fn test_sync_mode_flushes_immediately() {
        reset_runtime();
        configure(|c| c.async_updates = false);
        let state = ReactiveObject::new().with("a", 1);
        observe(&Value::Object(state.clone()), false);
        let log = Rc::new(RefCell::new(Vec::new()));
        let _w = user_watch(&state, "a", log.clone(), "a");

        state.assign("a", 5);
        assert_eq!(*log.borrow(), vec!["a=5".to_string()]);
    }

    #[test]
    fn test_runaway_unit_is_halted_once() {
        reset_runtime();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        configure(|c| {
            c.warn_handler = Some(Rc::new(move |msg, _| sink.borrow_mut().push(msg.to_string())));
        });

        let state = ReactiveObject::new().with("n", 0);
        observe(&Value::Object(state.clone()), false);
        let runs = Rc::new(RefCell::new(0usize));
        let counter = runs.clone();
        let target = state.clone();
        let source = state.clone();
        let _w = Watcher::new(
            None,
            move || Ok(source.get("n")),
            Some(Rc::new(move |new: &Value, _| {
                *counter.borrow_mut() += 1;
                target.assign("n", new.as_number().unwrap_or(0.0) + 1.0);
                Ok(())
            })),
            WatcherOptions::with_flags(WatcherFlags::USER),
        )
        .unwrap();

        state.assign("n", 1);
        run_until_idle();

        assert_eq!(*runs.borrow(), MAX_UPDATE_COUNT + 1);
        assert_eq!(warnings.borrow().len(), 1);
        assert!(warnings.borrow()[0].contains("infinite update loop"));
        assert!(!is_flushing());
    }
}
