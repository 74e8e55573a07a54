//! Per-thread runtime context.
//!
//! All mutable singletons of the reactive core live in one
//! [`RuntimeContext`] stored in a thread-local:
//!
//! - the active-unit target stack used for dependency collection
//! - the `should_observe` toggle
//! - the active instance while a component is being patched
//! - the scheduler queue and its flush state
//! - the next-tick callback batch
//! - id counters for deps, watchers and instances
//!
//! Every borrow of the context is short and never spans user code. Callers
//! copy what they need out of [`with_context`] before running callbacks.
//!
//! [`reset_runtime`] swaps in a fresh context (and default configuration and
//! global registries). Tests call it first so they start from a clean slate.

pub mod next_tick;
pub mod scheduler;

use std::cell::RefCell;

use crate::component::Instance;
use crate::observer::Watcher;

use next_tick::TickState;
use scheduler::SchedulerState;

// =============================================================================
// Context
// =============================================================================

pub(crate) struct RuntimeContext {
    /// Stack of units currently collecting dependencies. `None` entries
    /// disable collection until popped.
    pub(crate) targets: Vec<Option<Watcher>>,
    pub(crate) should_observe: bool,
    pub(crate) active_instance: Option<Instance>,
    pub(crate) scheduler: SchedulerState,
    pub(crate) ticks: TickState,
    next_dep_id: u64,
    next_watcher_id: u64,
    next_instance_id: u64,
}

impl RuntimeContext {
    fn new() -> Self {
        Self {
            targets: Vec::new(),
            should_observe: true,
            active_instance: None,
            scheduler: SchedulerState::default(),
            ticks: TickState::default(),
            next_dep_id: 0,
            next_watcher_id: 0,
            next_instance_id: 0,
        }
    }

    pub(crate) fn alloc_dep_id(&mut self) -> u64 {
        let id = self.next_dep_id;
        self.next_dep_id += 1;
        id
    }

    pub(crate) fn alloc_watcher_id(&mut self) -> u64 {
        // Watcher ids start at 1 so creation order is strictly increasing
        // and 0 is never a live unit.
        self.next_watcher_id += 1;
        self.next_watcher_id
    }

    pub(crate) fn alloc_instance_id(&mut self) -> u64 {
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        id
    }
}

thread_local! {
    static CONTEXT: RefCell<RuntimeContext> = RefCell::new(RuntimeContext::new());
}

/// Run `f` with exclusive access to the runtime context.
///
/// `f` must not call back into user code or re-enter the context.
pub(crate) fn with_context<R>(f: impl FnOnce(&mut RuntimeContext) -> R) -> R {
    CONTEXT.with(|ctx| f(&mut ctx.borrow_mut()))
}

/// Discard all runtime state on this thread.
///
/// Pending ticks, queued units and the target stack are dropped, config is
/// restored to defaults and global registries are cleared.
pub fn reset_runtime() {
    let previous = CONTEXT.with(|ctx| std::mem::replace(&mut *ctx.borrow_mut(), RuntimeContext::new()));
    // Dropped outside the borrow: queued callbacks may own instances.
    drop(previous);
    crate::config::reset_config();
    crate::global_api::reset_global_api();
}

// =============================================================================
// Active instance
// =============================================================================

/// The instance currently being patched, if any.
///
/// Child components created during a patch take it as their parent.
pub fn active_instance() -> Option<Instance> {
    with_context(|ctx| ctx.active_instance.clone())
}

/// Restores the previous active instance on drop.
pub(crate) struct ActiveInstanceGuard {
    previous: Option<Instance>,
}

pub(crate) fn set_active_instance(vm: &Instance) -> ActiveInstanceGuard {
    let previous = with_context(|ctx| ctx.active_instance.replace(vm.clone()));
    ActiveInstanceGuard { previous }
}

impl Drop for ActiveInstanceGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        with_context(|ctx| ctx.active_instance = previous);
    }
}
