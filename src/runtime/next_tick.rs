//! Deferred callback batching.
//!
//! Callbacks registered with [`next_tick`] accumulate into one batch. The
//! first registration after a drain marks a tick as pending; the host drives
//! it with [`tick`] (one batch) or [`run_until_idle`] (until nothing is left).
//!
//! Two deferral kinds exist. Ordinary registrations request a
//! [`TickKind::Micro`] tick. Registrations made inside [`with_macro_task`]
//! (event handlers dispatched by the platform) request a [`TickKind::Macro`]
//! tick instead, which lets the host defer DOM-event-originated updates past
//! its own event propagation.
//!
//! Timers ([`set_timeout`]) run on a virtual clock the host moves forward
//! with [`advance_timers`]. A due timer runs as a macrotask, so ticks it
//! requests are [`TickKind::Macro`].
//!
//! # Example
//!
//! ```ignore
//! next_tick(|| println!("later"));
//! assert_eq!(pending_tick(), Some(TickKind::Micro));
//! run_until_idle();
//!
//! set_timeout(Duration::from_millis(200), || println!("timer"));
//! advance_timers(Duration::from_millis(200));
//! ```

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use super::with_context;
use crate::component::Instance;
use crate::error::{Result, handle_error};

/// Kind of deferral requested for the pending batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    /// Run after the current synchronous work.
    Micro,
    /// Run after the host's current task (event dispatch).
    Macro,
}

type TickCallback = Box<dyn FnOnce()>;

/// Handle returned by [`set_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Timer {
    id: TimerId,
    due: Duration,
    callback: TickCallback,
}

#[derive(Default)]
pub(crate) struct TickState {
    callbacks: Vec<TickCallback>,
    pending: Option<TickKind>,
    use_macro_task: bool,
    now: Duration,
    timers: Vec<Timer>,
    next_timer_id: u64,
}

/// Defer `cb` to the next tick.
pub fn next_tick(cb: impl FnOnce() + 'static) {
    with_context(|ctx| {
        let ticks = &mut ctx.ticks;
        ticks.callbacks.push(Box::new(cb));
        if ticks.pending.is_none() {
            ticks.pending = Some(if ticks.use_macro_task {
                TickKind::Macro
            } else {
                TickKind::Micro
            });
        }
    })
}

/// Defer a fallible callback, reporting failures against `vm`.
pub fn next_tick_with(vm: Option<&Instance>, cb: impl FnOnce() -> Result<()> + 'static) {
    let vm = vm.cloned();
    next_tick(move || {
        if let Err(err) = cb() {
            handle_error(&err, vm.as_ref(), "nextTick");
        }
    })
}

/// Kind of the tick currently pending, if any.
pub fn pending_tick() -> Option<TickKind> {
    with_context(|ctx| ctx.ticks.pending)
}

/// Run `f` with macro-task deferral forced for registrations it makes.
pub fn with_macro_task<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(bool);
    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0;
            with_context(|ctx| ctx.ticks.use_macro_task = previous);
        }
    }

    let _restore = Restore(with_context(|ctx| std::mem::replace(&mut ctx.ticks.use_macro_task, true)));
    f()
}

/// Drain one batch. Returns false if nothing was pending.
///
/// Callbacks registered while the batch runs land in the next batch.
pub fn tick() -> bool {
    let batch = with_context(|ctx| {
        ctx.ticks.pending = None;
        std::mem::take(&mut ctx.ticks.callbacks)
    });
    if batch.is_empty() {
        return false;
    }
    tracing::trace!(callbacks = batch.len(), "running tick");
    for cb in batch {
        cb();
    }
    true
}

/// Drain batches until none remain. Returns how many batches ran.
pub fn run_until_idle() -> usize {
    let mut batches = 0;
    while tick() {
        batches += 1;
    }
    batches
}

// =============================================================================
// Timers
// =============================================================================

/// Run `cb` once the virtual clock has advanced by `delay`.
pub fn set_timeout(delay: Duration, cb: impl FnOnce() + 'static) -> TimerId {
    with_context(|ctx| {
        let ticks = &mut ctx.ticks;
        ticks.next_timer_id += 1;
        let id = TimerId(ticks.next_timer_id);
        ticks.timers.push(Timer {
            id,
            due: ticks.now + delay,
            callback: Box::new(cb),
        });
        id
    })
}

/// Cancel a timer. Unknown or already fired ids are ignored.
pub fn clear_timeout(id: TimerId) {
    with_context(|ctx| ctx.ticks.timers.retain(|t| t.id != id))
}

/// Current reading of the virtual clock.
pub fn timer_clock() -> Duration {
    with_context(|ctx| ctx.ticks.now)
}

/// Time left until the earliest timer is due.
pub fn next_timer_in() -> Option<Duration> {
    with_context(|ctx| {
        let now = ctx.ticks.now;
        ctx.ticks.timers.iter().map(|t| t.due.saturating_sub(now)).min()
    })
}

/// Move the virtual clock forward by `elapsed`, running every timer that
/// falls due in order (ties by registration). Timers set by a running timer
/// fire in the same call if they are due before the new reading. Returns
/// how many ran.
pub fn advance_timers(elapsed: Duration) -> usize {
    let target = with_context(|ctx| ctx.ticks.now + elapsed);
    let mut fired = 0;
    loop {
        let next = with_context(|ctx| {
            let ticks = &mut ctx.ticks;
            let index = ticks
                .timers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.due <= target)
                .min_by_key(|(_, t)| (t.due, t.id.0))
                .map(|(i, _)| i)?;
            let timer = ticks.timers.remove(index);
            ticks.now = timer.due;
            Some(timer)
        });
        let Some(timer) = next else { break };
        tracing::trace!(timer = timer.id.0, due_ms = timer.due.as_millis() as u64, "timer fired");
        with_macro_task(timer.callback);
        fired += 1;
    }
    with_context(|ctx| ctx.ticks.now = target);
    fired
}

// =============================================================================
// Future form
// =============================================================================

#[derive(Default)]
struct TickSignal {
    ready: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

/// Future resolving once the tick it was created for has run.
pub struct NextTick {
    signal: Rc<TickSignal>,
}

impl NextTick {
    /// Whether the tick has already run.
    pub fn is_ready(&self) -> bool {
        self.signal.ready.get()
    }
}

impl Future for NextTick {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.signal.ready.get() {
            Poll::Ready(())
        } else {
            *self.signal.waker.borrow_mut() = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Future form of [`next_tick`].
pub fn next_tick_future() -> NextTick {
    let signal = Rc::new(TickSignal::default());
    let resolver = signal.clone();
    next_tick(move || {
        resolver.ready.set(true);
        if let Some(waker) = resolver.waker.borrow_mut().take() {
            waker.wake();
        }
    });
    NextTick { signal }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::reset_runtime;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_batches_in_order() {
        reset_runtime();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            next_tick(move || log.borrow_mut().push(i));
        }
        assert!(log.borrow().is_empty());
        assert_eq!(pending_tick(), Some(TickKind::Micro));

        assert!(tick());
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(pending_tick(), None);
        assert!(!tick());
    }

    #[test]
    fn test_nested_registration_runs_next_batch() {
        reset_runtime();
        let log = Rc::new(RefCell::new(Vec::new()));
        let outer = log.clone();
        next_tick(move || {
            outer.borrow_mut().push("outer");
            let inner = outer.clone();
            next_tick(move || inner.borrow_mut().push("inner"));
        });

        tick();
        assert_eq!(*log.borrow(), vec!["outer"]);
        tick();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_macro_task_kind() {
        reset_runtime();
        with_macro_task(|| next_tick(|| {}));
        assert_eq!(pending_tick(), Some(TickKind::Macro));
        run_until_idle();

        next_tick(|| {});
        assert_eq!(pending_tick(), Some(TickKind::Micro));
    }

    #[test]
    fn test_run_until_idle_counts_batches() {
        reset_runtime();
        next_tick(|| next_tick(|| next_tick(|| {})));
        assert_eq!(run_until_idle(), 3);
    }

    #[test]
    fn test_timers_fire_in_due_order() {
        reset_runtime();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (name, ms) in [("slow", 30), ("fast", 10), ("tie", 10)] {
            let log = log.clone();
            set_timeout(Duration::from_millis(ms), move || log.borrow_mut().push(name));
        }
        assert_eq!(next_timer_in(), Some(Duration::from_millis(10)));

        assert_eq!(advance_timers(Duration::from_millis(9)), 0);
        assert_eq!(advance_timers(Duration::from_millis(1)), 2);
        assert_eq!(*log.borrow(), vec!["fast", "tie"]);
        assert_eq!(next_timer_in(), Some(Duration::from_millis(20)));

        assert_eq!(advance_timers(Duration::from_millis(100)), 1);
        assert_eq!(*log.borrow(), vec!["fast", "tie", "slow"]);
        assert_eq!(timer_clock(), Duration::from_millis(110));
        assert_eq!(next_timer_in(), None);
    }

    #[test]
    fn test_cleared_timer_never_runs() {
        reset_runtime();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let id = set_timeout(Duration::from_millis(5), move || counter.set(counter.get() + 1));
        clear_timeout(id);
        assert_eq!(advance_timers(Duration::from_millis(5)), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_timer_set_by_timer_fires_when_due() {
        reset_runtime();
        let log = Rc::new(RefCell::new(Vec::new()));
        let outer = log.clone();
        set_timeout(Duration::from_millis(10), move || {
            outer.borrow_mut().push(timer_clock().as_millis());
            let inner = outer.clone();
            set_timeout(Duration::from_millis(5), move || inner.borrow_mut().push(timer_clock().as_millis()));
        });
        assert_eq!(advance_timers(Duration::from_millis(20)), 2);
        assert_eq!(*log.borrow(), vec![10, 15]);
    }

    #[test]
    fn test_timer_callbacks_request_macro_ticks() {
        reset_runtime();
        set_timeout(Duration::ZERO, || next_tick(|| {}));
        advance_timers(Duration::ZERO);
        assert_eq!(pending_tick(), Some(TickKind::Macro));
    }

    #[test]
    fn test_future_resolves_after_tick() {
        reset_runtime();
        let fut = next_tick_future();
        assert!(!fut.is_ready());
        tick();
        assert!(fut.is_ready());
    }
}
