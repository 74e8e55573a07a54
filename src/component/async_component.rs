//! Components whose definition arrives later.
//!
//! An [`AsyncComponent`] wraps a factory that receives a [`Resolver`]. The
//! factory runs once, on first render. If it resolves before returning the
//! definition is used right away; otherwise a comment placeholder renders
//! and every instance that rendered it is re-rendered once the definition
//! arrives.
//!
//! A `loading` component replaces the placeholder after `delay` (200ms by
//! default, immediately for zero). With a `timeout`, a factory still pending
//! when it elapses is rejected. Both run on the runtime's timer clock.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use super::instance::{Instance, InstanceInner};
use super::options::ComponentDef;
use crate::error::{Result, handle_error, warn};
use crate::runtime::next_tick::{TimerId, clear_timeout, set_timeout};

/// Default wait before the loading component is shown.
pub const DEFAULT_LOADING_DELAY: Duration = Duration::from_millis(200);

enum AsyncState {
    Idle,
    Pending,
    Resolved(ComponentDef),
    Failed,
}

type AsyncFactory = Box<dyn Fn(Resolver) -> Result<()>>;

struct AsyncInner {
    factory: AsyncFactory,
    loading: RefCell<Option<ComponentDef>>,
    error: RefCell<Option<ComponentDef>>,
    delay: Cell<Duration>,
    timeout: Cell<Option<Duration>>,
    state: RefCell<AsyncState>,
    /// Set once the loading component may replace the placeholder.
    show_loading: Cell<bool>,
    rejected: Cell<bool>,
    timers: RefCell<Vec<TimerId>>,
    owners: RefCell<Vec<Weak<InstanceInner>>>,
    /// Set while the factory runs; resolution then needs no re-render.
    sync: Cell<bool>,
}

/// Shared handle to a lazily resolved component definition.
///
/// Clones share state, so options set on any clone apply to all of them.
/// Options are read when the factory first runs.
#[derive(Clone)]
pub struct AsyncComponent {
    inner: Rc<AsyncInner>,
}

impl AsyncComponent {
    pub fn new(factory: impl Fn(Resolver) -> Result<()> + 'static) -> Self {
        Self {
            inner: Rc::new(AsyncInner {
                factory: Box::new(factory),
                loading: RefCell::new(None),
                error: RefCell::new(None),
                delay: Cell::new(DEFAULT_LOADING_DELAY),
                timeout: Cell::new(None),
                state: RefCell::new(AsyncState::Idle),
                show_loading: Cell::new(false),
                rejected: Cell::new(false),
                timers: RefCell::new(Vec::new()),
                owners: RefCell::new(Vec::new()),
                sync: Cell::new(false),
            }),
        }
    }

    /// Component shown while the factory is pending.
    pub fn loading(self, def: &ComponentDef) -> Self {
        *self.inner.loading.borrow_mut() = Some(def.clone());
        self
    }

    /// Component shown once the factory rejects.
    pub fn error(self, def: &ComponentDef) -> Self {
        *self.inner.error.borrow_mut() = Some(def.clone());
        self
    }

    /// Wait before showing the loading component.
    pub fn delay(self, delay: Duration) -> Self {
        self.inner.delay.set(delay);
        self
    }

    /// Reject the factory if it has not settled within `timeout`.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.inner.timeout.set(Some(timeout));
        self
    }

    pub fn ptr_eq(&self, other: &AsyncComponent) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.inner.state.borrow(), AsyncState::Resolved(_))
    }

    fn is_pending(&self) -> bool {
        matches!(*self.inner.state.borrow(), AsyncState::Pending)
    }

    fn resolved(&self) -> Option<ComponentDef> {
        match &*self.inner.state.borrow() {
            AsyncState::Resolved(def) => Some(def.clone()),
            _ => None,
        }
    }

    fn is_failed(&self) -> bool {
        matches!(*self.inner.state.borrow(), AsyncState::Failed)
    }

    fn error_def(&self) -> Option<ComponentDef> {
        self.inner.error.borrow().clone()
    }

    fn add_owner(&self, owner: &Instance) {
        let mut owners = self.inner.owners.borrow_mut();
        owners.retain(|w| w.strong_count() > 0);
        if !owners.iter().any(|w| owner.is_inner(w)) {
            owners.push(owner.downgrade());
        }
    }

    /// Start the loading delay and the timeout for a factory left pending.
    fn start_timers(&self) {
        if self.inner.loading.borrow().is_some() {
            let delay = self.inner.delay.get();
            if delay.is_zero() {
                self.inner.show_loading.set(true);
            } else {
                let target = self.clone();
                let id = set_timeout(delay, move || {
                    if target.is_pending() && !target.inner.show_loading.get() {
                        target.inner.show_loading.set(true);
                        target.force_render(false);
                    }
                });
                self.inner.timers.borrow_mut().push(id);
            }
        }
        if let Some(timeout) = self.inner.timeout.get() {
            let resolver = Resolver { target: self.clone() };
            let id = set_timeout(timeout, move || {
                if resolver.target.is_pending() {
                    resolver.reject(format!("timeout ({}ms)", timeout.as_millis()));
                }
            });
            self.inner.timers.borrow_mut().push(id);
        }
    }

    fn clear_timers(&self) {
        let timers = std::mem::take(&mut *self.inner.timers.borrow_mut());
        for id in timers {
            clear_timeout(id);
        }
    }

    /// Re-render every live owner. Once `settled` the owners are forgotten
    /// and pending timers cancelled.
    fn force_render(&self, settled: bool) {
        let owners = if settled {
            self.clear_timers();
            std::mem::take(&mut *self.inner.owners.borrow_mut())
        } else {
            self.inner.owners.borrow().clone()
        };
        for owner in owners.iter().filter_map(Instance::upgrade) {
            if !owner.is_destroyed() {
                owner.force_update();
            }
        }
    }
}

impl std::fmt::Debug for AsyncComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.state.borrow() {
            AsyncState::Idle => "idle",
            AsyncState::Pending => "pending",
            AsyncState::Resolved(_) => "resolved",
            AsyncState::Failed => "failed",
        };
        f.debug_struct("AsyncComponent").field("state", &state).finish()
    }
}

/// Handed to the factory. The first `resolve` or `reject` wins.
#[derive(Clone)]
pub struct Resolver {
    target: AsyncComponent,
}

impl Resolver {
    pub fn resolve(&self, def: &ComponentDef) {
        let target = &self.target;
        if target.inner.rejected.get() {
            return;
        }
        {
            let mut state = target.inner.state.borrow_mut();
            if matches!(*state, AsyncState::Resolved(_) | AsyncState::Failed) {
                return;
            }
            *state = AsyncState::Resolved(def.clone());
        }
        tracing::debug!(cid = def.cid(), sync = target.inner.sync.get(), "async component resolved");
        if target.inner.sync.get() {
            target.inner.owners.borrow_mut().clear();
        } else {
            target.force_render(true);
        }
    }

    pub fn reject(&self, reason: impl Into<String>) {
        let target = &self.target;
        if target.inner.rejected.replace(true) || target.is_resolved() {
            return;
        }
        let reason = reason.into();
        warn(&format!("Failed to resolve async component: {reason}"), None);
        if target.inner.error.borrow().is_none() {
            target.clear_timers();
            return;
        }
        *target.inner.state.borrow_mut() = AsyncState::Failed;
        if target.inner.sync.get() {
            target.inner.owners.borrow_mut().clear();
        } else {
            target.force_render(true);
        }
    }
}

/// Definition to render for `factory` right now, if any.
///
/// Runs the factory on first use and records `owner` so it re-renders when
/// a pending factory settles.
pub(crate) fn resolve_async_component(factory: &AsyncComponent, owner: &Instance) -> Option<ComponentDef> {
    if factory.is_failed() {
        return factory.error_def();
    }
    if let Some(def) = factory.resolved() {
        return Some(def);
    }

    factory.add_owner(owner);

    let idle = matches!(*factory.inner.state.borrow(), AsyncState::Idle);
    if idle {
        *factory.inner.state.borrow_mut() = AsyncState::Pending;
        let resolver = Resolver {
            target: factory.clone(),
        };
        factory.inner.sync.set(true);
        let result = (factory.inner.factory)(resolver.clone());
        if let Err(err) = result {
            handle_error(&err, Some(owner), "async component factory");
            resolver.reject(err.to_string());
        }
        factory.inner.sync.set(false);

        if let Some(def) = factory.resolved() {
            return Some(def);
        }
        if factory.is_failed() {
            return factory.error_def();
        }
        factory.start_timers();
    }
    if factory.inner.show_loading.get() {
        factory.inner.loading.borrow().clone()
    } else {
        None
    }
}
