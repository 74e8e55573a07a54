//! # spark-view
//!
//! Reactive state tracking and virtual-DOM component core.
//!
//! State lives in observed containers. Units of work (render functions,
//! computed properties, watchers) record which slots they read and are
//! re-run, batched and in creation order, when those slots change. Component
//! render units produce virtual-node trees that are reconciled against the
//! previous tree and applied to a target tree through a platform seam.
//!
//! ## Architecture
//!
//! ```text
//! mutation → Dep::notify → Watcher::update → scheduler queue
//!          → next tick: flush (sorted by unit id)
//!          → render → Patcher::patch → NodeOps → target tree
//!          → lifecycle hooks
//! ```
//!
//! Everything is single-threaded. Each thread has its own runtime context,
//! configuration and global registries; [`reset_runtime`] clears all three.
//! The host drives time with [`tick`] / [`run_until_idle`] and moves the timer
//! clock with [`advance_timers`].
//!
//! ## Modules
//!
//! - [`observer`] - reactive values, dependency sets, watchers, `set`/`del`
//! - [`runtime`] - per-thread context, scheduler, next tick
//! - [`component`] - component options, instances, lifecycle, keep-alive,
//!   async components
//! - [`vdom`] - virtual nodes, patcher, patch modules, in-memory target tree
//! - [`global_api`] - global components, directives, mixins and plugins
//! - [`config`] - runtime options
//! - [`error`] - error type and the error-bubbling chain

pub mod component;
pub mod config;
pub mod error;
pub mod global_api;
pub mod observer;
pub mod runtime;
pub mod vdom;

// Re-export commonly used items
pub use error::{Error, MutationError, Result};

pub use config::{Config, configure, reset_config, with_config};

pub use observer::{
    Dep, PropertyKey, ReactiveArray, ReactiveObject, SetTarget, Value, Watcher, WatcherFlags, WatcherOptions,
    define_reactive, del, observe, set, toggle_observing, traverse, untracked,
};

pub use runtime::next_tick::{
    NextTick, TimerId, advance_timers, clear_timeout, next_tick, next_tick_future, next_timer_in, run_until_idle,
    set_timeout, tick,
};
pub use runtime::reset_runtime;

pub use component::{
    AsyncComponent, ComponentDef, ComponentOptions, ComputedDef, CreateElement, Instance, InstanceId,
    LifecycleHook, PropDef, PropType, Rendered, Resolver, Unwatch, WatchDef, WatchOptions, WatchSource,
    keep_alive,
};

pub use vdom::{DirectiveDef, MemoryDom, NodeId, NodeOps, Patcher, VNode, VNodeData, VNodeDirective};

pub use global_api::{Plugin, global_mixin, register_component, register_directive, use_plugin};
