//! Components - instances, options and lifecycle.
//!
//! A component is described by a [`ComponentDef`] (built from
//! [`ComponentOptions`]) and lives as an [`Instance`]:
//!
//! - options: declarations plus the merge strategies for mixins/extends
//! - instance: the handle, tree links and per-instance state slots
//! - state: props, methods, data, computed and `watch`
//! - events: `on` / `once` / `off` / `emit`
//! - render: [`CreateElement`] and slot resolution
//! - lifecycle: mount, update, destroy, (de)activation
//! - inject: provide / inject
//! - keep_alive, async_component: built-in structural components
//!
//! # Example
//!
//! ```ignore
//! let counter = ComponentOptions::new()
//!     .data(|_| Ok(ReactiveObject::new().with("count", 0)))
//!     .render(|h| Ok(h.element("p", VNodeData::new(), vec![h.text(h.get("count").to_string())]).into()))
//!     .build();
//!
//! let vm = Instance::new(&counter, Patcher::new(MemoryDom::new()))?;
//! vm.mount(None)?;
//! vm.assign("count", 1); // re-renders on the next tick
//! ```

pub mod async_component;
pub mod events;
mod inject;
mod instance;
pub(crate) mod lifecycle;
pub mod keep_alive;
mod options;
mod render;
mod state;

pub use async_component::{AsyncComponent, Resolver};
pub use events::{Handler, NormalizedEvent, normalize_event};
pub use instance::{Instance, InstanceId, RefTarget};
pub(crate) use instance::InstanceInner;
pub use keep_alive::keep_alive;
pub use options::{
    ComponentDef, ComponentOptions, ComputedDef, DefaultValue, InjectDef, LifecycleHook, PropDef, PropType,
    WatchDef, merge_options,
};
pub use render::{CreateElement, Rendered};
pub use state::{Unwatch, WatchOptions, WatchSource};
