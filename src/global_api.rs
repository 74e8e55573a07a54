//! Global registries.
//!
//! Components and directives registered here resolve from every instance's
//! render. Global mixins are merged into every instance created afterwards.
//! Like the runtime context, the registry is per thread and cleared by
//! [`reset_runtime`](crate::runtime::reset_runtime).

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashSet;

use indexmap::IndexMap;

use crate::component::keep_alive::{KEEP_ALIVE_NAME, keep_alive};
use crate::component::{ComponentDef, ComponentOptions, Instance, merge_options};
use crate::error::Result;
use crate::vdom::DirectiveDef;

#[derive(Default)]
struct GlobalRegistry {
    components: IndexMap<String, ComponentDef>,
    directives: IndexMap<String, DirectiveDef>,
    /// Accumulated global mixins.
    options: ComponentOptions,
    plugins: HashSet<TypeId>,
}

thread_local! {
    static REGISTRY: RefCell<GlobalRegistry> = RefCell::new(GlobalRegistry::default());
}

fn with_registry<R>(f: impl FnOnce(&mut GlobalRegistry) -> R) -> R {
    REGISTRY.with(|registry| f(&mut registry.borrow_mut()))
}

/// Make `def` resolvable as `name` from any render.
pub fn register_component(name: impl Into<String>, def: &ComponentDef) {
    let name = name.into();
    tracing::debug!(name = %name, cid = def.cid(), "registered global component");
    with_registry(|r| r.components.insert(name, def.clone()));
}

/// Make `def` resolvable as directive `name` from any render.
pub fn register_directive(name: impl Into<String>, def: DirectiveDef) {
    with_registry(|r| r.directives.insert(name.into(), def));
}

/// Merge `mixin` into every instance created from now on.
pub fn global_mixin(mixin: ComponentOptions) {
    with_registry(|r| r.options = merge_options(&r.options, &mixin));
}

pub(crate) fn global_options() -> ComponentOptions {
    with_registry(|r| r.options.clone())
}

/// Something that configures the runtime once.
pub trait Plugin: 'static {
    fn install(&self) -> Result<()>;
}

/// Install `plugin` unless a plugin of the same type already is.
pub fn use_plugin<P: Plugin>(plugin: P) -> Result<()> {
    let fresh = with_registry(|r| r.plugins.insert(TypeId::of::<P>()));
    if !fresh {
        return Ok(());
    }
    let result = plugin.install();
    if result.is_err() {
        with_registry(|r| r.plugins.remove(&TypeId::of::<P>()));
    }
    result
}

pub(crate) fn reset_global_api() {
    // Dropped outside the borrow: definitions may own arbitrary closures.
    let previous = with_registry(std::mem::take);
    drop(previous);
}

// =============================================================================
// Name resolution
// =============================================================================

fn camelize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Look `name` up as written, camelized, then capitalized.
fn lookup<T: Clone>(map: &IndexMap<String, T>, name: &str) -> Option<T> {
    if let Some(found) = map.get(name) {
        return Some(found.clone());
    }
    let camel = camelize(name);
    if let Some(found) = map.get(&camel) {
        return Some(found.clone());
    }
    map.get(&capitalize(&camel)).cloned()
}

/// Resolve a component tag: the instance's own components, then globals,
/// then built-ins.
pub fn resolve_component(vm: Option<&Instance>, name: &str) -> Option<ComponentDef> {
    if let Some(def) = vm.and_then(|vm| lookup(&vm.options().components, name)) {
        return Some(def);
    }
    if let Some(def) = with_registry(|r| lookup(&r.components, name)) {
        return Some(def);
    }
    match name {
        KEEP_ALIVE_NAME | "KeepAlive" => Some(keep_alive()),
        _ => None,
    }
}

/// Resolve a directive: the instance's own directives, then globals.
pub fn resolve_directive(vm: Option<&Instance>, name: &str) -> Option<DirectiveDef> {
    if let Some(def) = vm.and_then(|vm| lookup(&vm.options().directives, name)) {
        return Some(def);
    }
    with_registry(|r| lookup(&r.directives, name))
}
