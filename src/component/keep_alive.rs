//! Built-in `keep-alive` component.
//!
//! Renders the first component in its default slot and caches that
//! component's instance instead of destroying it when it is swapped out.
//! Cached instances are deactivated on removal and reactivated on reuse.
//!
//! Props:
//! - `include` / `exclude`: comma-separated string or array of component
//!   names to cache or skip
//! - `max`: cache size; the least recently used entry is evicted

use std::cell::RefCell;

use indexmap::IndexMap;

use super::instance::Instance;
use super::options::{ComponentDef, ComponentOptions, PropDef, PropType};
use super::render::{CreateElement, Rendered};
use super::state::WatchOptions;
use crate::error::Result;
use crate::observer::Value;
use crate::vdom::{ComponentVNodeOptions, VNode};

pub(crate) const KEEP_ALIVE_NAME: &str = "keep-alive";

struct CacheEntry {
    name: Option<String>,
    /// Placeholder tag, compared against the current vnode when pruning.
    tag: String,
    instance: Instance,
}

/// Per-instance cache, stored as an instance extension.
#[derive(Default)]
struct KeepAliveCache {
    /// Least recently used first.
    entries: RefCell<IndexMap<String, CacheEntry>>,
    /// Rendered but not yet instantiated; cached after the patch.
    pending: RefCell<Option<(String, VNode)>>,
}

thread_local! {
    static KEEP_ALIVE: ComponentDef = build();
}

/// The `keep-alive` definition.
pub fn keep_alive() -> ComponentDef {
    KEEP_ALIVE.with(ComponentDef::clone)
}

fn build() -> ComponentDef {
    ComponentOptions::new()
        .name(KEEP_ALIVE_NAME)
        .abstract_component()
        .prop("include", PropDef::new().of(PropType::String).of(PropType::Array))
        .prop("exclude", PropDef::new().of(PropType::String).of(PropType::Array))
        .prop("max", PropDef::new().of(PropType::String).of(PropType::Number))
        .render(render)
        .mounted(|vm| {
            cache_vnode(vm);
            vm.watch(
                "include",
                |vm, include, _| {
                    prune_cache(vm, |name| include.is_nullish() || matches(include, name));
                    Ok(())
                },
                WatchOptions::default(),
            )?;
            vm.watch(
                "exclude",
                |vm, exclude, _| {
                    prune_cache(vm, |name| !matches(exclude, name));
                    Ok(())
                },
                WatchOptions::default(),
            )?;
            Ok(())
        })
        .updated(|vm| {
            cache_vnode(vm);
            Ok(())
        })
        .destroyed(|vm| {
            let cache = vm.extension::<KeepAliveCache>();
            let keys: Vec<String> = cache.entries.borrow().keys().cloned().collect();
            for key in keys {
                prune_cache_entry(&cache, &key, None);
            }
            Ok(())
        })
        .build()
}

/// Whether `name` is listed in an include/exclude pattern.
pub(crate) fn matches(pattern: &Value, name: &str) -> bool {
    match pattern {
        Value::Str(list) => list.split(',').any(|n| n == name),
        Value::Array(list) => list.to_vec().iter().any(|n| n.as_str() == Some(name)),
        _ => false,
    }
}

fn component_name(options: &ComponentVNodeOptions) -> Option<String> {
    options
        .def
        .name()
        .map(str::to_string)
        .or_else(|| (!options.tag.is_empty()).then(|| options.tag.clone()))
}

fn cache_key(vnode: &VNode, options: &ComponentVNodeOptions) -> String {
    match vnode.key() {
        Some(key) => key.to_string(),
        None if options.tag.is_empty() => options.def.cid().to_string(),
        None => format!("{}::{}", options.def.cid(), options.tag),
    }
}

fn render(h: &CreateElement<'_>) -> Result<Rendered> {
    let vm = h.vm();
    let slot = vm.slot("default");
    let Some(vnode) = slot
        .iter()
        .find(|v| v.is_component() || v.is_async_placeholder())
        .cloned()
    else {
        return Ok(match slot.into_iter().next() {
            Some(first) => Rendered::Node(first),
            None => Rendered::Nodes(Vec::new()),
        });
    };

    let Some((name, key)) = vnode
        .component_options()
        .map(|options| (component_name(options), cache_key(&vnode, options)))
    else {
        // Still loading: nothing to cache yet.
        return Ok(vnode.into());
    };

    let include = h.get("include");
    let exclude = h.get("exclude");
    let skipped = match name.as_deref() {
        Some(name) => (!include.is_nullish() && !matches(&include, name)) || matches(&exclude, name),
        None => !include.is_nullish(),
    };
    if skipped {
        return Ok(vnode.into());
    }

    let cache = vm.extension::<KeepAliveCache>();
    let hit = cache.entries.borrow_mut().shift_remove(&key);
    match hit {
        Some(entry) => {
            vnode.set_component_instance(Some(entry.instance.clone()));
            // Most recently used goes last.
            cache.entries.borrow_mut().insert(key, entry);
        }
        None => *cache.pending.borrow_mut() = Some((key, vnode.clone())),
    }
    vnode.data_mut().keep_alive = true;
    Ok(vnode.into())
}

/// Record the instance created for the last rendered vnode, evicting the
/// oldest entry past `max`.
fn cache_vnode(vm: &Instance) {
    let cache = vm.extension::<KeepAliveCache>();
    let Some((key, vnode)) = cache.pending.borrow_mut().take() else { return };
    let (Some(instance), Some(options)) = (vnode.component_instance(), vnode.component_options()) else {
        return;
    };
    let entry = CacheEntry {
        name: component_name(options),
        tag: vnode.tag().unwrap_or_default().to_string(),
        instance,
    };
    cache.entries.borrow_mut().insert(key, entry);

    let Some(max) = max_entries(vm) else { return };
    let oldest = {
        let entries = cache.entries.borrow();
        (entries.len() > max).then(|| entries.keys().next().cloned()).flatten()
    };
    if let Some(oldest) = oldest {
        tracing::debug!(key = %oldest, max, "keep-alive cache full, evicting");
        prune_cache_entry(&cache, &oldest, vm.rendered_vnode().as_ref());
    }
}

fn max_entries(vm: &Instance) -> Option<usize> {
    match vm.get("max") {
        Value::Number(n) if n >= 0.0 => Some(n as usize),
        Value::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Drop entries whose name fails `keep`.
fn prune_cache(vm: &Instance, keep: impl Fn(&str) -> bool) {
    let cache = vm.extension::<KeepAliveCache>();
    let stale: Vec<String> = cache
        .entries
        .borrow()
        .iter()
        .filter(|(_, entry)| entry.name.as_deref().is_some_and(|name| !keep(name)))
        .map(|(key, _)| key.clone())
        .collect();
    let current = vm.rendered_vnode();
    for key in stale {
        prune_cache_entry(&cache, &key, current.as_ref());
    }
}

/// Remove `key`, destroying its instance unless it is the one on screen.
fn prune_cache_entry(cache: &KeepAliveCache, key: &str, current: Option<&VNode>) {
    let Some(entry) = cache.entries.borrow_mut().shift_remove(key) else { return };
    let on_screen = current.is_some_and(|c| c.tag() == Some(entry.tag.as_str()));
    if !on_screen {
        entry.instance.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ReactiveArray, ReactiveObject};
    use crate::runtime::next_tick::run_until_idle;
    use crate::runtime::reset_runtime;
    use crate::vdom::{MemoryDom, Patcher, VNodeData};
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn view(name: &'static str, log: &Log) -> ComponentDef {
        let entry = |log: &Log, event: &'static str| {
            let log = log.clone();
            move |_: &Instance| -> Result<()> {
                log.borrow_mut().push(format!("{name} {event}"));
                Ok(())
            }
        };
        ComponentOptions::new()
            .name(name)
            .data(|_| Ok(ReactiveObject::new().with("n", 0)))
            .render(move |h| Ok(h.element("p", VNodeData::new(), vec![h.text(format!("{name}{}", h.get("n")))]).into()))
            .created(entry(log, "created"))
            .activated(entry(log, "activated"))
            .deactivated(entry(log, "deactivated"))
            .destroyed(entry(log, "destroyed"))
            .build()
    }

    fn host(log: &Log, keep_alive_data: VNodeData) -> ComponentDef {
        ComponentOptions::new()
            .data(|_| Ok(ReactiveObject::new().with("view", "a")))
            .component("a", &view("a", log))
            .component("b", &view("b", log))
            .render(move |h| {
                let current = h.get("view").to_string();
                let inner = h.element(&current, VNodeData::new(), vec![]);
                let cached = h.element("keep-alive", keep_alive_data.clone(), vec![inner]);
                Ok(h.element("div", VNodeData::new(), vec![cached]).into())
            })
            .build()
    }

    #[test]
    fn test_matches_patterns() {
        assert!(matches(&Value::from("a,b"), "b"));
        assert!(!matches(&Value::from("a,b"), "c"));
        let list = ReactiveArray::from_vec(vec![Value::from("x")]);
        assert!(matches(&Value::from(list), "x"));
        assert!(!matches(&Value::Undefined, "x"));
    }

    #[test]
    fn test_swapped_out_instance_is_reused() {
        reset_runtime();
        let log: Log = Rc::default();
        let dom = MemoryDom::new();
        let vm = Instance::new(&host(&log, VNodeData::new()), Patcher::new(dom.clone())).unwrap();
        vm.mount(None).unwrap();
        let el = vm.el().unwrap();
        assert_eq!(dom.serialize(el), "<div><p>a0</p></div>");

        vm.assign("view", "b");
        run_until_idle();
        assert_eq!(dom.serialize(el), "<div><p>b0</p></div>");

        vm.assign("view", "a");
        run_until_idle();
        assert_eq!(dom.serialize(el), "<div><p>a0</p></div>");

        assert_eq!(
            *log.borrow(),
            vec![
                "a created",
                "a activated",
                "b created",
                "a deactivated",
                "b activated",
                "b deactivated",
                "a activated",
            ]
        );
    }

    #[test]
    fn test_max_evicts_least_recently_used() {
        reset_runtime();
        let log: Log = Rc::default();
        let dom = MemoryDom::new();
        let data = VNodeData::new().prop("max", 1);
        let vm = Instance::new(&host(&log, data), Patcher::new(dom.clone())).unwrap();
        vm.mount(None).unwrap();

        vm.assign("view", "b");
        run_until_idle();
        assert!(log.borrow().contains(&"a destroyed".to_string()));

        vm.assign("view", "a");
        run_until_idle();
        let created = log.borrow().iter().filter(|e| *e == "a created").count();
        assert_eq!(created, 2);
    }

    #[test]
    fn test_excluded_component_is_not_cached() {
        reset_runtime();
        let log: Log = Rc::default();
        let dom = MemoryDom::new();
        let data = VNodeData::new().prop("exclude", "a");
        let vm = Instance::new(&host(&log, data), Patcher::new(dom.clone())).unwrap();
        vm.mount(None).unwrap();

        vm.assign("view", "b");
        run_until_idle();
        assert!(log.borrow().contains(&"a destroyed".to_string()));
        assert!(!log.borrow().contains(&"a activated".to_string()));
    }
}
