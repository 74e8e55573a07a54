//! Mounting, updating, destroying and (de)activating instances.

use std::rc::Rc;

use indexmap::IndexMap;

use super::events::{Handler, update_component_listeners};
use super::instance::Instance;
use super::options::LifecycleHook;
use super::render::{render_component, resolve_slots};
use super::state::validate_prop;
use crate::config::with_config;
use crate::error::{Error, Result, component_label, dev_warn, handle_error, invoke_with_error_handling};
use crate::observer::{Value, Watcher, WatcherFlags, WatcherOptions, toggle_observing, untracked};
use crate::runtime::next_tick::next_tick_with;
use crate::runtime::set_active_instance;
use crate::vdom::{NodeId, OldTree, VNode};

/// Run the handlers of `hook`, then emit `hook:<name>` if anyone listens.
///
/// Hooks run untracked; a hook reading state never subscribes the unit that
/// happens to be collecting.
pub(crate) fn call_hook(vm: &Instance, hook: LifecycleHook) {
    untracked(|| {
        let handlers = vm.options().hooks_for(hook).to_vec();
        if !handlers.is_empty() {
            let info = format!("{} hook", hook.as_str());
            for handler in handlers {
                invoke_with_error_handling(|| handler(vm), Some(vm), &info);
            }
        }
        if vm.has_hook_event() {
            vm.emit(&hook.event_name(), &[]);
        }
    });
}

// =============================================================================
// Mount / update
// =============================================================================

/// Render `vm` and patch the result into the tree.
fn update_component(vm: &Instance, vnode: VNode) -> Result<()> {
    let _span = with_config(|c| c.performance)
        .then(|| tracing::debug_span!("patch", component = ?vm.name(), uid = vm.uid().0).entered());

    let prev_el = vm.el();
    let prev_vnode = vm.replace_rendered_vnode(Some(vnode.clone()));
    let patcher = vm.patcher();
    let el = {
        let _active = set_active_instance(vm);
        match prev_vnode {
            // Initial render: replace the mount target, if any.
            None => patcher.patch(prev_el.map(OldTree::Element), Some(&vnode))?,
            Some(prev) => patcher.patch(Some(OldTree::VNode(prev)), Some(&vnode))?,
        }
    };
    vm.set_el(el);

    if prev_el != el {
        if let Some(prev) = prev_el {
            patcher.ops().set_owner(prev, None);
        }
    }
    if let Some(el) = el {
        patcher.ops().set_owner(el, Some(vm.uid()));
    }

    // A parent whose root is this component shares its element.
    if let (Some(placeholder), Some(parent)) = (vm.parent_vnode(), vm.parent()) {
        if parent.rendered_vnode().is_some_and(|root| root.ptr_eq(&placeholder)) {
            parent.set_el(el);
        }
    }
    Ok(())
}

impl Instance {
    /// Mount onto `el` (replacing it), or render detached with `None`.
    ///
    /// Creates the render unit; its first evaluation renders and patches.
    /// Root instances fire `mounted` right away; components fire it from
    /// their placeholder's insert hook.
    pub fn mount(&self, el: Option<NodeId>) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::Destroyed(self.uid().0));
        }
        self.set_el(el);
        if self.options().render.is_none() {
            dev_warn("Failed to mount component: render function not defined.", Some(self));
        }
        call_hook(self, LifecycleHook::BeforeMount);

        let weak = self.downgrade();
        let getter = move || {
            if let Some(vm) = Instance::upgrade(&weak) {
                let vnode = render_component(&vm);
                update_component(&vm, vnode)?;
            }
            Ok(Value::Undefined)
        };
        let before_weak = self.downgrade();
        let before: Rc<dyn Fn()> = Rc::new(move || {
            if let Some(vm) = Instance::upgrade(&before_weak) {
                if vm.is_mounted() && !vm.is_destroyed() {
                    call_hook(&vm, LifecycleHook::BeforeUpdate);
                }
            }
        });
        Watcher::new(
            Some(self),
            getter,
            None,
            WatcherOptions {
                flags: WatcherFlags::RENDER,
                before: Some(before),
                expression: Some(format!("render {}", component_label(Some(self)))),
            },
        )?;

        if self.parent_vnode().is_none() {
            self.mark_mounted();
            call_hook(self, LifecycleHook::Mounted);
        }
        Ok(())
    }

    /// Schedule a re-render.
    pub fn force_update(&self) {
        if let Some(watcher) = self.render_watcher() {
            watcher.update();
        }
    }

    /// Run `f` after the next flush.
    pub fn next_tick(&self, f: impl FnOnce(&Instance) -> Result<()> + 'static) {
        let vm = self.clone();
        next_tick_with(Some(self), move || f(&vm));
    }

    /// Tear the instance down.
    ///
    /// `beforeDestroy` fires on the way down the tree and `destroyed` on the
    /// way back up. Units are torn down, child components destroyed through
    /// the tree's destroy hooks and all listeners removed. A root instance
    /// also detaches its element. Idempotent.
    pub fn destroy(&self) {
        if self.is_being_destroyed() {
            return;
        }
        call_hook(self, LifecycleHook::BeforeDestroy);
        self.mark_being_destroyed();

        if let Some(parent) = self.parent() {
            if !parent.is_being_destroyed() && !self.options().is_abstract {
                parent.remove_child(self);
            }
        }

        if let Some(watcher) = self.render_watcher() {
            watcher.teardown();
        }
        for watcher in self.take_watchers() {
            watcher.teardown();
        }
        if let Some(ob) = self.data().observer() {
            ob.release_root();
        }
        self.mark_destroyed();

        let patcher = self.patcher();
        if let Some(vnode) = self.rendered_vnode() {
            if let Err(err) = patcher.patch(Some(OldTree::VNode(vnode)), None) {
                handle_error(&err, Some(self), "destroy");
            }
        }
        call_hook(self, LifecycleHook::Destroyed);
        self.off_all();

        if let Some(el) = self.el() {
            patcher.ops().set_owner(el, None);
            if self.parent_vnode().is_none() {
                if let Some(parent_elm) = patcher.ops().parent_node(el) {
                    patcher.ops().remove_child(parent_elm, el);
                }
            }
        }
        self.release();
        tracing::trace!(uid = self.uid().0, component = ?self.name(), "destroyed instance");
    }
}

// =============================================================================
// Child updates
// =============================================================================

/// Hand a re-rendered placeholder's props, listeners and slot content to
/// the existing child instance.
pub(crate) fn update_child_component(
    vm: &Instance,
    props_data: &IndexMap<String, Value>,
    listeners: &IndexMap<String, Handler>,
    parent_vnode: &VNode,
    render_children: &[VNode],
) {
    let needs_force_update = !render_children.is_empty() || !vm.render_children().is_empty();

    vm.set_parent_vnode(Some(parent_vnode.clone()));
    if let Some(root) = vm.rendered_vnode() {
        root.set_parent(Some(parent_vnode));
    }
    vm.set_render_children(render_children.to_vec());

    let props = vm.options().props.clone();
    if !props.is_empty() {
        toggle_observing(false);
        vm.set_updating_props(true);
        let target = vm.props();
        for key in props.keys() {
            let value = validate_prop(key, &props, props_data, vm);
            target.assign(key, value);
        }
        vm.set_updating_props(false);
        toggle_observing(true);
    }

    update_component_listeners(vm, listeners);

    if needs_force_update {
        let context = parent_vnode.context();
        vm.set_slots(resolve_slots(render_children, context.as_ref()));
        vm.force_update();
    }
}

// =============================================================================
// Keep-alive activation
// =============================================================================

fn is_in_inactive_tree(vm: &Instance) -> bool {
    let mut current = vm.parent();
    while let Some(parent) = current {
        if parent.inactive() == Some(true) {
            return true;
        }
        current = parent.parent();
    }
    false
}

/// Mark `vm` and its subtree active, firing `activated` top-down.
pub(crate) fn activate_child_component(vm: &Instance, direct: bool) {
    if direct {
        vm.set_direct_inactive(false);
        if is_in_inactive_tree(vm) {
            return;
        }
    } else if vm.is_direct_inactive() {
        return;
    }
    if vm.inactive() != Some(false) {
        vm.set_inactive(Some(false));
        for child in vm.children() {
            activate_child_component(&child, false);
        }
        call_hook(vm, LifecycleHook::Activated);
    }
}

/// Mark `vm` and its subtree inactive, firing `deactivated` top-down.
pub(crate) fn deactivate_child_component(vm: &Instance, direct: bool) {
    if direct {
        vm.set_direct_inactive(true);
        if is_in_inactive_tree(vm) {
            return;
        }
    }
    if vm.inactive() != Some(true) {
        vm.set_inactive(Some(true));
        for child in vm.children() {
            deactivate_child_component(&child, false);
        }
        call_hook(vm, LifecycleHook::Deactivated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentOptions;
    use crate::observer::ReactiveObject;
    use crate::runtime::next_tick::run_until_idle;
    use crate::runtime::reset_runtime;
    use crate::vdom::{MemoryDom, Patcher, VNodeData};
    use std::cell::RefCell;

    fn logger(log: &Rc<RefCell<Vec<String>>>, label: &'static str) -> impl Fn(&Instance) -> Result<()> + 'static {
        let log = log.clone();
        move |_| {
            log.borrow_mut().push(label.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_root_mount_renders_and_updates() {
        reset_runtime();
        let dom = MemoryDom::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let def = ComponentOptions::new()
            .data(|_| Ok(ReactiveObject::new().with("msg", "hi")))
            .render(|h| Ok(h.element("p", VNodeData::new(), vec![h.text(h.get("msg").to_string())]).into()))
            .before_mount(logger(&log, "beforeMount"))
            .mounted(logger(&log, "mounted"))
            .before_update(logger(&log, "beforeUpdate"))
            .updated(logger(&log, "updated"))
            .build();

        let vm = Instance::new(&def, Patcher::new(dom.clone())).unwrap();
        vm.mount(None).unwrap();
        let el = vm.el().unwrap();
        assert_eq!(dom.serialize(el), "<p>hi</p>");
        assert_eq!(dom.owner(el), Some(vm.uid()));

        vm.assign("msg", "bye");
        assert_eq!(dom.serialize(el), "<p>hi</p>");
        run_until_idle();
        assert_eq!(dom.serialize(el), "<p>bye</p>");
        assert_eq!(*log.borrow(), vec!["beforeMount", "mounted", "beforeUpdate", "updated"]);
    }

    #[test]
    fn test_hook_events_fire() {
        reset_runtime();
        let def = ComponentOptions::new().render(|h| Ok(h.empty().into())).build();
        let vm = Instance::new(&def, Patcher::new(MemoryDom::new())).unwrap();
        let seen = Rc::new(RefCell::new(0));
        let s = seen.clone();
        vm.on("hook:mounted", move |_| {
            *s.borrow_mut() += 1;
            Ok(())
        });
        vm.mount(None).unwrap();
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn test_destroy_is_idempotent_and_stops_updates() {
        reset_runtime();
        let dom = MemoryDom::new();
        let renders = Rc::new(RefCell::new(0));
        let r = renders.clone();
        let def = ComponentOptions::new()
            .data(|_| Ok(ReactiveObject::new().with("n", 0)))
            .render(move |h| {
                *r.borrow_mut() += 1;
                Ok(h.text(h.get("n").to_string()).into())
            })
            .build();
        let vm = Instance::new(&def, Patcher::new(dom.clone())).unwrap();
        vm.mount(None).unwrap();
        let data = vm.data();

        vm.destroy();
        vm.destroy();
        assert!(vm.is_destroyed());
        assert_eq!(vm.watcher_count(), 0);
        assert_eq!(data.observer().unwrap().vm_count(), 0);

        data.assign("n", 1);
        run_until_idle();
        assert_eq!(*renders.borrow(), 1);
        assert_eq!(vm.mount(None), Err(Error::Destroyed(vm.uid().0)));
    }

    #[test]
    fn test_activation_fires_once_per_transition() {
        reset_runtime();
        let log = Rc::new(RefCell::new(Vec::new()));
        let def = ComponentOptions::new()
            .activated(logger(&log, "activated"))
            .deactivated(logger(&log, "deactivated"))
            .build();
        let vm = Instance::new(&def, Patcher::new(MemoryDom::new())).unwrap();

        activate_child_component(&vm, true);
        activate_child_component(&vm, true);
        deactivate_child_component(&vm, true);
        deactivate_child_component(&vm, true);
        activate_child_component(&vm, true);

        assert_eq!(*log.borrow(), vec!["activated", "deactivated", "activated"]);
    }
}
