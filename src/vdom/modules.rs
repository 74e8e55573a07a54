//! Patch modules.
//!
//! Modules apply vnode data (attributes, classes, styles, listeners,
//! directives, refs) to real nodes. The patcher calls every module at each
//! point of a node's life:
//!
//! - `create(empty, vnode)` once the node exists
//! - `update(old, vnode)` when a vnode is patched against its predecessor
//! - `insert(vnode)` after the node is attached to the tree
//! - `post_patch(old, vnode)` after a patch including children
//! - `destroy(vnode)` while the node is being torn down
//!
//! Component placeholders are patchable too: their data lands on the root
//! element of the component they stand for.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::node_ops::{ListenerId, NodeId, NodeOps};
use super::vnode::{VNode, VNodeDirective};
use crate::component::events::{Handler, normalize_event};
use crate::component::{Instance, InstanceInner, RefTarget};
use crate::error::{Result, dev_warn, invoke_with_error_handling};
use crate::global_api::resolve_directive;
use crate::observer::Value;
use crate::runtime::next_tick::with_macro_task;

/// One aspect of vnode data applied to real nodes.
pub trait Module {
    fn create(&self, _ops: &dyn NodeOps, _empty: &VNode, _vnode: &VNode) {}
    fn update(&self, _ops: &dyn NodeOps, _old: &VNode, _vnode: &VNode) {}
    fn destroy(&self, _ops: &dyn NodeOps, _vnode: &VNode) {}
    /// Whether `vnode` needs an `insert` call once attached.
    fn wants_insert(&self, _vnode: &VNode) -> bool {
        false
    }
    fn insert(&self, _vnode: &VNode) {}
    fn post_patch(&self, _old: &VNode, _vnode: &VNode) {}
}

/// The standard module set.
pub fn default_modules() -> Vec<Box<dyn Module>> {
    vec![
        Box::new(AttrsModule),
        Box::new(ClassModule::default()),
        Box::new(ListenersModule::default()),
        Box::new(StyleModule::default()),
        Box::new(RefModule),
        Box::new(DirectivesModule),
    ]
}

fn inherits_attrs(vnode: &VNode) -> bool {
    vnode
        .component_options()
        .is_none_or(|opts| opts.def.options().inherit_attrs)
}

// =============================================================================
// Attributes
// =============================================================================

pub struct AttrsModule;

impl AttrsModule {
    fn apply(&self, ops: &dyn NodeOps, old: &VNode, vnode: &VNode) {
        if !inherits_attrs(vnode) {
            return;
        }
        let Some(elm) = vnode.elm() else { return };
        let old_attrs = old.data().attrs.clone();
        let attrs = vnode.data().attrs.clone();
        if old_attrs.is_empty() && attrs.is_empty() {
            return;
        }
        for (name, value) in &attrs {
            if old_attrs.get(name) != Some(value) {
                ops.set_attribute(elm, name, value);
            }
        }
        for name in old_attrs.keys() {
            if !attrs.contains_key(name) {
                ops.remove_attribute(elm, name);
            }
        }
    }
}

impl Module for AttrsModule {
    fn create(&self, ops: &dyn NodeOps, empty: &VNode, vnode: &VNode) {
        self.apply(ops, empty, vnode);
    }

    fn update(&self, ops: &dyn NodeOps, old: &VNode, vnode: &VNode) {
        self.apply(ops, old, vnode);
    }
}

// =============================================================================
// Class
// =============================================================================

/// Merge classes along the component chain: inner roots first, then the
/// vnode's own, then the placeholders it stands in for.
pub fn class_for_vnode(vnode: &VNode) -> String {
    let mut classes = vnode.data().class.clone();

    let mut child = vnode.clone();
    while let Some(root) = child.component_instance().and_then(|vm| vm.rendered_vnode()) {
        let mut merged = root.data().class.clone();
        merged.extend(classes);
        classes = merged;
        child = root;
    }

    let mut parent = vnode.parent();
    while let Some(placeholder) = parent {
        classes.extend(placeholder.data().class.iter().cloned());
        parent = placeholder.parent();
    }

    classes.retain(|c| !c.is_empty());
    classes.join(" ")
}

#[derive(Default)]
pub struct ClassModule {
    applied: RefCell<HashMap<NodeId, String>>,
}

impl ClassModule {
    fn apply(&self, ops: &dyn NodeOps, vnode: &VNode) {
        let Some(elm) = vnode.elm() else { return };
        if vnode.tag().is_none() {
            return;
        }
        let class = class_for_vnode(vnode);
        let mut applied = self.applied.borrow_mut();
        let previous = applied.get(&elm).map(String::as_str).unwrap_or("");
        if previous != class {
            ops.set_class(elm, &class);
            applied.insert(elm, class);
        }
    }
}

impl Module for ClassModule {
    fn create(&self, ops: &dyn NodeOps, _empty: &VNode, vnode: &VNode) {
        self.apply(ops, vnode);
    }

    fn update(&self, ops: &dyn NodeOps, _old: &VNode, vnode: &VNode) {
        self.apply(ops, vnode);
    }

    fn destroy(&self, _ops: &dyn NodeOps, vnode: &VNode) {
        if vnode.parent().is_none() {
            if let Some(elm) = vnode.elm() {
                self.applied.borrow_mut().remove(&elm);
            }
        }
    }
}

// =============================================================================
// Style
// =============================================================================

/// Merge styles along the component chain. Outer declarations win.
pub fn style_for_vnode(vnode: &VNode) -> IndexMap<String, String> {
    let mut chain = Vec::new();
    let mut child = vnode.clone();
    while let Some(root) = child.component_instance().and_then(|vm| vm.rendered_vnode()) {
        chain.push(root.clone());
        child = root;
    }
    chain.reverse();
    chain.push(vnode.clone());
    let mut parent = vnode.parent();
    while let Some(placeholder) = parent {
        parent = placeholder.parent();
        chain.push(placeholder);
    }

    let mut style = IndexMap::new();
    for node in chain {
        for (k, v) in &node.data().style {
            style.insert(k.clone(), v.clone());
        }
    }
    style
}

#[derive(Default)]
pub struct StyleModule {
    applied: RefCell<HashMap<NodeId, IndexMap<String, String>>>,
}

impl StyleModule {
    fn apply(&self, ops: &dyn NodeOps, vnode: &VNode) {
        let Some(elm) = vnode.elm() else { return };
        if vnode.tag().is_none() {
            return;
        }
        let style = style_for_vnode(vnode);
        let previous = self.applied.borrow().get(&elm).cloned().unwrap_or_default();
        if previous == style {
            return;
        }
        for name in previous.keys() {
            if !style.contains_key(name) {
                ops.set_style(elm, name, None);
            }
        }
        for (name, value) in &style {
            if previous.get(name) != Some(value) {
                ops.set_style(elm, name, Some(value));
            }
        }
        self.applied.borrow_mut().insert(elm, style);
    }
}

impl Module for StyleModule {
    fn create(&self, ops: &dyn NodeOps, _empty: &VNode, vnode: &VNode) {
        self.apply(ops, vnode);
    }

    fn update(&self, ops: &dyn NodeOps, _old: &VNode, vnode: &VNode) {
        self.apply(ops, vnode);
    }

    fn destroy(&self, _ops: &dyn NodeOps, vnode: &VNode) {
        if vnode.parent().is_none() {
            if let Some(elm) = vnode.elm() {
                self.applied.borrow_mut().remove(&elm);
            }
        }
    }
}

// =============================================================================
// Listeners
// =============================================================================

/// Stable listener registered on the node; handler changes swap what it
/// calls instead of re-registering.
struct Invoker {
    handler: Rc<RefCell<Handler>>,
    listener: ListenerId,
}

#[derive(Hash, PartialEq, Eq, Clone)]
struct InvokerKey {
    elm: NodeId,
    native: bool,
    name: String,
}

#[derive(Default)]
pub struct ListenersModule {
    invokers: RefCell<HashMap<InvokerKey, Invoker>>,
}

impl ListenersModule {
    fn listeners_of(vnode: &VNode) -> IndexMap<String, Handler> {
        let data = vnode.data();
        if vnode.is_component() {
            data.native_on.clone()
        } else {
            data.on.clone()
        }
    }

    fn apply(&self, ops: &dyn NodeOps, old: &VNode, vnode: &VNode) {
        let on = Self::listeners_of(vnode);
        let old_on = Self::listeners_of(old);
        if on.is_empty() && old_on.is_empty() {
            return;
        }
        let Some(elm) = vnode.elm() else { return };
        let native = vnode.is_component();

        for (name, handler) in &on {
            let key = InvokerKey {
                elm,
                native,
                name: name.clone(),
            };
            let mut invokers = self.invokers.borrow_mut();
            match invokers.get(&key) {
                Some(invoker) => {
                    let same = Rc::ptr_eq(&*invoker.handler.borrow(), handler);
                    if !same {
                        *invoker.handler.borrow_mut() = handler.clone();
                    }
                }
                None => {
                    let context = vnode.context().map(|vm| vm.downgrade());
                    let invoker = create_invoker(ops, elm, name, handler.clone(), context);
                    invokers.insert(key, invoker);
                }
            }
        }

        for name in old_on.keys().filter(|name| !on.contains_key(*name)) {
            self.remove(ops, elm, native, name);
        }
    }

    fn remove(&self, ops: &dyn NodeOps, elm: NodeId, native: bool, name: &str) {
        let key = InvokerKey {
            elm,
            native,
            name: name.to_string(),
        };
        let removed = self.invokers.borrow_mut().remove(&key);
        if let Some(invoker) = removed {
            ops.remove_listener(elm, invoker.listener);
        }
    }
}

fn create_invoker(
    ops: &dyn NodeOps,
    elm: NodeId,
    name: &str,
    handler: Handler,
    context: Option<Weak<InstanceInner>>,
) -> Invoker {
    let event = normalize_event(name);
    let cell = Rc::new(RefCell::new(handler));
    let current = cell.clone();
    let fired = std::cell::Cell::new(false);
    let once = event.once;
    let listener: Handler = Rc::new(move |args: &[Value]| {
        if once && fired.replace(true) {
            return Ok(());
        }
        let handler = current.borrow().clone();
        let vm = context.as_ref().and_then(Instance::upgrade);
        // Updates triggered from host events are deferred to a macro task.
        with_macro_task(|| invoke_with_error_handling(|| handler(args), vm.as_ref(), "v-on handler"));
        Ok(())
    });
    let listener = ops.add_listener(elm, &event.name, event.capture, listener);
    Invoker { handler: cell, listener }
}

impl Module for ListenersModule {
    fn create(&self, ops: &dyn NodeOps, empty: &VNode, vnode: &VNode) {
        self.apply(ops, empty, vnode);
    }

    fn update(&self, ops: &dyn NodeOps, old: &VNode, vnode: &VNode) {
        self.apply(ops, old, vnode);
    }

    fn destroy(&self, ops: &dyn NodeOps, vnode: &VNode) {
        let Some(elm) = vnode.elm() else { return };
        let native = vnode.is_component();
        for name in Self::listeners_of(vnode).keys() {
            self.remove(ops, elm, native, name);
        }
    }
}

// =============================================================================
// Refs
// =============================================================================

/// Registers `ref_name` vnodes in their context's refs.
pub struct RefModule;

/// Add or drop the ref named by `vnode`, outside of the module pipeline.
pub(crate) fn register_ref(vnode: &VNode, remove: bool) {
    RefModule::register(vnode, remove);
}

impl RefModule {
    fn register(vnode: &VNode, remove: bool) {
        let Some(name) = vnode.data().ref_name.clone() else { return };
        let Some(vm) = vnode.context() else { return };
        let target = match (vnode.component_instance(), vnode.elm()) {
            (Some(child), _) => RefTarget::Component(child),
            (None, Some(elm)) => RefTarget::Element(elm),
            (None, None) => return,
        };
        if remove {
            vm.remove_ref(&name, &target);
        } else {
            vm.set_ref(&name, target);
        }
    }
}

impl Module for RefModule {
    fn create(&self, _ops: &dyn NodeOps, _empty: &VNode, vnode: &VNode) {
        Self::register(vnode, false);
    }

    fn update(&self, _ops: &dyn NodeOps, old: &VNode, vnode: &VNode) {
        if old.data().ref_name != vnode.data().ref_name {
            Self::register(old, true);
            Self::register(vnode, false);
        }
    }

    fn destroy(&self, _ops: &dyn NodeOps, vnode: &VNode) {
        Self::register(vnode, true);
    }
}

// =============================================================================
// Directives
// =============================================================================

/// Arguments passed to directive hooks.
#[derive(Clone, Debug)]
pub struct DirectiveBinding {
    pub name: String,
    pub value: Value,
    pub old_value: Value,
    pub arg: Option<String>,
    pub modifiers: Vec<String>,
}

impl DirectiveBinding {
    fn new(dir: &VNodeDirective, old_value: Value) -> Self {
        Self {
            name: dir.name.clone(),
            value: dir.value.clone(),
            old_value,
            arg: dir.arg.clone(),
            modifiers: dir.modifiers.clone(),
        }
    }
}

/// Directive hook: `(element, binding, vnode)`.
pub type DirectiveHook = Rc<dyn Fn(NodeId, &DirectiveBinding, &VNode) -> Result<()>>;

/// A reusable element behaviour.
#[derive(Clone, Default)]
pub struct DirectiveDef {
    pub bind: Option<DirectiveHook>,
    pub inserted: Option<DirectiveHook>,
    pub update: Option<DirectiveHook>,
    pub component_updated: Option<DirectiveHook>,
    pub unbind: Option<DirectiveHook>,
}

impl DirectiveDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, f: impl Fn(NodeId, &DirectiveBinding, &VNode) -> Result<()> + 'static) -> Self {
        self.bind = Some(Rc::new(f));
        self
    }

    pub fn inserted(mut self, f: impl Fn(NodeId, &DirectiveBinding, &VNode) -> Result<()> + 'static) -> Self {
        self.inserted = Some(Rc::new(f));
        self
    }

    pub fn update(mut self, f: impl Fn(NodeId, &DirectiveBinding, &VNode) -> Result<()> + 'static) -> Self {
        self.update = Some(Rc::new(f));
        self
    }

    pub fn component_updated(
        mut self,
        f: impl Fn(NodeId, &DirectiveBinding, &VNode) -> Result<()> + 'static,
    ) -> Self {
        self.component_updated = Some(Rc::new(f));
        self
    }

    pub fn unbind(mut self, f: impl Fn(NodeId, &DirectiveBinding, &VNode) -> Result<()> + 'static) -> Self {
        self.unbind = Some(Rc::new(f));
        self
    }
}

fn call_directive_hook(hook: &Option<DirectiveHook>, stage: &str, binding: &DirectiveBinding, vnode: &VNode) {
    let (Some(hook), Some(elm)) = (hook, vnode.elm()) else { return };
    let vm = vnode.context();
    let info = format!("directive {} {stage} hook", binding.name);
    invoke_with_error_handling(|| hook(elm, binding, vnode), vm.as_ref(), &info);
}

fn resolved_directives(vnode: &VNode) -> Vec<(VNodeDirective, DirectiveDef)> {
    let dirs = vnode.data().directives.clone();
    if dirs.is_empty() {
        return Vec::new();
    }
    let vm = vnode.context();
    dirs.into_iter()
        .filter_map(|dir| match resolve_directive(vm.as_ref(), &dir.name) {
            Some(def) => Some((dir, def)),
            None => {
                dev_warn(&format!("Failed to resolve directive: {}", dir.name), vm.as_ref());
                None
            }
        })
        .collect()
}

/// Runs directive hooks as their vnodes are bound, updated and removed.
pub struct DirectivesModule;

impl DirectivesModule {
    fn diff(old: &VNode, vnode: &VNode, is_create: bool, is_destroy: bool) {
        let old_dirs = if is_create { Vec::new() } else { resolved_directives(old) };
        let new_dirs = if is_destroy { Vec::new() } else { resolved_directives(vnode) };

        for (dir, def) in &new_dirs {
            match old_dirs.iter().find(|(o, _)| o.name == dir.name) {
                None => {
                    let binding = DirectiveBinding::new(dir, Value::Undefined);
                    call_directive_hook(&def.bind, "bind", &binding, vnode);
                    // Nodes being created get `inserted` from the insert hook.
                    if !is_create {
                        call_directive_hook(&def.inserted, "inserted", &binding, vnode);
                    }
                }
                Some((old_dir, _)) => {
                    let binding = DirectiveBinding::new(dir, old_dir.value.clone());
                    call_directive_hook(&def.update, "update", &binding, vnode);
                }
            }
        }

        if !is_create {
            for (old_dir, def) in &old_dirs {
                if !new_dirs.iter().any(|(d, _)| d.name == old_dir.name) {
                    let binding = DirectiveBinding::new(old_dir, old_dir.value.clone());
                    call_directive_hook(&def.unbind, "unbind", &binding, old);
                }
            }
        }
    }
}

impl Module for DirectivesModule {
    fn create(&self, _ops: &dyn NodeOps, empty: &VNode, vnode: &VNode) {
        if !vnode.data().directives.is_empty() {
            Self::diff(empty, vnode, true, false);
        }
    }

    fn update(&self, _ops: &dyn NodeOps, old: &VNode, vnode: &VNode) {
        if !old.data().directives.is_empty() || !vnode.data().directives.is_empty() {
            Self::diff(old, vnode, false, false);
        }
    }

    fn destroy(&self, _ops: &dyn NodeOps, vnode: &VNode) {
        if !vnode.data().directives.is_empty() {
            Self::diff(vnode, vnode, false, true);
        }
    }

    fn wants_insert(&self, vnode: &VNode) -> bool {
        !vnode.data().directives.is_empty()
    }

    fn insert(&self, vnode: &VNode) {
        for (dir, def) in resolved_directives(vnode) {
            let binding = DirectiveBinding::new(&dir, Value::Undefined);
            call_directive_hook(&def.inserted, "inserted", &binding, vnode);
        }
    }

    fn post_patch(&self, old: &VNode, vnode: &VNode) {
        if vnode.data().directives.is_empty() {
            return;
        }
        let old_dirs = old.data().directives.clone();
        for (dir, def) in resolved_directives(vnode) {
            if let Some(old_dir) = old_dirs.iter().find(|o| o.name == dir.name) {
                let binding = DirectiveBinding::new(&dir, old_dir.value.clone());
                call_directive_hook(&def.component_updated, "componentUpdated", &binding, vnode);
            }
        }
    }
}
