//! Component instances.
//!
//! An [`Instance`] is a cheap handle to one live component. It owns its
//! reactive state, its units (render, computed, user watchers), its child
//! instances and the last rendered tree. Parents hold children strongly;
//! children, vnodes and watchers point back through weak references.
//!
//! Creation order, which hooks and tests can observe:
//!
//! 1. lifecycle bookkeeping (parent link, flags)
//! 2. events (parent listeners from the placeholder)
//! 3. render context (slots)
//! 4. `beforeCreate`
//! 5. injections
//! 6. state: props, methods, data, computed, watch
//! 7. provide
//! 8. `created`

use std::any::{Any, TypeId};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use indexmap::IndexMap;

use super::events::{EventEntry, Handler, update_component_listeners};
use super::inject::{init_injections, init_provide};
use super::lifecycle::call_hook;
use super::options::{ComponentDef, ComponentOptions, LifecycleHook, merge_options};
use super::render::resolve_slots;
use super::state::init_state;
use crate::error::{Error, Result};
use crate::global_api::global_options;
use crate::observer::{ReactiveObject, Value, Watcher};
use crate::runtime::with_context;
use crate::vdom::{NodeId, Patcher, VNode};

/// Identity of an instance, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct LifecycleFlags: u8 {
        const MOUNTED = 1 << 0;
        const BEING_DESTROYED = 1 << 1;
        const DESTROYED = 1 << 2;
        const DIRECT_INACTIVE = 1 << 3;
        /// Someone listens to a `hook:*` event.
        const HAS_HOOK_EVENT = 1 << 4;
        /// Props are being written by the parent.
        const UPDATING_PROPS = 1 << 5;
    }
}

/// What a `ref` registered on the context instance points at.
#[derive(Clone, Debug)]
pub enum RefTarget {
    Element(NodeId),
    Component(Instance),
}

impl PartialEq for RefTarget {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RefTarget::Element(a), RefTarget::Element(b)) => a == b,
            (RefTarget::Component(a), RefTarget::Component(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

pub struct InstanceInner {
    uid: InstanceId,
    def: ComponentDef,
    options: ComponentOptions,
    patcher: Rc<Patcher>,
    parent: RefCell<Option<Weak<InstanceInner>>>,
    children: RefCell<Vec<Instance>>,
    refs: RefCell<IndexMap<String, RefTarget>>,

    /// Placeholder in the parent's tree.
    parent_vnode: RefCell<Option<VNode>>,
    /// Root of the last rendered tree.
    vnode: RefCell<Option<VNode>>,
    el: Cell<Option<NodeId>>,
    flags: Cell<LifecycleFlags>,
    /// `None` until first activated or deactivated.
    inactive: Cell<Option<bool>>,

    render_watcher: RefCell<Option<Watcher>>,
    watchers: RefCell<Vec<Watcher>>,
    computed_watchers: RefCell<IndexMap<String, Watcher>>,

    data: RefCell<ReactiveObject>,
    props: ReactiveObject,
    injected: ReactiveObject,
    provided: RefCell<Option<IndexMap<String, Value>>>,

    events: RefCell<IndexMap<String, Vec<EventEntry>>>,
    parent_listeners: RefCell<IndexMap<String, Handler>>,
    render_children: RefCell<Vec<VNode>>,
    slots: RefCell<IndexMap<String, Vec<VNode>>>,

    extensions: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
}

/// Handle to a live component instance.
#[derive(Clone)]
pub struct Instance {
    inner: Rc<InstanceInner>,
}

/// Everything a placeholder or caller hands to a new instance.
#[derive(Default)]
pub(crate) struct InitParams {
    pub(crate) patcher: Option<Rc<Patcher>>,
    pub(crate) parent: Option<Instance>,
    pub(crate) parent_vnode: Option<VNode>,
    pub(crate) props_data: IndexMap<String, Value>,
    pub(crate) listeners: IndexMap<String, Handler>,
    pub(crate) render_children: Vec<VNode>,
}

impl Instance {
    /// Create a root instance rendering through `patcher`.
    pub fn new(def: &ComponentDef, patcher: Rc<Patcher>) -> Result<Instance> {
        Self::with_props(def, patcher, IndexMap::new())
    }

    /// Create a root instance with initial prop values.
    pub fn with_props(def: &ComponentDef, patcher: Rc<Patcher>, props: IndexMap<String, Value>) -> Result<Instance> {
        Self::init(
            def,
            InitParams {
                patcher: Some(patcher),
                props_data: props,
                ..InitParams::default()
            },
        )
    }

    /// Create an instance parented to `parent` outside of any render.
    ///
    /// It shares the parent's patcher and is not mounted.
    pub fn new_child(def: &ComponentDef, parent: &Instance) -> Result<Instance> {
        Self::init(
            def,
            InitParams {
                patcher: Some(parent.patcher()),
                parent: Some(parent.clone()),
                ..InitParams::default()
            },
        )
    }

    /// Create the instance behind a component placeholder.
    pub(crate) fn for_vnode(vnode: &VNode, parent: Option<&Instance>) -> Result<Instance> {
        let Some(options) = vnode.component_options() else {
            return Err(Error::msg("vnode is not a component placeholder"));
        };
        let Some(parent) = parent.cloned().or_else(|| vnode.context()) else {
            return Err(Error::NoActiveInstance(options.tag.clone()));
        };
        Self::init(
            &options.def,
            InitParams {
                patcher: Some(parent.patcher()),
                parent: Some(parent),
                parent_vnode: Some(vnode.clone()),
                props_data: options.props_data.clone(),
                listeners: options.listeners.clone(),
                render_children: options.children.clone(),
            },
        )
    }

    fn init(def: &ComponentDef, params: InitParams) -> Result<Instance> {
        let Some(patcher) = params.patcher else {
            return Err(Error::msg("instance created without a patcher"));
        };
        let options = merge_options(&global_options(), def.options());
        let uid = InstanceId(with_context(|ctx| ctx.alloc_instance_id()));

        let vm = Instance {
            inner: Rc::new(InstanceInner {
                uid,
                def: def.clone(),
                options,
                patcher,
                parent: RefCell::new(None),
                children: RefCell::new(Vec::new()),
                refs: RefCell::new(IndexMap::new()),
                parent_vnode: RefCell::new(params.parent_vnode),
                vnode: RefCell::new(None),
                el: Cell::new(None),
                flags: Cell::new(LifecycleFlags::empty()),
                inactive: Cell::new(None),
                render_watcher: RefCell::new(None),
                watchers: RefCell::new(Vec::new()),
                computed_watchers: RefCell::new(IndexMap::new()),
                data: RefCell::new(ReactiveObject::new()),
                props: ReactiveObject::new(),
                injected: ReactiveObject::new(),
                provided: RefCell::new(None),
                events: RefCell::new(IndexMap::new()),
                parent_listeners: RefCell::new(IndexMap::new()),
                render_children: RefCell::new(params.render_children),
                slots: RefCell::new(IndexMap::new()),
                extensions: RefCell::new(HashMap::new()),
            }),
        };
        tracing::trace!(uid = uid.0, component = ?vm.name(), "init instance");

        vm.init_lifecycle(params.parent);
        if !params.listeners.is_empty() {
            update_component_listeners(&vm, &params.listeners);
        }
        let context = vm.parent_vnode().and_then(|v| v.context());
        let slots = resolve_slots(&vm.render_children(), context.as_ref());
        *vm.inner.slots.borrow_mut() = slots;

        call_hook(&vm, LifecycleHook::BeforeCreate);
        init_injections(&vm);
        init_state(&vm, &params.props_data)?;
        init_provide(&vm);
        call_hook(&vm, LifecycleHook::Created);

        // Placeholders mount their instance from the patch hooks instead.
        if let Some(el) = vm.options().el {
            if vm.parent_vnode().is_none() {
                vm.mount(Some(el))?;
            }
        }
        Ok(vm)
    }

    /// Link to the first non-abstract ancestor.
    fn init_lifecycle(&self, parent: Option<Instance>) {
        let mut parent = parent;
        if let Some(mut p) = parent.clone() {
            if !self.options().is_abstract {
                while p.options().is_abstract {
                    match p.parent() {
                        Some(up) => p = up,
                        None => break,
                    }
                }
                p.inner.children.borrow_mut().push(self.clone());
                parent = Some(p);
            }
        }
        *self.inner.parent.borrow_mut() = parent.map(|p| p.downgrade());
    }

    // =========================================================================
    // Handles
    // =========================================================================

    pub(crate) fn downgrade(&self) -> Weak<InstanceInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<InstanceInner>) -> Option<Instance> {
        weak.upgrade().map(|inner| Instance { inner })
    }

    pub(crate) fn is_inner(&self, weak: &Weak<InstanceInner>) -> bool {
        std::ptr::eq(Rc::as_ptr(&self.inner), weak.as_ptr())
    }

    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Identity and tree
    // =========================================================================

    pub fn uid(&self) -> InstanceId {
        self.inner.uid
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.options.name.as_deref()
    }

    pub fn def(&self) -> &ComponentDef {
        &self.inner.def
    }

    /// The merged options this instance was created with.
    pub fn options(&self) -> &ComponentOptions {
        &self.inner.options
    }

    pub fn patcher(&self) -> Rc<Patcher> {
        self.inner.patcher.clone()
    }

    pub fn parent(&self) -> Option<Instance> {
        self.inner.parent.borrow().as_ref().and_then(Instance::upgrade)
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.borrow().is_none()
    }

    pub fn root(&self) -> Instance {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub fn children(&self) -> Vec<Instance> {
        self.inner.children.borrow().clone()
    }

    pub(crate) fn remove_child(&self, child: &Instance) {
        self.inner.children.borrow_mut().retain(|c| !c.ptr_eq(child));
    }

    /// Root node of the rendered tree.
    pub fn el(&self) -> Option<NodeId> {
        self.inner.el.get()
    }

    pub(crate) fn set_el(&self, el: Option<NodeId>) {
        self.inner.el.set(el);
    }

    /// Placeholder standing for this instance in its parent's tree.
    pub fn parent_vnode(&self) -> Option<VNode> {
        self.inner.parent_vnode.borrow().clone()
    }

    pub(crate) fn set_parent_vnode(&self, vnode: Option<VNode>) {
        *self.inner.parent_vnode.borrow_mut() = vnode;
    }

    /// Root vnode of the last render.
    pub fn rendered_vnode(&self) -> Option<VNode> {
        self.inner.vnode.borrow().clone()
    }

    pub(crate) fn replace_rendered_vnode(&self, vnode: Option<VNode>) -> Option<VNode> {
        std::mem::replace(&mut *self.inner.vnode.borrow_mut(), vnode)
    }

    // =========================================================================
    // Lifecycle state
    // =========================================================================

    fn flag(&self, flag: LifecycleFlags) -> bool {
        self.inner.flags.get().contains(flag)
    }

    fn set_flag(&self, flag: LifecycleFlags, on: bool) {
        let mut flags = self.inner.flags.get();
        flags.set(flag, on);
        self.inner.flags.set(flags);
    }

    pub fn is_mounted(&self) -> bool {
        self.flag(LifecycleFlags::MOUNTED)
    }

    pub(crate) fn mark_mounted(&self) {
        self.set_flag(LifecycleFlags::MOUNTED, true);
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.flag(LifecycleFlags::BEING_DESTROYED)
    }

    pub(crate) fn mark_being_destroyed(&self) {
        self.set_flag(LifecycleFlags::BEING_DESTROYED, true);
    }

    pub fn is_destroyed(&self) -> bool {
        self.flag(LifecycleFlags::DESTROYED)
    }

    pub(crate) fn mark_destroyed(&self) {
        self.set_flag(LifecycleFlags::DESTROYED, true);
    }

    /// `Some(true)` while inside a deactivated kept-alive subtree.
    pub fn inactive(&self) -> Option<bool> {
        self.inner.inactive.get()
    }

    pub(crate) fn set_inactive(&self, inactive: Option<bool>) {
        self.inner.inactive.set(inactive);
    }

    pub(crate) fn is_direct_inactive(&self) -> bool {
        self.flag(LifecycleFlags::DIRECT_INACTIVE)
    }

    pub(crate) fn set_direct_inactive(&self, on: bool) {
        self.set_flag(LifecycleFlags::DIRECT_INACTIVE, on);
    }

    pub(crate) fn has_hook_event(&self) -> bool {
        self.flag(LifecycleFlags::HAS_HOOK_EVENT)
    }

    pub(crate) fn mark_hook_event(&self) {
        self.set_flag(LifecycleFlags::HAS_HOOK_EVENT, true);
    }

    pub(crate) fn is_updating_props(&self) -> bool {
        self.flag(LifecycleFlags::UPDATING_PROPS)
    }

    pub(crate) fn set_updating_props(&self, on: bool) {
        self.set_flag(LifecycleFlags::UPDATING_PROPS, on);
    }

    // =========================================================================
    // Units
    // =========================================================================

    pub fn render_watcher(&self) -> Option<Watcher> {
        self.inner.render_watcher.borrow().clone()
    }

    pub(crate) fn set_render_watcher(&self, watcher: Watcher) {
        *self.inner.render_watcher.borrow_mut() = Some(watcher);
    }

    pub(crate) fn push_watcher(&self, watcher: Watcher) {
        self.inner.watchers.borrow_mut().push(watcher);
    }

    pub(crate) fn remove_watcher(&self, watcher: &Watcher) {
        self.inner.watchers.borrow_mut().retain(|w| w != watcher);
    }

    pub(crate) fn take_watchers(&self) -> Vec<Watcher> {
        std::mem::take(&mut *self.inner.watchers.borrow_mut())
    }

    /// Number of live units owned by the instance.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.borrow().len()
    }

    // =========================================================================
    // State containers
    // =========================================================================

    /// Root data object.
    pub fn data(&self) -> ReactiveObject {
        self.inner.data.borrow().clone()
    }

    pub(crate) fn inner_data_mut(&self) -> RefMut<'_, ReactiveObject> {
        self.inner.data.borrow_mut()
    }

    pub fn props(&self) -> ReactiveObject {
        self.inner.props.clone()
    }

    pub(crate) fn injected(&self) -> ReactiveObject {
        self.inner.injected.clone()
    }

    pub(crate) fn computed_watchers(&self) -> RefMut<'_, IndexMap<String, Watcher>> {
        self.inner.computed_watchers.borrow_mut()
    }

    pub(crate) fn provided(&self, key: &str) -> Option<Value> {
        self.inner.provided.borrow().as_ref().and_then(|p| p.get(key).cloned())
    }

    pub(crate) fn set_provided(&self, provided: IndexMap<String, Value>) {
        *self.inner.provided.borrow_mut() = Some(provided);
    }

    // =========================================================================
    // Events, slots
    // =========================================================================

    pub(crate) fn events_ref(&self) -> Ref<'_, IndexMap<String, Vec<EventEntry>>> {
        self.inner.events.borrow()
    }

    pub(crate) fn events_mut(&self) -> RefMut<'_, IndexMap<String, Vec<EventEntry>>> {
        self.inner.events.borrow_mut()
    }

    /// Listeners the parent attached on the placeholder.
    pub fn listeners(&self) -> IndexMap<String, Handler> {
        self.inner.parent_listeners.borrow().clone()
    }

    pub(crate) fn replace_parent_listeners(&self, listeners: IndexMap<String, Handler>) -> IndexMap<String, Handler> {
        std::mem::replace(&mut *self.inner.parent_listeners.borrow_mut(), listeners)
    }

    pub(crate) fn render_children(&self) -> Vec<VNode> {
        self.inner.render_children.borrow().clone()
    }

    pub(crate) fn set_render_children(&self, children: Vec<VNode>) {
        *self.inner.render_children.borrow_mut() = children;
    }

    pub(crate) fn set_slots(&self, slots: IndexMap<String, Vec<VNode>>) {
        *self.inner.slots.borrow_mut() = slots;
    }

    /// Content passed for slot `name` (`"default"` for unnamed children).
    pub fn slot(&self, name: &str) -> Vec<VNode> {
        self.inner.slots.borrow().get(name).cloned().unwrap_or_default()
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.inner.slots.borrow().contains_key(name)
    }

    // =========================================================================
    // Refs
    // =========================================================================

    pub fn ref_target(&self, name: &str) -> Option<RefTarget> {
        self.inner.refs.borrow().get(name).cloned()
    }

    pub fn ref_element(&self, name: &str) -> Option<NodeId> {
        match self.ref_target(name)? {
            RefTarget::Element(elm) => Some(elm),
            RefTarget::Component(vm) => vm.el(),
        }
    }

    pub fn ref_component(&self, name: &str) -> Option<Instance> {
        match self.ref_target(name)? {
            RefTarget::Component(vm) => Some(vm),
            RefTarget::Element(_) => None,
        }
    }

    pub(crate) fn set_ref(&self, name: &str, target: RefTarget) {
        self.inner.refs.borrow_mut().insert(name.to_string(), target);
    }

    /// Unregister `name` if it still points at `target`.
    pub(crate) fn remove_ref(&self, name: &str, target: &RefTarget) {
        let mut refs = self.inner.refs.borrow_mut();
        if refs.get(name).is_some_and(|current| current == target) {
            refs.shift_remove(name);
        }
    }

    // =========================================================================
    // Extensions
    // =========================================================================

    /// Per-instance storage for built-in components, created on first use.
    pub fn extension<T: Default + 'static>(&self) -> Rc<T> {
        let id = TypeId::of::<T>();
        if let Some(existing) = self.inner.extensions.borrow().get(&id).cloned() {
            if let Ok(typed) = existing.downcast::<T>() {
                return typed;
            }
        }
        let fresh = Rc::new(T::default());
        self.inner.extensions.borrow_mut().insert(id, fresh.clone());
        fresh
    }

    /// Drop references that would keep a destroyed instance alive.
    pub(crate) fn release(&self) {
        self.set_parent_vnode(None);
        self.inner.computed_watchers.borrow_mut().clear();
        self.inner.extensions.borrow_mut().clear();
        self.inner.refs.borrow_mut().clear();
        self.inner.slots.borrow_mut().clear();
        self.inner.render_children.borrow_mut().clear();
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("uid", &self.inner.uid)
            .field("name", &self.inner.options.name)
            .field("mounted", &self.is_mounted())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
