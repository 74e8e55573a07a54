//! Rendering an instance to a vnode tree.
//!
//! A render function receives a [`CreateElement`] bound to the instance. It
//! reads state through it (reads are tracked by the render unit) and builds
//! vnodes. Tags that name a registered component become component
//! placeholders.

use indexmap::IndexMap;

use super::async_component::{AsyncComponent, resolve_async_component};
use super::instance::Instance;
use super::options::ComponentDef;
use crate::config::with_config;
use crate::error::{Error, Result, dev_warn, handle_error};
use crate::global_api::resolve_component;
use crate::observer::Value;
use crate::vdom::create_component::create_component_vnode;
use crate::vdom::vnode::AsyncPlaceholder;
use crate::vdom::{VNode, VNodeData};

/// What a render function returns.
pub enum Rendered {
    Node(VNode),
    /// Only a single node is a valid root; anything else renders empty.
    Nodes(Vec<VNode>),
}

impl From<VNode> for Rendered {
    fn from(vnode: VNode) -> Self {
        Rendered::Node(vnode)
    }
}

impl From<Vec<VNode>> for Rendered {
    fn from(nodes: Vec<VNode>) -> Self {
        Rendered::Nodes(nodes)
    }
}

/// Builder handed to render functions.
pub struct CreateElement<'a> {
    vm: &'a Instance,
}

impl<'a> CreateElement<'a> {
    pub(crate) fn new(vm: &'a Instance) -> Self {
        Self { vm }
    }

    /// The instance being rendered.
    pub fn vm(&self) -> &Instance {
        self.vm
    }

    /// Read instance state, warning about undeclared keys.
    pub fn get(&self, key: &str) -> Value {
        if !self.vm.has_key(key) {
            dev_warn(
                &format!(
                    "Property or method \"{key}\" is not defined on the instance but referenced during render."
                ),
                Some(self.vm),
            );
        }
        self.vm.get(key)
    }

    pub fn try_get(&self, key: &str) -> Result<Value> {
        self.vm.try_get(key)
    }

    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        self.vm.call(method, args)
    }

    /// An element, or a component placeholder when `tag` resolves to a
    /// registered component.
    pub fn element(&self, tag: &str, data: VNodeData, children: Vec<VNode>) -> VNode {
        match resolve_component(Some(self.vm), tag) {
            Some(def) => create_component_vnode(&def, data, self.vm, children, tag),
            None => VNode::element_in(tag, data, children, Some(self.vm)),
        }
    }

    pub fn component(&self, def: &ComponentDef, data: VNodeData, children: Vec<VNode>) -> VNode {
        let tag = def.name().unwrap_or_default().to_string();
        create_component_vnode(def, data, self.vm, children, &tag)
    }

    /// A component loaded by `factory`; a comment placeholder renders until
    /// it resolves. `children` are only used once a definition is available.
    pub fn async_component(&self, factory: &AsyncComponent, data: VNodeData, children: Vec<VNode>) -> VNode {
        match resolve_async_component(factory, self.vm) {
            Some(def) => self.component(&def, data, children),
            None => VNode::async_placeholder(
                AsyncPlaceholder {
                    factory: factory.clone(),
                    data,
                },
                Some(self.vm),
            ),
        }
    }

    pub fn text(&self, text: impl Into<String>) -> VNode {
        VNode::text(text)
    }

    pub fn comment(&self, text: impl Into<String>) -> VNode {
        VNode::comment(text)
    }

    pub fn empty(&self) -> VNode {
        VNode::empty()
    }

    /// Nodes passed for slot `name`.
    pub fn slot(&self, name: &str) -> Vec<VNode> {
        self.vm.slot(name)
    }

    /// Slot content, or `fallback` when the parent passed none.
    pub fn render_slot(&self, name: &str, fallback: impl FnOnce() -> Vec<VNode>) -> Vec<VNode> {
        if self.vm.has_slot(name) {
            self.vm.slot(name)
        } else {
            fallback()
        }
    }
}

fn into_root(rendered: Rendered, vm: &Instance) -> VNode {
    match rendered {
        Rendered::Node(vnode) => vnode,
        Rendered::Nodes(mut nodes) if nodes.len() == 1 => nodes.remove(0),
        Rendered::Nodes(nodes) => {
            if !nodes.is_empty() {
                dev_warn(
                    "Multiple root nodes returned from render function. Render function should return a single root node.",
                    Some(vm),
                );
            }
            VNode::empty()
        }
    }
}

/// Run the instance's render function.
///
/// On error the `render_error` fallback renders instead; without one the
/// previous tree is kept.
pub(crate) fn render_component(vm: &Instance) -> VNode {
    let _span = with_config(|c| c.performance)
        .then(|| tracing::debug_span!("render", component = ?vm.name(), uid = vm.uid().0).entered());

    let h = CreateElement::new(vm);
    let result = match vm.options().render.clone() {
        Some(render) => render(&h),
        None => Ok(Rendered::Node(VNode::empty())),
    };

    let vnode = match result {
        Ok(rendered) => into_root(rendered, vm),
        Err(err) => {
            handle_error(&err, Some(vm), "render");
            render_fallback(vm, &h, &err)
                .or_else(|| vm.rendered_vnode())
                .unwrap_or_else(VNode::empty)
        }
    };

    vnode.set_parent(vm.parent_vnode().as_ref());
    vnode
}

fn render_fallback(vm: &Instance, h: &CreateElement<'_>, err: &Error) -> Option<VNode> {
    let render_error = vm.options().render_error.clone()?;
    match render_error(h, err) {
        Ok(rendered) => Some(into_root(rendered, vm)),
        Err(fallback_err) => {
            handle_error(&fallback_err, Some(vm), "renderError");
            None
        }
    }
}

fn is_whitespace(vnode: &VNode) -> bool {
    (vnode.is_comment() && !vnode.is_async_placeholder())
        || (vnode.tag().is_none() && vnode.text_content().is_some_and(|t| t.trim().is_empty()))
}

/// Group placeholder children by slot name.
///
/// Only children rendered by `context` (the parent) may target a named slot;
/// everything else lands in `"default"`. Slots holding only whitespace are
/// dropped.
pub(crate) fn resolve_slots(children: &[VNode], context: Option<&Instance>) -> IndexMap<String, Vec<VNode>> {
    let mut slots: IndexMap<String, Vec<VNode>> = IndexMap::new();
    for child in children {
        let name = child.data().slot.clone();
        let named = name.filter(|_| context.is_some_and(|c| child.has_context(c)));
        match named {
            Some(name) if child.tag() == Some("template") => {
                slots.entry(name).or_default().extend(child.children());
            }
            Some(name) => slots.entry(name).or_default().push(child.clone()),
            None => slots.entry("default".to_string()).or_default().push(child.clone()),
        }
    }
    slots.retain(|_, nodes| !nodes.iter().all(is_whitespace));
    slots
}
