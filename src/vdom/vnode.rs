//! Virtual nodes.
//!
//! A [`VNode`] is an immutable description of one node of the target tree
//! plus a few patch-time cells: the real node it was bound to (`elm`), the
//! component instance behind a component placeholder, and the placeholder a
//! component's root vnode belongs to (`parent`).
//!
//! Kinds:
//! - element: `tag` set, no component options
//! - component placeholder: `tag` is `component-<cid>-<name>`, carries
//!   [`ComponentVNodeOptions`]
//! - text: `text` set, no tag
//! - comment: `is_comment` set (an empty comment is the empty vnode)

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::node_ops::NodeId;
use crate::component::async_component::AsyncComponent;
use crate::component::events::Handler;
use crate::component::{ComponentDef, Instance, InstanceInner};
use crate::observer::Value;

/// A directive binding as written on a vnode.
#[derive(Clone, Debug)]
pub struct VNodeDirective {
    pub name: String,
    pub value: Value,
    pub arg: Option<String>,
    pub modifiers: Vec<String>,
}

impl VNodeDirective {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            arg: None,
            modifiers: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arg = Some(arg.into());
        self
    }

    pub fn modifier(mut self, modifier: impl Into<String>) -> Self {
        self.modifiers.push(modifier.into());
        self
    }
}

/// Per-node data consumed by the patch modules.
#[derive(Clone, Default)]
pub struct VNodeData {
    pub key: Option<String>,
    pub attrs: IndexMap<String, String>,
    pub class: Vec<String>,
    pub style: IndexMap<String, String>,
    /// DOM listeners on elements; component events on placeholders.
    pub on: IndexMap<String, Handler>,
    /// DOM listeners on a component's root element.
    pub native_on: IndexMap<String, Handler>,
    /// Props for component placeholders.
    pub props: IndexMap<String, Value>,
    pub directives: Vec<VNodeDirective>,
    /// Named slot this vnode fills in its parent component.
    pub slot: Option<String>,
    pub ref_name: Option<String>,
    /// Placeholder rendered under a keep-alive.
    pub(crate) keep_alive: bool,
    /// Descendants whose insert hooks wait for this placeholder to be
    /// inserted.
    pub(crate) pending_insert: Vec<VNode>,
}

impl VNodeData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class.push(class.into());
        self
    }

    pub fn style(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.style.insert(property.into(), value.into());
        self
    }

    pub fn on(mut self, event: impl Into<String>, handler: impl Fn(&[Value]) -> crate::Result<()> + 'static) -> Self {
        self.on.insert(event.into(), Rc::new(handler));
        self
    }

    pub fn native_on(
        mut self,
        event: impl Into<String>,
        handler: impl Fn(&[Value]) -> crate::Result<()> + 'static,
    ) -> Self {
        self.native_on.insert(event.into(), Rc::new(handler));
        self
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn directive(mut self, directive: VNodeDirective) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn slot(mut self, name: impl Into<String>) -> Self {
        self.slot = Some(name.into());
        self
    }

    pub fn ref_name(mut self, name: impl Into<String>) -> Self {
        self.ref_name = Some(name.into());
        self
    }

    pub(crate) fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }
}

/// Component metadata carried by a placeholder vnode.
#[derive(Clone)]
pub struct ComponentVNodeOptions {
    pub def: ComponentDef,
    pub props_data: IndexMap<String, Value>,
    pub listeners: IndexMap<String, Handler>,
    /// Slot content passed by the parent.
    pub children: Vec<VNode>,
    /// Tag as written by the parent.
    pub tag: String,
}

/// Placeholder metadata for a still-loading async component.
#[derive(Clone)]
pub(crate) struct AsyncPlaceholder {
    pub(crate) factory: AsyncComponent,
    pub(crate) data: VNodeData,
}

pub(crate) struct VNodeInner {
    tag: Option<String>,
    key: Option<String>,
    text: Option<String>,
    is_comment: bool,
    children: RefCell<Vec<VNode>>,
    data: RefCell<VNodeData>,
    context: Option<Weak<InstanceInner>>,
    component: Option<ComponentVNodeOptions>,
    async_placeholder: Option<AsyncPlaceholder>,
    elm: Cell<Option<NodeId>>,
    component_instance: RefCell<Option<Instance>>,
    parent: RefCell<Weak<VNodeInner>>,
}

/// Shared handle to a virtual node.
#[derive(Clone)]
pub struct VNode {
    inner: Rc<VNodeInner>,
}

impl VNode {
    fn build(
        tag: Option<String>,
        data: VNodeData,
        children: Vec<VNode>,
        text: Option<String>,
        is_comment: bool,
        context: Option<&Instance>,
    ) -> VNodeInner {
        VNodeInner {
            tag,
            key: data.key.clone(),
            text,
            is_comment,
            children: RefCell::new(children),
            data: RefCell::new(data),
            context: context.map(Instance::downgrade),
            component: None,
            async_placeholder: None,
            elm: Cell::new(None),
            component_instance: RefCell::new(None),
            parent: RefCell::new(Weak::new()),
        }
    }

    /// Plain element vnode without a rendering context.
    pub fn element(tag: impl Into<String>, data: VNodeData, children: Vec<VNode>) -> VNode {
        Self::element_in(tag, data, children, None)
    }

    pub(crate) fn element_in(
        tag: impl Into<String>,
        data: VNodeData,
        children: Vec<VNode>,
        context: Option<&Instance>,
    ) -> VNode {
        VNode {
            inner: Rc::new(Self::build(Some(tag.into()), data, children, None, false, context)),
        }
    }

    pub fn text(text: impl Into<String>) -> VNode {
        VNode {
            inner: Rc::new(Self::build(None, VNodeData::default(), Vec::new(), Some(text.into()), false, None)),
        }
    }

    pub fn comment(text: impl Into<String>) -> VNode {
        VNode {
            inner: Rc::new(Self::build(None, VNodeData::default(), Vec::new(), Some(text.into()), true, None)),
        }
    }

    /// The empty vnode: an empty comment.
    pub fn empty() -> VNode {
        Self::comment("")
    }

    pub(crate) fn component_in(
        tag: String,
        data: VNodeData,
        context: Option<&Instance>,
        options: ComponentVNodeOptions,
    ) -> VNode {
        let mut inner = Self::build(Some(tag), data, Vec::new(), None, false, context);
        inner.component = Some(options);
        VNode { inner: Rc::new(inner) }
    }

    pub(crate) fn async_placeholder(placeholder: AsyncPlaceholder, context: Option<&Instance>) -> VNode {
        let mut inner = Self::build(None, VNodeData::default(), Vec::new(), Some(String::new()), true, context);
        inner.key = placeholder.data.key.clone();
        inner.async_placeholder = Some(placeholder);
        VNode { inner: Rc::new(inner) }
    }

    /// A vnode with the same shape that is not yet bound to a real node.
    pub(crate) fn clone_unbound(&self) -> VNode {
        let src = &self.inner;
        VNode {
            inner: Rc::new(VNodeInner {
                tag: src.tag.clone(),
                key: src.key.clone(),
                text: src.text.clone(),
                is_comment: src.is_comment,
                children: RefCell::new(src.children.borrow().clone()),
                data: RefCell::new(src.data.borrow().clone()),
                context: src.context.clone(),
                component: src.component.clone(),
                async_placeholder: src.async_placeholder.clone(),
                elm: Cell::new(None),
                component_instance: RefCell::new(None),
                parent: RefCell::new(Weak::new()),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &VNode) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn tag(&self) -> Option<&str> {
        self.inner.tag.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.inner.key.as_deref()
    }

    pub fn text_content(&self) -> Option<&str> {
        self.inner.text.as_deref()
    }

    pub fn is_comment(&self) -> bool {
        self.inner.is_comment
    }

    pub fn children(&self) -> Vec<VNode> {
        self.inner.children.borrow().clone()
    }

    pub fn has_children(&self) -> bool {
        !self.inner.children.borrow().is_empty()
    }

    /// Swap in a fresh copy of a child that was already bound elsewhere.
    pub(crate) fn replace_child(&self, index: usize, child: VNode) {
        if let Some(slot) = self.inner.children.borrow_mut().get_mut(index) {
            *slot = child;
        }
    }

    pub fn data(&self) -> Ref<'_, VNodeData> {
        self.inner.data.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, VNodeData> {
        self.inner.data.borrow_mut()
    }

    /// Instance whose render produced this vnode.
    pub fn context(&self) -> Option<Instance> {
        self.inner.context.as_ref().and_then(Instance::upgrade)
    }

    pub(crate) fn has_context(&self, vm: &Instance) -> bool {
        self.inner.context.as_ref().is_some_and(|c| vm.is_inner(c))
    }

    pub fn component_options(&self) -> Option<&ComponentVNodeOptions> {
        self.inner.component.as_ref()
    }

    pub fn is_component(&self) -> bool {
        self.inner.component.is_some()
    }

    pub(crate) fn async_factory(&self) -> Option<&AsyncPlaceholder> {
        self.inner.async_placeholder.as_ref()
    }

    pub fn is_async_placeholder(&self) -> bool {
        self.inner.async_placeholder.is_some()
    }

    /// Real node bound by the last patch.
    pub fn elm(&self) -> Option<NodeId> {
        self.inner.elm.get()
    }

    pub(crate) fn set_elm(&self, elm: Option<NodeId>) {
        self.inner.elm.set(elm);
    }

    pub fn component_instance(&self) -> Option<Instance> {
        self.inner.component_instance.borrow().clone()
    }

    pub(crate) fn set_component_instance(&self, vm: Option<Instance>) {
        *self.inner.component_instance.borrow_mut() = vm;
    }

    /// Placeholder this root vnode stands in for.
    pub fn parent(&self) -> Option<VNode> {
        self.inner.parent.borrow().upgrade().map(|inner| VNode { inner })
    }

    pub(crate) fn set_parent(&self, parent: Option<&VNode>) {
        *self.inner.parent.borrow_mut() = parent.map_or_else(Weak::new, |p| Rc::downgrade(&p.inner));
    }

    pub(crate) fn is_keep_alive(&self) -> bool {
        self.inner.data.borrow().is_keep_alive()
    }
}

impl std::fmt::Debug for VNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(tag) = &self.inner.tag {
            f.debug_struct("VNode")
                .field("tag", tag)
                .field("key", &self.inner.key)
                .field("children", &*self.inner.children.borrow())
                .finish()
        } else if self.inner.is_comment {
            write!(f, "Comment({:?})", self.inner.text.as_deref().unwrap_or(""))
        } else {
            write!(f, "Text({:?})", self.inner.text.as_deref().unwrap_or(""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_comes_from_data() {
        let v = VNode::element("li", VNodeData::new().key("a"), vec![]);
        assert_eq!(v.key(), Some("a"));
        assert_eq!(v.tag(), Some("li"));
        assert!(!v.is_component());
    }

    #[test]
    fn test_empty_is_comment() {
        let v = VNode::empty();
        assert!(v.is_comment());
        assert_eq!(v.tag(), None);
        assert_eq!(v.text_content(), Some(""));
    }

    #[test]
    fn test_parent_link_is_weak() {
        let child = VNode::text("x");
        {
            let placeholder = VNode::element("div", VNodeData::new(), vec![]);
            child.set_parent(Some(&placeholder));
            assert!(child.parent().is_some());
        }
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_clone_unbound_resets_elm() {
        let v = VNode::element("p", VNodeData::new().class("a"), vec![VNode::text("t")]);
        v.set_elm(Some(NodeId(4)));
        let copy = v.clone_unbound();
        assert_eq!(copy.elm(), None);
        assert_eq!(copy.children().len(), 1);
        assert_eq!(copy.data().class, vec!["a".to_string()]);
        assert!(!copy.ptr_eq(&v));
    }
}
