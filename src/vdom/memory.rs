//! In-memory target tree.
//!
//! [`MemoryDom`] implements [`NodeOps`] over a flat node arena. It keeps a
//! log of every operation the patcher issued, renders subtrees to markup for
//! assertions, and can dispatch events to registered listeners.
//!
//! # Example
//!
//! ```ignore
//! let dom = MemoryDom::new();
//! let root = dom.create_root("div");
//! let patcher = Patcher::new(dom.clone());
//! let vm = Instance::new(&def, patcher)?;
//! vm.mount(Some(root))?;
//! assert_eq!(dom.serialize(vm.el().unwrap()), "<p>hi</p>");
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use super::node_ops::{ListenerId, NodeId, NodeOps};
use crate::component::InstanceId;
use crate::component::events::Handler;
use crate::error::Result;
use crate::observer::Value;
use crate::runtime::next_tick::with_macro_task;

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeKind {
    Element(String),
    Text,
    Comment,
}

struct Listener {
    id: ListenerId,
    event: String,
    capture: bool,
    handler: Handler,
}

struct MemNode {
    kind: NodeKind,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attrs: IndexMap<String, String>,
    class: String,
    style: IndexMap<String, String>,
    listeners: Vec<Listener>,
    owner: Option<InstanceId>,
}

impl MemNode {
    fn new(kind: NodeKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
            parent: None,
            children: Vec::new(),
            attrs: IndexMap::new(),
            class: String::new(),
            style: IndexMap::new(),
            listeners: Vec::new(),
            owner: None,
        }
    }
}

/// One recorded tree operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomOp {
    CreateElement(NodeId, String),
    CreateText(NodeId, String),
    CreateComment(NodeId, String),
    Insert { parent: NodeId, node: NodeId, before: Option<NodeId> },
    Remove { parent: NodeId, node: NodeId },
    SetText(NodeId, String),
    SetAttribute(NodeId, String, String),
    RemoveAttribute(NodeId, String),
    SetClass(NodeId, String),
    SetStyle(NodeId, String, Option<String>),
    AddListener(NodeId, String),
    RemoveListener(NodeId, ListenerId),
}

impl DomOp {
    /// Whether this op creates, moves or removes a node.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DomOp::CreateElement(..)
                | DomOp::CreateText(..)
                | DomOp::CreateComment(..)
                | DomOp::Insert { .. }
                | DomOp::Remove { .. }
        )
    }
}

/// Arena-backed [`NodeOps`] implementation.
pub struct MemoryDom {
    nodes: RefCell<Vec<MemNode>>,
    log: RefCell<Vec<DomOp>>,
    next_listener: Cell<u64>,
}

impl MemoryDom {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            nodes: RefCell::new(Vec::new()),
            log: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        })
    }

    fn alloc(&self, node: MemNode) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(node);
        NodeId((nodes.len() - 1) as u64)
    }

    fn record(&self, op: DomOp) {
        self.log.borrow_mut().push(op);
    }

    fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&mut MemNode) -> R) -> Option<R> {
        self.nodes.borrow_mut().get_mut(id.0 as usize).map(f)
    }

    /// Create a detached element to mount into. Not logged.
    pub fn create_root(&self, tag: &str) -> NodeId {
        self.alloc(MemNode::new(NodeKind::Element(tag.to_string()), ""))
    }

    /// Drain the operation log.
    pub fn take_log(&self) -> Vec<DomOp> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.with_node(node, |n| n.children.clone()).unwrap_or_default()
    }

    /// Text of a text or comment node.
    pub fn text(&self, node: NodeId) -> Option<String> {
        self.with_node(node, |n| match n.kind {
            NodeKind::Element(_) => None,
            _ => Some(n.text.clone()),
        })
        .flatten()
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.with_node(node, |n| n.attrs.get(name).cloned()).flatten()
    }

    pub fn class(&self, node: NodeId) -> String {
        self.with_node(node, |n| n.class.clone()).unwrap_or_default()
    }

    pub fn style(&self, node: NodeId, property: &str) -> Option<String> {
        self.with_node(node, |n| n.style.get(property).cloned()).flatten()
    }

    pub fn owner(&self, node: NodeId) -> Option<InstanceId> {
        self.with_node(node, |n| n.owner).flatten()
    }

    pub fn listener_count(&self, node: NodeId) -> usize {
        self.with_node(node, |n| n.listeners.len()).unwrap_or(0)
    }

    /// Invoke every listener for `event` on `node` as a host event dispatch.
    /// Capture listeners run first, then the rest in registration order.
    /// Ticks requested by the handlers are macrotasks.
    /// Returns how many ran.
    pub fn dispatch(&self, node: NodeId, event: &str, args: &[Value]) -> Result<usize> {
        let mut matching: Vec<(bool, Handler)> = self
            .with_node(node, |n| {
                n.listeners
                    .iter()
                    .filter(|l| l.event == event)
                    .map(|l| (l.capture, l.handler.clone()))
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by_key(|(capture, _)| !*capture);
        let handlers: Vec<Handler> = matching.into_iter().map(|(_, h)| h).collect();
        with_macro_task(|| handlers.iter().try_for_each(|handler| handler(args)))?;
        Ok(handlers.len())
    }

    /// Render `node` and its subtree as markup.
    pub fn serialize(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let Some((kind, text, attrs, class, style, children)) = self.with_node(id, |n| {
            (
                n.kind.clone(),
                n.text.clone(),
                n.attrs.clone(),
                n.class.clone(),
                n.style.clone(),
                n.children.clone(),
            )
        }) else {
            return;
        };
        match kind {
            NodeKind::Text => out.push_str(&text),
            NodeKind::Comment => {
                out.push_str("<!--");
                out.push_str(&text);
                out.push_str("-->");
            }
            NodeKind::Element(tag) => {
                out.push('<');
                out.push_str(&tag);
                for (name, value) in &attrs {
                    out.push_str(&format!(" {name}=\"{value}\""));
                }
                if !class.is_empty() {
                    out.push_str(&format!(" class=\"{class}\""));
                }
                if !style.is_empty() {
                    let decls: Vec<String> = style.iter().map(|(k, v)| format!("{k}:{v}")).collect();
                    out.push_str(&format!(" style=\"{}\"", decls.join(";")));
                }
                out.push('>');
                for child in children {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(&tag);
                out.push('>');
            }
        }
    }

    fn detach(&self, node: NodeId) {
        let parent = self.with_node(node, |n| n.parent.take()).flatten();
        if let Some(parent) = parent {
            self.with_node(parent, |p| p.children.retain(|c| *c != node));
        }
    }
}

impl NodeOps for MemoryDom {
    fn create_element(&self, tag: &str) -> NodeId {
        let id = self.alloc(MemNode::new(NodeKind::Element(tag.to_string()), ""));
        self.record(DomOp::CreateElement(id, tag.to_string()));
        id
    }

    fn create_text_node(&self, text: &str) -> NodeId {
        let id = self.alloc(MemNode::new(NodeKind::Text, text));
        self.record(DomOp::CreateText(id, text.to_string()));
        id
    }

    fn create_comment(&self, text: &str) -> NodeId {
        let id = self.alloc(MemNode::new(NodeKind::Comment, text));
        self.record(DomOp::CreateComment(id, text.to_string()));
        id
    }

    fn insert_before(&self, parent: NodeId, node: NodeId, reference: NodeId) {
        self.detach(node);
        self.with_node(parent, |p| {
            let pos = p.children.iter().position(|c| *c == reference).unwrap_or(p.children.len());
            p.children.insert(pos, node);
        });
        self.with_node(node, |n| n.parent = Some(parent));
        self.record(DomOp::Insert {
            parent,
            node,
            before: Some(reference),
        });
    }

    fn append_child(&self, parent: NodeId, node: NodeId) {
        self.detach(node);
        self.with_node(parent, |p| p.children.push(node));
        self.with_node(node, |n| n.parent = Some(parent));
        self.record(DomOp::Insert {
            parent,
            node,
            before: None,
        });
    }

    fn remove_child(&self, parent: NodeId, node: NodeId) {
        let attached = self.with_node(node, |n| n.parent == Some(parent)).unwrap_or(false);
        if attached {
            self.detach(node);
            self.record(DomOp::Remove { parent, node });
        }
    }

    fn parent_node(&self, node: NodeId) -> Option<NodeId> {
        self.with_node(node, |n| n.parent).flatten()
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent_node(node)?;
        self.with_node(parent, |p| {
            let pos = p.children.iter().position(|c| *c == node)?;
            p.children.get(pos + 1).copied()
        })
        .flatten()
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.with_node(node, |n| match &n.kind {
            NodeKind::Element(tag) => Some(tag.clone()),
            _ => None,
        })
        .flatten()
    }

    fn set_text_content(&self, node: NodeId, text: &str) {
        self.with_node(node, |n| {
            n.text = text.to_string();
            if matches!(n.kind, NodeKind::Element(_)) {
                n.children.clear();
            }
        });
        self.record(DomOp::SetText(node, text.to_string()));
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        self.with_node(node, |n| n.attrs.insert(name.to_string(), value.to_string()));
        self.record(DomOp::SetAttribute(node, name.to_string(), value.to_string()));
    }

    fn remove_attribute(&self, node: NodeId, name: &str) {
        self.with_node(node, |n| n.attrs.shift_remove(name));
        self.record(DomOp::RemoveAttribute(node, name.to_string()));
    }

    fn set_class(&self, node: NodeId, class: &str) {
        self.with_node(node, |n| n.class = class.to_string());
        self.record(DomOp::SetClass(node, class.to_string()));
    }

    fn set_style(&self, node: NodeId, property: &str, value: Option<&str>) {
        self.with_node(node, |n| match value {
            Some(v) => {
                n.style.insert(property.to_string(), v.to_string());
            }
            None => {
                n.style.shift_remove(property);
            }
        });
        self.record(DomOp::SetStyle(node, property.to_string(), value.map(str::to_string)));
    }

    fn add_listener(&self, node: NodeId, event: &str, capture: bool, listener: Handler) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.with_node(node, |n| {
            n.listeners.push(Listener {
                id,
                event: event.to_string(),
                capture,
                handler: listener,
            })
        });
        self.record(DomOp::AddListener(node, event.to_string()));
        id
    }

    fn remove_listener(&self, node: NodeId, listener: ListenerId) {
        self.with_node(node, |n| n.listeners.retain(|l| l.id != listener));
        self.record(DomOp::RemoveListener(node, listener));
    }

    fn set_owner(&self, node: NodeId, owner: Option<InstanceId>) {
        self.with_node(node, |n| n.owner = owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_and_serialize() {
        let dom = MemoryDom::new();
        let root = dom.create_root("div");
        let p = dom.create_element("p");
        let t = dom.create_text_node("hi");
        dom.append_child(p, t);
        dom.append_child(root, p);
        dom.set_attribute(p, "id", "x");
        dom.set_class(p, "a b");
        assert_eq!(dom.serialize(root), "<div><p id=\"x\" class=\"a b\">hi</p></div>");
    }

    #[test]
    fn test_insert_before_moves_node() {
        let dom = MemoryDom::new();
        let root = dom.create_root("ul");
        let a = dom.create_text_node("a");
        let b = dom.create_text_node("b");
        dom.append_child(root, a);
        dom.append_child(root, b);
        dom.insert_before(root, b, a);
        assert_eq!(dom.children(root), vec![b, a]);
        assert_eq!(dom.next_sibling(b), Some(a));
        assert_eq!(dom.next_sibling(a), None);
    }

    #[test]
    fn test_remove_only_from_actual_parent() {
        let dom = MemoryDom::new();
        let root = dom.create_root("div");
        let other = dom.create_root("div");
        let n = dom.create_comment("x");
        dom.append_child(root, n);
        dom.take_log();
        dom.remove_child(other, n);
        assert!(dom.take_log().is_empty());
        dom.remove_child(root, n);
        assert_eq!(dom.parent_node(n), None);
        assert_eq!(dom.serialize(root), "<div></div>");
    }

    #[test]
    fn test_dispatch_runs_listeners() {
        let dom = MemoryDom::new();
        let btn = dom.create_root("button");
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let id = dom.add_listener(
            btn,
            "click",
            false,
            Rc::new(move |_| {
                counter.set(counter.get() + 1);
                Ok(())
            }),
        );
        assert_eq!(dom.dispatch(btn, "click", &[]).unwrap(), 1);
        assert_eq!(dom.dispatch(btn, "keyup", &[]).unwrap(), 0);
        dom.remove_listener(btn, id);
        assert_eq!(dom.dispatch(btn, "click", &[]).unwrap(), 0);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_dispatch_defers_to_macro_task() {
        use crate::runtime::next_tick::{TickKind, next_tick, pending_tick, run_until_idle};
        use crate::runtime::reset_runtime;

        reset_runtime();
        let dom = MemoryDom::new();
        let btn = dom.create_root("button");
        dom.add_listener(
            btn,
            "click",
            false,
            Rc::new(|_| {
                next_tick(|| {});
                Ok(())
            }),
        );
        dom.dispatch(btn, "click", &[]).unwrap();
        assert_eq!(pending_tick(), Some(TickKind::Macro));

        run_until_idle();
        next_tick(|| {});
        assert_eq!(pending_tick(), Some(TickKind::Micro));
    }
}
