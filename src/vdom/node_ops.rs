//! The seam between the patcher and a concrete target tree.
//!
//! The patcher never touches a real tree directly. Every structural or
//! attribute change goes through [`NodeOps`], so any retained-mode tree (a
//! browser DOM, a terminal widget tree, the in-memory [`MemoryDom`]) can be
//! driven by the same diff.
//!
//! [`MemoryDom`]: super::MemoryDom

use crate::component::InstanceId;
use crate::component::events::Handler;

/// Handle to a node in the target tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Handle to a registered event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Primitive operations on a retained node tree.
pub trait NodeOps {
    fn create_element(&self, tag: &str) -> NodeId;
    fn create_text_node(&self, text: &str) -> NodeId;
    fn create_comment(&self, text: &str) -> NodeId;

    /// Insert `node` before `reference` under `parent`.
    fn insert_before(&self, parent: NodeId, node: NodeId, reference: NodeId);
    fn append_child(&self, parent: NodeId, node: NodeId);
    fn remove_child(&self, parent: NodeId, node: NodeId);

    fn parent_node(&self, node: NodeId) -> Option<NodeId>;
    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;
    /// Tag of an element node, `None` for text and comments.
    fn tag_name(&self, node: NodeId) -> Option<String>;

    fn set_text_content(&self, node: NodeId, text: &str);

    fn set_attribute(&self, node: NodeId, name: &str, value: &str);
    fn remove_attribute(&self, node: NodeId, name: &str);
    /// Replace the full class list.
    fn set_class(&self, node: NodeId, class: &str);
    /// Set (`Some`) or clear (`None`) one style property.
    fn set_style(&self, node: NodeId, property: &str, value: Option<&str>);

    fn add_listener(&self, node: NodeId, event: &str, capture: bool, listener: Handler) -> ListenerId;
    fn remove_listener(&self, node: NodeId, listener: ListenerId);

    /// Record which instance owns `node` as its root element.
    fn set_owner(&self, _node: NodeId, _owner: Option<InstanceId>) {}
}
