//! Tree reconciliation.
//!
//! [`Patcher::patch`] turns an old tree into a new one with the fewest
//! real-node operations it can find:
//!
//! - no old tree: create everything detached (a component mounting)
//! - same node (same key, tag, comment-ness, async factory): patch in place
//! - otherwise: create the new tree next to the old one, then remove the old
//!
//! Children are reconciled by [`Patcher::update_children`], a two-ended
//! keyed diff. Component placeholders delegate to the child instance through
//! the component vnode hooks.
//!
//! Insert hooks (component `mounted`, directive `inserted`) are collected in
//! a queue and fired once the whole tree is attached. A component's first
//! patch hands its queue to the placeholder so that the hooks fire when the
//! parent inserts it.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::create_component::{component_destroy, component_init, component_insert, component_prepatch};
use super::modules::{Module, default_modules, register_ref};
use super::node_ops::{NodeId, NodeOps};
use super::vnode::{VNode, VNodeData};
use crate::error::{Result, dev_warn};

/// What a patch starts from.
pub enum OldTree {
    /// A real element not produced by a previous patch (mount target).
    Element(NodeId),
    /// A previously patched vnode.
    VNode(VNode),
}

type InsertQueue = Vec<VNode>;

/// Reconciler bound to one target tree.
pub struct Patcher {
    ops: Rc<dyn NodeOps>,
    modules: Vec<Box<dyn Module>>,
    empty: VNode,
}

/// Whether two vnodes describe the same node and can be patched in place.
pub fn same_vnode(a: &VNode, b: &VNode) -> bool {
    let same_async = match (a.async_factory(), b.async_factory()) {
        (None, None) => true,
        (Some(x), Some(y)) => x.factory.ptr_eq(&y.factory),
        _ => false,
    };
    a.key() == b.key() && same_async && a.tag() == b.tag() && a.is_comment() == b.is_comment()
}

impl Patcher {
    pub fn new(ops: Rc<dyn NodeOps>) -> Rc<Self> {
        Self::with_modules(ops, default_modules())
    }

    pub fn with_modules(ops: Rc<dyn NodeOps>, modules: Vec<Box<dyn Module>>) -> Rc<Self> {
        Rc::new(Self {
            ops,
            modules,
            empty: VNode::element("", VNodeData::default(), Vec::new()),
        })
    }

    pub fn ops(&self) -> &dyn NodeOps {
        &*self.ops
    }

    /// Reconcile `old` into `vnode`. Returns the real root node.
    ///
    /// With no new vnode, the old tree's destroy hooks run and nothing is
    /// removed; callers detach the root themselves.
    pub fn patch(&self, old: Option<OldTree>, vnode: Option<&VNode>) -> Result<Option<NodeId>> {
        let Some(vnode) = vnode else {
            if let Some(OldTree::VNode(old)) = &old {
                self.invoke_destroy_hook(old);
            }
            return Ok(None);
        };

        let mut queue = InsertQueue::new();
        let mut is_initial = false;
        match old {
            None => {
                is_initial = true;
                self.create_elm(vnode, &mut queue, None, None, None)?;
            }
            Some(OldTree::VNode(old)) if same_vnode(&old, vnode) => {
                self.patch_vnode(&old, vnode, &mut queue, None)?;
            }
            Some(old) => {
                let old_vnode = match old {
                    OldTree::Element(elm) => self.empty_node_at(elm),
                    OldTree::VNode(v) => v,
                };
                let old_elm = old_vnode.elm();
                let parent_elm = old_elm.and_then(|e| self.ops.parent_node(e));
                let next = old_elm.and_then(|e| self.ops.next_sibling(e));
                self.create_elm(vnode, &mut queue, parent_elm, next, None)?;
                self.update_ancestor_elms(vnode);

                if parent_elm.is_some() {
                    self.remove_vnodes(std::slice::from_ref(&old_vnode));
                } else if old_vnode.tag().is_some() {
                    self.invoke_destroy_hook(&old_vnode);
                }
            }
        }

        self.invoke_insert_hook(vnode, queue, is_initial);
        Ok(vnode.elm())
    }

    /// A component's root element was replaced: rebind every placeholder
    /// standing in for it.
    fn update_ancestor_elms(&self, vnode: &VNode) {
        let patchable = self.is_patchable(vnode);
        let mut ancestor = vnode.parent();
        while let Some(placeholder) = ancestor {
            for module in &self.modules {
                module.destroy(&*self.ops, &placeholder);
            }
            placeholder.set_elm(vnode.elm());
            if patchable {
                for module in &self.modules {
                    module.create(&*self.ops, &self.empty, &placeholder);
                }
                // The component's own insert hook has already run.
                for module in &self.modules {
                    if module.wants_insert(&placeholder) {
                        module.insert(&placeholder);
                    }
                }
            } else {
                register_ref(&placeholder, false);
            }
            ancestor = placeholder.parent();
        }
    }

    fn empty_node_at(&self, elm: NodeId) -> VNode {
        let tag = self.ops.tag_name(elm).unwrap_or_default();
        let vnode = VNode::element(tag, VNodeData::default(), Vec::new());
        vnode.set_elm(Some(elm));
        vnode
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create the real subtree for `vnode` and insert it under `parent_elm`.
    ///
    /// A vnode that is already bound (reused from a previous render) is
    /// copied first so the old binding stays intact; the copy replaces it in
    /// `owner`'s children and is returned.
    fn create_elm(
        &self,
        vnode: &VNode,
        queue: &mut InsertQueue,
        parent_elm: Option<NodeId>,
        ref_elm: Option<NodeId>,
        owner: Option<(&VNode, usize)>,
    ) -> Result<VNode> {
        let vnode = match owner {
            Some((owner, index)) if vnode.elm().is_some() => {
                let copy = vnode.clone_unbound();
                owner.replace_child(index, copy.clone());
                copy
            }
            _ => vnode.clone(),
        };

        if self.create_component(&vnode, queue, parent_elm, ref_elm)? {
            return Ok(vnode);
        }

        if let Some(tag) = vnode.tag() {
            let elm = self.ops.create_element(tag);
            vnode.set_elm(Some(elm));
            self.create_children(&vnode, queue)?;
            self.invoke_create_hooks(&vnode, queue);
            self.insert(parent_elm, elm, ref_elm);
        } else if vnode.is_comment() {
            let elm = self.ops.create_comment(vnode.text_content().unwrap_or_default());
            vnode.set_elm(Some(elm));
            self.insert(parent_elm, elm, ref_elm);
        } else {
            let elm = self.ops.create_text_node(vnode.text_content().unwrap_or_default());
            vnode.set_elm(Some(elm));
            self.insert(parent_elm, elm, ref_elm);
        }
        Ok(vnode)
    }

    fn create_component(
        &self,
        vnode: &VNode,
        queue: &mut InsertQueue,
        parent_elm: Option<NodeId>,
        ref_elm: Option<NodeId>,
    ) -> Result<bool> {
        if !vnode.is_component() {
            return Ok(false);
        }
        component_init(vnode)?;
        if vnode.component_instance().is_none() {
            return Ok(false);
        }
        self.init_component(vnode, queue);
        if let Some(elm) = vnode.elm() {
            self.insert(parent_elm, elm, ref_elm);
        }
        Ok(true)
    }

    fn init_component(&self, vnode: &VNode, queue: &mut InsertQueue) {
        let pending = std::mem::take(&mut vnode.data_mut().pending_insert);
        queue.extend(pending);
        vnode.set_elm(vnode.component_instance().and_then(|vm| vm.el()));
        if self.is_patchable(vnode) {
            self.invoke_create_hooks(vnode, queue);
        } else {
            // Empty component root: still register the ref and run insert.
            register_ref(vnode, false);
            queue.push(vnode.clone());
        }
    }

    fn create_children(&self, vnode: &VNode, queue: &mut InsertQueue) -> Result<()> {
        let elm = vnode.elm();
        for (i, child) in vnode.children().iter().enumerate() {
            self.create_elm(child, queue, elm, None, Some((vnode, i)))?;
        }
        Ok(())
    }

    fn invoke_create_hooks(&self, vnode: &VNode, queue: &mut InsertQueue) {
        for module in &self.modules {
            module.create(&*self.ops, &self.empty, vnode);
        }
        if vnode.is_component() || self.modules.iter().any(|m| m.wants_insert(vnode)) {
            queue.push(vnode.clone());
        }
    }

    /// Whether the vnode (following component roots down) ends in a tagged
    /// element that modules can apply to.
    fn is_patchable(&self, vnode: &VNode) -> bool {
        let mut current = vnode.clone();
        while let Some(root) = current.component_instance().and_then(|vm| vm.rendered_vnode()) {
            current = root;
        }
        current.tag().is_some()
    }

    fn insert(&self, parent: Option<NodeId>, elm: NodeId, reference: Option<NodeId>) {
        let Some(parent) = parent else { return };
        match reference {
            Some(reference) => {
                if self.ops.parent_node(reference) == Some(parent) {
                    self.ops.insert_before(parent, elm, reference);
                }
            }
            None => self.ops.append_child(parent, elm),
        }
    }

    fn add_vnodes(
        &self,
        parent_elm: Option<NodeId>,
        ref_elm: Option<NodeId>,
        vnodes: &mut [VNode],
        start: usize,
        end: usize,
        queue: &mut InsertQueue,
        owner: &VNode,
    ) -> Result<()> {
        for i in start..=end {
            vnodes[i] = self.create_elm(&vnodes[i], queue, parent_elm, ref_elm, Some((owner, i)))?;
        }
        Ok(())
    }

    // =========================================================================
    // Removal
    // =========================================================================

    fn invoke_destroy_hook(&self, vnode: &VNode) {
        if vnode.is_component() {
            component_destroy(vnode);
        }
        for module in &self.modules {
            module.destroy(&*self.ops, vnode);
        }
        for child in vnode.children() {
            self.invoke_destroy_hook(&child);
        }
    }

    fn remove_vnodes(&self, vnodes: &[VNode]) {
        for vnode in vnodes {
            if vnode.tag().is_some() {
                self.remove_node(vnode.elm());
                self.invoke_destroy_hook(vnode);
            } else {
                self.remove_node(vnode.elm());
            }
        }
    }

    fn remove_node(&self, elm: Option<NodeId>) {
        let Some(elm) = elm else { return };
        if let Some(parent) = self.ops.parent_node(elm) {
            self.ops.remove_child(parent, elm);
        }
    }

    // =========================================================================
    // Patching
    // =========================================================================

    fn patch_vnode(
        &self,
        old: &VNode,
        vnode: &VNode,
        queue: &mut InsertQueue,
        owner: Option<(&VNode, usize)>,
    ) -> Result<VNode> {
        if old.ptr_eq(vnode) {
            return Ok(vnode.clone());
        }
        let vnode = match owner {
            Some((owner, index)) if vnode.elm().is_some() => {
                let copy = vnode.clone_unbound();
                owner.replace_child(index, copy.clone());
                copy
            }
            _ => vnode.clone(),
        };

        let elm = old.elm();
        vnode.set_elm(elm);

        if old.is_async_placeholder() {
            return Ok(vnode);
        }

        if vnode.is_component() {
            component_prepatch(old, &vnode);
        }

        if self.is_patchable(&vnode) {
            for module in &self.modules {
                module.update(&*self.ops, old, &vnode);
            }
        }

        if vnode.text_content().is_none() {
            let old_ch = old.children();
            let mut ch = vnode.children();
            match (old_ch.is_empty(), ch.is_empty()) {
                (false, false) => self.update_children(elm, old_ch, ch, queue, &vnode)?,
                (true, false) => {
                    let end = ch.len() - 1;
                    self.add_vnodes(elm, None, &mut ch, 0, end, queue, &vnode)?;
                }
                (false, true) => self.remove_vnodes(&old_ch),
                (true, true) => {}
            }
        } else if old.text_content() != vnode.text_content() {
            if let Some(elm) = elm {
                self.ops.set_text_content(elm, vnode.text_content().unwrap_or_default());
            }
        }

        for module in &self.modules {
            module.post_patch(old, &vnode);
        }
        Ok(vnode)
    }

    /// Two-ended keyed reconciliation of sibling lists.
    fn update_children(
        &self,
        parent_elm: Option<NodeId>,
        old_ch: Vec<VNode>,
        mut new_ch: Vec<VNode>,
        queue: &mut InsertQueue,
        owner: &VNode,
    ) -> Result<()> {
        check_duplicate_keys(&new_ch);

        let mut old_ch: Vec<Option<VNode>> = old_ch.into_iter().map(Some).collect();
        let mut old_start: isize = 0;
        let mut old_end: isize = old_ch.len() as isize - 1;
        let mut new_start: isize = 0;
        let mut new_end: isize = new_ch.len() as isize - 1;
        let mut key_to_old: Option<HashMap<String, usize>> = None;

        while old_start <= old_end && new_start <= new_end {
            let Some(old_start_vnode) = old_ch[old_start as usize].clone() else {
                old_start += 1;
                continue;
            };
            let Some(old_end_vnode) = old_ch[old_end as usize].clone() else {
                old_end -= 1;
                continue;
            };
            let ns = new_start as usize;
            let ne = new_end as usize;

            if same_vnode(&old_start_vnode, &new_ch[ns]) {
                new_ch[ns] = self.patch_vnode(&old_start_vnode, &new_ch[ns], queue, Some((owner, ns)))?;
                old_start += 1;
                new_start += 1;
            } else if same_vnode(&old_end_vnode, &new_ch[ne]) {
                new_ch[ne] = self.patch_vnode(&old_end_vnode, &new_ch[ne], queue, Some((owner, ne)))?;
                old_end -= 1;
                new_end -= 1;
            } else if same_vnode(&old_start_vnode, &new_ch[ne]) {
                // Moved right.
                new_ch[ne] = self.patch_vnode(&old_start_vnode, &new_ch[ne], queue, Some((owner, ne)))?;
                if let (Some(parent), Some(elm)) = (parent_elm, old_start_vnode.elm()) {
                    match old_end_vnode.elm().and_then(|e| self.ops.next_sibling(e)) {
                        Some(next) => self.ops.insert_before(parent, elm, next),
                        None => self.ops.append_child(parent, elm),
                    }
                }
                old_start += 1;
                new_end -= 1;
            } else if same_vnode(&old_end_vnode, &new_ch[ns]) {
                // Moved left.
                new_ch[ns] = self.patch_vnode(&old_end_vnode, &new_ch[ns], queue, Some((owner, ns)))?;
                if let (Some(parent), Some(elm), Some(before)) =
                    (parent_elm, old_end_vnode.elm(), old_start_vnode.elm())
                {
                    self.ops.insert_before(parent, elm, before);
                }
                old_end -= 1;
                new_start += 1;
            } else {
                let map = key_to_old
                    .get_or_insert_with(|| key_to_old_index(&old_ch, old_start as usize, old_end as usize));
                let idx_in_old = match new_ch[ns].key() {
                    Some(key) => map.get(key).copied(),
                    None => find_index_in_old(&new_ch[ns], &old_ch, old_start as usize, old_end as usize),
                };
                let to_move = idx_in_old.and_then(|i| old_ch[i].clone().map(|v| (i, v)));
                match to_move {
                    Some((i, moved)) if same_vnode(&moved, &new_ch[ns]) => {
                        new_ch[ns] = self.patch_vnode(&moved, &new_ch[ns], queue, Some((owner, ns)))?;
                        old_ch[i] = None;
                        if let (Some(parent), Some(elm), Some(before)) =
                            (parent_elm, moved.elm(), old_start_vnode.elm())
                        {
                            self.ops.insert_before(parent, elm, before);
                        }
                    }
                    _ => {
                        // New node, or same key with a different shape.
                        new_ch[ns] =
                            self.create_elm(&new_ch[ns], queue, parent_elm, old_start_vnode.elm(), Some((owner, ns)))?;
                    }
                }
                new_start += 1;
            }
        }

        if old_start > old_end {
            let next = (new_end + 1) as usize;
            let ref_elm = new_ch.get(next).and_then(VNode::elm);
            if new_start <= new_end {
                self.add_vnodes(
                    parent_elm,
                    ref_elm,
                    &mut new_ch,
                    new_start as usize,
                    new_end as usize,
                    queue,
                    owner,
                )?;
            }
        } else if new_start > new_end {
            let leftovers: Vec<VNode> = old_ch[old_start as usize..=old_end as usize]
                .iter()
                .flatten()
                .cloned()
                .collect();
            self.remove_vnodes(&leftovers);
        }
        Ok(())
    }

    // =========================================================================
    // Insert hooks
    // =========================================================================

    fn invoke_insert_hook(&self, vnode: &VNode, queue: InsertQueue, initial: bool) {
        if initial {
            if let Some(placeholder) = vnode.parent() {
                placeholder.data_mut().pending_insert = queue;
                return;
            }
        }
        for inserted in queue {
            if inserted.is_component() {
                component_insert(&inserted);
            }
            for module in &self.modules {
                if module.wants_insert(&inserted) {
                    module.insert(&inserted);
                }
            }
        }
    }
}

fn key_to_old_index(old_ch: &[Option<VNode>], start: usize, end: usize) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (i, vnode) in old_ch.iter().enumerate().take(end + 1).skip(start) {
        if let Some(key) = vnode.as_ref().and_then(VNode::key) {
            map.insert(key.to_string(), i);
        }
    }
    map
}

fn find_index_in_old(vnode: &VNode, old_ch: &[Option<VNode>], start: usize, end: usize) -> Option<usize> {
    (start..=end).find(|&i| old_ch[i].as_ref().is_some_and(|old| same_vnode(vnode, old)))
}

fn check_duplicate_keys(children: &[VNode]) {
    let mut seen = HashSet::new();
    for child in children {
        if let Some(key) = child.key() {
            if !seen.insert(key) {
                let vm = child.context();
                dev_warn(
                    &format!("Duplicate keys detected: '{key}'. This may cause an update error."),
                    vm.as_ref(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::reset_runtime;
    use crate::vdom::{DomOp, MemoryDom};

    fn li(key: &str) -> VNode {
        VNode::element("li", VNodeData::new().key(key), vec![VNode::text(key)])
    }

    fn list(keys: &[&str]) -> VNode {
        VNode::element("ul", VNodeData::new(), keys.iter().map(|k| li(k)).collect())
    }

    fn mount(dom: &Rc<MemoryDom>, patcher: &Patcher, vnode: &VNode) -> NodeId {
        let host = dom.create_root("body");
        let target = dom.create_root("div");
        dom.append_child(host, target);
        patcher.patch(Some(OldTree::Element(target)), Some(vnode)).unwrap();
        host
    }

    #[test]
    fn test_mount_replaces_target() {
        reset_runtime();
        let dom = MemoryDom::new();
        let patcher = Patcher::new(dom.clone());
        let host = mount(&dom, &patcher, &list(&["a", "b"]));
        assert_eq!(dom.serialize(host), "<body><ul><li>a</li><li>b</li></ul></body>");
    }

    #[test]
    fn test_keyed_reorder_reuses_nodes() {
        reset_runtime();
        let dom = MemoryDom::new();
        let patcher = Patcher::new(dom.clone());
        let old = list(&["a", "b", "c", "d"]);
        let host = mount(&dom, &patcher, &old);
        let before: Vec<_> = old.children().iter().map(|c| c.elm()).collect();
        dom.take_log();

        let new = list(&["d", "a", "c", "b"]);
        patcher.patch(Some(OldTree::VNode(old)), Some(&new)).unwrap();

        assert_eq!(
            dom.serialize(host),
            "<body><ul><li>d</li><li>a</li><li>c</li><li>b</li></ul></body>"
        );
        let log = dom.take_log();
        assert!(!log.iter().any(|op| matches!(op, DomOp::CreateElement(..) | DomOp::Remove { .. })));
        let after: Vec<_> = new.children().iter().map(|c| c.elm()).collect();
        for elm in &after {
            assert!(before.contains(elm));
        }
    }

    #[test]
    fn test_insert_and_remove_keyed() {
        reset_runtime();
        let dom = MemoryDom::new();
        let patcher = Patcher::new(dom.clone());
        let old = list(&["a", "b", "c"]);
        let host = mount(&dom, &patcher, &old);

        let new = list(&["a", "x", "c"]);
        patcher.patch(Some(OldTree::VNode(old)), Some(&new)).unwrap();
        assert_eq!(dom.serialize(host), "<body><ul><li>a</li><li>x</li><li>c</li></ul></body>");

        let shorter = list(&["c"]);
        patcher.patch(Some(OldTree::VNode(new)), Some(&shorter)).unwrap();
        assert_eq!(dom.serialize(host), "<body><ul><li>c</li></ul></body>");
    }

    #[test]
    fn test_text_update_in_place() {
        reset_runtime();
        let dom = MemoryDom::new();
        let patcher = Patcher::new(dom.clone());
        let old = VNode::element("p", VNodeData::new(), vec![VNode::text("one")]);
        let host = mount(&dom, &patcher, &old);
        dom.take_log();

        let new = VNode::element("p", VNodeData::new(), vec![VNode::text("two")]);
        patcher.patch(Some(OldTree::VNode(old)), Some(&new)).unwrap();
        assert_eq!(dom.serialize(host), "<body><p>two</p></body>");
        let log = dom.take_log();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0], DomOp::SetText(..)));
    }

    #[test]
    fn test_different_root_tag_replaces() {
        reset_runtime();
        let dom = MemoryDom::new();
        let patcher = Patcher::new(dom.clone());
        let old = VNode::element("p", VNodeData::new(), vec![]);
        let host = mount(&dom, &patcher, &old);
        let new = VNode::element("section", VNodeData::new(), vec![]);
        patcher.patch(Some(OldTree::VNode(old)), Some(&new)).unwrap();
        assert_eq!(dom.serialize(host), "<body><section></section></body>");
    }

    #[test]
    fn test_reused_vnode_is_copied() {
        reset_runtime();
        let dom = MemoryDom::new();
        let patcher = Patcher::new(dom.clone());
        let shared = VNode::text("s");
        let first = VNode::element("div", VNodeData::new(), vec![shared.clone()]);
        patcher.patch(None, Some(&first)).unwrap();
        let bound = shared.elm();

        let second = VNode::element("div", VNodeData::new(), vec![shared.clone()]);
        patcher.patch(None, Some(&second)).unwrap();
        assert_eq!(shared.elm(), bound);
        assert_ne!(second.children()[0].elm(), bound);
    }

    #[test]
    fn test_unkeyed_children_patch_in_order() {
        reset_runtime();
        let dom = MemoryDom::new();
        let patcher = Patcher::new(dom.clone());
        let old = VNode::element("div", VNodeData::new(), vec![VNode::text("a"), VNode::text("b")]);
        let host = mount(&dom, &patcher, &old);
        let new = VNode::element(
            "div",
            VNodeData::new(),
            vec![VNode::text("a"), VNode::text("b"), VNode::text("c")],
        );
        patcher.patch(Some(OldTree::VNode(old)), Some(&new)).unwrap();
        assert_eq!(dom.serialize(host), "<body><div>abc</div></body>");
    }
}
