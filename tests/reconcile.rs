//! Keyed child reconciliation checked against fresh renders.

use std::collections::HashMap;

use proptest::prelude::*;
use spark_view::vdom::OldTree;
use spark_view::{MemoryDom, NodeId, Patcher, VNode, VNodeData, reset_runtime};

fn unique(keys: Vec<u8>) -> Vec<String> {
    let mut seen = Vec::new();
    for key in keys {
        let key = format!("k{key}");
        if !seen.contains(&key) {
            seen.push(key);
        }
    }
    seen
}

fn list(keys: &[String]) -> VNode {
    let items = keys
        .iter()
        .map(|k| VNode::element("li", VNodeData::new().key(k.as_str()), vec![VNode::text(k.as_str())]))
        .collect();
    VNode::element("ul", VNodeData::new(), items)
}

fn markup(keys: &[String]) -> String {
    let items: String = keys.iter().map(|k| format!("<li>{k}</li>")).collect();
    format!("<ul>{items}</ul>")
}

fn nodes_by_key(dom: &MemoryDom, root: NodeId) -> HashMap<String, NodeId> {
    dom.children(root)
        .into_iter()
        .filter_map(|li| dom.children(li).first().and_then(|t| dom.text(*t)).map(|text| (text, li)))
        .collect()
}

proptest! {
    #[test]
    fn keyed_patch_matches_fresh_render(
        before in proptest::collection::vec(0u8..16, 0..10),
        after in proptest::collection::vec(0u8..16, 0..10),
    ) {
        reset_runtime();
        let before = unique(before);
        let after = unique(after);

        let dom = MemoryDom::new();
        let patcher = Patcher::new(dom.clone());
        let old = list(&before);
        let root = patcher.patch(None, Some(&old)).unwrap().unwrap();
        let old_nodes = nodes_by_key(&dom, root);

        let new = list(&after);
        let patched = patcher.patch(Some(OldTree::VNode(old)), Some(&new)).unwrap().unwrap();
        prop_assert_eq!(patched, root);
        prop_assert_eq!(dom.serialize(root), markup(&after));

        // Keys present on both sides keep their node.
        let new_nodes = nodes_by_key(&dom, root);
        for key in after.iter().filter(|k| before.contains(k)) {
            prop_assert_eq!(new_nodes[key], old_nodes[key]);
        }
    }
}
