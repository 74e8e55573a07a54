//! Component placeholders.
//!
//! A component used inside a render becomes a placeholder vnode carrying the
//! component definition, the props extracted from its data, its component
//! listeners and its slot content. The patcher drives the child instance
//! through four hooks:
//!
//! - `init`: create and mount the child (or revive a kept-alive one)
//! - `prepatch`: hand new props, listeners and slot content to the child
//! - `insert`: fire `mounted`, or `activated` for kept-alive children
//! - `destroy`: destroy the child, or deactivate a kept-alive one

use indexmap::IndexMap;

use super::vnode::{ComponentVNodeOptions, VNode, VNodeData};
use crate::component::lifecycle::{
    activate_child_component, call_hook, deactivate_child_component, update_child_component,
};
use crate::component::{ComponentDef, Instance, LifecycleHook};
use crate::error::Result;
use crate::observer::Value;
use crate::runtime::active_instance;
use crate::runtime::scheduler::queue_activated_component;

/// `fooBar` to `foo-bar`.
pub fn hyphenate(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Pull declared props out of the placeholder's data.
///
/// Explicit props are kept on the data; matching attributes are moved out so
/// they don't also land on the child's root element.
fn extract_props(data: &mut VNodeData, def: &ComponentDef) -> IndexMap<String, Value> {
    let mut res = IndexMap::new();
    for key in def.options().props.keys() {
        let alt = hyphenate(key);
        let from_props = data.props.get(key).or_else(|| data.props.get(&alt)).cloned();
        if let Some(value) = from_props {
            res.insert(key.clone(), value);
            continue;
        }
        let from_attrs = data
            .attrs
            .shift_remove(key)
            .or_else(|| data.attrs.shift_remove(&alt));
        if let Some(value) = from_attrs {
            res.insert(key.clone(), Value::from(value));
        }
    }
    res
}

/// Build the placeholder vnode for `def` rendered by `context`.
pub(crate) fn create_component_vnode(
    def: &ComponentDef,
    mut data: VNodeData,
    context: &Instance,
    children: Vec<VNode>,
    tag: &str,
) -> VNode {
    let props_data = extract_props(&mut data, def);
    // Component listeners go to the child's event bus; only native ones stay.
    let listeners = std::mem::take(&mut data.on);

    if def.options().is_abstract {
        let slot = data.slot.take();
        data = VNodeData {
            slot,
            ..VNodeData::default()
        };
    }

    let name = def.name().map(str::to_string).unwrap_or_else(|| tag.to_string());
    let vnode_tag = if name.is_empty() {
        format!("component-{}", def.cid())
    } else {
        format!("component-{}-{}", def.cid(), name)
    };

    VNode::component_in(
        vnode_tag,
        data,
        Some(context),
        ComponentVNodeOptions {
            def: def.clone(),
            props_data,
            listeners,
            children,
            tag: tag.to_string(),
        },
    )
}

// =============================================================================
// Hooks
// =============================================================================

pub(crate) fn component_init(vnode: &VNode) -> Result<()> {
    if let Some(existing) = vnode.component_instance() {
        if !existing.is_destroyed() && vnode.is_keep_alive() {
            // Kept-alive: treat as a patch of itself.
            component_prepatch(vnode, vnode);
            return Ok(());
        }
    }
    let parent = active_instance();
    let child = Instance::for_vnode(vnode, parent.as_ref())?;
    vnode.set_component_instance(Some(child.clone()));
    child.mount(None)
}

pub(crate) fn component_prepatch(old: &VNode, vnode: &VNode) {
    let Some(child) = old.component_instance() else { return };
    vnode.set_component_instance(Some(child.clone()));
    let Some(options) = vnode.component_options() else { return };
    update_child_component(
        &child,
        &options.props_data,
        &options.listeners,
        vnode,
        &options.children,
    );
}

pub(crate) fn component_insert(vnode: &VNode) {
    let Some(child) = vnode.component_instance() else { return };
    if !child.is_mounted() {
        child.mark_mounted();
        call_hook(&child, LifecycleHook::Mounted);
    }
    if vnode.is_keep_alive() {
        let context_mounted = vnode.context().is_some_and(|c| c.is_mounted());
        if context_mounted {
            // Activated hooks wait until the whole tree has been patched.
            queue_activated_component(&child);
        } else {
            activate_child_component(&child, true);
        }
    }
}

pub(crate) fn component_destroy(vnode: &VNode) {
    let Some(child) = vnode.component_instance() else { return };
    if child.is_destroyed() {
        return;
    }
    if vnode.is_keep_alive() {
        deactivate_child_component(&child, true);
    } else {
        child.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentOptions, PropDef};

    #[test]
    fn test_hyphenate() {
        assert_eq!(hyphenate("fooBar"), "foo-bar");
        assert_eq!(hyphenate("aBC"), "a-b-c");
        assert_eq!(hyphenate("plain"), "plain");
    }

    #[test]
    fn test_extract_props_moves_matching_attrs() {
        crate::runtime::reset_runtime();
        let def = ComponentOptions::new()
            .prop("userName", PropDef::new())
            .prop("size", PropDef::new())
            .build();
        let mut data = VNodeData::new()
            .attr("user-name", "ada")
            .attr("id", "x")
            .prop("size", 3);
        let props = extract_props(&mut data, &def);

        assert_eq!(props.get("userName"), Some(&Value::from("ada")));
        assert_eq!(props.get("size"), Some(&Value::from(3)));
        assert!(!data.attrs.contains_key("user-name"));
        assert!(data.attrs.contains_key("id"));
    }
}
