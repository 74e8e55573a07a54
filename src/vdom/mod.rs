//! Virtual nodes and reconciliation.
//!
//! Render functions produce [`VNode`] trees. The [`Patcher`] diffs each new
//! tree against the previous one and applies the difference to a target
//! tree through [`NodeOps`]:
//!
//! ```text
//! render → VNode tree → Patcher::patch → modules + NodeOps → target tree
//! ```
//!
//! Component placeholders hand off to child instances through the hooks in
//! `create_component`; attributes, classes, styles, listeners, directives
//! and refs are applied by [`Module`]s.

pub(crate) mod create_component;
mod memory;
pub mod modules;
mod node_ops;
mod patch;
pub(crate) mod vnode;

pub use create_component::hyphenate;
pub use memory::{DomOp, MemoryDom};
pub use modules::{DirectiveBinding, DirectiveDef, DirectiveHook, Module, default_modules};
pub use node_ops::{ListenerId, NodeId, NodeOps};
pub use patch::{OldTree, Patcher, same_vnode};
pub use vnode::{ComponentVNodeOptions, VNode, VNodeData, VNodeDirective};
