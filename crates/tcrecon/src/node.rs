//! Tree model: nodes wrap TC objects with a child list and a type tag, and
//! this module supplies the parent/child predicates, composition, and
//! structural-equality operations the reconcile engine drives from.

use serde::{Deserialize, Serialize};

use crate::handle;
use crate::netlink::error::{Error, Result};
use crate::object::TcObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Qdisc,
    Class,
    Filter,
}

/// One element of a desired or live tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Symbolic name, used only inside the controller; never sent to the kernel.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(flatten)]
    pub object: TcObject,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: NodeType, object: TcObject) -> Self {
        Self {
            name: name.into(),
            node_type,
            object,
            children: Vec::new(),
        }
    }

    pub fn is_child_of(&self, parent: &Node) -> bool {
        self.object.parent == parent.object.handle
    }

    pub fn add_child(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Remove the i-th child, or fail if `i` is out of range.
    pub fn delete_child(&mut self, i: usize) -> Result<Node> {
        if i >= self.children.len() {
            return Err(Error::Tree(format!(
                "child index {i} out of range (have {})",
                self.children.len()
            )));
        }
        Ok(self.children.remove(i))
    }

    /// Semantic equality of just this node (ignoring children); see
    /// [`compare_tree`] for the recursive, order-insensitive version.
    pub fn semantically_eq(&self, other: &Node) -> bool {
        self.node_type == other.node_type && self.object.semantically_eq(&other.object)
    }

    /// Pre-order: this node, then each child pre-order.
    pub fn walk_pre_order<'a>(&'a self, out: &mut Vec<&'a Node>) {
        out.push(self);
        for child in &self.children {
            child.walk_pre_order(out);
        }
    }

    /// Post-order: each child post-order, then this node.
    pub fn walk_post_order<'a>(&'a self, out: &mut Vec<&'a Node>) {
        for child in &self.children {
            child.walk_post_order(out);
        }
        out.push(self);
    }
}

/// Find the unique node whose parent is the root sentinel.
pub fn find_root(nodes: &[Node]) -> Result<&Node> {
    let mut roots = nodes.iter().filter(|n| n.object.parent == handle::ROOT);
    let root = roots.next().ok_or_else(|| Error::Tree("no root node (parent == root for none)".into()))?;
    if roots.next().is_some() {
        return Err(Error::Tree("ambiguous root: more than one node has parent == root".into()));
    }
    Ok(root)
}

/// Build a tree from a flat node list: find the root, then recursively
/// attach every remaining node whose parent is the growing subtree's root or
/// any of its transitive children. O(n^2); acceptable at the scale this
/// controller operates (at most a few hundred nodes per interface).
pub fn compose(nodes: Vec<Node>) -> Result<(Node, Vec<Node>)> {
    let root_idx = nodes
        .iter()
        .position(|n| n.object.parent == handle::ROOT)
        .ok_or_else(|| Error::Tree("no root node (parent == root for none)".into()))?;

    let mut remaining = nodes;
    let mut root = remaining.remove(root_idx);
    if remaining.iter().any(|n| n.object.parent == handle::ROOT) {
        return Err(Error::Tree("ambiguous root: more than one node has parent == root".into()));
    }

    loop {
        let mut attached_handles: Vec<u32> = Vec::new();
        attached_handles.push(root.object.handle);
        collect_handles(&root, &mut attached_handles);

        let mut progressed = false;
        let mut leftover = Vec::new();
        for node in remaining {
            if let Some(parent_handle) = attached_handles.iter().find(|h| **h == node.object.parent) {
                let _ = parent_handle;
                attach(&mut root, node);
                progressed = true;
            } else {
                leftover.push(node);
            }
        }
        remaining = leftover;

        if !progressed || remaining.is_empty() {
            break;
        }
    }

    Ok((root, remaining))
}

fn collect_handles(node: &Node, out: &mut Vec<u32>) {
    for child in &node.children {
        out.push(child.object.handle);
        collect_handles(child, out);
    }
}

/// Attach `node` as a child of the node in `root`'s subtree whose handle
/// matches `node`'s parent. Panics only if the caller already verified the
/// parent is reachable (callers in this module always do).
fn attach(root: &mut Node, node: Node) {
    if root.object.handle == node.object.parent {
        root.add_child(node);
        return;
    }
    for child in &mut root.children {
        if subtree_contains(child, node.object.parent) {
            attach(child, node);
            return;
        }
    }
    // Unreachable given callers only invoke this after confirming a match
    // exists somewhere in the subtree, but fall back to attaching at the
    // root rather than silently dropping the node.
    root.add_child(node);
}

fn subtree_contains(node: &Node, handle: u32) -> bool {
    node.object.handle == handle || node.children.iter().any(|c| subtree_contains(c, handle))
}

/// Order-insensitive structural equality: `a` and `b` are semantically equal
/// at this node, and there is a bijection of their children under which every
/// matched pair also satisfies `compare_tree`.
pub fn compare_tree(a: &Node, b: &Node) -> bool {
    if !a.semantically_eq(b) {
        return false;
    }
    if a.children.len() != b.children.len() {
        return false;
    }
    let mut used = vec![false; b.children.len()];
    for child_a in &a.children {
        let mut matched = false;
        for (i, child_b) in b.children.iter().enumerate() {
            if !used[i] && compare_tree(child_a, child_b) {
                used[i] = true;
                matched = true;
                break;
            }
        }
        if !matched {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributePayload, FqCodelOpts};

    fn qdisc(name: &str, h: u32, parent: u32) -> Node {
        Node::new(
            name,
            NodeType::Qdisc,
            TcObject::new(1, h, parent, AttributePayload::FqCodel(FqCodelOpts::default())),
        )
    }

    #[test]
    fn find_root_errors_on_empty_and_ambiguous() {
        assert!(find_root(&[]).is_err());
        let nodes = vec![qdisc("a", 1, handle::ROOT), qdisc("b", 2, handle::ROOT)];
        assert!(find_root(&nodes).is_err());
    }

    #[test]
    fn compose_builds_tree_with_no_leftovers() {
        let nodes = vec![
            qdisc("root", 0x10000, handle::ROOT),
            qdisc("mid", 0x20000, 0x10000),
            qdisc("leaf", 0x30000, 0x20000),
        ];
        let (tree, leftovers) = compose(nodes).unwrap();
        assert!(leftovers.is_empty());
        assert_eq!(tree.name, "root");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].children.len(), 1);
    }

    #[test]
    fn compose_reports_unreachable_nodes_as_leftovers() {
        let nodes = vec![qdisc("root", 0x10000, handle::ROOT), qdisc("orphan", 0x30000, 0x99990000)];
        let (tree, leftovers) = compose(nodes).unwrap();
        assert_eq!(tree.children.len(), 0);
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn compare_tree_is_order_insensitive() {
        let mut a = qdisc("root", 0x10000, handle::ROOT);
        a.add_child(qdisc("x", 0x20000, 0x10000));
        a.add_child(qdisc("y", 0x30000, 0x10000));

        let mut b = qdisc("root", 0x10000, handle::ROOT);
        b.add_child(qdisc("y", 0x30000, 0x10000));
        b.add_child(qdisc("x", 0x20000, 0x10000));

        assert!(compare_tree(&a, &b));
    }

    #[test]
    fn compare_tree_detects_difference() {
        let a = qdisc("root", 0x10000, handle::ROOT);
        let b = qdisc("root", 0x10000, 0);
        assert!(!compare_tree(&a, &b));
    }
}
