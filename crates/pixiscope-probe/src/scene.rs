//! Scene Walker: snapshot the display tree.
//!
//! Traversal is depth-first pre-order with an explicit stack, so pathological
//! nesting cannot overflow the native stack. Two opt-out flags set by page
//! code are honoured:
//!
//! - `__devtoolIgnore`: the node and its whole subtree are left out.
//! - `__devtoolIgnoreChildren`: the node is kept, its subtree is left out.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::classify::{classify, NodeKind};
use crate::ids::{NodeId, NodeIds};
use crate::runtime::{Object, Value};

const IGNORE_FLAG: &str = "__devtoolIgnore";
const IGNORE_CHILDREN_FLAG: &str = "__devtoolIgnoreChildren";

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };
    pub const ONE: Point = Point { x: 1.0, y: 1.0 };
}

/// One node of a scene snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneNode {
    pub id: NodeId,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub depth: usize,
    pub visible: bool,
    pub world_visible: bool,
    pub alpha: f64,
    pub world_alpha: f64,
    pub position: Point,
    pub scale: Point,
    pub rotation: f64,
    pub pivot: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Point>,
    pub z_index: f64,
    pub sortable_children: bool,
    pub interactive: bool,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    /// All nodes of this subtree in pre-order.
    pub fn flatten(&self) -> Vec<&SceneNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Number of nodes in this subtree, including itself.
    pub fn count(&self) -> usize {
        self.flatten().len()
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// One step of a pre-order traversal.
pub(crate) struct Visit {
    pub node: Object,
    pub depth: usize,
    pub parent: Option<usize>,
}

fn is_ignored(node: &Object) -> bool {
    node.get(IGNORE_FLAG).truthy()
}

fn children_ignored(node: &Object) -> bool {
    node.get(IGNORE_CHILDREN_FLAG).truthy()
}

/// Pre-order list of every node the tooling may see. `parent` indexes into
/// the returned list. No node appears twice, even if the page graph shares
/// or cycles back to a node.
pub(crate) fn preorder(root: &Object) -> Vec<Visit> {
    let mut out = Vec::new();
    if is_ignored(root) {
        return out;
    }

    let mut seen: HashSet<usize> = HashSet::new();
    let mut stack: Vec<(Object, usize, Option<usize>)> = vec![(root.clone(), 0, None)];

    while let Some((node, depth, parent)) = stack.pop() {
        if !seen.insert(node.addr()) {
            continue;
        }
        let index = out.len();
        if !children_ignored(&node) {
            if let Some(children) = node.get("children").as_array() {
                for child in children.to_vec().into_iter().rev() {
                    if let Value::Object(child) = child {
                        if !is_ignored(&child) {
                            stack.push((child, depth + 1, Some(index)));
                        }
                    }
                }
            }
        }
        out.push(Visit {
            node,
            depth,
            parent,
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Field readers
// ---------------------------------------------------------------------------

fn number(node: &Object, key: &str, default: f64) -> f64 {
    node.get(key).as_f64().unwrap_or(default)
}

fn point(value: &Value, default: Point) -> Point {
    match (value.get("x").as_f64(), value.get("y").as_f64()) {
        (Some(x), Some(y)) => Point { x, y },
        _ => default,
    }
}

fn node_name(node: &Object) -> Option<String> {
    ["label", "name"]
        .iter()
        .filter_map(|key| node.get(key).as_str().map(str::to_string))
        .find(|name| !name.is_empty())
}

fn is_interactive(node: &Object) -> bool {
    if node.get("interactive").truthy() {
        return true;
    }
    matches!(node.get("eventMode").as_str(), Some("static" | "dynamic"))
}

fn snapshot_node(node: &Object, depth: usize, ids: &mut NodeIds) -> SceneNode {
    let visible = node.get("visible").as_bool().unwrap_or(true);
    let alpha = number(node, "alpha", 1.0);
    let position = match (node.get("x").as_f64(), node.get("y").as_f64()) {
        (Some(x), Some(y)) => Point { x, y },
        _ => point(&node.get("position"), Point::ZERO),
    };
    let anchor = match node.get("anchor") {
        v @ Value::Object(_) => Some(point(&v, Point::ZERO)),
        _ => None,
    };

    SceneNode {
        id: ids.get_or_assign(node),
        name: node_name(node),
        kind: classify(node),
        depth,
        visible,
        world_visible: node.get("worldVisible").as_bool().unwrap_or(visible),
        alpha,
        world_alpha: number(node, "worldAlpha", alpha),
        position,
        scale: point(&node.get("scale"), Point::ONE),
        rotation: number(node, "rotation", 0.0),
        pivot: point(&node.get("pivot"), Point::ZERO),
        anchor,
        z_index: number(node, "zIndex", 0.0),
        sortable_children: node.get("sortableChildren").truthy(),
        interactive: is_interactive(node),
        children: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// walk
// ---------------------------------------------------------------------------

/// Snapshot the tree under `root`. Returns `None` if the root itself is
/// hidden from tooling.
pub fn walk(root: &Object, ids: &mut NodeIds) -> Option<SceneNode> {
    let visits = preorder(root);
    let mut nodes: Vec<Option<SceneNode>> = visits
        .iter()
        .map(|v| Some(snapshot_node(&v.node, v.depth, ids)))
        .collect();
    let mut children: Vec<Vec<SceneNode>> = vec![Vec::new(); visits.len()];

    // Children always follow their parent in pre-order, so assembling from
    // the back completes every subtree before its parent is attached.
    let mut root_node = None;
    for (index, visit) in visits.iter().enumerate().rev() {
        let mut node = nodes[index].take()?;
        let mut kids = std::mem::take(&mut children[index]);
        kids.reverse();
        node.children = kids;
        match visit.parent {
            Some(parent) => children[parent].push(node),
            None => root_node = Some(node),
        }
    }
    root_node
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Array;

    fn container(name: &str, children: Vec<Object>) -> Object {
        let node = Object::from_props([
            ("label", Value::from(name)),
            ("parent", Value::Null),
            (
                "children",
                Value::from(children.iter().cloned().map(Value::from).collect::<Array>()),
            ),
        ]);
        for child in &children {
            child.set("parent", node.clone());
        }
        node
    }

    fn names(node: &SceneNode) -> Vec<String> {
        node.flatten()
            .iter()
            .map(|n| n.name.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_empty_root() {
        let root = container("stage", vec![]);
        let snap = walk(&root, &mut NodeIds::new()).unwrap();
        assert!(snap.children.is_empty());
        assert_eq!(snap.kind, NodeKind::Container);
        assert_eq!(snap.depth, 0);
    }

    #[test]
    fn test_preorder_and_depths() {
        let leaf_a = container("a1", vec![]);
        let a = container("a", vec![leaf_a]);
        let b = container("b", vec![]);
        let root = container("root", vec![a, b]);
        let snap = walk(&root, &mut NodeIds::new()).unwrap();
        assert_eq!(names(&snap), vec!["root", "a", "a1", "b"]);
        assert_eq!(snap.children[0].children[0].depth, 2);
        assert_eq!(snap.count(), 4);
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let root = container("root", vec![]);
        let snap = walk(&root, &mut NodeIds::new()).unwrap();
        assert_eq!(snap.scale, Point::ONE);
        assert_eq!(snap.rotation, 0.0);
        assert_eq!(snap.z_index, 0.0);
        assert!(snap.anchor.is_none());
        assert!(snap.visible);
        assert!(snap.world_visible);
        assert_eq!(snap.alpha, 1.0);
    }

    #[test]
    fn test_ignored_subtree_removed() {
        let hidden_child = container("hidden-child", vec![]);
        let hidden = container("hidden", vec![hidden_child]);
        hidden.set(IGNORE_FLAG, true);
        let root = container("root", vec![hidden, container("shown", vec![])]);
        let snap = walk(&root, &mut NodeIds::new()).unwrap();
        assert_eq!(names(&snap), vec!["root", "shown"]);
    }

    #[test]
    fn test_ignore_children_keeps_node() {
        let inner = container("inner", vec![]);
        let parent = container("parent", vec![inner]);
        parent.set(IGNORE_CHILDREN_FLAG, true);
        let root = container("root", vec![parent]);
        let snap = walk(&root, &mut NodeIds::new()).unwrap();
        assert_eq!(names(&snap), vec!["root", "parent"]);
    }

    #[test]
    fn test_ignored_root_yields_nothing() {
        let root = container("root", vec![]);
        root.set(IGNORE_FLAG, true);
        assert!(walk(&root, &mut NodeIds::new()).is_none());
    }

    #[test]
    fn test_cycle_visited_once() {
        let child = container("child", vec![]);
        let root = container("root", vec![child.clone()]);
        // Page bug: the child lists the root as its own child.
        child.set("children", Array::from_values(vec![Value::from(root.clone())]));
        let snap = walk(&root, &mut NodeIds::new()).unwrap();
        assert_eq!(snap.count(), 2);
        child.set("children", Array::new());
    }

    #[test]
    fn test_ids_stable_across_walks() {
        let root = container("root", vec![container("a", vec![])]);
        let mut ids = NodeIds::new();
        let first = walk(&root, &mut ids).unwrap();
        let second = walk(&root, &mut ids).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.children[0].id, second.children[0].id);
        assert_ne!(first.id, first.children[0].id);
    }

    #[test]
    fn test_transform_fields_read() {
        let root = container("root", vec![]);
        root.set("x", 10.0);
        root.set("y", 20.0);
        root.set("rotation", 0.5);
        root.set(
            "scale",
            Object::from_props([("x", Value::from(2.0)), ("y", Value::from(3.0))]),
        );
        root.set(
            "anchor",
            Object::from_props([("x", Value::from(0.5)), ("y", Value::from(0.5))]),
        );
        root.set("eventMode", "static");
        let snap = walk(&root, &mut NodeIds::new()).unwrap();
        assert_eq!(snap.position, Point { x: 10.0, y: 20.0 });
        assert_eq!(snap.scale, Point { x: 2.0, y: 3.0 });
        assert_eq!(snap.anchor, Some(Point { x: 0.5, y: 0.5 }));
        assert!(snap.interactive);
    }
}
