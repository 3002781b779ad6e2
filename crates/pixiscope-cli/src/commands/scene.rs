//! `scene`, `inspect` and `query`: views over the flattened display tree.

use anyhow::{bail, Context, Result};
use pixiscope_probe::{Method, SceneNode};
use serde::Serialize;

use super::{print_agent_error, print_json};
use crate::config::PixiscopeConfig;
use crate::connection::{Connection, Reply};

/// How `inspect` picks its node.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Position in pre-order.
    Index(usize),
    /// First node whose name or type contains the text, ignoring case.
    Filter(String),
}

/// One row of `query` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub index: usize,
    pub id: u64,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub depth: usize,
    pub visible: bool,
    pub child_count: usize,
}

impl NodeSummary {
    fn new(index: usize, node: &SceneNode) -> Self {
        Self {
            index,
            id: node.id,
            name: node.name.clone(),
            kind: node.kind.as_str().to_string(),
            depth: node.depth,
            visible: node.visible,
            child_count: node.children.len(),
        }
    }
}

fn matches(node: &SceneNode, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    node.kind.as_str().to_lowercase().contains(&needle)
        || node
            .name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(&needle))
}

/// Every node in pre-order whose name or type contains `needle`.
pub fn query_nodes(root: &SceneNode, needle: &str) -> Vec<NodeSummary> {
    root.flatten()
        .into_iter()
        .enumerate()
        .filter(|(_, node)| matches(node, needle))
        .map(|(index, node)| NodeSummary::new(index, node))
        .collect()
}

/// The selected node with its position in pre-order.
pub fn select_node<'a>(root: &'a SceneNode, selector: &Selector) -> Option<(usize, &'a SceneNode)> {
    let nodes = root.flatten();
    match selector {
        Selector::Index(index) => nodes.get(*index).map(|node| (*index, *node)),
        Selector::Filter(needle) => nodes
            .into_iter()
            .enumerate()
            .find(|(_, node)| matches(node, needle)),
    }
}

/// Indented one-line-per-node outline.
pub fn outline(root: &SceneNode) -> String {
    let mut out = String::new();
    for node in root.flatten() {
        let indent = "  ".repeat(node.depth);
        let name = node.name.as_deref().unwrap_or("-");
        let hidden = if node.visible { "" } else { " (hidden)" };
        out.push_str(&format!("{indent}{} {name} #{}{hidden}\n", node.kind.as_str(), node.id));
    }
    out
}

async fn fetch_scene(conn: &Connection, config: &PixiscopeConfig) -> Result<Option<SceneNode>> {
    match conn.call_as::<SceneNode>(Method::GetSceneGraph, &[], config).await? {
        Reply::Ok(scene) => Ok(Some(scene)),
        Reply::Error(message) => {
            print_agent_error(&message)?;
            Ok(None)
        }
    }
}

/// `pixiscope scene`
pub async fn scene(conn: &Connection, config: &PixiscopeConfig, tree: bool) -> Result<()> {
    let Some(root) = fetch_scene(conn, config).await? else {
        return Ok(());
    };
    if tree {
        print!("{}", outline(&root));
        Ok(())
    } else {
        print_json(&root)
    }
}

/// `pixiscope inspect`
pub async fn inspect(conn: &Connection, config: &PixiscopeConfig, selector: Selector) -> Result<()> {
    let Some(root) = fetch_scene(conn, config).await? else {
        return Ok(());
    };
    let Some((index, node)) = select_node(&root, &selector) else {
        match selector {
            Selector::Index(i) => bail!("no node at index {i} (scene has {} nodes)", root.count()),
            Selector::Filter(f) => bail!("no node matches `{f}`"),
        }
    };

    let mut value = serde_json::to_value(node).context("failed to format node")?;
    if let Some(object) = value.as_object_mut() {
        object.remove("children");
        object.insert("index".into(), index.into());
        object.insert("childCount".into(), node.children.len().into());
    }
    print_json(&value)
}

/// `pixiscope query`
pub async fn query(conn: &Connection, config: &PixiscopeConfig, pattern: &str) -> Result<()> {
    let Some(root) = fetch_scene(conn, config).await? else {
        return Ok(());
    };
    print_json(&query_nodes(&root, pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixiscope_probe::{NodeKind, Point};

    fn node(id: u64, name: Option<&str>, kind: NodeKind, depth: usize, children: Vec<SceneNode>) -> SceneNode {
        SceneNode {
            id,
            name: name.map(str::to_string),
            kind,
            depth,
            visible: true,
            world_visible: true,
            alpha: 1.0,
            world_alpha: 1.0,
            position: Point::ZERO,
            scale: Point::ONE,
            rotation: 0.0,
            pivot: Point::ZERO,
            anchor: None,
            z_index: 0.0,
            sortable_children: false,
            interactive: false,
            children,
        }
    }

    fn tree() -> SceneNode {
        node(
            1,
            Some("stage"),
            NodeKind::Container,
            0,
            vec![
                node(
                    2,
                    Some("world"),
                    NodeKind::Container,
                    1,
                    vec![
                        node(3, Some("hero"), NodeKind::AnimatedSprite, 2, vec![]),
                        node(4, None, NodeKind::Sprite, 2, vec![]),
                    ],
                ),
                node(5, Some("score"), NodeKind::Text, 1, vec![]),
            ],
        )
    }

    #[test]
    fn test_query_matches_name_and_type() {
        let root = tree();
        let hits = query_nodes(&root, "sprite");
        let ids: Vec<u64> = hits.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(hits[0].index, 2);

        let hits = query_nodes(&root, "SCORE");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, "Text");
    }

    #[test]
    fn test_query_no_match() {
        assert!(query_nodes(&tree(), "graphics").is_empty());
    }

    #[test]
    fn test_select_by_index_is_preorder() {
        let root = tree();
        let (index, found) = select_node(&root, &Selector::Index(4)).unwrap();
        assert_eq!(index, 4);
        assert_eq!(found.id, 5);
        assert!(select_node(&root, &Selector::Index(5)).is_none());
    }

    #[test]
    fn test_select_by_filter_takes_first() {
        let root = tree();
        let (index, found) = select_node(&root, &Selector::Filter("container".into())).unwrap();
        assert_eq!((index, found.id), (0, 1));
        let (_, found) = select_node(&root, &Selector::Filter("Hero".into())).unwrap();
        assert_eq!(found.id, 3);
    }

    #[test]
    fn test_outline_indents_by_depth() {
        let text = outline(&tree());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Container stage #1");
        assert_eq!(lines[2], "    AnimatedSprite hero #3");
        assert_eq!(lines[3], "    Sprite - #4");
    }
}
