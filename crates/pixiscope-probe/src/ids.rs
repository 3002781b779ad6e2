//! Stable per-node identifiers keyed by object identity.
//!
//! A node gets its id the first time any traversal observes it, and keeps it
//! for as long as it lives. The table only holds weak references, so it never
//! keeps a node alive; entries for collected nodes are swept lazily and their
//! ids are never handed out again.

use std::collections::HashMap;

use crate::runtime::{Object, WeakObject};

/// Identifier assigned to a display node.
pub type NodeId = u64;

/// Sweep dead entries once the table grows past this many entries since the
/// previous sweep.
const MIN_SWEEP_THRESHOLD: usize = 256;

/// Weak identity table mapping live nodes to ids.
#[derive(Debug)]
pub struct NodeIds {
    entries: HashMap<usize, (WeakObject, NodeId)>,
    next_id: NodeId,
    sweep_at: usize,
}

impl Default for NodeIds {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeIds {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
            sweep_at: MIN_SWEEP_THRESHOLD,
        }
    }

    /// Return the node's id, assigning the next free one on first sight.
    pub fn get_or_assign(&mut self, node: &Object) -> NodeId {
        let addr = node.addr();
        if let Some((weak, id)) = self.entries.get(&addr) {
            // The weak handle pins the allocation, so a live entry at this
            // address is always the same node.
            if !weak.is_dead() {
                return *id;
            }
        }

        if self.entries.len() >= self.sweep_at {
            self.sweep();
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(addr, (node.downgrade(), id));
        id
    }

    /// Look up an id without assigning one.
    pub fn get(&self, node: &Object) -> Option<NodeId> {
        self.entries
            .get(&node.addr())
            .filter(|(weak, _)| !weak.is_dead())
            .map(|(_, id)| *id)
    }

    /// Drop entries whose node has been collected.
    pub fn sweep(&mut self) {
        self.entries.retain(|_, (weak, _)| !weak.is_dead());
        self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_THRESHOLD);
    }

    /// Number of entries whose node is still alive.
    pub fn live_count(&self) -> usize {
        self.entries.values().filter(|(weak, _)| !weak.is_dead()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_node_same_id() {
        let mut ids = NodeIds::new();
        let node = Object::new();
        let a = ids.get_or_assign(&node);
        let b = ids.get_or_assign(&node.clone());
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_nodes_distinct_ids() {
        let mut ids = NodeIds::new();
        let a = ids.get_or_assign(&Object::new());
        let keep = Object::new();
        let b = ids.get_or_assign(&keep);
        assert_ne!(a, b);
    }

    #[test]
    fn test_table_does_not_keep_nodes_alive() {
        let mut ids = NodeIds::new();
        let node = Object::new();
        let weak = node.downgrade();
        ids.get_or_assign(&node);
        drop(node);
        assert!(weak.is_dead());
        assert_eq!(ids.live_count(), 0);
    }

    #[test]
    fn test_ids_not_reused_after_collection() {
        let mut ids = NodeIds::new();
        let first = {
            let node = Object::new();
            ids.get_or_assign(&node)
        };
        ids.sweep();
        let node = Object::new();
        let second = ids.get_or_assign(&node);
        assert!(second > first);
    }

    #[test]
    fn test_get_does_not_assign() {
        let mut ids = NodeIds::new();
        let node = Object::new();
        assert_eq!(ids.get(&node), None);
        let id = ids.get_or_assign(&node);
        assert_eq!(ids.get(&node), Some(id));
    }
}
