//! Stats Collector: count nodes by kind in one traversal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::classify::classify;
use crate::runtime::{Object, Value};
use crate::scene::preorder;

/// Per-kind node counts plus filter and mask tallies.
///
/// Serializes flat: `{"total": 3, "filters": 0, "masks": 1, "container": 2, "sprite": 1}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsAggregate {
    pub total: u64,
    pub filters: u64,
    pub masks: u64,
    #[serde(flatten)]
    pub by_type: BTreeMap<String, u64>,
}

impl StatsAggregate {
    pub fn count_of(&self, key: &str) -> u64 {
        self.by_type.get(key).copied().unwrap_or(0)
    }
}

fn filter_count(node: &Object) -> u64 {
    match node.get("filters") {
        Value::Array(filters) => filters.len() as u64,
        Value::Object(_) => 1,
        _ => 0,
    }
}

/// Count every node the tooling may see under `root`, applying the same
/// ignore flags as the Scene Walker.
pub fn collect_stats(root: &Object) -> StatsAggregate {
    let mut stats = StatsAggregate::default();
    for visit in preorder(root) {
        let node = &visit.node;
        stats.total += 1;
        *stats.by_type.entry(classify(node).stats_key()).or_insert(0) += 1;
        stats.filters += filter_count(node);
        if node.get("mask").truthy() {
            stats.masks += 1;
        }
    }
    stats
}
