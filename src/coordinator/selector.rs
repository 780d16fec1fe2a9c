//! Replication target selection
//!
//! Ranks eligible nodes by score and picks at most K of them. Every
//! selection cycle produces a new epoch, even if membership is unchanged.

use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::registry::{NodeId, NodeInfo, NodeStatus};

/// Selection policy
#[derive(Debug, Clone)]
pub struct SelectionConfig {
    /// Maximum number of targets (K)
    pub max_targets: usize,
    /// Nodes scoring below this are never selected
    pub min_score: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_targets: 3,
            min_score: 0.2,
        }
    }
}

/// Ordered set of selected nodes for one epoch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetSet {
    pub epoch: u64,
    pub members: Vec<NodeId>,
}

impl TargetSet {
    /// Create a target set
    pub fn new(epoch: u64, members: Vec<NodeId>) -> Self {
        Self { epoch, members }
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.members.iter().any(|m| m == node_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Membership changes relative to `previous`
    pub fn diff(&self, previous: &TargetSet) -> TargetSetDiff {
        let before: HashSet<&str> = previous.members.iter().map(String::as_str).collect();
        let after: HashSet<&str> = self.members.iter().map(String::as_str).collect();

        TargetSetDiff {
            added: self
                .members
                .iter()
                .filter(|m| !before.contains(m.as_str()))
                .cloned()
                .collect(),
            removed: previous
                .members
                .iter()
                .filter(|m| !after.contains(m.as_str()))
                .cloned()
                .collect(),
            retained: self
                .members
                .iter()
                .filter(|m| before.contains(m.as_str()))
                .cloned()
                .collect(),
        }
    }
}

/// Symmetric difference between two target sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSetDiff {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub retained: Vec<NodeId>,
}

impl TargetSetDiff {
    /// True if membership did not change
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Rank nodes and take the best `k`
///
/// Only active nodes with a score of at least `min_score` qualify. Ties are
/// broken by node identifier so the result is fully deterministic.
pub fn select_targets(nodes: &[NodeInfo], k: usize, min_score: f64, epoch: u64) -> TargetSet {
    let mut candidates: Vec<(&str, f64)> = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Active)
        .filter_map(|n| n.score.map(|s| (n.node_id.as_str(), s)))
        .filter(|(_, score)| *score >= min_score)
        .collect();

    candidates.sort_by(|a, b| match b.1.total_cmp(&a.1) {
        CmpOrdering::Equal => a.0.cmp(b.0),
        other => other,
    });

    TargetSet::new(
        epoch,
        candidates
            .into_iter()
            .take(k)
            .map(|(id, _)| id.to_string())
            .collect(),
    )
}

/// Target selector with a monotonically increasing epoch
pub struct TargetSelector {
    config: SelectionConfig,
    epoch: AtomicU64,
}

impl TargetSelector {
    /// Create a selector; the first selection is epoch 1
    pub fn new(config: SelectionConfig) -> Self {
        Self {
            config,
            epoch: AtomicU64::new(0),
        }
    }

    /// Select targets for the next epoch
    pub fn select(&self, nodes: &[NodeInfo]) -> TargetSet {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let set = select_targets(nodes, self.config.max_targets, self.config.min_score, epoch);

        if set.is_empty() {
            debug!("Epoch {}: no eligible replication targets", epoch);
        } else {
            info!("Epoch {}: selected targets {:?}", epoch, set.members);
        }
        set
    }

    /// Last epoch handed out
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }
}
