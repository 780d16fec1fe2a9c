//! Node registry
//!
//! Authoritative table of known nodes, their heartbeat history, and
//! liveness status. Heartbeats lock a single node record; the map lock is
//! only held long enough to find, insert, or remove an entry.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PulseError, Result};

/// Opaque node identifier
pub type NodeId = String;

/// Liveness status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Heartbeating within the suspect timeout
    Active,
    /// Missed heartbeats for at least the suspect timeout
    Suspected,
    /// Missed heartbeats for at least the dead timeout; awaiting eviction
    Dead,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Suspected => write!(f, "suspected"),
            NodeStatus::Dead => write!(f, "dead"),
        }
    }
}

/// A single heartbeat observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatSample {
    /// When the heartbeat was received
    pub timestamp: Instant,
    /// Reported health metric in `[0, 1]`, higher is healthier
    pub metric: f64,
}

impl HeartbeatSample {
    /// Create a sample
    pub fn new(timestamp: Instant, metric: f64) -> Self {
        Self { timestamp, metric }
    }
}

/// Fixed-capacity, time-ordered ring of recent heartbeat samples
#[derive(Debug, Clone)]
pub struct HeartbeatHistory {
    samples: VecDeque<HeartbeatSample>,
    capacity: usize,
}

impl HeartbeatHistory {
    /// Create an empty history holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a sample at its time-ordered position, dropping the oldest
    /// sample once the ring is full
    pub fn push(&mut self, sample: HeartbeatSample) {
        let pos = self
            .samples
            .iter()
            .rposition(|s| s.timestamp <= sample.timestamp)
            .map_or(0, |i| i + 1);
        self.samples.insert(pos, sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &HeartbeatSample> {
        self.samples.iter()
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&HeartbeatSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Registry view of a node
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Node identifier
    pub node_id: NodeId,
    /// Current liveness status
    pub status: NodeStatus,
    /// Newest heartbeat timestamp seen
    pub last_heartbeat: Instant,
    /// First heartbeat of this incarnation
    pub first_seen: Instant,
    /// Recent heartbeat samples
    pub history: HeartbeatHistory,
    /// Last computed score; absent while dead
    pub score: Option<f64>,
    /// When the node was marked suspected
    pub suspected_since: Option<Instant>,
    /// When the node was marked dead
    pub dead_since: Option<Instant>,
    /// Registry-unique incarnation number
    pub incarnation: u64,
}

impl NodeInfo {
    fn fresh(node_id: NodeId, sample: HeartbeatSample, capacity: usize, incarnation: u64) -> Self {
        let mut history = HeartbeatHistory::new(capacity);
        history.push(sample);
        Self {
            node_id,
            status: NodeStatus::Active,
            last_heartbeat: sample.timestamp,
            first_seen: sample.timestamp,
            history,
            score: None,
            suspected_since: None,
            dead_since: None,
            incarnation,
        }
    }

    fn record(&mut self, sample: HeartbeatSample) {
        self.history.push(sample);
        if sample.timestamp > self.last_heartbeat {
            self.last_heartbeat = sample.timestamp;
        }
    }
}

/// What a heartbeat did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// First contact, node created as active
    Registered,
    /// Active node refreshed
    Refreshed,
    /// Suspected node returned to active
    Recovered,
    /// Dead node replaced by a fresh incarnation
    Reincarnated,
}

/// Result of an accepted heartbeat
#[derive(Debug, Clone)]
pub struct HeartbeatReceipt {
    pub outcome: HeartbeatOutcome,
    /// Node state right after the heartbeat was applied
    pub node: NodeInfo,
}

struct NodeSlot {
    info: NodeInfo,
    evicted: bool,
}

type SlotRef = Arc<Mutex<NodeSlot>>;

/// Registry of nodes keyed by identifier
pub struct NodeRegistry {
    nodes: RwLock<HashMap<NodeId, SlotRef>>,
    history_capacity: usize,
    next_incarnation: AtomicU64,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new(history_capacity: usize) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            history_capacity: history_capacity.max(1),
            next_incarnation: AtomicU64::new(1),
        }
    }

    /// Record a heartbeat, creating the node on first contact
    pub fn report_heartbeat(&self, node_id: &str, sample: HeartbeatSample) -> Result<HeartbeatReceipt> {
        validate_heartbeat(node_id, &sample)?;

        loop {
            let existing = self.nodes.read().get(node_id).cloned();
            let slot = match existing {
                Some(slot) => slot,
                None => {
                    let mut nodes = self.nodes.write();
                    if let Some(slot) = nodes.get(node_id).cloned() {
                        slot
                    } else {
                        let info = NodeInfo::fresh(
                            node_id.to_string(),
                            sample,
                            self.history_capacity,
                            self.allocate_incarnation(),
                        );
                        nodes.insert(
                            node_id.to_string(),
                            Arc::new(Mutex::new(NodeSlot {
                                info: info.clone(),
                                evicted: false,
                            })),
                        );
                        info!("Registered node {} (incarnation {})", node_id, info.incarnation);
                        return Ok(HeartbeatReceipt {
                            outcome: HeartbeatOutcome::Registered,
                            node: info,
                        });
                    }
                }
            };

            let mut guard = slot.lock();
            if guard.evicted {
                // Lost a race with eviction; the next lookup registers it anew
                continue;
            }

            let outcome = match guard.info.status {
                NodeStatus::Dead => {
                    guard.info = NodeInfo::fresh(
                        node_id.to_string(),
                        sample,
                        self.history_capacity,
                        self.allocate_incarnation(),
                    );
                    info!(
                        "Dead node {} resumed heartbeating, starting incarnation {}",
                        node_id, guard.info.incarnation
                    );
                    HeartbeatOutcome::Reincarnated
                }
                NodeStatus::Suspected => {
                    guard.info.record(sample);
                    guard.info.status = NodeStatus::Active;
                    guard.info.suspected_since = None;
                    info!("Node {} recovered from suspected status", node_id);
                    HeartbeatOutcome::Recovered
                }
                NodeStatus::Active => {
                    guard.info.record(sample);
                    debug!("Heartbeat from node {}, metric={:.3}", node_id, sample.metric);
                    HeartbeatOutcome::Refreshed
                }
            };

            return Ok(HeartbeatReceipt {
                outcome,
                node: guard.info.clone(),
            });
        }
    }

    /// Snapshot of all nodes, ordered by identifier
    ///
    /// Each node is copied under its own lock, so a concurrent heartbeat
    /// lands either entirely before or entirely after its copy.
    pub fn list_nodes(&self) -> Vec<NodeInfo> {
        let slots: Vec<SlotRef> = self.nodes.read().values().cloned().collect();
        let mut nodes: Vec<NodeInfo> = slots
            .iter()
            .filter_map(|slot| {
                let guard = slot.lock();
                (!guard.evicted).then(|| guard.info.clone())
            })
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    /// Copy of a single node
    pub fn node(&self, node_id: &str) -> Option<NodeInfo> {
        let slot = self.nodes.read().get(node_id).cloned()?;
        let guard = slot.lock();
        (!guard.evicted).then(|| guard.info.clone())
    }

    /// Number of nodes, including dead ones awaiting eviction
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Number of active nodes
    pub fn active_count(&self) -> usize {
        self.list_nodes()
            .iter()
            .filter(|n| n.status == NodeStatus::Active)
            .count()
    }

    /// Store a recomputed score for a live incarnation
    ///
    /// Returns false if the node is gone, dead, or was reincarnated since
    /// the score was computed.
    pub fn record_score(&self, node_id: &str, incarnation: u64, score: f64) -> bool {
        let Some(slot) = self.nodes.read().get(node_id).cloned() else {
            return false;
        };
        let mut guard = slot.lock();
        if guard.evicted
            || guard.info.incarnation != incarnation
            || guard.info.status == NodeStatus::Dead
        {
            return false;
        }
        guard.info.score = Some(score.clamp(0.0, 1.0));
        true
    }

    /// Transition an active node to suspected
    ///
    /// `observed` is the `last_heartbeat` the caller based its decision on;
    /// a newer heartbeat refuses the transition.
    pub fn mark_suspected(&self, node_id: &str, observed: Instant, at: Instant) -> Result<()> {
        let slot = self.slot(node_id)?;
        let mut guard = slot.lock();
        check_observation(&guard, node_id, observed)?;

        match guard.info.status {
            NodeStatus::Active => {
                guard.info.status = NodeStatus::Suspected;
                guard.info.suspected_since = Some(at);
                warn!("Node {} marked as suspected", node_id);
                Ok(())
            }
            NodeStatus::Suspected => Ok(()),
            NodeStatus::Dead => Err(PulseError::StaleTransition {
                node_id: node_id.to_string(),
            }),
        }
    }

    /// Transition a node to dead, clearing its score
    pub fn mark_dead(&self, node_id: &str, observed: Instant, at: Instant) -> Result<()> {
        let slot = self.slot(node_id)?;
        let mut guard = slot.lock();
        check_observation(&guard, node_id, observed)?;

        if guard.info.status != NodeStatus::Dead {
            guard.info.status = NodeStatus::Dead;
            guard.info.dead_since = Some(at);
            guard.info.score = None;
            warn!("Node {} marked as dead", node_id);
        }
        Ok(())
    }

    /// Remove a dead node from the registry
    pub fn evict(&self, node_id: &str, incarnation: u64) -> Result<NodeInfo> {
        let mut nodes = self.nodes.write();
        let slot = nodes.get(node_id).cloned().ok_or_else(|| PulseError::NodeNotFound {
            node_id: node_id.to_string(),
        })?;

        let mut guard = slot.lock();
        if guard.info.status != NodeStatus::Dead || guard.info.incarnation != incarnation {
            return Err(PulseError::StaleTransition {
                node_id: node_id.to_string(),
            });
        }
        guard.evicted = true;
        nodes.remove(node_id);
        info!("Node {} evicted from registry", node_id);
        Ok(guard.info.clone())
    }

    fn slot(&self, node_id: &str) -> Result<SlotRef> {
        self.nodes
            .read()
            .get(node_id)
            .cloned()
            .ok_or_else(|| PulseError::NodeNotFound {
                node_id: node_id.to_string(),
            })
    }

    fn allocate_incarnation(&self) -> u64 {
        self.next_incarnation.fetch_add(1, Ordering::Relaxed)
    }
}

fn check_observation(slot: &NodeSlot, node_id: &str, observed: Instant) -> Result<()> {
    if slot.evicted {
        return Err(PulseError::NodeNotFound {
            node_id: node_id.to_string(),
        });
    }
    if slot.info.last_heartbeat != observed {
        return Err(PulseError::StaleTransition {
            node_id: node_id.to_string(),
        });
    }
    Ok(())
}

fn validate_heartbeat(node_id: &str, sample: &HeartbeatSample) -> Result<()> {
    let reject = |reason: &str| {
        Err(PulseError::MalformedHeartbeat {
            node_id: node_id.to_string(),
            reason: reason.to_string(),
        })
    };

    if node_id.trim().is_empty() {
        return reject("empty node id");
    }
    if !sample.metric.is_finite() {
        return reject("metric is not finite");
    }
    if !(0.0..=1.0).contains(&sample.metric) {
        return reject("metric outside [0, 1]");
    }
    Ok(())
}
