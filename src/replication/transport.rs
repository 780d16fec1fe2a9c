//! Push egress abstraction
//!
//! The replication manager only needs a request/response primitive that may
//! fail. It layers its own timeout and retry logic on top.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

use crate::coordinator::NodeId;
use crate::error::{PulseError, Result};
use crate::storage::block_store::checksum;

/// Block push sent to one target
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub node_id: NodeId,
    pub content: Bytes,
    pub version: u64,
    pub checksum: u32,
}

/// Target acknowledgment of an applied block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushAck {
    /// Version the target applied
    pub version: u64,
    /// Checksum the target computed over the bytes it received
    pub checksum: u32,
}

/// At-most-once block delivery to a node
#[async_trait]
pub trait BlockTransport: Send + Sync {
    async fn push(&self, request: PushRequest) -> Result<PushAck>;
}

/// Replica held by an in-memory node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub version: u64,
    pub content: Bytes,
}

/// In-process transport that stores each node's replicated copy
///
/// Supports unreachable nodes, random failure injection, and fixed latency
/// for simulations.
pub struct InMemoryTransport {
    replicas: RwLock<HashMap<NodeId, Replica>>,
    unreachable: RwLock<HashSet<NodeId>>,
    failure_rate: f64,
    latency: Duration,
}

impl InMemoryTransport {
    /// Reliable transport with no latency
    pub fn new() -> Self {
        Self::with_faults(0.0, Duration::ZERO)
    }

    /// Transport failing a `failure_rate` fraction of pushes after `latency`
    pub fn with_faults(failure_rate: f64, latency: Duration) -> Self {
        Self {
            replicas: RwLock::new(HashMap::new()),
            unreachable: RwLock::new(HashSet::new()),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
        }
    }

    /// Make pushes to a node fail until restored
    pub fn set_unreachable(&self, node_id: &str, unreachable: bool) {
        let mut set = self.unreachable.write();
        if unreachable {
            set.insert(node_id.to_string());
        } else {
            set.remove(node_id);
        }
    }

    /// Copy held by a node
    pub fn replica(&self, node_id: &str) -> Option<Replica> {
        self.replicas.read().get(node_id).cloned()
    }

    /// All replicas keyed by node
    pub fn replicas(&self) -> HashMap<NodeId, Replica> {
        self.replicas.read().clone()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockTransport for InMemoryTransport {
    async fn push(&self, request: PushRequest) -> Result<PushAck> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.unreachable.read().contains(&request.node_id) {
            return Err(PulseError::PushFailed {
                node_id: request.node_id,
                reason: "node unreachable".into(),
            });
        }

        let dropped = self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate);
        if dropped {
            return Err(PulseError::PushFailed {
                node_id: request.node_id,
                reason: "injected failure".into(),
            });
        }

        let received = checksum(&request.content);
        let mut replicas = self.replicas.write();
        let replica = replicas.entry(request.node_id.clone()).or_insert_with(|| Replica {
            version: 0,
            content: Bytes::new(),
        });
        if request.version >= replica.version {
            replica.version = request.version;
            replica.content = request.content;
        }
        debug!("{} applied block version {}", request.node_id, request.version);

        Ok(PushAck {
            version: request.version,
            checksum: received,
        })
    }
}
