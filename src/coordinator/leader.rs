//! Coordinator loop
//!
//! Ingests heartbeats continuously and, once per epoch, runs failure
//! detection, rescoring, and target selection before handing the new
//! target set to the replication manager.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::failure_detector::{FailureDetector, SweepReport};
use super::registry::{HeartbeatSample, NodeId, NodeRegistry, NodeStatus};
use super::scoring::ScoringEngine;
use super::selector::{TargetSelector, TargetSet, TargetSetDiff};
use crate::clock::{Clock, SystemClock};
use crate::config::CoordinatorConfig;
use crate::error::{PulseError, Result};
use crate::metrics::standard;
use crate::replication::{BlockTransport, ReplicationManager, TargetStatus};
use crate::runtime::ShutdownSignal;
use crate::storage::{BlockStore, SharedBlock};

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoordinatorState {
    /// Constructed; epochs only run when ticked by hand
    Idle,
    /// Background epoch loop and replication driver running
    Running,
    /// Shutting down
    ShuttingDown,
}

/// Outcome of one epoch cycle
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: u64,
    pub sweep: SweepReport,
    pub target_set: TargetSet,
    pub diff: TargetSetDiff,
}

/// Observability view of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatusView {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub score: Option<f64>,
    pub incarnation: u64,
    pub samples: usize,
    pub silence_ms: u64,
}

/// Full coordinator status for external rendering
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    pub epoch: u64,
    pub block_version: u64,
    pub target_set: TargetSet,
    pub nodes: Vec<NodeStatusView>,
    pub targets: Vec<TargetStatus>,
}

/// Heartbeats delayed longer than this are left out of the latency histogram
const MAX_HEARTBEAT_LATENCY: Duration = Duration::from_secs(10);

/// Main coordinator
pub struct Coordinator {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<NodeRegistry>,
    scoring: ScoringEngine,
    detector: FailureDetector,
    selector: TargetSelector,
    store: Arc<BlockStore>,
    replication: Arc<ReplicationManager>,
    signal: ShutdownSignal,
    state: RwLock<CoordinatorState>,
    /// Serializes epochs; holds when the previous one ran
    last_epoch: Mutex<Option<Instant>>,
}

impl Coordinator {
    /// Create a coordinator with an injected clock
    pub fn new(
        config: CoordinatorConfig,
        transport: Arc<dyn BlockTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(BlockStore::new());
        let replication = Arc::new(ReplicationManager::new(
            config.replication.clone(),
            store.clone(),
            transport,
            clock.clone(),
        ));

        Ok(Self {
            registry: Arc::new(NodeRegistry::new(config.history_capacity)),
            scoring: ScoringEngine::new(config.scoring.clone()),
            detector: FailureDetector::new(config.liveness.clone()),
            selector: TargetSelector::new(config.selection.clone()),
            store,
            replication,
            clock,
            signal: ShutdownSignal::new(),
            state: RwLock::new(CoordinatorState::Idle),
            last_epoch: Mutex::new(None),
            config,
        })
    }

    /// Create a coordinator on the system clock
    pub fn with_system_clock(config: CoordinatorConfig, transport: Arc<dyn BlockTransport>) -> Result<Self> {
        Self::new(config, transport, Arc::new(SystemClock))
    }

    /// Record a heartbeat and refresh the node's score
    pub fn report_heartbeat(&self, node_id: &str, sample: HeartbeatSample) -> Result<NodeStatus> {
        let sent_at = sample.timestamp;
        let receipt = match self.registry.report_heartbeat(node_id, sample) {
            Ok(receipt) => receipt,
            Err(e) => {
                standard::HEARTBEATS_REJECTED.inc();
                debug!("Rejected heartbeat: {}", e);
                return Err(e);
            }
        };
        standard::HEARTBEATS_RECEIVED.inc();

        let now = self.clock.now();
        let latency = now.saturating_duration_since(sent_at);
        if latency < MAX_HEARTBEAT_LATENCY {
            standard::HEARTBEAT_LATENCY.observe(latency.as_secs_f64());
        }

        let score = self.scoring.score(&receipt.node, now);
        self.registry
            .record_score(node_id, receipt.node.incarnation, score);
        Ok(receipt.node.status)
    }

    /// Record a heartbeat stamped with the coordinator clock
    pub fn heartbeat(&self, node_id: &str, metric: f64) -> Result<NodeStatus> {
        self.report_heartbeat(node_id, HeartbeatSample::new(self.clock.now(), metric))
    }

    /// Replace the shared block; returns the new version
    ///
    /// Once the store accepts the content the update has happened. Failing
    /// to schedule the immediate pushes is logged and left to the
    /// replication driver, which follows every version change.
    pub fn update_block(&self, content: impl Into<bytes::Bytes>) -> Result<u64> {
        if self.state() == CoordinatorState::ShuttingDown {
            return Err(PulseError::ShutdownInProgress);
        }
        let version = self.store.update(content);
        standard::BLOCK_VERSION.set(version as i64);
        if let Err(e) = self.replication.on_block_updated(version) {
            warn!("Block version {} not pushed yet: {}", version, e);
        }
        info!("Shared block updated to version {}", version);
        Ok(version)
    }

    /// Run one epoch: sweep, rescore, select, reconcile
    pub fn tick(&self) -> Result<EpochReport> {
        if self.state() == CoordinatorState::ShuttingDown {
            return Err(PulseError::ShutdownInProgress);
        }
        let mut last_epoch = self.last_epoch.lock();
        let now = self.clock.now();

        let sweep = self.detector.sweep(&self.registry, now);

        let mut nodes = self.registry.list_nodes();
        for node in nodes.iter_mut() {
            if node.status == NodeStatus::Dead {
                node.score = None;
                continue;
            }
            let score = self.scoring.score(node, now);
            self.registry
                .record_score(&node.node_id, node.incarnation, score);
            node.score = Some(score);
        }

        let target_set = self.selector.select(&nodes);
        let diff = self.replication.apply_target_set(target_set.clone())?;

        if let Some(previous) = last_epoch.replace(now) {
            standard::EPOCH_INTERVAL.observe(now.saturating_duration_since(previous).as_secs_f64());
        }
        standard::EPOCHS_RUN.inc();
        standard::CURRENT_EPOCH.set(target_set.epoch as i64);
        standard::TARGET_SET_SIZE.set(target_set.len() as i64);
        standard::ACTIVE_NODES.set(
            nodes
                .iter()
                .filter(|n| n.status == NodeStatus::Active)
                .count() as i64,
        );

        Ok(EpochReport {
            epoch: target_set.epoch,
            sweep,
            target_set,
            diff,
        })
    }

    /// Start the epoch loop and replication driver
    pub fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        {
            let mut state = self.state.write();
            match *state {
                CoordinatorState::Idle => *state = CoordinatorState::Running,
                CoordinatorState::Running => {
                    return Err(PulseError::Internal {
                        message: "coordinator already running".into(),
                    })
                }
                CoordinatorState::ShuttingDown => return Err(PulseError::ShutdownInProgress),
            }
        }
        info!(
            "Coordinator starting: epoch every {:?}, K={}",
            self.config.epoch_interval, self.config.selection.max_targets
        );

        let epoch_loop = {
            let coordinator = Arc::clone(self);
            let mut shutdown = self.signal.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(coordinator.config.epoch_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                while !coordinator.signal.is_triggered() {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            match coordinator.tick() {
                                Ok(report) => debug!(
                                    "Epoch {} complete: {} targets",
                                    report.epoch,
                                    report.target_set.len()
                                ),
                                Err(PulseError::ShutdownInProgress) => break,
                                Err(e) if e.is_fatal() => {
                                    error!("Fatal error in epoch loop: {}", e);
                                    coordinator.shutdown();
                                    break;
                                }
                                Err(e) => warn!("Epoch failed: {}", e),
                            }
                        }
                    }
                }
                debug!("Epoch loop stopped");
            })
        };

        let driver = {
            let coordinator = Arc::clone(self);
            let shutdown = self.signal.subscribe();
            let replication = self.replication.clone();
            tokio::spawn(async move {
                if coordinator.signal.is_triggered() {
                    return;
                }
                if let Err(e) = replication.run(shutdown).await {
                    error!("Replication driver stopped: {}", e);
                    if e.is_fatal() {
                        coordinator.shutdown();
                    }
                }
            })
        };

        Ok(vec![epoch_loop, driver])
    }

    /// Stop background work and cancel outstanding pushes
    pub fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if *state == CoordinatorState::ShuttingDown {
                return;
            }
            *state = CoordinatorState::ShuttingDown;
        }
        info!("Coordinator shutting down");
        self.signal.shutdown();
        self.replication.shutdown();
    }

    /// Liveness and score of every node
    pub fn node_statuses(&self) -> Vec<NodeStatusView> {
        let now: Instant = self.clock.now();
        self.registry
            .list_nodes()
            .into_iter()
            .map(|node| NodeStatusView {
                silence_ms: now.saturating_duration_since(node.last_heartbeat).as_millis() as u64,
                samples: node.history.len(),
                node_id: node.node_id,
                status: node.status,
                score: node.score,
                incarnation: node.incarnation,
            })
            .collect()
    }

    /// Sync state of every replication target
    pub fn target_statuses(&self) -> Vec<TargetStatus> {
        self.replication.targets()
    }

    /// Full status snapshot
    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            state: self.state(),
            epoch: self.selector.epoch(),
            block_version: self.store.version(),
            target_set: self.replication.target_set(),
            nodes: self.node_statuses(),
            targets: self.target_statuses(),
        }
    }

    /// Current block snapshot
    pub fn block(&self) -> Arc<SharedBlock> {
        self.store.current()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn replication(&self) -> &Arc<ReplicationManager> {
        &self.replication
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Shutdown signal shared with background tasks
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }
}
