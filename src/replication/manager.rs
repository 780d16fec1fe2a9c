//! Replication manager
//!
//! Pushes the current block to every member of the latest target set,
//! fanning out over a bounded number of concurrent pushes. Each target
//! retries independently with exponential backoff. Target state is owned
//! here and nowhere else.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::target::{ReplicationTarget, RetryPolicy, SyncState, TargetStatus};
use super::transport::{BlockTransport, PushAck, PushRequest};
use crate::clock::Clock;
use crate::coordinator::{NodeId, TargetSet, TargetSetDiff};
use crate::error::{PulseError, Result};
use crate::metrics::standard;
use crate::storage::{BlockStore, SharedBlock};

/// Configuration for the replication manager
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Upper bound on simultaneous outbound pushes
    pub max_concurrent_pushes: usize,
    /// Timeout applied to each individual push
    pub push_timeout: Duration,
    /// Backoff and attempt limits
    pub retry: RetryPolicy,
    /// How often the background driver looks for due retries
    pub retry_poll_interval: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pushes: 8,
            push_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            retry_poll_interval: Duration::from_millis(50),
        }
    }
}

struct InFlightPush {
    generation: u64,
    abort: Option<AbortHandle>,
}

struct TargetEntry {
    target: ReplicationTarget,
    in_flight: Option<InFlightPush>,
}

impl TargetEntry {
    /// Cancel any outstanding push; returns true if one was outstanding
    fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(push) => {
                if let Some(abort) = push.abort {
                    abort.abort();
                }
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct ReplicationState {
    target_set: TargetSet,
    targets: HashMap<NodeId, TargetEntry>,
    next_generation: u64,
    in_flight: usize,
    shut_down: bool,
}

/// Drives the block to the current target set
pub struct ReplicationManager {
    config: ReplicationConfig,
    store: Arc<BlockStore>,
    transport: Arc<dyn BlockTransport>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    state: Mutex<ReplicationState>,
    in_flight_tx: watch::Sender<usize>,
}

impl ReplicationManager {
    /// Create a replication manager
    pub fn new(
        config: ReplicationConfig,
        store: Arc<BlockStore>,
        transport: Arc<dyn BlockTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (in_flight_tx, _) = watch::channel(0);
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_pushes.max(1))),
            config,
            store,
            transport,
            clock,
            state: Mutex::new(ReplicationState::default()),
            in_flight_tx,
        }
    }

    /// Reconcile against a newly selected target set
    ///
    /// Removed targets are dropped and their pushes canceled, added targets
    /// start `Pending`, retained targets keep their state except that
    /// `Failed` ones get a fresh round of attempts.
    pub fn apply_target_set(self: &Arc<Self>, set: TargetSet) -> Result<TargetSetDiff> {
        let now = self.clock.now();
        let diff = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(PulseError::ShutdownInProgress);
            }
            if set.epoch <= state.target_set.epoch {
                return Err(PulseError::StaleEpoch {
                    current: state.target_set.epoch,
                    received: set.epoch,
                });
            }

            let diff = set.diff(&state.target_set);

            for node_id in &diff.removed {
                if let Some(mut entry) = state.targets.remove(node_id) {
                    if entry.cancel() {
                        state.in_flight -= 1;
                        debug!("Canceled outstanding push to removed target {}", node_id);
                    }
                }
            }

            for node_id in &diff.added {
                state
                    .targets
                    .insert(node_id.clone(), TargetEntry {
                        target: ReplicationTarget::new(node_id.clone(), now),
                        in_flight: None,
                    });
            }

            for node_id in &diff.retained {
                if let Some(entry) = state.targets.get_mut(node_id) {
                    if entry.target.rearm(now) {
                        info!("Re-arming failed target {}", node_id);
                    }
                }
            }

            if !diff.is_unchanged() {
                info!(
                    "Epoch {}: targets +{:?} -{:?}",
                    set.epoch, diff.added, diff.removed
                );
            }
            state.target_set = set;
            self.in_flight_tx.send_replace(state.in_flight);
            diff
        };

        self.dispatch_due()?;
        Ok(diff)
    }

    /// React to a block version change
    ///
    /// In-sync targets become stale and are pushed immediately. Targets
    /// already pending or retrying pick up the new version on their next
    /// attempt.
    pub fn on_block_updated(self: &Arc<Self>, version: u64) -> Result<usize> {
        let now = self.clock.now();
        let mut stale = 0;
        {
            let mut state = self.state.lock();
            for entry in state.targets.values_mut() {
                if entry.target.mark_stale(version, now) {
                    stale += 1;
                }
            }
        }
        if stale > 0 {
            debug!("Block version {}: {} targets now stale", version, stale);
        }
        self.dispatch_due()
    }

    /// Start pushes for every due target that has none outstanding
    pub fn dispatch_due(self: &Arc<Self>) -> Result<usize> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| PulseError::ResourceExhausted {
            reason: format!("no runtime to schedule pushes on: {}", e),
        })?;
        let now = self.clock.now();

        let launches = {
            let mut guard = self.state.lock();
            if guard.shut_down {
                return Ok(0);
            }
            let state = &mut *guard;
            let mut launches = Vec::new();
            for (node_id, entry) in state.targets.iter_mut() {
                if entry.in_flight.is_none() && entry.target.is_due(now) {
                    state.next_generation += 1;
                    entry.in_flight = Some(InFlightPush {
                        generation: state.next_generation,
                        abort: None,
                    });
                    state.in_flight += 1;
                    launches.push((node_id.clone(), state.next_generation));
                }
            }
            self.in_flight_tx.send_replace(state.in_flight);
            launches
        };

        for (node_id, generation) in &launches {
            let manager = Arc::clone(self);
            let id = node_id.clone();
            let generation = *generation;
            let handle = runtime.spawn(async move { manager.run_push(id, generation).await });

            let mut state = self.state.lock();
            if let Some(push) = state
                .targets
                .get_mut(node_id)
                .and_then(|entry| entry.in_flight.as_mut())
                .filter(|push| push.generation == generation)
            {
                push.abort = Some(handle.abort_handle());
            }
        }

        Ok(launches.len())
    }

    async fn run_push(self: Arc<Self>, node_id: NodeId, generation: u64) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.complete(&node_id, generation, Err(PulseError::ShutdownInProgress));
                return;
            }
        };

        // Content is read once the push can actually go out, never earlier
        let block = self.store.current();
        let request = PushRequest {
            node_id: node_id.clone(),
            content: block.content.clone(),
            version: block.version,
            checksum: block.checksum,
        };

        let started = Instant::now();
        let result = match timeout(self.config.push_timeout, self.transport.push(request)).await {
            Ok(result) => result,
            Err(_) => Err(PulseError::PushTimeout {
                node_id: node_id.clone(),
                timeout: self.config.push_timeout,
            }),
        };
        drop(permit);
        standard::PUSH_DURATION.observe(started.elapsed().as_secs_f64());

        let verified = result.and_then(|ack| self.verify_ack(&node_id, &block, ack));
        self.complete(&node_id, generation, verified);
    }

    fn verify_ack(&self, node_id: &str, sent: &SharedBlock, ack: PushAck) -> Result<u64> {
        if ack.version != sent.version {
            return Err(PulseError::VersionMismatch {
                node_id: node_id.to_string(),
                sent: sent.version,
                acked: ack.version,
            });
        }
        if ack.checksum != sent.checksum {
            return Err(PulseError::ChecksumMismatch {
                node_id: node_id.to_string(),
                expected: sent.checksum,
                actual: ack.checksum,
            });
        }
        Ok(ack.version)
    }

    /// Apply a push outcome if the push is still the target's current one
    fn complete(self: &Arc<Self>, node_id: &str, generation: u64, result: Result<u64>) {
        let now = self.clock.now();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let shut_down = state.shut_down;

            let Some(entry) = state.targets.get_mut(node_id) else {
                debug!("Discarding push response for removed target {}", node_id);
                return;
            };
            if entry.in_flight.as_ref().map(|push| push.generation) != Some(generation) {
                debug!("Discarding superseded push response from {}", node_id);
                return;
            }
            entry.in_flight = None;
            state.in_flight -= 1;

            match result {
                Ok(acked) => {
                    let current = self.store.version();
                    entry.target.record_ack(acked, current, now);
                    standard::PUSHES_SUCCEEDED.inc();
                    standard::NODE_PUSHES_SUCCEEDED.inc(node_id);
                    if entry.target.sync_state == SyncState::InSync {
                        debug!("{} in sync at version {}", node_id, acked);
                    } else {
                        debug!("{} acked version {}, source at {}", node_id, acked, current);
                    }
                }
                // Only our own shutdown abandons a push; every other error backs off
                Err(e) if shut_down => {
                    debug!("Push to {} abandoned at shutdown: {}", node_id, e);
                }
                Err(e) => {
                    standard::PUSHES_FAILED.inc();
                    if !e.is_retryable() {
                        error!("Unexpected error pushing to {}: {}", node_id, e);
                    }
                    let failures = entry.target.consecutive_failures + 1;
                    if entry.target.record_failure(e.to_string(), &self.config.retry, now) {
                        standard::RETRIES_EXHAUSTED.inc();
                        warn!("Target {} failed after {} attempts: {}", node_id, failures, e);
                    } else {
                        warn!(
                            "Push to {} failed (attempt {}): {}, retrying in {:?}",
                            node_id,
                            failures,
                            e,
                            self.config.retry.backoff(failures)
                        );
                    }
                }
            }
            self.in_flight_tx.send_replace(state.in_flight);
        }

        if let Err(e) = self.dispatch_due() {
            error!("Cannot schedule follow-up pushes: {}", e);
        }
    }

    /// Background driver: retries due targets and follows block updates
    /// until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut versions = self.store.subscribe();
        let mut ticker = tokio::time::interval(self.config.retry_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = shutdown.recv() => break Ok(()),
                changed = versions.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    let version = *versions.borrow_and_update();
                    if let Err(e) = self.on_block_updated(version) {
                        break Err(e);
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch_due() {
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown();
        result
    }

    /// Resolves once no push is outstanding
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight_tx.subscribe();
        let _ = rx.wait_for(|in_flight| *in_flight == 0).await;
    }

    /// Cancel every outstanding push and refuse further work
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        let mut canceled = 0;
        for entry in state.targets.values_mut() {
            if entry.cancel() {
                canceled += 1;
            }
        }
        state.in_flight = 0;
        self.in_flight_tx.send_replace(0);
        self.permits.close();
        info!("Replication manager shut down, {} pushes canceled", canceled);
    }

    /// Status of every target, ordered by node
    pub fn targets(&self) -> Vec<TargetStatus> {
        let state = self.state.lock();
        let mut targets: Vec<TargetStatus> = state
            .targets
            .values()
            .map(|entry| entry.target.status())
            .collect();
        targets.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        targets
    }

    /// Status of one target
    pub fn target(&self, node_id: &str) -> Option<TargetStatus> {
        self.state
            .lock()
            .targets
            .get(node_id)
            .map(|entry| entry.target.status())
    }

    /// Most recently applied target set
    pub fn target_set(&self) -> TargetSet {
        self.state.lock().target_set.clone()
    }

    /// Number of outstanding pushes
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }
}
