//! Time-threshold failure detection
//!
//! One sweep per epoch: ages out nodes whose heartbeats stopped and evicts
//! nodes that stayed dead past the grace period. Only liveness state is
//! written; scores and target sets are left alone.

use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::registry::{NodeId, NodeRegistry, NodeStatus};
use crate::error::PulseError;

/// Liveness thresholds
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Silence after which an active node is suspected
    pub suspect_timeout: Duration,
    /// Cumulative silence after which a node is dead
    pub dead_timeout: Duration,
    /// Time a node stays dead before it is evicted
    pub gc_grace: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            suspect_timeout: Duration::from_secs(15),
            dead_timeout: Duration::from_secs(30),
            gc_grace: Duration::from_secs(60),
        }
    }
}

/// Transitions issued by one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub suspected: Vec<NodeId>,
    pub dead: Vec<NodeId>,
    pub evicted: Vec<NodeId>,
    /// Transitions refused because a heartbeat landed mid-sweep
    pub superseded: Vec<NodeId>,
}

impl SweepReport {
    /// True if the sweep changed nothing
    pub fn is_quiet(&self) -> bool {
        self.suspected.is_empty() && self.dead.is_empty() && self.evicted.is_empty()
    }
}

/// Periodic liveness sweeper
#[derive(Debug, Clone)]
pub struct FailureDetector {
    config: LivenessConfig,
}

impl FailureDetector {
    /// Create a failure detector
    pub fn new(config: LivenessConfig) -> Self {
        Self { config }
    }

    /// Run one sweep against a registry snapshot taken at `now`
    pub fn sweep(&self, registry: &NodeRegistry, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for node in registry.list_nodes() {
            let silence = now.saturating_duration_since(node.last_heartbeat);

            let outcome = match node.status {
                NodeStatus::Dead => {
                    let dead_for = node
                        .dead_since
                        .map_or(Duration::ZERO, |since| now.saturating_duration_since(since));
                    if dead_for < self.config.gc_grace {
                        continue;
                    }
                    registry
                        .evict(&node.node_id, node.incarnation)
                        .map(|_| report.evicted.push(node.node_id.clone()))
                }
                _ if silence >= self.config.dead_timeout => registry
                    .mark_dead(&node.node_id, node.last_heartbeat, now)
                    .map(|_| report.dead.push(node.node_id.clone())),
                NodeStatus::Active if silence >= self.config.suspect_timeout => registry
                    .mark_suspected(&node.node_id, node.last_heartbeat, now)
                    .map(|_| report.suspected.push(node.node_id.clone())),
                _ => continue,
            };

            match outcome {
                Ok(()) => {}
                Err(PulseError::StaleTransition { .. }) | Err(PulseError::NodeNotFound { .. }) => {
                    debug!("Transition for {} superseded during sweep", node.node_id);
                    report.superseded.push(node.node_id.clone());
                }
                Err(e) => debug!("Sweep skipped {}: {}", node.node_id, e),
            }
        }

        if !report.is_quiet() {
            info!(
                "Liveness sweep: {} suspected, {} dead, {} evicted",
                report.suspected.len(),
                report.dead.len(),
                report.evicted.len()
            );
        }
        report
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::registry::HeartbeatSample;

    fn detector() -> FailureDetector {
        FailureDetector::new(LivenessConfig {
            suspect_timeout: Duration::from_secs(3),
            dead_timeout: Duration::from_secs(9),
            gc_grace: Duration::from_secs(5),
        })
    }

    #[test]
    fn test_active_to_suspected_to_dead() {
        let registry = NodeRegistry::new(8);
        let t0 = Instant::now();
        registry.report_heartbeat("n1", HeartbeatSample::new(t0, 0.9)).unwrap();
        let detector = detector();

        let report = detector.sweep(&registry, t0 + Duration::from_secs(2));
        assert!(report.is_quiet());

        let report = detector.sweep(&registry, t0 + Duration::from_secs(3));
        assert_eq!(report.suspected, vec!["n1".to_string()]);
        assert_eq!(registry.node("n1").unwrap().status, NodeStatus::Suspected);

        let report = detector.sweep(&registry, t0 + Duration::from_secs(9));
        assert_eq!(report.dead, vec!["n1".to_string()]);
        assert_eq!(registry.node("n1").unwrap().status, NodeStatus::Dead);
    }

    #[test]
    fn test_active_jumps_to_dead_after_long_silence() {
        let registry = NodeRegistry::new(8);
        let t0 = Instant::now();
        registry.report_heartbeat("n1", HeartbeatSample::new(t0, 0.9)).unwrap();

        let report = detector().sweep(&registry, t0 + Duration::from_secs(20));
        assert_eq!(report.dead, vec!["n1".to_string()]);
        assert!(report.suspected.is_empty());
    }

    #[test]
    fn test_dead_node_evicted_after_grace() {
        let registry = NodeRegistry::new(8);
        let t0 = Instant::now();
        registry.report_heartbeat("n1", HeartbeatSample::new(t0, 0.9)).unwrap();
        let detector = detector();

        detector.sweep(&registry, t0 + Duration::from_secs(10));
        let report = detector.sweep(&registry, t0 + Duration::from_secs(14));
        assert!(report.evicted.is_empty());
        assert!(registry.node("n1").is_some());

        let report = detector.sweep(&registry, t0 + Duration::from_secs(15));
        assert_eq!(report.evicted, vec!["n1".to_string()]);
        assert!(registry.node("n1").is_none());
    }

    #[test]
    fn test_heartbeating_node_untouched() {
        let registry = NodeRegistry::new(8);
        let t0 = Instant::now();
        let detector = detector();

        for secs in 0..10 {
            let now = t0 + Duration::from_secs(secs);
            registry.report_heartbeat("n1", HeartbeatSample::new(now, 0.9)).unwrap();
            assert!(detector.sweep(&registry, now).is_quiet());
        }
        assert_eq!(registry.node("n1").unwrap().status, NodeStatus::Active);
    }
}
