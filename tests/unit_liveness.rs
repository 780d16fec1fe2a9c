//! Unit tests for heartbeat ingestion, scoring, and failure detection
//!
//! All time is driven through a manual clock.

use pulse_core::clock::{Clock, ManualClock};
use pulse_core::coordinator::{
    Coordinator, FailureDetector, HeartbeatOutcome, HeartbeatSample, LivenessConfig, NodeRegistry,
    NodeStatus, ScoringConfig, ScoringEngine,
};
use pulse_core::replication::InMemoryTransport;
use pulse_core::{CoordinatorConfig, PulseError};
use std::sync::Arc;
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn short_liveness() -> LivenessConfig {
    LivenessConfig {
        suspect_timeout: secs(3),
        dead_timeout: secs(9),
        gc_grace: secs(30),
    }
}

fn coordinator(clock: Arc<ManualClock>) -> Coordinator {
    let config = CoordinatorConfig {
        liveness: short_liveness(),
        ..Default::default()
    };
    Coordinator::new(config, Arc::new(InMemoryTransport::new()), clock).unwrap()
}

#[tokio::test]
async fn test_steady_healthy_node_scores_high() {
    let clock = Arc::new(ManualClock::new());
    let coordinator = coordinator(clock.clone());

    for second in 0..=5 {
        clock.set(clock.at(secs(second)));
        coordinator.heartbeat("n1", 0.95).unwrap();
    }

    let report = coordinator.tick().unwrap();
    let node = coordinator.registry().node("n1").unwrap();
    assert_eq!(node.status, NodeStatus::Active);
    assert!(node.score.unwrap() > 0.8, "score was {:?}", node.score);
    assert_eq!(report.target_set.members, vec!["n1"]);
}

#[tokio::test]
async fn test_silent_node_suspected_then_dead_then_excluded() {
    let clock = Arc::new(ManualClock::new());
    let coordinator = coordinator(clock.clone());

    coordinator.heartbeat("n1", 0.9).unwrap();
    coordinator.heartbeat("n2", 0.9).unwrap();

    for second in 1..=9 {
        clock.set(clock.at(secs(second)));
        coordinator.heartbeat("n2", 0.9).unwrap();
        let report = coordinator.tick().unwrap();
        let n1 = coordinator.registry().node("n1").unwrap();

        match second {
            1 | 2 => {
                assert_eq!(n1.status, NodeStatus::Active);
                assert!(report.target_set.contains("n1"));
            }
            3..=8 => {
                assert_eq!(n1.status, NodeStatus::Suspected, "at t={}s", second);
                assert!(!report.target_set.contains("n1"));
            }
            _ => {
                assert_eq!(n1.status, NodeStatus::Dead);
                assert!(n1.score.is_none());
                assert_eq!(report.sweep.dead, vec!["n1"]);
                assert_eq!(report.target_set.members, vec!["n2"]);
            }
        }
    }
    assert!(coordinator.replication().target("n1").is_none());
    coordinator.replication().wait_idle().await;
}

#[test]
fn test_dead_is_sticky_until_heartbeat() {
    let clock = ManualClock::new();
    let registry = NodeRegistry::new(8);
    let detector = FailureDetector::new(short_liveness());

    registry
        .report_heartbeat("n1", HeartbeatSample::new(clock.now(), 0.7))
        .unwrap();
    clock.advance(secs(10));
    let report = detector.sweep(&registry, clock.now());
    assert_eq!(report.dead, vec!["n1"]);

    // Repeated sweeps never revive a silent node
    for _ in 0..3 {
        clock.advance(secs(1));
        detector.sweep(&registry, clock.now());
        assert_eq!(registry.node("n1").unwrap().status, NodeStatus::Dead);
    }
}

#[test]
fn test_returning_dead_node_starts_fresh() {
    let clock = ManualClock::new();
    let registry = NodeRegistry::new(8);
    let detector = FailureDetector::new(short_liveness());

    for _ in 0..4 {
        registry
            .report_heartbeat("n1", HeartbeatSample::new(clock.now(), 0.2))
            .unwrap();
        clock.advance(secs(1));
    }
    let before = registry.node("n1").unwrap();
    clock.advance(secs(10));
    detector.sweep(&registry, clock.now());

    let receipt = registry
        .report_heartbeat("n1", HeartbeatSample::new(clock.now(), 0.9))
        .unwrap();
    assert_eq!(receipt.outcome, HeartbeatOutcome::Reincarnated);
    assert_eq!(receipt.node.status, NodeStatus::Active);
    assert_eq!(receipt.node.history.len(), 1);
    assert!(receipt.node.incarnation > before.incarnation);
    assert_eq!(receipt.node.first_seen, clock.now());
}

#[test]
fn test_suspected_node_recovers_with_history() {
    let clock = ManualClock::new();
    let registry = NodeRegistry::new(8);
    let detector = FailureDetector::new(short_liveness());

    registry
        .report_heartbeat("n1", HeartbeatSample::new(clock.now(), 0.6))
        .unwrap();
    clock.advance(secs(4));
    assert_eq!(detector.sweep(&registry, clock.now()).suspected, vec!["n1"]);

    let receipt = registry
        .report_heartbeat("n1", HeartbeatSample::new(clock.now(), 0.6))
        .unwrap();
    assert_eq!(receipt.outcome, HeartbeatOutcome::Recovered);
    assert_eq!(receipt.node.history.len(), 2);
    assert!(receipt.node.suspected_since.is_none());
}

#[test]
fn test_dead_node_evicted_after_grace() {
    let clock = ManualClock::new();
    let registry = NodeRegistry::new(8);
    let detector = FailureDetector::new(short_liveness());

    registry
        .report_heartbeat("n1", HeartbeatSample::new(clock.now(), 0.5))
        .unwrap();
    clock.advance(secs(9));
    detector.sweep(&registry, clock.now());

    clock.advance(secs(29));
    assert!(detector.sweep(&registry, clock.now()).evicted.is_empty());

    clock.advance(secs(1));
    let report = detector.sweep(&registry, clock.now());
    assert_eq!(report.evicted, vec!["n1"]);
    assert!(registry.node("n1").is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_transition_refused_after_newer_heartbeat() {
    let clock = ManualClock::new();
    let registry = NodeRegistry::new(8);

    registry
        .report_heartbeat("n1", HeartbeatSample::new(clock.now(), 0.5))
        .unwrap();
    let observed = registry.node("n1").unwrap().last_heartbeat;

    clock.advance(secs(5));
    registry
        .report_heartbeat("n1", HeartbeatSample::new(clock.now(), 0.5))
        .unwrap();

    let err = registry.mark_suspected("n1", observed, clock.now()).unwrap_err();
    assert!(matches!(err, PulseError::StaleTransition { .. }));
    assert_eq!(registry.node("n1").unwrap().status, NodeStatus::Active);
}

#[test]
fn test_malformed_heartbeats_rejected() {
    let clock = ManualClock::new();
    let registry = NodeRegistry::new(8);

    for (node, metric) in [("", 0.5), ("n1", f64::NAN), ("n1", -0.1), ("n1", 1.5)] {
        let result = registry.report_heartbeat(node, HeartbeatSample::new(clock.now(), metric));
        assert!(matches!(result, Err(PulseError::MalformedHeartbeat { .. })));
    }
    assert!(registry.is_empty());
}

#[test]
fn test_score_decays_with_silence() {
    let clock = ManualClock::new();
    let registry = NodeRegistry::new(8);
    let engine = ScoringEngine::new(ScoringConfig::default());

    registry
        .report_heartbeat("n1", HeartbeatSample::new(clock.now(), 0.9))
        .unwrap();
    let node = registry.node("n1").unwrap();

    let mut previous = engine.score(&node, clock.now());
    for _ in 0..5 {
        clock.advance(secs(4));
        let score = engine.score(&node, clock.now());
        assert!(score < previous);
        assert!((0.0..=1.0).contains(&score));
        previous = score;
    }
}
