//! Liveness coordination
//!
//! Tracks node heartbeats, detects failures, scores nodes, and selects the
//! replication target set each epoch.

pub mod failure_detector;
pub mod leader;
pub mod registry;
pub mod scoring;
pub mod selector;

pub use failure_detector::{FailureDetector, LivenessConfig, SweepReport};
pub use leader::{Coordinator, CoordinatorState, CoordinatorStatus, EpochReport, NodeStatusView};
pub use registry::{
    HeartbeatHistory, HeartbeatOutcome, HeartbeatReceipt, HeartbeatSample, NodeId, NodeInfo,
    NodeRegistry, NodeStatus,
};
pub use scoring::{ScoringConfig, ScoringEngine};
pub use selector::{select_targets, SelectionConfig, TargetSelector, TargetSet, TargetSetDiff};
