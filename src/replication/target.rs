//! Per-target replication state
//!
//! State machine:
//! `Pending -> InSync` on a verified push at the current version,
//! `InSync -> Stale` when the block advances,
//! `Pending | Stale -> Failed` once retries are exhausted.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::coordinator::NodeId;

/// Replication status of one target relative to the block version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncState {
    /// Never acknowledged any version
    Pending,
    /// Acknowledged the current version
    InSync,
    /// Acknowledged an older version
    Stale,
    /// Retries exhausted; re-armed on the next reconciliation
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Pending => write!(f, "pending"),
            SyncState::InSync => write!(f, "in-sync"),
            SyncState::Stale => write!(f, "stale"),
            SyncState::Failed => write!(f, "failed"),
        }
    }
}

/// Exponential backoff with bounded delay and attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub base_backoff: Duration,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
    /// Consecutive failures before a target is marked failed
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// True once `failures` has used up every attempt
    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

/// Replication state for one selected node
#[derive(Debug, Clone)]
pub struct ReplicationTarget {
    pub node_id: NodeId,
    pub sync_state: SyncState,
    /// Highest version the node acknowledged, if any
    pub last_acked_version: Option<u64>,
    pub consecutive_failures: u32,
    /// Earliest instant the next push may start
    pub next_retry_at: Instant,
    /// Last push error, for status reporting
    pub last_error: Option<String>,
}

impl ReplicationTarget {
    /// New target awaiting its first push, due immediately
    pub fn new(node_id: NodeId, now: Instant) -> Self {
        Self {
            node_id,
            sync_state: SyncState::Pending,
            last_acked_version: None,
            consecutive_failures: 0,
            next_retry_at: now,
            last_error: None,
        }
    }

    /// True if a push should be started at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.sync_state, SyncState::Pending | SyncState::Stale) && self.next_retry_at <= now
    }

    /// Record a verified acknowledgment of `acked` while the source is at `current`
    pub fn record_ack(&mut self, acked: u64, current: u64, now: Instant) {
        debug_assert!(acked <= current, "ack {} ahead of source {}", acked, current);
        let best = self.last_acked_version.map_or(acked, |v| v.max(acked));
        self.last_acked_version = Some(best);
        self.consecutive_failures = 0;
        self.last_error = None;
        self.next_retry_at = now;
        self.sync_state = if best >= current {
            SyncState::InSync
        } else {
            SyncState::Stale
        };
    }

    /// Record a failed push; returns true if retries are now exhausted
    pub fn record_failure(&mut self, error: String, policy: &RetryPolicy, now: Instant) -> bool {
        self.consecutive_failures += 1;
        self.last_error = Some(error);
        if policy.exhausted(self.consecutive_failures) {
            self.sync_state = SyncState::Failed;
            true
        } else {
            self.next_retry_at = now + policy.backoff(self.consecutive_failures);
            false
        }
    }

    /// Mark an in-sync target behind `version` as stale and due now
    pub fn mark_stale(&mut self, version: u64, now: Instant) -> bool {
        let behind = self.last_acked_version.map_or(true, |v| v < version);
        if self.sync_state == SyncState::InSync && behind {
            self.sync_state = SyncState::Stale;
            self.next_retry_at = now;
            true
        } else {
            false
        }
    }

    /// Give a failed target a fresh round of attempts
    pub fn rearm(&mut self, now: Instant) -> bool {
        if self.sync_state != SyncState::Failed {
            return false;
        }
        self.sync_state = if self.last_acked_version.is_some() {
            SyncState::Stale
        } else {
            SyncState::Pending
        };
        self.consecutive_failures = 0;
        self.next_retry_at = now;
        true
    }

    /// Serializable view
    pub fn status(&self) -> TargetStatus {
        TargetStatus {
            node_id: self.node_id.clone(),
            sync_state: self.sync_state,
            last_acked_version: self.last_acked_version,
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
        }
    }
}

/// Observability snapshot of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStatus {
    pub node_id: NodeId,
    pub sync_state: SyncState,
    pub last_acked_version: Option<u64>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            max_attempts: 10,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_failures_exhaust_into_failed() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        };
        let now = Instant::now();
        let mut target = ReplicationTarget::new("n1".into(), now);

        assert!(!target.record_failure("boom".into(), &policy, now));
        assert_eq!(target.sync_state, SyncState::Pending);
        assert!(!target.is_due(now));
        assert!(target.is_due(now + policy.backoff(1)));

        assert!(target.record_failure("boom".into(), &policy, now));
        assert_eq!(target.sync_state, SyncState::Failed);
        assert!(!target.is_due(now + Duration::from_secs(60)));

        assert!(target.rearm(now));
        assert_eq!(target.sync_state, SyncState::Pending);
        assert_eq!(target.consecutive_failures, 0);
    }

    #[test]
    fn test_ack_behind_source_is_stale() {
        let now = Instant::now();
        let mut target = ReplicationTarget::new("n1".into(), now);

        target.record_ack(1, 2, now);
        assert_eq!(target.sync_state, SyncState::Stale);
        assert!(target.is_due(now));

        target.record_ack(2, 2, now);
        assert_eq!(target.sync_state, SyncState::InSync);
        assert!(!target.is_due(now));

        assert!(target.mark_stale(3, now));
        assert_eq!(target.sync_state, SyncState::Stale);
    }

    #[test]
    fn test_rearm_failed_after_ack_goes_stale() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        };
        let now = Instant::now();
        let mut target = ReplicationTarget::new("n1".into(), now);
        target.record_ack(1, 1, now);
        target.mark_stale(2, now);
        target.record_failure("down".into(), &policy, now);
        assert_eq!(target.sync_state, SyncState::Failed);

        target.rearm(now);
        assert_eq!(target.sync_state, SyncState::Stale);
        assert_eq!(target.last_acked_version, Some(1));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "ahead of source")]
    fn test_ack_ahead_of_source_is_a_bug() {
        let now = Instant::now();
        let mut target = ReplicationTarget::new("n1".into(), now);
        target.record_ack(3, 2, now);
    }
}
