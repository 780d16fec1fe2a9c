//! Error types for the pulse coordinator
//!
//! Taxonomy covering heartbeat ingress, liveness transitions,
//! replication pushes, configuration, and runtime failures.

use std::time::Duration;
use thiserror::Error;

/// Primary error type for all coordinator operations
#[derive(Debug, Error)]
pub enum PulseError {
    // ========== Heartbeat Errors ==========

    /// Heartbeat payload rejected at the boundary
    #[error("Malformed heartbeat from '{node_id}': {reason}")]
    MalformedHeartbeat { node_id: String, reason: String },

    // ========== Registry Errors ==========

    /// Node is not present in the registry
    #[error("Node {node_id} not found")]
    NodeNotFound { node_id: String },

    /// A liveness transition lost the race against a newer heartbeat
    #[error("Liveness transition for {node_id} superseded by a newer heartbeat")]
    StaleTransition { node_id: String },

    // ========== Replication Errors ==========

    /// Transport reported a push failure
    #[error("Push to {node_id} failed: {reason}")]
    PushFailed { node_id: String, reason: String },

    /// Push did not complete within its timeout
    #[error("Push to {node_id} timed out after {timeout:?}")]
    PushTimeout { node_id: String, timeout: Duration },

    /// Acknowledged checksum differs from the one sent
    #[error("Checksum mismatch from {node_id}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { node_id: String, expected: u32, actual: u32 },

    /// Acknowledged version differs from the one sent
    #[error("Version mismatch from {node_id}: sent {sent}, acknowledged {acked}")]
    VersionMismatch { node_id: String, sent: u64, acked: u64 },

    /// Target set is older than the one already applied
    #[error("Stale target set: manager at epoch {current}, received {received}")]
    StaleEpoch { current: u64, received: u64 },

    // ========== Configuration Errors ==========

    /// Configuration failed validation
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // ========== Runtime Errors ==========

    /// Coordinator can no longer schedule work
    #[error("Resource exhausted: {reason}")]
    ResourceExhausted { reason: String },

    /// Shutdown in progress
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PulseError {
    /// Returns true if this is an expected push-path failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PulseError::PushFailed { .. }
                | PulseError::PushTimeout { .. }
                | PulseError::ChecksumMismatch { .. }
                | PulseError::VersionMismatch { .. }
        )
    }

    /// Returns true if the coordinator cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, PulseError::ResourceExhausted { .. })
    }
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, PulseError>;
