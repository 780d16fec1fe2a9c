//! Pulse Core - Heartbeat liveness and block replication coordinator
//!
//! This crate provides:
//! - Heartbeat ingestion and failure detection
//! - Decay-weighted node scoring
//! - Epoch-based replication target selection
//! - Versioned, checksummed block replication with retries

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod replication;
pub mod runtime;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::PulseError;

/// Default heartbeat samples kept per node
pub const DEFAULT_HISTORY_CAPACITY: usize = 32;
