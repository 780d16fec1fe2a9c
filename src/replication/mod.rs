//! Block replication
//!
//! Pushes the shared block to the selected targets and tracks each
//! target's sync state.

pub mod manager;
pub mod target;
pub mod transport;

pub use manager::{ReplicationConfig, ReplicationManager};
pub use target::{ReplicationTarget, RetryPolicy, SyncState, TargetStatus};
pub use transport::{BlockTransport, InMemoryTransport, PushAck, PushRequest, Replica};
