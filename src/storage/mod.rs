//! Shared block storage
//!
//! Holds the single versioned block that gets replicated.

pub mod block_store;

pub use block_store::{checksum, BlockStore, SharedBlock};
