//! Shared block store
//!
//! Holds the single replicated block. Content, version, and checksum are
//! swapped together behind one lock, so readers never see a mix.

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Versioned, checksummed payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedBlock {
    /// Opaque content
    pub content: Bytes,
    /// Monotonic version, 0 for the initial empty block
    pub version: u64,
    /// CRC32C of `content`
    pub checksum: u32,
}

impl SharedBlock {
    fn new(content: Bytes, version: u64) -> Self {
        let checksum = checksum(&content);
        Self {
            content,
            version,
            checksum,
        }
    }

    /// Check content against the stored checksum
    pub fn verify(&self) -> bool {
        checksum(&self.content) == self.checksum
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// CRC32C checksum used for block verification
pub fn checksum(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Single-block store with version notifications
pub struct BlockStore {
    current: RwLock<Arc<SharedBlock>>,
    version_tx: watch::Sender<u64>,
}

impl BlockStore {
    /// Create a store holding an empty block at version 0
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::new(SharedBlock::new(Bytes::new(), 0))),
            version_tx,
        }
    }

    /// Replace the block content and return the new version
    ///
    /// Identical content still bumps the version.
    pub fn update(&self, content: impl Into<Bytes>) -> u64 {
        let content = content.into();
        let version = {
            let mut current = self.current.write();
            let version = current.version + 1;
            *current = Arc::new(SharedBlock::new(content, version));
            // Publish while holding the lock so notifications stay ordered
            self.version_tx.send_replace(version);
            version
        };
        debug!("Block updated to version {}", version);
        version
    }

    /// Consistent snapshot of the current block
    pub fn current(&self) -> Arc<SharedBlock> {
        self.current.read().clone()
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Receiver notified on every version change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new()
    }
}
