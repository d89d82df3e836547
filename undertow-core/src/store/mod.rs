//! Byte stores backing range fulfillment.
//!
//! A store tracks how much of the resource has arrived and answers reads for
//! the pending-request sweep. Memory mode keeps every byte; disk mode only
//! tracks progress and delegates bytes to a caller-supplied [`DiskCache`].

pub mod disk;
pub mod file_cache;
pub mod memory;

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
pub use disk::{CacheEvent, DiskStore, StagingBudget};
pub use file_cache::FileCache;
pub use memory::MemoryStore;

use crate::config::EngineConfig;

/// Persistent storage collaborator for disk mode.
///
/// Chunks are handed over strictly in resource order, one at a time; the next
/// chunk is not offered until the previous call has returned.
#[async_trait]
pub trait DiskCache: Send + Sync {
    /// Durably accepts the next chunk of the resource.
    ///
    /// # Errors
    ///
    /// - `CacheError::WriteRejected` - The cache refused the chunk
    /// - `CacheError::Io` - Underlying storage failed
    async fn cache_chunk(
        &self,
        chunk: Bytes,
        bytes_downloaded: u64,
        bytes_expected: Option<u64>,
    ) -> Result<(), CacheError>;

    /// Reads `[start, end)` back from the cache.
    ///
    /// Returns `None` when the bytes cannot be produced yet; the request that
    /// asked for them stays pending.
    async fn read_range(&self, start: u64, end: u64) -> Option<Bytes>;
}

/// Errors reported by a disk cache collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The cache refused to accept a chunk
    #[error("cache rejected chunk: {reason}")]
    WriteRejected {
        /// Why the chunk was rejected
        reason: String,
    },

    /// Underlying storage I/O failed
    #[error("cache I/O error: {reason}")]
    Io {
        /// Description of the I/O failure
        reason: String,
    },
}

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        CacheError::Io {
            reason: error.to_string(),
        }
    }
}

/// Errors from reading a byte store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A read reached past the bytes that have arrived
    #[error("read of {len} bytes at {start} exceeds {available} available bytes")]
    OutOfRange {
        /// Start of the read
        start: u64,
        /// Length of the read
        len: u64,
        /// Bytes available when the read was attempted
        available: u64,
    },
}

/// Buffering strategy chosen when the engine is spawned.
#[derive(Clone)]
pub enum BufferingMode {
    /// Accumulate the whole resource in memory
    Memory,
    /// Hand chunks to a disk cache and serve reads back from it
    Disk {
        cache: Arc<dyn DiskCache>,
        /// Upper bound on one delivery to a pending request
        max_buffer_size: u64,
    },
}

impl BufferingMode {
    /// Disk mode with the window size taken from engine configuration.
    pub fn disk(cache: Arc<dyn DiskCache>, config: &EngineConfig) -> Self {
        BufferingMode::Disk {
            cache,
            max_buffer_size: config.max_buffer_size,
        }
    }
}

impl fmt::Debug for BufferingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferingMode::Memory => f.write_str("Memory"),
            BufferingMode::Disk {
                max_buffer_size, ..
            } => f
                .debug_struct("Disk")
                .field("max_buffer_size", max_buffer_size)
                .finish_non_exhaustive(),
        }
    }
}

/// The engine's view of received bytes, in either buffering mode.
#[derive(Debug)]
pub enum ByteStore {
    Memory(MemoryStore),
    Disk(DiskStore),
}

impl ByteStore {
    /// Contiguous bytes received from offset 0.
    pub fn bytes_available(&self) -> u64 {
        match self {
            ByteStore::Memory(store) => store.bytes_available(),
            ByteStore::Disk(store) => store.bytes_downloaded(),
        }
    }

    /// Bytes that can actually be read back for delivery.
    ///
    /// In disk mode only bytes the cache has accepted are readable.
    pub fn readable_bytes(&self) -> u64 {
        match self {
            ByteStore::Memory(store) => store.bytes_available(),
            ByteStore::Disk(store) => store.bytes_cached(),
        }
    }

    /// Bytes accepted by the disk cache, or `None` in memory mode.
    pub fn bytes_cached(&self) -> Option<u64> {
        match self {
            ByteStore::Memory(_) => None,
            ByteStore::Disk(store) => Some(store.bytes_cached()),
        }
    }

    /// Downloaded bytes still waiting for the cache; disk mode only.
    pub fn staged_bytes(&self) -> Option<u64> {
        match self {
            ByteStore::Memory(_) => None,
            ByteStore::Disk(store) => Some(store.staged_bytes()),
        }
    }

    /// Budget the transfer task must reserve against; disk mode only.
    pub fn staging_budget(&self) -> Option<StagingBudget> {
        match self {
            ByteStore::Memory(_) => None,
            ByteStore::Disk(store) => Some(store.staging_budget()),
        }
    }

    /// The range the next delivery to a request at `current_offset` may carry.
    ///
    /// Returns `None` when nothing is readable at that offset yet. Disk mode
    /// additionally caps the window at its `max_buffer_size`.
    pub fn delivery_window(&self, current_offset: u64, remaining: u64) -> Option<Range<u64>> {
        let readable = self.readable_bytes().saturating_sub(current_offset);
        let mut len = readable.min(remaining);
        if let ByteStore::Disk(store) = self {
            len = len.min(store.max_buffer_size());
        }

        (len > 0).then(|| current_offset..current_offset + len)
    }

    /// Reads a delivery window.
    ///
    /// `Ok(None)` means the disk cache could not produce the bytes yet.
    ///
    /// # Errors
    ///
    /// - `StoreError::OutOfRange` - Memory read past the received bytes
    pub async fn read(&self, range: Range<u64>) -> Result<Option<Bytes>, StoreError> {
        match self {
            ByteStore::Memory(store) => store
                .read(range.start, range.end - range.start)
                .map(Some),
            ByteStore::Disk(store) => Ok(store.read(range).await),
        }
    }
}
