//! Disk-mode byte store.
//!
//! Tracks download and cache progress while the bytes themselves live in a
//! [`DiskCache`]. Chunks are written by a dedicated task, one after another,
//! so `bytes_cached` is always the length of a cached prefix.
//!
//! Bytes between `bytes_cached` and `bytes_downloaded` are staged in memory.
//! The transfer task reserves room in a [`StagingBudget`] before handing a
//! chunk over, so the staged bytes stay within `max_buffer_size` plus at
//! most one chunk however slow the cache is.

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{CacheError, DiskCache};

/// Outcome of one cache write, reported back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The cache durably accepted a chunk of `len` bytes
    Cached { len: u64 },
    /// The cache refused a chunk; no further chunks will be written
    Failed(CacheError),
}

/// Byte budget shared between a disk store and the transfer task feeding it.
///
/// One permit per staged byte. A chunk larger than the whole budget is
/// charged the whole budget, so it still gets through once the cache has
/// caught up.
#[derive(Debug, Clone)]
pub struct StagingBudget {
    permits: Arc<Semaphore>,
    capacity: u32,
}

impl StagingBudget {
    pub fn new(max_buffer_size: u64) -> Self {
        let limit = u64::from(u32::MAX).min(Semaphore::MAX_PERMITS as u64);
        let capacity = max_buffer_size.clamp(1, limit) as u32;
        Self {
            permits: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    fn charge(&self, len: u64) -> u32 {
        len.min(u64::from(self.capacity)) as u32
    }

    /// Waits until `len` bytes may be staged.
    ///
    /// Returns `false` once the budget is closed and nothing more should be sent.
    pub async fn reserve(&self, len: u64) -> bool {
        let charge = self.charge(len);
        if charge == 0 {
            return true;
        }
        if self.permits.available_permits() < charge as usize {
            trace!("Staging window full; waiting for the cache to take {} bytes", charge);
        }
        match self.permits.acquire_many(charge).await {
            Ok(permits) => {
                permits.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Returns the room a cached chunk of `len` bytes was charged.
    pub fn release(&self, len: u64) {
        self.permits.add_permits(self.charge(len) as usize);
    }

    /// Wakes any waiting reservation with a refusal.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Bytes that can be staged right now without waiting.
    pub fn available(&self) -> u64 {
        self.permits.available_permits() as u64
    }
}

struct PendingWrite {
    chunk: Bytes,
    bytes_downloaded: u64,
    bytes_expected: Option<u64>,
}

struct CacheWriter {
    queue: mpsc::UnboundedSender<PendingWrite>,
    task: JoinHandle<()>,
}

impl CacheWriter {
    fn spawn(cache: Arc<dyn DiskCache>, events: mpsc::UnboundedSender<CacheEvent>) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_cache_writer(cache, receiver, events));
        Self { queue, task }
    }
}

async fn run_cache_writer(
    cache: Arc<dyn DiskCache>,
    mut queue: mpsc::UnboundedReceiver<PendingWrite>,
    events: mpsc::UnboundedSender<CacheEvent>,
) {
    while let Some(write) = queue.recv().await {
        let len = write.chunk.len() as u64;
        match cache
            .cache_chunk(write.chunk, write.bytes_downloaded, write.bytes_expected)
            .await
        {
            Ok(()) => {
                trace!("Cached {} bytes (downloaded {})", len, write.bytes_downloaded);
                if events.send(CacheEvent::Cached { len }).is_err() {
                    break;
                }
            }
            Err(error) => {
                let _ = events.send(CacheEvent::Failed(error));
                break;
            }
        }
    }
}

/// Progress bookkeeping for disk mode.
pub struct DiskStore {
    cache: Arc<dyn DiskCache>,
    max_buffer_size: u64,
    bytes_downloaded: u64,
    bytes_cached: u64,
    cache_events: mpsc::UnboundedSender<CacheEvent>,
    writer: Option<CacheWriter>,
    budget: StagingBudget,
}

impl DiskStore {
    /// Creates a disk store; cache write outcomes are sent to `cache_events`.
    pub fn new(
        cache: Arc<dyn DiskCache>,
        max_buffer_size: u64,
        cache_events: mpsc::UnboundedSender<CacheEvent>,
    ) -> Self {
        let max_buffer_size = max_buffer_size.max(1);
        Self {
            cache,
            max_buffer_size,
            bytes_downloaded: 0,
            bytes_cached: 0,
            cache_events,
            writer: None,
            budget: StagingBudget::new(max_buffer_size),
        }
    }

    /// Budget the transfer task reserves against before sending a chunk.
    pub fn staging_budget(&self) -> StagingBudget {
        self.budget.clone()
    }

    /// Counts a received chunk and queues it for the cache.
    ///
    /// Returns the new `bytes_downloaded`.
    pub fn record_download(&mut self, chunk: Bytes, bytes_expected: Option<u64>) -> u64 {
        self.bytes_downloaded += chunk.len() as u64;

        let write = PendingWrite {
            chunk,
            bytes_downloaded: self.bytes_downloaded,
            bytes_expected,
        };
        let cache = &self.cache;
        let events = &self.cache_events;
        let writer = self
            .writer
            .get_or_insert_with(|| CacheWriter::spawn(Arc::clone(cache), events.clone()));

        if writer.queue.send(write).is_err() {
            warn!(
                "Cache writer stopped; chunk ending at {} not cached",
                self.bytes_downloaded
            );
        }

        self.bytes_downloaded
    }

    /// Counts bytes the cache accepted and frees their staging room.
    ///
    /// Returns the new `bytes_cached`.
    pub fn record_cached(&mut self, len: u64) -> u64 {
        self.budget.release(len);
        self.bytes_cached = self
            .bytes_cached
            .saturating_add(len)
            .min(self.bytes_downloaded);
        self.bytes_cached
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded
    }

    pub fn bytes_cached(&self) -> u64 {
        self.bytes_cached
    }

    /// Bytes received but not yet accepted by the cache.
    pub fn staged_bytes(&self) -> u64 {
        self.bytes_downloaded - self.bytes_cached
    }

    pub fn max_buffer_size(&self) -> u64 {
        self.max_buffer_size
    }

    /// Reads a window back from the cache, trimmed to the window length.
    pub async fn read(&self, range: Range<u64>) -> Option<Bytes> {
        let window = range.end - range.start;
        match self.cache.read_range(range.start, range.end).await {
            Some(mut bytes) => {
                if bytes.len() as u64 > window {
                    bytes.truncate(window as usize);
                }
                (!bytes.is_empty()).then_some(bytes)
            }
            None => {
                debug!(
                    "Cache could not produce {}..{}; request stays pending",
                    range.start, range.end
                );
                None
            }
        }
    }

    /// `bytes_cached == bytes_downloaded == bytes_expected`.
    pub fn is_complete(&self, bytes_expected: Option<u64>) -> bool {
        bytes_expected == Some(self.bytes_downloaded) && self.bytes_cached == self.bytes_downloaded
    }

    /// Stops writing; chunks still queued are discarded.
    pub fn stop_writer(&mut self) {
        self.budget.close();
        if let Some(writer) = self.writer.take() {
            writer.task.abort();
        }
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        self.stop_writer();
    }
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("max_buffer_size", &self.max_buffer_size)
            .field("bytes_downloaded", &self.bytes_downloaded)
            .field("bytes_cached", &self.bytes_cached)
            .finish_non_exhaustive()
    }
}
