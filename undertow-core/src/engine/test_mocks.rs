//! Scripted collaborators for exercising the engine without a network or disk.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use url::Url;

use crate::store::{CacheError, DiskCache};
use crate::transfer::{ResponseMetadata, Transport, TransportError, TransportResponse};

type BodyItem = Result<Bytes, TransportError>;

/// Transport whose response body is fed by the test through a [`TransportFeed`].
#[derive(Debug)]
pub struct ScriptedTransport {
    outcome: Result<ResponseMetadata, TransportError>,
    body: Mutex<Option<mpsc::UnboundedReceiver<BodyItem>>>,
    opens: AtomicUsize,
}

impl ScriptedTransport {
    /// Responds with `metadata`; body chunks come from the returned feed.
    pub fn new(metadata: ResponseMetadata) -> (Self, TransportFeed) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let transport = Self {
            outcome: Ok(metadata),
            body: Mutex::new(Some(receiver)),
            opens: AtomicUsize::new(0),
        };
        (transport, TransportFeed { sender: Some(sender) })
    }

    /// Fails every open with `error`.
    pub fn failing(error: TransportError) -> Self {
        Self {
            outcome: Err(error),
            body: Mutex::new(None),
            opens: AtomicUsize::new(0),
        }
    }

    /// Number of times a transfer was opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let metadata = self.outcome.clone()?;

        let receiver = self
            .body
            .lock()
            .take()
            .ok_or_else(|| TransportError::Connection {
                url: url.to_string(),
                reason: "scripted body already consumed".to_string(),
            })?;

        let body = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        });

        Ok(TransportResponse {
            metadata,
            body: Box::pin(body),
        })
    }
}

/// Test side of a [`ScriptedTransport`] body.
#[derive(Debug)]
pub struct TransportFeed {
    sender: Option<mpsc::UnboundedSender<BodyItem>>,
}

impl TransportFeed {
    pub fn push(&self, chunk: impl AsRef<[u8]>) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Ok(Bytes::copy_from_slice(chunk.as_ref())));
        }
    }

    /// Ends the body with an error.
    pub fn fail(&mut self, error: TransportError) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(error));
        }
    }

    /// Ends the body successfully.
    pub fn finish(&mut self) {
        self.sender = None;
    }
}

/// Disk cache backed by a byte buffer, with failure injection.
#[derive(Debug, Default)]
pub struct InMemoryDiskCache {
    data: Mutex<BytesMut>,
    reads: Mutex<Vec<Range<u64>>>,
    writes: AtomicUsize,
    fail_after: Option<usize>,
    unavailable: AtomicBool,
    gate: Option<Arc<Semaphore>>,
}

impl InMemoryDiskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write waits for a permit from [`Self::release_writes`].
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    /// Accepts `writes` chunks, then rejects every later one.
    pub fn failing_after(writes: usize) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::default()
        }
    }

    /// Lets `count` more gated writes through.
    pub fn release_writes(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    /// Makes every read report the bytes as unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn contents(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data.lock())
    }

    /// Every range read so far, in call order.
    pub fn read_log(&self) -> Vec<Range<u64>> {
        self.reads.lock().clone()
    }

    /// Chunks accepted so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiskCache for InMemoryDiskCache {
    async fn cache_chunk(
        &self,
        chunk: Bytes,
        bytes_downloaded: u64,
        _bytes_expected: Option<u64>,
    ) -> Result<(), CacheError> {
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.map_err(|_| CacheError::Io {
                reason: "write gate closed".to_string(),
            })?;
            permit.forget();
        }

        if self
            .fail_after
            .is_some_and(|limit| self.writes.load(Ordering::SeqCst) >= limit)
        {
            return Err(CacheError::WriteRejected {
                reason: format!("scripted failure at byte {bytes_downloaded}"),
            });
        }

        self.data.lock().extend_from_slice(&chunk);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_range(&self, start: u64, end: u64) -> Option<Bytes> {
        self.reads.lock().push(start..end);
        if self.unavailable.load(Ordering::SeqCst) {
            return None;
        }

        let data = self.data.lock();
        if start >= end || end > data.len() as u64 {
            return None;
        }
        Some(Bytes::copy_from_slice(&data[start as usize..end as usize]))
    }
}
