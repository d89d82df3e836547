//! Outstanding range requests and the fulfillment sweep.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::resource::ContentMetadata;
use crate::store::{ByteStore, StoreError};

/// Identifies one range request for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a range request receives, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeDelivery {
    /// Sent once, before any data
    Metadata(ContentMetadata),
    /// The next contiguous bytes of the range
    Data { offset: u64, bytes: Bytes },
    /// The whole range has been delivered
    Finished,
}

/// A demand for `[requested_offset, requested_offset + requested_length)`.
///
/// `current_offset` is the next byte still owed to the requester. A zero
/// length request only wants metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub requested_offset: u64,
    pub requested_length: u64,
    pub current_offset: u64,
}

impl RangeRequest {
    pub fn new(requested_offset: u64, requested_length: u64) -> Self {
        Self {
            requested_offset,
            requested_length,
            current_offset: requested_offset,
        }
    }

    pub fn end(&self) -> u64 {
        self.requested_offset + self.requested_length
    }

    pub fn remaining(&self) -> u64 {
        self.end() - self.current_offset
    }

    pub fn is_satisfied(&self) -> bool {
        self.current_offset == self.end()
    }

    /// Moves `current_offset` forward, never past the end of the range.
    pub fn advance(&mut self, len: u64) {
        self.current_offset = (self.current_offset + len).min(self.end());
    }
}

#[derive(Debug)]
struct PendingRequest {
    request: RangeRequest,
    metadata_delivered: bool,
    deliveries: mpsc::UnboundedSender<RangeDelivery>,
}

impl PendingRequest {
    /// Returns false when the requester has gone away.
    fn send(&self, delivery: RangeDelivery) -> bool {
        self.deliveries.send(delivery).is_ok()
    }
}

/// Result of one sweep over the pending set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Requests fully answered and removed
    pub resolved: Vec<RequestId>,
    /// Requests removed because their requester dropped its handle
    pub abandoned: Vec<RequestId>,
    /// Data deliveries made
    pub deliveries: usize,
    /// Bytes delivered across all requests
    pub delivered_bytes: u64,
}

enum Step {
    Keep,
    Resolve,
    Abandon,
}

/// The set of range requests awaiting data.
#[derive(Debug, Default)]
pub struct PendingRequestSet {
    requests: HashMap<RequestId, PendingRequest>,
}

impl PendingRequestSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        id: RequestId,
        request: RangeRequest,
        deliveries: mpsc::UnboundedSender<RangeDelivery>,
    ) {
        self.requests.insert(
            id,
            PendingRequest {
                request,
                metadata_delivered: false,
                deliveries,
            },
        );
    }

    /// Removes a request without notifying it. Returns whether it was pending.
    pub fn remove(&mut self, id: RequestId) -> bool {
        self.requests.remove(&id).is_some()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.contains_key(&id)
    }

    pub fn get(&self, id: RequestId) -> Option<&RangeRequest> {
        self.requests.get(&id).map(|pending| &pending.request)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Drops every request unresolved. Their handles observe a closed channel.
    pub fn clear(&mut self) -> usize {
        let dropped = self.requests.len();
        self.requests.clear();
        dropped
    }

    /// Tries to answer every pending request from `store`.
    ///
    /// Requests get metadata first; without metadata nothing is delivered.
    /// Each request then receives at most one data window per sweep, starting
    /// at its `current_offset`. Requests are independent, so the order of
    /// iteration does not change the outcome.
    ///
    /// # Errors
    ///
    /// - `StoreError::OutOfRange` - The store could not serve a window it advertised
    pub async fn sweep(
        &mut self,
        store: &ByteStore,
        metadata: Option<&ContentMetadata>,
    ) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();
        let Some(metadata) = metadata else {
            return Ok(report);
        };

        let mut ids: Vec<RequestId> = self.requests.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            let Some(pending) = self.requests.get_mut(&id) else {
                continue;
            };

            let step = Self::fulfill(pending, store, metadata, &mut report).await?;
            match step {
                Step::Keep => {}
                Step::Resolve => {
                    self.requests.remove(&id);
                    trace!("Range request {} resolved", id);
                    report.resolved.push(id);
                }
                Step::Abandon => {
                    self.requests.remove(&id);
                    debug!("Range request {} abandoned by requester", id);
                    report.abandoned.push(id);
                }
            }
        }

        Ok(report)
    }

    async fn fulfill(
        pending: &mut PendingRequest,
        store: &ByteStore,
        metadata: &ContentMetadata,
        report: &mut SweepReport,
    ) -> Result<Step, StoreError> {
        if !pending.metadata_delivered {
            if !pending.send(RangeDelivery::Metadata(metadata.clone())) {
                return Ok(Step::Abandon);
            }
            pending.metadata_delivered = true;
        }

        let request = pending.request;
        if !request.is_satisfied() {
            let Some(window) = store.delivery_window(request.current_offset, request.remaining())
            else {
                return Ok(Step::Keep);
            };
            let Some(bytes) = store.read(window.clone()).await? else {
                return Ok(Step::Keep);
            };

            let len = bytes.len() as u64;
            if !pending.send(RangeDelivery::Data {
                offset: window.start,
                bytes,
            }) {
                return Ok(Step::Abandon);
            }

            pending.request.advance(len);
            report.deliveries += 1;
            report.delivered_bytes += len;
        }

        if pending.request.is_satisfied() {
            let _ = pending.send(RangeDelivery::Finished);
            return Ok(Step::Resolve);
        }

        Ok(Step::Keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn metadata(len: u64) -> ContentMetadata {
        ContentMetadata {
            content_type: "audio/mpeg".to_string(),
            content_length: Some(len),
            supports_range_access: true,
        }
    }

    fn memory_store(len: usize) -> ByteStore {
        let mut store = MemoryStore::new();
        store.append(&(0..len).map(|i| i as u8).collect::<Vec<_>>());
        ByteStore::Memory(store)
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<RangeDelivery>) -> Vec<RangeDelivery> {
        let mut deliveries = Vec::new();
        while let Ok(delivery) = receiver.try_recv() {
            deliveries.push(delivery);
        }
        deliveries
    }

    #[test]
    fn test_range_request_bookkeeping() {
        let mut request = RangeRequest::new(100, 50);
        assert_eq!(request.end(), 150);
        assert_eq!(request.remaining(), 50);

        request.advance(20);
        assert_eq!(request.current_offset, 120);
        assert!(!request.is_satisfied());

        request.advance(1000);
        assert!(request.is_satisfied());
        assert_eq!(request.remaining(), 0);
    }

    #[tokio::test]
    async fn test_no_metadata_means_no_delivery() {
        let mut set = PendingRequestSet::new();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        set.insert(RequestId::new(1), RangeRequest::new(0, 10), sender);

        let report = set.sweep(&memory_store(100), None).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(drain(&mut receiver).is_empty());
        assert!(set.contains(RequestId::new(1)));
    }

    #[tokio::test]
    async fn test_partial_then_complete_delivery() {
        let mut set = PendingRequestSet::new();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        set.insert(RequestId::new(1), RangeRequest::new(10, 30), sender);

        let report = set
            .sweep(&memory_store(25), Some(&metadata(100)))
            .await
            .unwrap();
        assert_eq!(report.delivered_bytes, 15);
        assert_eq!(set.get(RequestId::new(1)).unwrap().current_offset, 25);
        assert_eq!(
            drain(&mut receiver),
            vec![
                RangeDelivery::Metadata(metadata(100)),
                RangeDelivery::Data {
                    offset: 10,
                    bytes: Bytes::from((10u8..25).collect::<Vec<_>>()),
                },
            ]
        );

        let report = set
            .sweep(&memory_store(100), Some(&metadata(100)))
            .await
            .unwrap();
        assert_eq!(report.resolved, vec![RequestId::new(1)]);
        assert!(set.is_empty());
        assert_eq!(
            drain(&mut receiver),
            vec![
                RangeDelivery::Data {
                    offset: 25,
                    bytes: Bytes::from((25u8..40).collect::<Vec<_>>()),
                },
                RangeDelivery::Finished,
            ]
        );
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent_without_new_bytes() {
        let mut set = PendingRequestSet::new();
        let (first, mut first_rx) = mpsc::unbounded_channel();
        let (second, mut second_rx) = mpsc::unbounded_channel();
        set.insert(RequestId::new(1), RangeRequest::new(0, 40), first);
        set.insert(RequestId::new(2), RangeRequest::new(60, 40), second);
        let store = memory_store(50);

        set.sweep(&store, Some(&metadata(100))).await.unwrap();
        let after_first: Vec<_> = [1, 2]
            .map(|id| set.get(RequestId::new(id)).copied())
            .to_vec();
        drain(&mut first_rx);
        drain(&mut second_rx);

        let report = set.sweep(&store, Some(&metadata(100))).await.unwrap();
        let after_second: Vec<_> = [1, 2]
            .map(|id| set.get(RequestId::new(id)).copied())
            .to_vec();

        assert_eq!(after_first, after_second);
        assert_eq!(report.deliveries, 0);
        assert!(drain(&mut first_rx).is_empty());
        assert!(drain(&mut second_rx).is_empty());
    }

    #[tokio::test]
    async fn test_metadata_only_request_resolves_immediately() {
        let mut set = PendingRequestSet::new();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        set.insert(RequestId::new(7), RangeRequest::new(0, 0), sender);

        let report = set
            .sweep(&memory_store(0), Some(&metadata(10)))
            .await
            .unwrap();
        assert_eq!(report.resolved, vec![RequestId::new(7)]);
        assert_eq!(
            drain(&mut receiver),
            vec![RangeDelivery::Metadata(metadata(10)), RangeDelivery::Finished]
        );
    }

    #[tokio::test]
    async fn test_dropped_handle_is_abandoned() {
        let mut set = PendingRequestSet::new();
        let (sender, receiver) = mpsc::unbounded_channel();
        set.insert(RequestId::new(3), RangeRequest::new(0, 10), sender);
        drop(receiver);

        let report = set
            .sweep(&memory_store(10), Some(&metadata(10)))
            .await
            .unwrap();
        assert_eq!(report.abandoned, vec![RequestId::new(3)]);
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_clear_drops_requests_unresolved() {
        let mut set = PendingRequestSet::new();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        set.insert(RequestId::new(1), RangeRequest::new(0, 10), sender);

        assert_eq!(set.clear(), 1);
        assert_eq!(receiver.recv().await, None);
    }
}
