//! Engine state and the handlers the actor dispatches to.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::lifecycle::LifecycleController;
use super::pending::{PendingRequestSet, RangeDelivery, RangeRequest, RequestId};
use super::{EngineEvent, EngineStatus, FulfillmentError};
use crate::config::EngineConfig;
use crate::resource::{ContentMetadata, Resource};
use crate::store::{BufferingMode, ByteStore, CacheEvent, DiskStore, MemoryStore};
use crate::transfer::{TransferEvent, TransferSession, TransferState, Transport};

/// Channels the engine reports through.
pub struct EngineChannels {
    /// Caller notifications
    pub events: mpsc::UnboundedSender<EngineEvent>,
    /// Handed to the transfer task
    pub transfer: mpsc::UnboundedSender<TransferEvent>,
    /// Handed to the disk cache writer
    pub cache: mpsc::UnboundedSender<CacheEvent>,
}

/// All state for fulfilling range requests against one resource.
///
/// Owned by the actor task; every method runs on that task.
pub struct FulfillmentEngine {
    resource: Resource,
    store: ByteStore,
    pending: PendingRequestSet,
    transfer: TransferSession,
    transport: Arc<dyn Transport>,
    metadata: Option<ContentMetadata>,
    lifecycle: LifecycleController,
    events: mpsc::UnboundedSender<EngineEvent>,
    transfer_events: mpsc::UnboundedSender<TransferEvent>,
    completion_reported: bool,
    failure: Option<FulfillmentError>,
}

impl FulfillmentEngine {
    /// Creates an engine; in-memory resources start with all bytes and metadata.
    pub fn new(
        resource: Resource,
        mode: BufferingMode,
        transport: Arc<dyn Transport>,
        config: &EngineConfig,
        channels: EngineChannels,
    ) -> Self {
        let metadata = resource.in_memory_metadata();
        let store = match (resource.payload(), mode) {
            (Some(payload), _) => ByteStore::Memory(MemoryStore::with_payload(payload)),
            (None, BufferingMode::Memory) => ByteStore::Memory(MemoryStore::new()),
            (
                None,
                BufferingMode::Disk {
                    cache,
                    max_buffer_size,
                },
            ) => ByteStore::Disk(DiskStore::new(cache, max_buffer_size, channels.cache)),
        };

        if let Some(metadata) = &metadata {
            let _ = channels
                .events
                .send(EngineEvent::MetadataResolved(metadata.clone()));
        }

        Self {
            resource,
            store,
            pending: PendingRequestSet::new(),
            transfer: TransferSession::new(),
            transport,
            metadata,
            lifecycle: LifecycleController::new(config.prebuffer_bytes),
            events: channels.events,
            transfer_events: channels.transfer,
            completion_reported: false,
            failure: None,
        }
    }

    /// Registers a range request, starting the transfer on first demand.
    pub async fn request_range(
        &mut self,
        id: RequestId,
        offset: u64,
        length: u64,
        deliveries: mpsc::UnboundedSender<RangeDelivery>,
    ) {
        if self.failure.is_some() || self.lifecycle.is_disposed() {
            debug!("Dropping range request {} on a terminated engine", id);
            return;
        }

        debug!("Range request {} for {}+{}", id, offset, length);
        self.pending
            .insert(id, RangeRequest::new(offset, length), deliveries);
        self.ensure_transfer();
        self.sweep().await;
    }

    pub fn cancel_request(&mut self, id: RequestId) {
        if self.pending.remove(id) {
            debug!("Range request {} cancelled", id);
        }
    }

    /// Starts the transfer without waiting for a range request.
    pub fn start_download(&mut self) -> Result<(), FulfillmentError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.lifecycle.is_disposed() {
            return Err(FulfillmentError::EngineShutdown);
        }
        if self.resource.is_in_memory() {
            debug!("Eager download requested for an in-memory resource; nothing to fetch");
            return Ok(());
        }

        self.ensure_transfer();
        Ok(())
    }

    pub fn report_stall(&mut self) {
        if self.lifecycle.report_stall() {
            info!("Playback stalled at {} readable bytes", self.store.readable_bytes());
            self.emit(EngineEvent::PlaybackStalled);
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            lifecycle: self.lifecycle.state(),
            transfer: self.transfer.state(),
            bytes_available: self.store.bytes_available(),
            bytes_cached: self.store.bytes_cached(),
            staged_bytes: self.store.staged_bytes(),
            pending_requests: self.pending.len(),
            metadata: self.metadata.clone(),
            failure: self.failure.clone(),
        }
    }

    /// Handles a message from the transfer task.
    pub async fn on_transfer_event(&mut self, event: TransferEvent) {
        if !self.transfer.is_active() {
            warn!("Ignoring {} event after the transfer ended", event_name(&event));
            return;
        }

        match event {
            TransferEvent::ResponseReceived(response) => {
                if self.metadata.is_none() {
                    let metadata = self.resource.metadata_from_response(&response);
                    info!(
                        "Content metadata: type={} length={:?}",
                        metadata.content_type, metadata.content_length
                    );
                    self.metadata = Some(metadata.clone());
                    self.emit(EngineEvent::MetadataResolved(metadata));
                }
                self.sweep().await;
            }
            TransferEvent::ChunkReceived(chunk) => {
                let len = chunk.len() as u64;
                let bytes_expected = self.bytes_expected();
                self.transfer.record_chunk(len);

                let bytes_downloaded = match &mut self.store {
                    ByteStore::Memory(store) => store.append(&chunk),
                    ByteStore::Disk(store) => store.record_download(chunk, bytes_expected),
                };
                debug!("Received {} bytes ({} total)", len, bytes_downloaded);

                self.emit(EngineEvent::Progress {
                    bytes_downloaded,
                    bytes_expected,
                });
                self.sweep().await;
            }
            TransferEvent::Completed => {
                self.transfer.finish(TransferState::Completed);
                info!(
                    "Transfer completed: {} bytes",
                    self.store.bytes_available()
                );
                self.sweep().await;
                self.report_completion();
            }
            TransferEvent::Failed(error) => {
                self.transfer.finish(TransferState::Failed);
                self.fail(FulfillmentError::TransportFailure(error));
            }
        }
    }

    /// Handles a message from the disk cache writer.
    pub async fn on_cache_event(&mut self, event: CacheEvent) {
        if self.failure.is_some() || self.lifecycle.is_disposed() {
            return;
        }

        let ByteStore::Disk(store) = &mut self.store else {
            return;
        };

        match event {
            CacheEvent::Cached { len } => {
                let bytes_cached = store.record_cached(len);
                let bytes_expected = self.bytes_expected();
                self.emit(EngineEvent::CacheProgress {
                    bytes_cached,
                    bytes_expected,
                });
                self.sweep().await;
                self.report_completion();
            }
            CacheEvent::Failed(error) => self.fail(FulfillmentError::CacheWriteFailure(error)),
        }
    }

    /// Tears the engine down. Safe to call more than once.
    pub fn dispose(&mut self) {
        if !self.lifecycle.dispose() {
            return;
        }

        self.transfer.cancel();
        let dropped = self.pending.clear();

        if let ByteStore::Disk(store) = &mut self.store {
            store.stop_writer();
            if !self.completion_reported && self.failure.is_none() {
                let error = FulfillmentError::DisposedWhileIncomplete {
                    bytes_cached: store.bytes_cached(),
                    bytes_expected: self
                        .metadata
                        .as_ref()
                        .and_then(|metadata| metadata.content_length),
                };
                warn!("Disposed before caching finished: {}", error);
                self.emit(EngineEvent::DownloadFailed { error });
            }
        }

        info!("Engine disposed ({} pending requests dropped)", dropped);
    }

    fn ensure_transfer(&mut self) {
        let Some(url) = self.resource.url() else {
            return;
        };

        if self.transfer.state() == TransferState::Idle {
            self.transfer.start(
                Arc::clone(&self.transport),
                url.clone(),
                self.transfer_events.clone(),
                self.store.staging_budget(),
            );
        }
    }

    async fn sweep(&mut self) {
        if self.failure.is_some() || self.lifecycle.is_disposed() {
            return;
        }

        let transfer_finished =
            self.resource.is_in_memory() || self.transfer.state() == TransferState::Completed;
        // Once no further chunk or cache event can arrive, windowed requests
        // would never be swept again, so keep sweeping until nothing moves.
        let settled = transfer_finished && self.store.readable_bytes() == self.store.bytes_available();

        let mut delivered_bytes = 0;
        loop {
            let report = match self.pending.sweep(&self.store, self.metadata.as_ref()).await {
                Ok(report) => report,
                Err(e) => {
                    self.fail(e.into());
                    return;
                }
            };

            if report.deliveries > 0 {
                debug!(
                    "Sweep delivered {} bytes in {} deliveries, resolved {}",
                    report.delivered_bytes,
                    report.deliveries,
                    report.resolved.len()
                );
            }
            delivered_bytes += report.delivered_bytes;

            if !settled || report.deliveries == 0 || self.pending.is_empty() {
                break;
            }
        }

        if self.lifecycle.observe_sweep(
            self.metadata.as_ref(),
            self.store.readable_bytes(),
            transfer_finished,
            delivered_bytes > 0,
        ) {
            info!("Ready to play");
            self.emit(EngineEvent::ReadyToPlay);
        }
    }

    /// Emits the mode-specific completion notification, at most once.
    fn report_completion(&mut self) {
        if self.completion_reported || self.failure.is_some() {
            return;
        }

        let transfer_completed = self.transfer.state() == TransferState::Completed;
        let bytes_expected = self.bytes_expected();
        match &self.store {
            ByteStore::Memory(store) => {
                if transfer_completed {
                    self.completion_reported = true;
                    let payload = store.payload();
                    self.emit(EngineEvent::Downloaded { payload });
                }
            }
            ByteStore::Disk(store) => {
                let expected = bytes_expected
                    .or_else(|| transfer_completed.then_some(store.bytes_downloaded()));
                if store.is_complete(expected) {
                    self.completion_reported = true;
                    let total_bytes = store.bytes_cached();
                    info!("Cache complete: {} bytes", total_bytes);
                    self.emit(EngineEvent::CacheCompleted { total_bytes });
                }
            }
        }
    }

    fn fail(&mut self, error: FulfillmentError) {
        if self.failure.is_some() {
            return;
        }

        error!("Fulfillment failed: {}", error);
        self.failure = Some(error.clone());
        self.transfer.cancel();
        let dropped = self.pending.clear();
        if dropped > 0 {
            debug!("Dropped {} pending requests", dropped);
        }
        if let ByteStore::Disk(store) = &mut self.store {
            store.stop_writer();
        }
        self.emit(EngineEvent::DownloadFailed { error });
    }

    fn bytes_expected(&self) -> Option<u64> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.content_length)
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine; notifications are optional.
        let _ = self.events.send(event);
    }
}

fn event_name(event: &TransferEvent) -> &'static str {
    match event {
        TransferEvent::ResponseReceived(_) => "response",
        TransferEvent::ChunkReceived(_) => "chunk",
        TransferEvent::Completed => "completed",
        TransferEvent::Failed(_) => "failed",
    }
}
