//! Caller-facing handles for the fulfillment engine actor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

use super::commands::EngineCommand;
use super::pending::{RangeDelivery, RequestId};
use super::{EngineEvent, EngineStatus, FulfillmentError};
use crate::resource::ContentMetadata;

/// Handle for communicating with the fulfillment engine actor.
///
/// Cheap to clone. Range registration, cancellation and stall reports never
/// wait on the engine; the async methods wait for its answer.
#[derive(Clone)]
pub struct FulfillmentHandle {
    sender: mpsc::UnboundedSender<EngineCommand>,
    next_request_id: Arc<AtomicU64>,
}

impl FulfillmentHandle {
    /// Creates a new handle with the given command sender.
    pub fn new(sender: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self {
            sender,
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a request for `length` bytes starting at `offset`.
    ///
    /// The first request starts the transfer. Deliveries arrive on the
    /// returned handle in ascending, contiguous order.
    ///
    /// # Errors
    /// - `FulfillmentError::InvalidRange` - `offset + length` overflows
    /// - `FulfillmentError::EngineShutdown` - Engine no longer running
    pub fn request_range(
        &self,
        offset: u64,
        length: u64,
    ) -> Result<RangeRequestHandle, FulfillmentError> {
        if offset.checked_add(length).is_none() {
            return Err(FulfillmentError::InvalidRange { offset, length });
        }

        let id = RequestId::new(self.next_request_id.fetch_add(1, Ordering::Relaxed));
        let (deliveries, receiver) = mpsc::unbounded_channel();
        self.sender
            .send(EngineCommand::RequestRange {
                id,
                offset,
                length,
                deliveries,
            })
            .map_err(|_| FulfillmentError::EngineShutdown)?;

        Ok(RangeRequestHandle {
            id,
            deliveries: receiver,
        })
    }

    /// Cancels a pending request. Unknown or resolved ids are ignored.
    pub fn cancel_request(&self, id: RequestId) {
        let _ = self.sender.send(EngineCommand::CancelRequest { id });
    }

    /// Starts the transfer before any range is requested.
    ///
    /// A no-op for in-memory resources and for transfers already running.
    ///
    /// # Errors
    /// - The engine's terminal failure, if it has failed
    /// - `FulfillmentError::EngineShutdown` - Engine disposed or stopped
    pub async fn start_download(&self) -> Result<(), FulfillmentError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::StartDownload { responder })
            .map_err(|_| FulfillmentError::EngineShutdown)?;

        rx.await.map_err(|_| FulfillmentError::EngineShutdown)?
    }

    /// Tells the engine the player ran out of data.
    pub fn report_stall(&self) {
        let _ = self.sender.send(EngineCommand::ReportStall);
    }

    /// Returns a snapshot of engine state.
    ///
    /// # Errors
    /// - `FulfillmentError::EngineShutdown` - Engine no longer running
    pub async fn status(&self) -> Result<EngineStatus, FulfillmentError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::GetStatus { responder })
            .map_err(|_| FulfillmentError::EngineShutdown)?;

        rx.await.map_err(|_| FulfillmentError::EngineShutdown)
    }

    /// Cancels the transfer, drops pending requests and stops the actor.
    ///
    /// Disposing an already stopped engine succeeds.
    pub async fn dispose(&self) {
        let (responder, rx) = oneshot::channel();
        if self
            .sender
            .send(EngineCommand::Dispose { responder })
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Receiving side of one range request.
///
/// Dropping it abandons the request; the engine forgets it on its next sweep.
#[derive(Debug)]
pub struct RangeRequestHandle {
    id: RequestId,
    deliveries: mpsc::UnboundedReceiver<RangeDelivery>,
}

impl RangeRequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Next delivery, or `None` once the engine dropped the request or
    /// after `Finished` was received.
    pub async fn recv(&mut self) -> Option<RangeDelivery> {
        self.deliveries.recv().await
    }

    pub fn try_recv(&mut self) -> Result<RangeDelivery, TryRecvError> {
        self.deliveries.try_recv()
    }

    /// Waits for the whole range and returns it with the content metadata.
    ///
    /// # Errors
    /// - `FulfillmentError::RequestDropped` - The engine failed, was disposed
    ///   or cancelled the request before it finished
    pub async fn collect(mut self) -> Result<(ContentMetadata, Bytes), FulfillmentError> {
        let mut metadata = None;
        let mut body = BytesMut::new();

        while let Some(delivery) = self.deliveries.recv().await {
            match delivery {
                RangeDelivery::Metadata(meta) => metadata = Some(meta),
                RangeDelivery::Data { bytes, .. } => body.extend_from_slice(&bytes),
                RangeDelivery::Finished => {
                    if let Some(metadata) = metadata {
                        return Ok((metadata, body.freeze()));
                    }
                    break;
                }
            }
        }

        Err(FulfillmentError::RequestDropped { id: self.id })
    }
}

/// Engine notifications. May be dropped without affecting fulfillment.
#[derive(Debug)]
pub struct EngineEvents {
    receiver: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EngineEvents {
    pub fn new(receiver: mpsc::UnboundedReceiver<EngineEvent>) -> Self {
        Self { receiver }
    }

    /// Next notification; `None` once the engine has stopped.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<EngineEvent, TryRecvError> {
        self.receiver.try_recv()
    }
}
