//! Command definitions for the fulfillment engine actor model.

use tokio::sync::{mpsc, oneshot};

use super::pending::{RangeDelivery, RequestId};
use super::{EngineStatus, FulfillmentError};

/// Commands that can be sent to the fulfillment engine actor.
///
/// Range registration, cancellation and stall reports are fire-and-forget so
/// callers never wait on the engine; the remaining commands carry a response
/// channel for the actor to send back results.
#[derive(Debug)]
pub enum EngineCommand {
    /// Register a range request and sweep immediately.
    RequestRange {
        id: RequestId,
        offset: u64,
        length: u64,
        deliveries: mpsc::UnboundedSender<RangeDelivery>,
    },
    /// Forget a range request; no effect once it has resolved.
    CancelRequest { id: RequestId },
    /// Start the transfer without any pending request.
    StartDownload {
        responder: oneshot::Sender<Result<(), FulfillmentError>>,
    },
    /// The player ran out of data.
    ReportStall,
    /// Snapshot the engine state.
    GetStatus {
        responder: oneshot::Sender<EngineStatus>,
    },
    /// Tear the engine down and stop the actor.
    Dispose { responder: oneshot::Sender<()> },
}
