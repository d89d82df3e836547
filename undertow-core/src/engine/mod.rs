//! Fulfillment engine actor
//!
//! One task owns the resource's byte store, the pending range requests and
//! the transfer session. Callers talk to it through [`FulfillmentHandle`];
//! the transfer and the disk cache writer report back over internal channels.
//! Every state change happens on that one task, so sweeps never race with
//! cancellation or incoming data.

pub mod actor;
pub mod commands;
pub mod core;
pub mod handle;
pub mod lifecycle;
pub mod pending;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use bytes::Bytes;
pub use actor::spawn_fulfillment_engine;
pub use commands::EngineCommand;
pub use self::core::{EngineChannels, FulfillmentEngine};
pub use handle::{EngineEvents, FulfillmentHandle, RangeRequestHandle};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use pending::{PendingRequestSet, RangeDelivery, RangeRequest, RequestId, SweepReport};

use crate::resource::ContentMetadata;
use crate::store::{CacheError, StoreError};
use crate::transfer::{TransferState, TransportError};

/// Errors produced by the fulfillment engine.
///
/// Every failure is terminal: the engine reports it once and stops serving.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FulfillmentError {
    /// The network transfer failed
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    /// The disk cache rejected a chunk, so the cached stream can't be trusted
    #[error("cache write failure: {0}")]
    CacheWriteFailure(#[from] CacheError),

    /// A read reached past the received bytes
    #[error("read of {len} bytes at {start} exceeds {available} available bytes")]
    OutOfRange { start: u64, len: u64, available: u64 },

    /// The engine was disposed before the disk cache held the whole resource
    #[error("disposed after caching {bytes_cached} of {bytes_expected:?} bytes")]
    DisposedWhileIncomplete {
        bytes_cached: u64,
        bytes_expected: Option<u64>,
    },

    /// A range request was dropped before it was fully answered
    #[error("range request {id} dropped before completion")]
    RequestDropped { id: RequestId },

    /// `offset + length` does not fit in a byte offset
    #[error("invalid range: offset {offset} + length {length} overflows")]
    InvalidRange { offset: u64, length: u64 },

    /// The engine task is no longer running
    #[error("fulfillment engine has shut down")]
    EngineShutdown,
}

impl From<StoreError> for FulfillmentError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::OutOfRange {
                start,
                len,
                available,
            } => FulfillmentError::OutOfRange {
                start,
                len,
                available,
            },
        }
    }
}

/// Notifications sent to the caller. All of them may be ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Content metadata became known
    MetadataResolved(ContentMetadata),
    /// A chunk arrived from the transfer
    Progress {
        bytes_downloaded: u64,
        bytes_expected: Option<u64>,
    },
    /// The disk cache accepted a chunk
    CacheProgress {
        bytes_cached: u64,
        bytes_expected: Option<u64>,
    },
    /// Metadata and the prebuffer are available; fired once
    ReadyToPlay,
    /// The player reported it is starved for data
    PlaybackStalled,
    /// Memory mode: the whole resource arrived; fired once
    Downloaded { payload: Bytes },
    /// Disk mode: every expected byte is cached; fired once
    CacheCompleted { total_bytes: u64 },
    /// The engine hit a terminal failure
    DownloadFailed { error: FulfillmentError },
}

/// Point-in-time view of engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub lifecycle: LifecycleState,
    pub transfer: TransferState,
    /// Contiguous bytes received from offset 0
    pub bytes_available: u64,
    /// Bytes accepted by the disk cache; `None` in memory mode
    pub bytes_cached: Option<u64>,
    /// Downloaded bytes not yet cached; `None` in memory mode
    pub staged_bytes: Option<u64>,
    pub pending_requests: usize,
    pub metadata: Option<ContentMetadata>,
    pub failure: Option<FulfillmentError>,
}
