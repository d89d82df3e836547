//! The one transfer an engine runs.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use super::{ResponseMetadata, Transport, TransportError};
use crate::store::StagingBudget;

/// Lifecycle of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Not started yet
    Idle,
    /// Transport request issued, data may still arrive
    Active,
    /// The body ended normally
    Completed,
    /// The transport reported an error
    Failed,
    /// Cancelled by the engine
    Cancelled,
}

impl TransferState {
    /// Returns true once the session can no longer produce events.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }
}

/// What the transfer task reports back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    ResponseReceived(ResponseMetadata),
    ChunkReceived(Bytes),
    Completed,
    Failed(TransportError),
}

/// Owns the single sequential transfer of a resource.
///
/// `start` is guarded so a second transfer can never be issued; events from a
/// session that is no longer active are to be ignored by the receiver.
#[derive(Debug)]
pub struct TransferSession {
    state: TransferState,
    task: Option<JoinHandle<()>>,
    bytes_received: u64,
}

impl TransferSession {
    pub fn new() -> Self {
        Self {
            state: TransferState::Idle,
            task: None,
            bytes_received: 0,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransferState::Active
    }

    /// Starts the transfer if it has never been started.
    ///
    /// With a `budget`, every chunk waits for staging room before it is sent.
    ///
    /// Returns false when a transfer already exists or has finished.
    pub fn start(
        &mut self,
        transport: Arc<dyn Transport>,
        url: Url,
        events: mpsc::UnboundedSender<TransferEvent>,
        budget: Option<StagingBudget>,
    ) -> bool {
        if self.state != TransferState::Idle {
            return false;
        }

        info!("Starting transfer of {}", url);
        self.state = TransferState::Active;
        self.task = Some(tokio::spawn(run_transfer(transport, url, events, budget)));
        true
    }

    pub fn record_chunk(&mut self, len: u64) {
        self.bytes_received += len;
    }

    /// Marks the session finished after its task reported a terminal event.
    pub fn finish(&mut self, state: TransferState) {
        if self.state == TransferState::Active && state.is_terminal() {
            self.state = state;
            self.task = None;
        }
    }

    /// Cancels the underlying transport request.
    ///
    /// Idempotent: returns false when there was nothing active to cancel.
    pub fn cancel(&mut self) -> bool {
        if self.state != TransferState::Active {
            return false;
        }

        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.state = TransferState::Cancelled;
        debug!("Transfer cancelled after {} bytes", self.bytes_received);
        true
    }
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Runs on the transfer task; every outcome is sent as an event.
async fn run_transfer(
    transport: Arc<dyn Transport>,
    url: Url,
    events: mpsc::UnboundedSender<TransferEvent>,
    budget: Option<StagingBudget>,
) {
    let response = match transport.open(&url).await {
        Ok(response) => response,
        Err(error) => {
            let _ = events.send(TransferEvent::Failed(error));
            return;
        }
    };

    if events
        .send(TransferEvent::ResponseReceived(response.metadata))
        .is_err()
    {
        return;
    }

    let mut body = response.body;
    while let Some(item) = body.next().await {
        let event = match item {
            Ok(chunk) if chunk.is_empty() => continue,
            Ok(chunk) => {
                if let Some(budget) = &budget {
                    if !budget.reserve(chunk.len() as u64).await {
                        debug!("Staging budget closed; stopping transfer of {}", url);
                        return;
                    }
                }
                TransferEvent::ChunkReceived(chunk)
            }
            Err(error) => {
                let _ = events.send(TransferEvent::Failed(error));
                return;
            }
        };

        if events.send(event).is_err() {
            return;
        }
    }

    let _ = events.send(TransferEvent::Completed);
}
