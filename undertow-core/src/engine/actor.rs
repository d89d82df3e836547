//! Actor implementation for the fulfillment engine.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::commands::EngineCommand;
use super::core::{EngineChannels, FulfillmentEngine};
use super::handle::{EngineEvents, FulfillmentHandle};
use crate::config::UndertowConfig;
use crate::resource::Resource;
use crate::store::{BufferingMode, CacheEvent};
use crate::transfer::{TransferEvent, Transport};

/// Spawns the fulfillment engine actor for one resource.
///
/// Nothing is fetched until the first range request or an explicit
/// [`FulfillmentHandle::start_download`]. The returned [`EngineEvents`] may be
/// dropped if the caller does not care about notifications.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use std::sync::Arc;
/// use undertow_core::config::UndertowConfig;
/// use undertow_core::store::BufferingMode;
/// use undertow_core::{HttpTransport, Resource, spawn_fulfillment_engine};
///
/// let config = UndertowConfig::default();
/// let transport = HttpTransport::new(&config.network).unwrap();
/// let url = "https://example.com/clip.mp4".parse().unwrap();
/// let (handle, _events) = spawn_fulfillment_engine(
///     Resource::remote(url),
///     BufferingMode::Memory,
///     Arc::new(transport),
///     &config,
/// );
/// let request = handle.request_range(0, 1024).unwrap();
/// # }
/// ```
pub fn spawn_fulfillment_engine(
    resource: Resource,
    mode: BufferingMode,
    transport: Arc<dyn Transport>,
    config: &UndertowConfig,
) -> (FulfillmentHandle, EngineEvents) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();
    let (cache_tx, cache_rx) = mpsc::unbounded_channel();

    let engine = FulfillmentEngine::new(
        resource,
        mode,
        transport,
        &config.engine,
        EngineChannels {
            events: event_tx,
            transfer: transfer_tx,
            cache: cache_tx,
        },
    );

    tokio::spawn(async move {
        run_actor_loop(engine, command_rx, transfer_rx, cache_rx).await;
    });

    (FulfillmentHandle::new(command_tx), EngineEvents::new(event_rx))
}

/// Runs the actor until disposal or until every handle is dropped.
///
/// Commands, transfer events and cache acknowledgements are processed one at
/// a time, so each handler sees a consistent engine.
async fn run_actor_loop(
    mut engine: FulfillmentEngine,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    mut transfer_events: mpsc::UnboundedReceiver<TransferEvent>,
    mut cache_events: mpsc::UnboundedReceiver<CacheEvent>,
) {
    tracing::debug!("Fulfillment engine actor started");

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    tracing::debug!("All handles dropped");
                    break;
                };
                if !handle_command(&mut engine, command).await {
                    break;
                }
            }
            Some(event) = transfer_events.recv() => {
                engine.on_transfer_event(event).await;
            }
            Some(event) = cache_events.recv() => {
                engine.on_cache_event(event).await;
            }
        }
    }

    engine.dispose();
    tracing::debug!("Fulfillment engine actor stopped");
}

/// Handles a single command for the engine.
/// Returns true to continue processing, false to shutdown.
async fn handle_command(engine: &mut FulfillmentEngine, command: EngineCommand) -> bool {
    match command {
        EngineCommand::RequestRange {
            id,
            offset,
            length,
            deliveries,
        } => {
            engine.request_range(id, offset, length, deliveries).await;
        }

        EngineCommand::CancelRequest { id } => {
            engine.cancel_request(id);
        }

        EngineCommand::StartDownload { responder } => {
            let result = engine.start_download();
            let _ = responder.send(result);
        }

        EngineCommand::ReportStall => {
            engine.report_stall();
        }

        EngineCommand::GetStatus { responder } => {
            let _ = responder.send(engine.status());
        }

        EngineCommand::Dispose { responder } => {
            tracing::debug!("Fulfillment engine disposing on request");
            engine.dispose();
            let _ = responder.send(());
            return false;
        }
    }

    true
}
