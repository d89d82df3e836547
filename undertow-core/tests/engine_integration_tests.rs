//! Integration tests for the fulfillment engine in memory mode.
//!
//! These drive the public `FulfillmentHandle` API against a scripted
//! transport, so every chunk boundary is under test control.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::timeout;
use undertow_core::config::UndertowConfig;
use undertow_core::engine::test_mocks::{ScriptedTransport, TransportFeed};
use undertow_core::engine::{EngineEvents, FulfillmentHandle, LifecycleState};
use undertow_core::store::BufferingMode;
use undertow_core::transfer::{ResponseMetadata, TransferState};
use undertow_core::{EngineEvent, FulfillmentError, RangeDelivery, Resource, TransportError};
use url::Url;

const WAIT: Duration = Duration::from_secs(2);

/// Test fixture wiring an engine to a scripted transport.
struct EngineTestFixture {
    handle: FulfillmentHandle,
    events: EngineEvents,
    feed: TransportFeed,
    transport: Arc<ScriptedTransport>,
}

impl EngineTestFixture {
    fn new(content_length: Option<u64>) -> Self {
        Self::with_config(content_length, UndertowConfig::for_testing())
    }

    fn with_config(content_length: Option<u64>, config: UndertowConfig) -> Self {
        let (transport, feed) = ScriptedTransport::new(response(content_length));
        let transport = Arc::new(transport);
        let (handle, events) = undertow_core::spawn_fulfillment_engine(
            Resource::remote(clip_url()),
            BufferingMode::Memory,
            transport.clone(),
            &config,
        );

        Self {
            handle,
            events,
            feed,
            transport,
        }
    }

    async fn next_event(&mut self) -> EngineEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("engine event timed out")
            .expect("engine event channel closed")
    }

    /// Skips events until one matches.
    async fn wait_for(&mut self, matches: impl Fn(&EngineEvent) -> bool) -> EngineEvent {
        loop {
            let event = self.next_event().await;
            if matches(&event) {
                return event;
            }
        }
    }
}

fn clip_url() -> Url {
    Url::parse("http://media.example.com/clips/intro.mp4").unwrap()
}

fn response(content_length: Option<u64>) -> ResponseMetadata {
    ResponseMetadata {
        status: 200,
        content_type: Some("video/mp4".to_string()),
        content_length,
        accept_ranges: true,
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn next_delivery(request: &mut undertow_core::RangeRequestHandle) -> RangeDelivery {
    timeout(WAIT, request.recv())
        .await
        .expect("delivery timed out")
        .expect("request dropped")
}

#[tokio::test]
async fn test_memory_download_reports_progress_then_payload() {
    let mut fixture = EngineTestFixture::new(Some(1000));
    fixture.handle.start_download().await.unwrap();

    let body = payload(1000);
    for chunk in body.chunks(100) {
        fixture.feed.push(chunk);
    }
    fixture.feed.finish();

    let mut progress = Vec::new();
    let downloaded = loop {
        match fixture.next_event().await {
            EngineEvent::Progress {
                bytes_downloaded,
                bytes_expected,
            } => {
                assert_eq!(bytes_expected, Some(1000));
                progress.push(bytes_downloaded);
            }
            EngineEvent::Downloaded { payload } => break payload,
            EngineEvent::DownloadFailed { error } => panic!("unexpected failure: {error}"),
            _ => {}
        }
    };

    assert_eq!(progress, (1..=10).map(|i| i * 100).collect::<Vec<u64>>());
    assert_eq!(downloaded, Bytes::from(body));

    let status = fixture.handle.status().await.unwrap();
    assert_eq!(status.transfer, TransferState::Completed);
    assert_eq!(status.bytes_available, 1000);
    assert_eq!(status.bytes_cached, None);
}

#[tokio::test]
async fn test_range_is_served_once_bytes_arrive() {
    let fixture = EngineTestFixture::new(Some(100));
    let request = fixture.handle.request_range(10, 20).unwrap();

    fixture.feed.push(payload(100));

    let (metadata, bytes) = timeout(WAIT, request.collect()).await.unwrap().unwrap();
    assert_eq!(metadata.content_type, "video/mp4");
    assert_eq!(metadata.content_length, Some(100));
    assert!(metadata.supports_range_access);
    assert_eq!(bytes, Bytes::from(payload(100)[10..30].to_vec()));
}

#[tokio::test]
async fn test_request_receives_partial_data_then_remainder() {
    let mut fixture = EngineTestFixture::new(Some(200));
    let mut request = fixture.handle.request_range(0, 150).unwrap();

    let body = payload(200);
    fixture.feed.push(&body[..100]);

    assert!(matches!(
        next_delivery(&mut request).await,
        RangeDelivery::Metadata(_)
    ));
    assert_eq!(
        next_delivery(&mut request).await,
        RangeDelivery::Data {
            offset: 0,
            bytes: Bytes::copy_from_slice(&body[..100]),
        }
    );

    let status = fixture.handle.status().await.unwrap();
    assert_eq!(status.pending_requests, 1);
    assert!(matches!(request.try_recv(), Err(TryRecvError::Empty)));

    fixture.feed.push(&body[100..]);
    assert_eq!(
        next_delivery(&mut request).await,
        RangeDelivery::Data {
            offset: 100,
            bytes: Bytes::copy_from_slice(&body[100..150]),
        }
    );
    assert_eq!(next_delivery(&mut request).await, RangeDelivery::Finished);

    fixture.feed.finish();
    fixture
        .wait_for(|event| matches!(event, EngineEvent::Downloaded { .. }))
        .await;
}

#[tokio::test]
async fn test_many_requests_share_one_transfer() {
    let mut fixture = EngineTestFixture::new(Some(300));
    let requests: Vec<_> = [(0, 100), (100, 100), (250, 50)]
        .into_iter()
        .map(|(offset, length)| fixture.handle.request_range(offset, length).unwrap())
        .collect();
    fixture.handle.start_download().await.unwrap();

    let body = payload(300);
    fixture.feed.push(&body[..150]);
    fixture.feed.push(&body[150..]);
    fixture.feed.finish();

    for (request, (offset, length)) in requests.into_iter().zip([(0, 100), (100, 100), (250, 50)]) {
        let (_, bytes) = timeout(WAIT, request.collect()).await.unwrap().unwrap();
        assert_eq!(&bytes[..], &body[offset..offset + length]);
    }

    fixture
        .wait_for(|event| matches!(event, EngineEvent::Downloaded { .. }))
        .await;
    assert_eq!(fixture.transport.open_count(), 1);
}

#[tokio::test]
async fn test_downloaded_fires_exactly_once() {
    let mut fixture = EngineTestFixture::new(None);
    fixture.handle.start_download().await.unwrap();
    fixture.handle.start_download().await.unwrap();

    fixture.feed.push(payload(40));
    fixture.feed.finish();
    fixture
        .wait_for(|event| matches!(event, EngineEvent::Downloaded { .. }))
        .await;

    fixture.handle.dispose().await;

    let mut later = Vec::new();
    while let Ok(Some(event)) = timeout(WAIT, fixture.events.recv()).await {
        later.push(event);
    }
    assert!(
        !later
            .iter()
            .any(|event| matches!(event, EngineEvent::Downloaded { .. } | EngineEvent::DownloadFailed { .. }))
    );
}

#[tokio::test]
async fn test_cancelled_request_gets_nothing_more() {
    let fixture = EngineTestFixture::new(Some(200));
    let mut request = fixture.handle.request_range(0, 200).unwrap();

    fixture.feed.push(payload(50));
    assert!(matches!(
        next_delivery(&mut request).await,
        RangeDelivery::Metadata(_)
    ));
    assert!(matches!(
        next_delivery(&mut request).await,
        RangeDelivery::Data { offset: 0, .. }
    ));

    fixture.handle.cancel_request(request.id());
    let status = fixture.handle.status().await.unwrap();
    assert_eq!(status.pending_requests, 0);

    fixture.feed.push(payload(150));
    assert_eq!(timeout(WAIT, request.recv()).await.unwrap(), None);

    // Cancelling again is harmless.
    fixture.handle.cancel_request(request.id());
    assert!(fixture.handle.status().await.is_ok());
}

#[tokio::test]
async fn test_transport_failure_drops_pending_requests() {
    let mut fixture = EngineTestFixture::new(Some(500));
    let request = fixture.handle.request_range(0, 500).unwrap();

    let error = TransportError::Body {
        reason: "connection reset".to_string(),
    };
    fixture.feed.push(payload(100));
    fixture.feed.fail(error.clone());

    let result = timeout(WAIT, request.collect()).await.unwrap();
    assert!(matches!(result, Err(FulfillmentError::RequestDropped { .. })));

    let failed = fixture
        .wait_for(|event| matches!(event, EngineEvent::DownloadFailed { .. }))
        .await;
    assert_eq!(
        failed,
        EngineEvent::DownloadFailed {
            error: FulfillmentError::TransportFailure(error.clone()),
        }
    );

    // The failure is terminal for later callers too.
    let late = fixture.handle.request_range(0, 10).unwrap();
    assert!(timeout(WAIT, late.collect()).await.unwrap().is_err());
    assert_eq!(
        fixture.handle.start_download().await,
        Err(FulfillmentError::TransportFailure(error))
    );
    let status = fixture.handle.status().await.unwrap();
    assert_eq!(status.transfer, TransferState::Failed);
}

#[tokio::test]
async fn test_open_failure_is_terminal() {
    let error = TransportError::HttpStatus {
        url: clip_url().to_string(),
        status: 404,
    };
    let transport = Arc::new(ScriptedTransport::failing(error.clone()));
    let (handle, mut events) = undertow_core::spawn_fulfillment_engine(
        Resource::remote(clip_url()),
        BufferingMode::Memory,
        transport,
        &UndertowConfig::for_testing(),
    );

    let request = handle.request_range(0, 10).unwrap();
    assert!(timeout(WAIT, request.collect()).await.unwrap().is_err());

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        EngineEvent::DownloadFailed {
            error: FulfillmentError::TransportFailure(error),
        }
    );
}

#[tokio::test]
async fn test_in_memory_resource_needs_no_transfer() {
    let (transport, _feed) = ScriptedTransport::new(ResponseMetadata::default());
    let transport = Arc::new(transport);
    let body = Bytes::from(payload(64));
    let (handle, mut events) = undertow_core::spawn_fulfillment_engine(
        Resource::in_memory(body.clone(), "audio/mpeg"),
        BufferingMode::Memory,
        transport.clone(),
        &UndertowConfig::for_testing(),
    );

    handle.start_download().await.unwrap();
    let (metadata, bytes) = timeout(WAIT, handle.request_range(8, 16).unwrap().collect())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(metadata.content_type, "audio/mpeg");
    assert_eq!(metadata.content_length, Some(64));
    assert_eq!(bytes, body.slice(8..24));
    assert_eq!(transport.open_count(), 0);

    let first = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(first, EngineEvent::MetadataResolved(_)));
    let second = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(second, EngineEvent::ReadyToPlay);

    let status = handle.status().await.unwrap();
    assert_eq!(status.transfer, TransferState::Idle);
}

#[tokio::test]
async fn test_ready_then_stall_then_resume() {
    let mut fixture = EngineTestFixture::new(Some(100));
    fixture.handle.start_download().await.unwrap();

    // Testing config prebuffers 16 bytes.
    fixture.feed.push(payload(10));
    fixture
        .wait_for(|event| matches!(event, EngineEvent::Progress { .. }))
        .await;
    let status = fixture.handle.status().await.unwrap();
    assert_eq!(status.lifecycle, LifecycleState::Created);

    fixture.feed.push(payload(10));
    fixture
        .wait_for(|event| *event == EngineEvent::ReadyToPlay)
        .await;

    fixture.handle.report_stall();
    fixture.handle.report_stall();
    let stalled = fixture.next_event().await;
    assert_eq!(stalled, EngineEvent::PlaybackStalled);
    let status = fixture.handle.status().await.unwrap();
    assert_eq!(status.lifecycle, LifecycleState::Stalled);
    assert!(matches!(fixture.events.try_recv(), Err(TryRecvError::Empty)));

    let request = fixture.handle.request_range(0, 20).unwrap();
    timeout(WAIT, request.collect()).await.unwrap().unwrap();
    let status = fixture.handle.status().await.unwrap();
    assert_eq!(status.lifecycle, LifecycleState::Playable);
}

#[tokio::test]
async fn test_zero_length_request_finishes_with_metadata() {
    let fixture = EngineTestFixture::new(Some(10));
    let mut request = fixture.handle.request_range(5, 0).unwrap();

    fixture.feed.push(payload(1));
    assert!(matches!(
        next_delivery(&mut request).await,
        RangeDelivery::Metadata(_)
    ));
    assert_eq!(next_delivery(&mut request).await, RangeDelivery::Finished);
}

#[tokio::test]
async fn test_content_type_falls_back_to_extension() {
    let (transport, feed) = ScriptedTransport::new(ResponseMetadata {
        status: 200,
        content_type: None,
        content_length: Some(4),
        accept_ranges: false,
    });
    let (handle, _events) = undertow_core::spawn_fulfillment_engine(
        Resource::remote(clip_url()),
        BufferingMode::Memory,
        Arc::new(transport),
        &UndertowConfig::for_testing(),
    );

    let request = handle.request_range(0, 4).unwrap();
    feed.push(b"abcd");
    let (metadata, _) = timeout(WAIT, request.collect()).await.unwrap().unwrap();
    assert_eq!(metadata.content_type, "video/mp4");
    assert!(metadata.supports_range_access);
}

#[tokio::test]
async fn test_overflowing_range_is_rejected() {
    let fixture = EngineTestFixture::new(None);
    let result = fixture.handle.request_range(u64::MAX, 2);
    assert!(matches!(
        result,
        Err(FulfillmentError::InvalidRange {
            offset: u64::MAX,
            length: 2
        })
    ));
}

#[tokio::test]
async fn test_dispose_drops_requests_and_stops_engine() {
    let mut fixture = EngineTestFixture::new(Some(100));
    let request = fixture.handle.request_range(0, 100).unwrap();
    fixture.feed.push(payload(10));
    fixture
        .wait_for(|event| matches!(event, EngineEvent::Progress { .. }))
        .await;

    fixture.handle.dispose().await;
    fixture.handle.dispose().await;

    assert!(timeout(WAIT, request.collect()).await.unwrap().is_err());
    assert_eq!(
        fixture.handle.status().await,
        Err(FulfillmentError::EngineShutdown)
    );

    // Memory mode has nothing to report on disposal.
    while let Ok(Some(event)) = timeout(WAIT, fixture.events.recv()).await {
        assert!(!matches!(event, EngineEvent::DownloadFailed { .. }));
    }
}

#[tokio::test]
async fn test_cancel_racing_resolution_leaves_no_pending_request() {
    let fixture = EngineTestFixture::new(Some(64));
    let mut request = fixture.handle.request_range(0, 32).unwrap();

    fixture.feed.push(payload(64));
    fixture.handle.cancel_request(request.id());

    let mut finished = false;
    while let Ok(Some(delivery)) = timeout(WAIT, request.recv()).await {
        if delivery == RangeDelivery::Finished {
            finished = true;
        }
    }

    // Either fully answered or silently dropped, never left half-pending.
    let status = fixture.handle.status().await.unwrap();
    assert_eq!(status.pending_requests, 0);
    if !finished {
        assert!(matches!(request.try_recv(), Err(TryRecvError::Disconnected)));
    }
}
