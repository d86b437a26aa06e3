//! Integration tests for the shared device frame queues.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;

use stereocast_core::device::FRAME_QUEUE_CAPACITY;
use stereocast_core::{DeviceConfig, DeviceManager, StreamKind};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn both_streams_deliver_frames() {
    let manager = DeviceManager::new();
    let device = manager.acquire(&DeviceConfig::default()).await.unwrap();

    let mut color_rx = device.subscribe(StreamKind::Color);
    let mut depth_rx = device.subscribe(StreamKind::Depth);

    let color = timeout(RECV_TIMEOUT, color_rx.recv()).await.unwrap().unwrap();
    let depth = timeout(RECV_TIMEOUT, depth_rx.recv()).await.unwrap().unwrap();

    assert_eq!(color.kind, StreamKind::Color);
    assert_eq!(depth.kind, StreamKind::Depth);
    assert_eq!(color.data.len(), color.expected_len());
    assert_eq!(depth.data.len(), depth.expected_len());

    manager.release().await;
}

#[tokio::test]
async fn slow_subscriber_drops_oldest_without_blocking_producer() {
    let manager = DeviceManager::new();
    let device = manager.acquire(&DeviceConfig::default()).await.unwrap();

    // Subscribe, then stall until well past the queue capacity.
    let mut stalled = device.subscribe(StreamKind::Color);
    let mut live = device.subscribe(StreamKind::Color);
    let mut seen = 0u32;
    while seen < FRAME_QUEUE_CAPACITY as u32 + 3 {
        timeout(RECV_TIMEOUT, live.recv()).await.unwrap().unwrap();
        seen += 1;
    }

    // The stalled subscriber lags and skips forward; the pump kept going.
    match stalled.recv().await {
        Err(RecvError::Lagged(skipped)) => assert!(skipped > 0),
        Ok(frame) => panic!("expected lag, got frame seq {}", frame.sequence),
        Err(e) => panic!("unexpected recv error: {e}"),
    }
    let frame = timeout(RECV_TIMEOUT, stalled.recv()).await.unwrap().unwrap();
    assert!(frame.sequence >= FRAME_QUEUE_CAPACITY as u64 - 1);

    manager.release().await;
}

#[tokio::test]
async fn frames_arrive_in_sequence_order() {
    let manager = DeviceManager::new();
    let device = manager.acquire(&DeviceConfig::default()).await.unwrap();

    let mut rx = device.subscribe(StreamKind::Depth);
    let mut last: Option<u64> = None;
    for _ in 0..5 {
        let frame = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        if let Some(prev) = last {
            assert!(frame.sequence > prev, "sequence went backwards");
        }
        last = Some(frame.sequence);
    }

    manager.release().await;
}

#[tokio::test]
async fn release_stops_frame_delivery() {
    let manager = DeviceManager::new();
    let device = manager.acquire(&DeviceConfig::default()).await.unwrap();
    let mut rx = device.subscribe(StreamKind::Color);
    timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();

    manager.release().await;
    drop(device);

    // Drain whatever was still queued; the channel then reports closed.
    let closed = timeout(RECV_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "queue never closed after release");
}

#[tokio::test]
async fn selected_streams_only() {
    let manager = DeviceManager::new();
    let config = DeviceConfig {
        streams: vec![StreamKind::Depth],
        ..Default::default()
    };
    let device = manager.acquire(&config).await.unwrap();

    let mut depth_rx = device.subscribe(StreamKind::Depth);
    let mut color_rx = device.subscribe(StreamKind::Color);

    timeout(RECV_TIMEOUT, depth_rx.recv()).await.unwrap().unwrap();
    // Give the pump time to have produced color frames if it (wrongly) would.
    assert!(
        timeout(Duration::from_millis(200), color_rx.recv()).await.is_err(),
        "color frames published despite depth-only selection"
    );
    assert_eq!(device.frames_published(StreamKind::Color), 0);

    manager.release().await;
}

#[tokio::test]
async fn device_outlives_individual_subscribers() {
    let manager = DeviceManager::new();
    let device = manager.acquire(&DeviceConfig::default()).await.unwrap();

    {
        let mut rx = device.subscribe(StreamKind::Color);
        timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        // Subscriber dropped here.
    }

    let before = device.frames_published(StreamKind::Color);
    let mut rx = device.subscribe(StreamKind::Color);
    let frame = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert!(frame.sequence >= before);

    let device2 = manager.acquire(&DeviceConfig::default()).await.unwrap();
    assert!(Arc::ptr_eq(&device, &device2));

    manager.release().await;
}
