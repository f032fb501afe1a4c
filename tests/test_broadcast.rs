//! Subscriber hub delivery and pruning.

mod common;

use std::{sync::Arc, time::Duration};

use anyhow::bail;
use async_trait::async_trait;
use camera_monitor::{
    Broadcaster, MonitorError, MonitorRegistry, StatusSink, StatusSnapshot, SubscriberHub,
    capture::CaptureFactory,
};
use common::FakeCaptures;
use tokio::sync::mpsc;

struct FailingSink;

#[async_trait]
impl StatusSink for FailingSink {
    async fn send(&self, _snapshot: StatusSnapshot) -> anyhow::Result<()> {
        bail!("socket closed")
    }
}

fn hub_with(addresses: &[&str]) -> Arc<SubscriberHub> {
    let registry = MonitorRegistry::builder()
        .capture_factory(FakeCaptures::new() as Arc<dyn CaptureFactory>)
        .without_sessions()
        .build();
    for address in addresses {
        registry.register(address).unwrap();
    }
    Arc::new(SubscriberHub::new(Arc::new(registry)))
}

#[tokio::test]
async fn test_failing_subscriber_does_not_block_others() {
    let hub = hub_with(&["http://cam-1/stream", "http://cam-2/stream"]);

    let (address, _) = hub.subscribe("cam-1", Arc::new(FailingSink)).await.unwrap();
    assert_eq!(address, "http://cam-1/stream");
    let (_, mut rx_one) = hub.subscribe_channel("cam-1").await.unwrap();
    let (_, mut rx_two) = hub.subscribe_channel("http://cam-2/stream").await.unwrap();
    assert_eq!(hub.subscriber_count("http://cam-1/stream").await, 2);

    let report = hub.broadcast_once().await;
    assert_eq!(report.delivered, 2);
    assert_eq!(report.removed, 1);

    let snapshot = rx_one.try_recv().unwrap();
    assert_eq!(snapshot.address, "http://cam-1/stream");
    assert!(!snapshot.person);
    assert!(snapshot.session_id.is_none());
    assert_eq!(rx_two.try_recv().unwrap().address, "http://cam-2/stream");

    assert_eq!(hub.subscriber_count("http://cam-1/stream").await, 1);
    hub.registry().stop_all();
}

#[tokio::test]
async fn test_closed_channel_is_pruned_after_pass() {
    let hub = hub_with(&["http://cam-1/stream"]);
    let (_, rx) = hub.subscribe_channel("cam-1").await.unwrap();
    drop(rx);

    let report = hub.broadcast_once().await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.removed, 1);
    assert_eq!(hub.subscriber_count("http://cam-1/stream").await, 0);
    hub.registry().stop_all();
}

#[tokio::test]
async fn test_unknown_query_and_unsubscribe() {
    let hub = hub_with(&["http://cam-1/stream"]);
    assert!(matches!(
        hub.subscribe_channel("cam-9").await,
        Err(MonitorError::NotFound { .. })
    ));

    let (id, _rx) = hub.subscribe_channel("cam-1").await.unwrap();
    assert!(hub.unsubscribe("http://cam-1/stream", id).await);
    assert!(!hub.unsubscribe("http://cam-1/stream", id).await);
    assert_eq!(hub.subscriber_count("http://cam-1/stream").await, 0);
    hub.registry().stop_all();
}

#[tokio::test]
async fn test_deregistered_monitor_drops_its_group() {
    let hub = hub_with(&["http://cam-1/stream"]);
    let (_, mut rx) = hub.subscribe_channel("cam-1").await.unwrap();

    hub.registry().deregister("http://cam-1/stream");
    let report = hub.broadcast_once().await;
    assert_eq!(report.dropped_groups, 1);
    assert_eq!(report.delivered, 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(hub.subscriber_count("http://cam-1/stream").await, 0);
}

#[tokio::test]
async fn test_broadcaster_pushes_periodically() {
    let hub = hub_with(&["http://cam-1/stream"]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.subscribe("cam-1", Arc::new(tx)).await.unwrap();

    let broadcaster = Broadcaster::spawn(Arc::clone(&hub), Duration::from_millis(20));
    for _ in 0..3 {
        let snapshot = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("snapshot within a second")
            .expect("channel open");
        assert_eq!(snapshot.address, "http://cam-1/stream");
    }
    broadcaster.shutdown().await;
    hub.registry().stop_all();
}
