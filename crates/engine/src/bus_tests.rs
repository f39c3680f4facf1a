// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::AtomicUsize;
use zs_core::MessageContent;

fn bus(dir: &tempfile::TempDir) -> MessageBus {
    let ledger = Ledger::open(dir.path(), ClusterId::new("c1")).unwrap();
    MessageBus::new(ClusterId::new("c1"), Arc::new(Mutex::new(ledger)))
}

fn msg(topic: &str) -> Message {
    Message::new(topic, "tester", MessageContent::text("x"))
}

#[tokio::test]
async fn publish_assigns_identity_and_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let bus = bus(&dir);

    let a = bus.publish(msg("A")).await.unwrap();
    let b = bus.publish(msg("B")).await.unwrap();

    assert!(!a.id.is_empty());
    assert_ne!(a.id, b.id);
    assert_eq!(a.sequence, 1);
    assert_eq!(b.sequence, 2);
    assert!(a.timestamp > 0);
    assert_eq!(a.cluster_id, ClusterId::new("c1"));
}

#[tokio::test]
async fn published_message_is_durable_before_return() {
    let dir = tempfile::tempdir().unwrap();
    let bus = bus(&dir);

    let stored = bus.publish(msg("A")).await.unwrap();
    // Visible to a query immediately after publish returns, exactly once
    let found = bus
        .query(&MessageQuery {
            topic: Some("A".to_string()),
            since_seq: Some(stored.sequence - 1),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, stored.id);
}

#[tokio::test]
async fn subscribers_receive_in_ledger_order() {
    let dir = tempfile::tempdir().unwrap();
    let bus = bus(&dir);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    bus.subscribe(Arc::new(move |m| {
        let seen = Arc::clone(&seen_clone);
        Box::pin(async move {
            seen.lock().push(m.sequence);
            Ok(())
        })
    }));

    for i in 0..5 {
        bus.publish(msg(&format!("T{i}"))).await.unwrap();
    }
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn topic_subscription_filters() {
    let dir = tempfile::tempdir().unwrap();
    let bus = bus(&dir);

    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    bus.subscribe_topic("AGENT_*", Arc::new(move |_| {
        let hits = Arc::clone(&hits_clone);
        Box::pin(async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }));

    bus.publish(msg("AGENT_OUTPUT")).await.unwrap();
    bus.publish(msg("CLUSTER_COMPLETE")).await.unwrap();
    bus.publish(msg("AGENT_ERROR")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_handler_does_not_starve_others() {
    let dir = tempfile::tempdir().unwrap();
    let bus = bus(&dir);

    bus.subscribe(Arc::new(|_| {
        Box::pin(async move { Err("handler exploded".to_string()) })
    }));

    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    bus.subscribe(Arc::new(move |_| {
        let hits = Arc::clone(&hits_clone);
        Box::pin(async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }));

    bus.publish(msg("A")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    // The append was not rolled back either
    assert_eq!(bus.count(Some("A")).unwrap(), 1);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let bus = bus(&dir);

    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    let handle = bus.subscribe(Arc::new(move |_| {
        let hits = Arc::clone(&hits_clone);
        Box::pin(async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }));

    bus.publish(msg("A")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.unsubscribe();
    bus.publish(msg("B")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn publish_fails_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let bus = bus(&dir);
    bus.close();
    let err = bus.publish(msg("A")).await.unwrap_err();
    assert!(matches!(err, StorageError::Closed(_)));
}
