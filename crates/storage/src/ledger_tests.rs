// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write as _;
use std::sync::mpsc;
use zs_core::{Message, MessageContent};

fn msg(topic: &str, sender: &str, text: &str) -> Message {
    let mut m = zs_core::test_support::seeded_message(topic, sender, MessageContent::text(text));
    m.id = format!("m-{}", text);
    m
}

fn open(dir: &tempfile::TempDir) -> Ledger {
    Ledger::open(dir.path(), ClusterId::new("c1")).unwrap()
}

// =============================================================================
// append / sequence assignment
// =============================================================================

#[test]
fn append_assigns_dense_sequences_from_one() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);

    let a = ledger.append(msg("A", "s", "1")).unwrap();
    let b = ledger.append(msg("B", "s", "2")).unwrap();
    let c = ledger.append(msg("C", "s", "3")).unwrap();
    assert_eq!((a.sequence, b.sequence, c.sequence), (1, 2, 3));
}

#[test]
fn reopen_continues_sequence() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut ledger = open(&dir);
        ledger.append(msg("A", "s", "1")).unwrap();
        ledger.append(msg("A", "s", "2")).unwrap();
    }
    let mut ledger = open(&dir);
    let next = ledger.append(msg("A", "s", "3")).unwrap();
    assert_eq!(next.sequence, 3);
}

#[test]
fn append_stamps_cluster_id() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);
    let stored = ledger.append(msg("A", "s", "1")).unwrap();
    assert_eq!(stored.cluster_id, ClusterId::new("c1"));
}

#[test]
fn append_after_close_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);
    ledger.close();
    ledger.close(); // idempotent
    let err = ledger.append(msg("A", "s", "1")).unwrap_err();
    assert!(matches!(err, StorageError::Closed(_)));
}

// =============================================================================
// queries
// =============================================================================

#[test]
fn get_all_returns_sequence_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);
    for i in 0..5 {
        ledger.append(msg("T", "s", &i.to_string())).unwrap();
    }
    let all = ledger.get_all().unwrap();
    let seqs: Vec<u64> = all.iter().map(|m| m.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

#[test]
fn query_filters_by_topic_and_sender() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);
    ledger.append(msg("A", "worker", "1")).unwrap();
    ledger.append(msg("B", "worker", "2")).unwrap();
    ledger.append(msg("A", "validator", "3")).unwrap();

    let by_topic = ledger.query(&MessageQuery::topic("A")).unwrap();
    assert_eq!(by_topic.len(), 2);

    let by_both = ledger
        .query(&MessageQuery {
            topic: Some("A".to_string()),
            sender: Some("validator".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_both.len(), 1);
    assert_eq!(by_both[0].content.text.as_deref(), Some("3"));
}

#[test]
fn query_since_seq_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);
    for i in 0..4 {
        ledger.append(msg("T", "s", &i.to_string())).unwrap();
    }
    let tail = ledger
        .query(&MessageQuery {
            since_seq: Some(2),
            ..Default::default()
        })
        .unwrap();
    let seqs: Vec<u64> = tail.iter().map(|m| m.sequence).collect();
    assert_eq!(seqs, vec![3, 4]);
}

#[test]
fn query_limit_keeps_the_tail() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);
    for i in 0..5 {
        ledger.append(msg("T", "s", &i.to_string())).unwrap();
    }
    let tail = ledger
        .query(&MessageQuery {
            limit: Some(2),
            ..Default::default()
        })
        .unwrap();
    let seqs: Vec<u64> = tail.iter().map(|m| m.sequence).collect();
    assert_eq!(seqs, vec![4, 5]);
}

#[test]
fn find_last_and_count() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);
    ledger.append(msg("A", "s", "first")).unwrap();
    ledger.append(msg("B", "s", "other")).unwrap();
    ledger.append(msg("A", "s", "last")).unwrap();

    let last = ledger.find_last("A").unwrap().unwrap();
    assert_eq!(last.content.text.as_deref(), Some("last"));
    assert!(ledger.find_last("MISSING").unwrap().is_none());

    assert_eq!(ledger.count(Some("A")).unwrap(), 2);
    assert_eq!(ledger.count(None).unwrap(), 3);
}

// =============================================================================
// durability edges
// =============================================================================

#[test]
fn partial_trailing_line_is_not_observed() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);
    ledger.append(msg("A", "s", "1")).unwrap();

    // Simulate a concurrent writer's in-flight append (no trailing newline)
    let mut raw = std::fs::OpenOptions::new()
        .append(true)
        .open(ledger.path())
        .unwrap();
    raw.write_all(b"{\"id\":\"partial").unwrap();

    let all = ledger.get_all().unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn corrupt_interior_line_surfaces_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = crate::ledger_path(dir.path(), &ClusterId::new("c1"));
    std::fs::write(&path, "not json at all\n").unwrap();

    let err = Ledger::open(dir.path(), ClusterId::new("c1")).unwrap_err();
    assert!(matches!(err, StorageError::Corrupt { line: 1, .. }));
}

#[test]
fn open_existing_requires_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Ledger::open_existing(dir.path(), ClusterId::new("ghost")).unwrap_err();
    assert!(matches!(err, StorageError::Missing(_)));
    assert!(!Ledger::exists(dir.path(), &ClusterId::new("ghost")));
}

#[test]
fn remove_deletes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);
    ledger.append(msg("A", "s", "1")).unwrap();
    drop(ledger);

    Ledger::remove(dir.path(), &ClusterId::new("c1")).unwrap();
    assert!(!Ledger::exists(dir.path(), &ClusterId::new("c1")));
    // Idempotent
    Ledger::remove(dir.path(), &ClusterId::new("c1")).unwrap();
}

// =============================================================================
// polling
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn poll_delivers_each_message_exactly_once_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);
    ledger.append(msg("T", "s", "0")).unwrap();

    let (tx, rx) = mpsc::channel();
    let handle = Ledger::poll_for_messages(
        ledger.path().to_owned(),
        Duration::from_millis(20),
        move |m| {
            let _ = tx.send(m.sequence);
        },
    );

    // Appends racing with the poller
    for i in 1..5 {
        ledger.append(msg("T", "s", &i.to_string())).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop();

    let mut seen = Vec::new();
    while let Ok(seq) = rx.try_recv() {
        seen.push(seq);
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_stops_after_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = open(&dir);

    let (tx, rx) = mpsc::channel();
    let handle = Ledger::poll_for_messages(
        ledger.path().to_owned(),
        Duration::from_millis(10),
        move |m| {
            let _ = tx.send(m.sequence);
        },
    );
    handle.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    ledger.append(msg("T", "s", "after-stop")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}
