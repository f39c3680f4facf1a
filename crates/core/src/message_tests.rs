// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn new_message_is_broadcast_by_default() {
    let msg = Message::new(topics::ISSUE_OPENED, SENDER_ORCHESTRATOR, MessageContent::text("hi"));
    assert_eq!(msg.receiver, RECEIVER_BROADCAST);
    assert_eq!(msg.sequence, 0);
    assert_eq!(msg.topic, "ISSUE_OPENED");
}

#[test]
fn data_field_reads_object_keys() {
    let msg = Message::new(
        "VALIDATION_RESULT",
        "validator-1",
        MessageContent::data(json!({ "approved": false, "issues": ["X"] })),
    );
    assert_eq!(msg.data_field("approved"), Some(&json!(false)));
    assert_eq!(msg.data_field("missing"), None);
}

#[test]
fn data_field_none_without_data() {
    let msg = Message::new("t", "s", MessageContent::text("x"));
    assert_eq!(msg.data_field("any"), None);
}

#[test]
fn serde_roundtrip_preserves_fields() {
    let mut msg = Message::new("AGENT_OUTPUT", "worker", MessageContent::text("line"))
        .with_receiver("conductor")
        .with_metadata(json!({ "source": "stream" }))
        .with_sender_model("haiku");
    msg.sequence = 7;
    msg.timestamp = 1_700_000_000_000;
    msg.id = "m-1".to_string();
    msg.cluster_id = ClusterId::new("c1");

    let text = serde_json::to_string(&msg).unwrap();
    let back: Message = serde_json::from_str(&text).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn null_metadata_is_omitted_from_json() {
    let msg = Message::new("t", "s", MessageContent::default());
    let text = serde_json::to_string(&msg).unwrap();
    assert!(!text.contains("metadata"));
    assert!(!text.contains("sender_model"));
}

#[test]
fn workflow_triggers_contain_issue_opened() {
    assert!(topics::WORKFLOW_TRIGGERS.contains(&topics::ISSUE_OPENED));
    assert!(topics::WORKFLOW_TRIGGERS.contains(&topics::VALIDATION_RESULT));
    assert!(!topics::WORKFLOW_TRIGGERS.contains(&topics::CLUSTER_COMPLETE));
}
