// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use zs_core::{ClusterId, TransformDef};
use zs_storage::Ledger;

fn test_bus(dir: &tempfile::TempDir) -> MessageBus {
    let ledger = Ledger::open(dir.path(), ClusterId::new("c1")).unwrap();
    MessageBus::new(ClusterId::new("c1"), Arc::new(Mutex::new(ledger)))
}

fn inputs(result: Option<Value>) -> HookInputs {
    HookInputs {
        agent_id: "worker".to_string(),
        agent_model: Some("haiku".to_string()),
        task_id: "t-1".to_string(),
        iteration: 1,
        cluster_id: "c1".to_string(),
        cluster_created_at: 42,
        result,
        output_len: 20,
        error_message: None,
    }
}

#[tokio::test]
async fn publish_message_with_plain_template() {
    let dir = tempfile::tempdir().unwrap();
    let bus = test_bus(&dir);
    let hook = HookDef {
        action: "publish_message".to_string(),
        config: Some(json!({
            "topic": "IMPLEMENTATION_READY",
            "content": { "text": "done on iteration {{iteration}} in {{cluster.id}}" },
        })),
        transform: None,
    };

    run_on_complete(&hook, &bus, inputs(None)).await.unwrap();

    let published = bus.find_last("IMPLEMENTATION_READY").unwrap().unwrap();
    assert_eq!(
        published.content.text.as_deref(),
        Some("done on iteration 1 in c1")
    );
    assert_eq!(published.sender, "worker");
    assert_eq!(published.sender_model.as_deref(), Some("haiku"));
}

#[tokio::test]
async fn publish_message_with_transform() {
    let dir = tempfile::tempdir().unwrap();
    let bus = test_bus(&dir);
    let hook = HookDef {
        action: "publish_message".to_string(),
        config: None,
        transform: Some(TransformDef {
            engine: "expr".to_string(),
            script: r#"{"topic":"VALIDATION_RESULT","content":{"data":{"approved":"${result.approved}"}}}"#
                .to_string(),
        }),
    };

    run_on_complete(&hook, &bus, inputs(Some(json!({ "approved": false }))))
        .await
        .unwrap();

    let published = bus.find_last("VALIDATION_RESULT").unwrap().unwrap();
    assert_eq!(published.data_field("approved"), Some(&json!(false)));
}

#[tokio::test]
async fn transform_missing_output_cites_task_identity() {
    let dir = tempfile::tempdir().unwrap();
    let bus = test_bus(&dir);
    let hook = HookDef {
        action: "publish_message".to_string(),
        config: None,
        transform: Some(TransformDef {
            engine: "expr".to_string(),
            script: r#"{"topic":"X","content":{"text":"${result.summary}"}}"#.to_string(),
        }),
    };

    let err = run_on_complete(&hook, &bus, inputs(None)).await.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("worker"));
    assert!(text.contains("t-1"));
    assert!(text.contains("iteration 1"));
    assert!(text.contains("20 bytes"));
}

#[tokio::test]
async fn unknown_action_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let bus = test_bus(&dir);
    let hook = HookDef {
        action: "launch_rocket".to_string(),
        config: None,
        transform: None,
    };
    let err = run_on_complete(&hook, &bus, inputs(None)).await.unwrap_err();
    assert!(matches!(err, HookError::UnknownAction(ref a) if a == "launch_rocket"));
}

#[tokio::test]
async fn missing_template_variable_fails_the_hook() {
    let dir = tempfile::tempdir().unwrap();
    let bus = test_bus(&dir);
    let hook = HookDef {
        action: "publish_message".to_string(),
        config: Some(json!({
            "topic": "X",
            "content": { "text": "{{result.never_produced}}" },
        })),
        transform: None,
    };
    let err = run_on_complete(&hook, &bus, inputs(Some(json!({})))).await.unwrap_err();
    assert!(matches!(err, HookError::Logic(_)));
}

#[tokio::test]
async fn system_command_success_and_failure() {
    let dir = tempfile::tempdir().unwrap();
    let bus = test_bus(&dir);

    let ok = HookDef {
        action: "execute_system_command".to_string(),
        config: Some(json!({ "command": "true" })),
        transform: None,
    };
    run_on_complete(&ok, &bus, inputs(None)).await.unwrap();

    let fail = HookDef {
        action: "execute_system_command".to_string(),
        config: Some(json!({ "command": "echo boom >&2; exit 3" })),
        transform: None,
    };
    let err = run_on_complete(&fail, &bus, inputs(None)).await.unwrap_err();
    match err {
        HookError::Command {
            status,
            stderr_tail,
        } => {
            assert_eq!(status, 3);
            assert_eq!(stderr_tail, "boom");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn hook_without_config_or_transform_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let bus = test_bus(&dir);
    let hook = HookDef {
        action: "publish_message".to_string(),
        config: None,
        transform: None,
    };
    let err = run_on_complete(&hook, &bus, inputs(None)).await.unwrap_err();
    assert!(matches!(err, HookError::EmptyConfig));
}
