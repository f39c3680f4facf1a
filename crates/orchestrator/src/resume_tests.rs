// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::orchestrator::{Orchestrator, StartOptions};
use std::time::Duration;
use zs_core::{AgentConfig, ClusterConfig, ClusterInput, MessageContent, Trigger};
use zs_isolation::FakeRuntime;

fn orchestrator(dir: &tempfile::TempDir) -> Orchestrator<FakeRuntime> {
    Orchestrator::new(
        dir.path().to_owned(),
        zs_core::Settings::default(),
        FakeRuntime::default(),
    )
}

/// Worker whose child fails until `<dir>/fixed` exists, then succeeds and
/// completes the cluster.
fn flaky_worker(control_dir: &std::path::Path) -> AgentConfig {
    let marker = control_dir.join("fixed");
    let script = format!(
        "if [ -f {marker} ]; then echo '{result}'; else echo 'rate limit' >&2; exit 1; fi",
        marker = marker.display(),
        result = r#"{"type":"result","success":true,"output":"{\"summary\":\"ok\"}"}"#,
    );
    let mut config = AgentConfig::new("worker", "worker", "do the task");
    config.triggers = vec![Trigger::on_topic(topics::ISSUE_OPENED)];
    config.command = Some(vec!["sh".to_string(), "-c".to_string(), script]);
    config.hooks = Some(zs_core::AgentHooks {
        on_complete: Some(zs_core::HookDef {
            action: "publish_message".to_string(),
            config: Some(serde_json::json!({
                "topic": "CLUSTER_COMPLETE",
                "content": { "text": "recovered" },
            })),
            transform: None,
        }),
    });
    config
}

async fn wait_for_state(
    orch: &Orchestrator<FakeRuntime>,
    id: &ClusterId,
    expected: ClusterState,
) {
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    loop {
        if let Ok(status) = orch.status(id) {
            if status.state == expected {
                return;
            }
        }
        if std::time::Instant::now() > deadline {
            panic!("never reached {expected}: {:?}", orch.status(id));
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

// =============================================================================
// failed-cluster resume (S4 shape)
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn failed_cluster_resumes_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let control = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    let id = orch
        .start(
            ClusterConfig::new(vec![flaky_worker(control.path())]),
            ClusterInput::text("try the task"),
            StartOptions::default(),
        )
        .await
        .unwrap();

    wait_for_state(&orch, &id, ClusterState::Failed).await;
    let failed = orch.status(&id).unwrap();
    let info = failed.record.failure_info.clone().expect("failure info");
    assert_eq!(info.agent_id.as_deref(), Some("worker"));
    let iterations_before = info.iteration;
    assert!(iterations_before >= 3, "worker retried to exhaustion");

    // Fix the underlying problem, then resume
    std::fs::write(control.path().join("fixed"), "").unwrap();
    orch.resume(&id, Some("try again")).await.unwrap();

    wait_for_state(&orch, &id, ClusterState::Stopped).await;

    let messages = orch.export(&id).unwrap();
    assert!(messages.iter().any(|m| m.topic == topics::CLUSTER_COMPLETE));

    // The resumed run continued the iteration counter
    let resumed_start = messages
        .iter()
        .filter(|m| m.topic == topics::AGENT_LIFECYCLE)
        .filter_map(|m| m.data_field("iteration").and_then(|v| v.as_u64()))
        .max()
        .unwrap();
    assert!(resumed_start > iterations_before as u64);
}

#[tokio::test(flavor = "multi_thread")]
async fn resume_context_mentions_previous_failure() {
    let dir = tempfile::tempdir().unwrap();
    let control = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    let id = orch
        .start(
            ClusterConfig::new(vec![flaky_worker(control.path())]),
            ClusterInput::text("task"),
            StartOptions::default(),
        )
        .await
        .unwrap();
    wait_for_state(&orch, &id, ClusterState::Failed).await;

    std::fs::write(control.path().join("fixed"), "").unwrap();
    orch.resume(&id, Some("operator hint")).await.unwrap();
    wait_for_state(&orch, &id, ClusterState::Stopped).await;

    // failure info is cleared once the resume is underway
    assert!(orch.status(&id).unwrap().record.failure_info.is_none());
}

// =============================================================================
// stopped-cluster resume
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn stopped_cluster_retriggers_latest_workflow_message() {
    let dir = tempfile::tempdir().unwrap();
    let control = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    // Start with an immediately-fixed worker, stop before triggering again
    std::fs::write(control.path().join("fixed"), "").unwrap();
    let id = orch
        .start(
            ClusterConfig::new(vec![flaky_worker(control.path())]),
            ClusterInput::text("task"),
            StartOptions::default(),
        )
        .await
        .unwrap();
    wait_for_state(&orch, &id, ClusterState::Stopped).await;

    let before = orch.export(&id).unwrap().len();
    orch.resume(&id, None).await.unwrap();

    // The re-published trigger carries the _resumed marker
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let messages = orch.export(&id).unwrap();
        if messages.len() > before
            && messages
                .iter()
                .any(|m| m.metadata.get("_resumed") == Some(&serde_json::json!(true)))
        {
            break;
        }
        assert!(std::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // The re-trigger runs the workflow to completion again
    wait_for_state(&orch, &id, ClusterState::Stopped).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn resume_without_workflow_trigger_fails_actionably() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    // Hand-craft a stopped cluster whose ledger has no workflow trigger
    let id = ClusterId::new("no-trigger");
    {
        let mut ledger = zs_storage::Ledger::open(dir.path(), id.clone()).unwrap();
        let mut msg = Message::new("SOMETHING_ELSE", "system", MessageContent::text("x"));
        msg.id = "m1".to_string();
        msg.timestamp = 1;
        ledger.append(msg).unwrap();
    }
    let mut record = ClusterRecord::new(id.clone(), ClusterConfig::default(), 1);
    record.state = ClusterState::Stopped;
    record.pid = None;
    let mut upserts = std::collections::HashMap::new();
    upserts.insert(id.clone(), record);
    zs_storage::Registry::new(dir.path())
        .save_merge(&upserts, &[])
        .unwrap();

    let err = orch.resume(&id, None).await.unwrap_err();
    match err {
        OrchestratorError::ResumeNotPossible { reason, .. } => {
            assert!(reason.contains("workflow trigger"), "reason: {reason}");
        }
        other => panic!("expected ResumeNotPossible, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupted_cluster_cannot_resume() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    let id = ClusterId::new("corrupt");
    drop(zs_storage::Ledger::open(dir.path(), id.clone()).unwrap());
    let mut record = ClusterRecord::new(id.clone(), ClusterConfig::default(), 1);
    record.state = ClusterState::Corrupted;
    record.pid = None;
    let mut upserts = std::collections::HashMap::new();
    upserts.insert(id.clone(), record);
    zs_storage::Registry::new(dir.path())
        .save_merge(&upserts, &[])
        .unwrap();

    assert!(matches!(
        orch.resume(&id, None).await,
        Err(OrchestratorError::BadState { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn running_cluster_with_live_owner_cannot_resume() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    let id = ClusterId::new("live");
    drop(zs_storage::Ledger::open(dir.path(), id.clone()).unwrap());
    let record = ClusterRecord::new(id.clone(), ClusterConfig::default(), 1);
    // Current pid: alive by construction
    let mut running = record;
    running.state = ClusterState::Running;
    let mut upserts = std::collections::HashMap::new();
    upserts.insert(id.clone(), running);
    zs_storage::Registry::new(dir.path())
        .save_merge(&upserts, &[])
        .unwrap();

    assert!(matches!(
        orch.resume(&id, None).await,
        Err(OrchestratorError::AlreadyRunning(_))
    ));
}
