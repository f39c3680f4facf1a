// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios over the coordination kernel.
//!
//! Child processes are mocked with `sh -c` commands that emit the stdout
//! event grammar; everything else (ledger, bus, agents, hooks, templates,
//! registry, the fake container runtime) is the real thing.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;
use std::time::Duration;
use zs_core::message::topics;
use zs_core::{
    AgentConfig, AgentHooks, ClusterConfig, ClusterId, ClusterInput, ClusterState, HookDef,
    IsolationMode, Message, MessageContent, Settings,
};
use zs_isolation::FakeRuntime;
use zs_orchestrator::{Orchestrator, OrchestratorError, StartOptions};
use zs_storage::Ledger;
use zs_template::{ResolveOptions, TemplateResolver};

fn orchestrator(dir: &tempfile::TempDir) -> Orchestrator<FakeRuntime> {
    Orchestrator::new(dir.path().to_owned(), Settings::default(), FakeRuntime::default())
}

/// Mock child emitting one structured stdout line.
fn emit(line: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), format!("echo '{line}'")]
}

fn result_line(output_json: &str) -> String {
    format!(
        r#"{{"type":"result","success":true,"output":"{}"}}"#,
        output_json.replace('"', "\\\"")
    )
}

async fn wait_for_state(
    orch: &Orchestrator<FakeRuntime>,
    id: &ClusterId,
    expected: ClusterState,
) {
    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    loop {
        if let Ok(status) = orch.status(id) {
            if status.state == expected {
                return;
            }
        }
        if std::time::Instant::now() > deadline {
            panic!("cluster never reached {expected}: {:?}", orch.status(id));
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn wait_for<F>(orch: &Orchestrator<FakeRuntime>, id: &ClusterId, cond: F) -> Vec<Message>
where
    F: Fn(&[Message]) -> bool,
{
    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    loop {
        let messages = orch.export(id).unwrap_or_default();
        if cond(&messages) {
            return messages;
        }
        if std::time::Instant::now() > deadline {
            panic!("condition never met; ledger: {:#?}", messages);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn lifecycle_events(messages: &[Message]) -> Vec<(String, u64)> {
    messages
        .iter()
        .filter(|m| m.topic == topics::AGENT_LIFECYCLE)
        .filter_map(|m| {
            let event = m.data_field("event")?.as_str()?.to_string();
            let iteration = m.data_field("iteration").and_then(|v| v.as_u64()).unwrap_or(0);
            Some((event, iteration))
        })
        .collect()
}

// =============================================================================
// S1: happy path with the single-worker template
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn s1_single_worker_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    let resolver = TemplateResolver::new();
    let mut params = HashMap::new();
    params.insert("worker_model".to_string(), serde_json::json!("haiku"));
    let mut config = resolver
        .resolve_with("single-worker", &params, ResolveOptions::default())
        .unwrap();

    // Mock the child: a single successful result event
    config.agents[0].command = Some(emit(&result_line(r#"{"summary":"ok"}"#)));

    let id = orch
        .start(config, ClusterInput::text("say hi"), StartOptions::default())
        .await
        .unwrap();

    wait_for_state(&orch, &id, ClusterState::Stopped).await;
    let messages = orch.export(&id).unwrap();

    // Expected message flow, in ledger order
    let seen: Vec<&str> = messages.iter().map(|m| m.topic.as_str()).collect();
    let position = |topic: &str| seen.iter().position(|t| *t == topic);
    let issue = position(topics::ISSUE_OPENED).expect("ISSUE_OPENED");
    let output = position(topics::AGENT_OUTPUT).expect("AGENT_OUTPUT");
    let complete = position(topics::CLUSTER_COMPLETE).expect("CLUSTER_COMPLETE");
    assert!(issue < output && output < complete);

    let events = lifecycle_events(&messages);
    assert!(events.contains(&("TASK_STARTED".to_string(), 1)));
    assert!(events.contains(&("TASK_COMPLETED".to_string(), 1)));

    // The model tag rode along on TASK_STARTED
    let started = messages
        .iter()
        .find(|m| m.data_field("event") == Some(&serde_json::json!("TASK_STARTED")))
        .unwrap();
    assert_eq!(started.data_field("model"), Some(&serde_json::json!("haiku")));

    // Registry was updated
    assert_eq!(orch.status(&id).unwrap().record.pid, None);
}

// =============================================================================
// S2: conductor reshapes the cluster through an operations chain
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn s2_operations_chain_expands_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    // Initial cluster holds only a conductor with no triggers
    let conductor = AgentConfig::new("conductor", "conductor", "classify the task");
    let id = orch
        .start(
            ClusterConfig::new(vec![conductor]),
            ClusterInput::text("do X"),
            StartOptions::default(),
        )
        .await
        .unwrap();

    let worker_cmd = emit(&result_line(r#"{"summary":"implemented"}"#));
    let validator_cmd = emit(&result_line(r#"{"approved":true,"issues":[]}"#));

    orch.publish(
        &id,
        Message::new(
            topics::CLUSTER_OPERATIONS,
            "conductor",
            MessageContent::data(serde_json::json!({
                "operations": [
                    { "action": "load_config", "config": {
                        "base": "worker-validator",
                        "params": {
                            "worker_model": "sonnet",
                            "validator_model": "sonnet",
                            "max_iterations": 3,
                            "max_tokens": 100000
                        }
                    }},
                    { "action": "update_agent", "agentId": "worker",
                      "updates": { "command": worker_cmd } },
                    { "action": "update_agent", "agentId": "validator-1",
                      "updates": { "command": validator_cmd } },
                    { "action": "publish", "topic": "ISSUE_OPENED",
                      "content": { "text": "do X" },
                      "metadata": { "_republished": true } }
                ]
            })),
        ),
    )
    .await
    .unwrap();

    // Validation passed, agents landed, input was republished, and the
    // workflow ran to completion: implement -> validate -> approve -> stop
    wait_for_state(&orch, &id, ClusterState::Stopped).await;
    let messages = orch.export(&id).unwrap();

    let issue_count = messages
        .iter()
        .filter(|m| m.topic == topics::ISSUE_OPENED)
        .count();
    assert_eq!(issue_count, 2, "initial plus republished");
    assert!(messages
        .iter()
        .any(|m| m.topic == topics::IMPLEMENTATION_READY));
    let validation = messages
        .iter()
        .find(|m| m.topic == topics::VALIDATION_RESULT)
        .expect("validator hook published VALIDATION_RESULT");
    assert_eq!(validation.data_field("approved"), Some(&serde_json::json!(true)));
    assert!(messages.iter().any(|m| m.topic == topics::CLUSTER_COMPLETE));

    // Final roster: conductor + worker + validator
    let agents = &orch.status(&id).unwrap().record.agent_states;
    assert_eq!(agents.len(), 3);
}

// =============================================================================
// S3: rejection feedback loop
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn s3_rejection_feedback_loops_until_iteration_budget() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    let resolver = TemplateResolver::new();
    let mut params = HashMap::new();
    params.insert("worker_model".to_string(), serde_json::json!("sonnet"));
    params.insert("validator_model".to_string(), serde_json::json!("sonnet"));
    params.insert("max_iterations".to_string(), serde_json::json!(3));
    let mut config = resolver
        .resolve_with("worker-validator", &params, ResolveOptions::default())
        .unwrap();

    for agent in &mut config.agents {
        if agent.role == "worker" {
            agent.command = Some(emit(&result_line(r#"{"summary":"attempt"}"#)));
        } else {
            // The validator always rejects
            agent.command = Some(emit(&result_line(r#"{"approved":false,"issues":["X"]}"#)));
        }
    }

    let id = orch
        .start(config, ClusterInput::text("hard task"), StartOptions::default())
        .await
        .unwrap();

    // Worker re-executes on each rejection until iteration < 3 stops holding
    let messages = wait_for(&orch, &id, |m| {
        m.iter()
            .filter(|x| x.topic == topics::VALIDATION_RESULT)
            .filter(|x| x.data_field("approved") == Some(&serde_json::json!(false)))
            .count()
            >= 3
    })
    .await;

    let worker_starts = messages
        .iter()
        .filter(|m| {
            m.sender == "worker" && m.data_field("event") == Some(&serde_json::json!("TASK_STARTED"))
        })
        .count();
    assert!(worker_starts >= 2, "rejection re-triggered the worker");

    // Give the loop time to run dry, then confirm it never completed
    tokio::time::sleep(Duration::from_millis(500)).await;
    let messages = orch.export(&id).unwrap();
    assert!(
        !messages.iter().any(|m| m.topic == topics::CLUSTER_COMPLETE),
        "never approved, never complete"
    );
    let final_worker_iteration = messages
        .iter()
        .filter(|m| m.sender == "worker" && m.topic == topics::AGENT_LIFECYCLE)
        .filter_map(|m| m.data_field("iteration").and_then(|v| v.as_u64()))
        .max()
        .unwrap();
    assert_eq!(final_worker_iteration, 3, "iteration budget respected");

    assert_eq!(orch.status(&id).unwrap().state, ClusterState::Running);
    orch.stop(&id).await.unwrap();
}

// =============================================================================
// S4: resume after failure
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn s4_resume_after_exhausted_failure() {
    let dir = tempfile::tempdir().unwrap();
    let control = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    let marker = control.path().join("fixed");
    let script = format!(
        "if [ -f {} ]; then echo '{}'; else echo 'rate limit' >&2; exit 1; fi",
        marker.display(),
        result_line(r#"{"summary":"recovered"}"#),
    );
    let mut worker = AgentConfig::new("worker", "worker", "do the task");
    worker.triggers = vec![zs_core::Trigger::on_topic(topics::ISSUE_OPENED)];
    worker.command = Some(vec!["sh".to_string(), "-c".to_string(), script]);
    worker.hooks = Some(AgentHooks {
        on_complete: Some(HookDef {
            action: "publish_message".to_string(),
            config: Some(serde_json::json!({
                "topic": "CLUSTER_COMPLETE",
                "content": { "text": "recovered after resume" },
            })),
            transform: None,
        }),
    });

    let id = orch
        .start(
            ClusterConfig::new(vec![worker]),
            ClusterInput::text("flaky task"),
            StartOptions::default(),
        )
        .await
        .unwrap();

    // Three attempts, then failureInfo persisted and state failed
    wait_for_state(&orch, &id, ClusterState::Failed).await;
    let status = orch.status(&id).unwrap();
    let info = status.record.failure_info.expect("failure info persisted");
    assert_eq!(info.agent_id.as_deref(), Some("worker"));
    assert_eq!(info.iteration, 3);

    // Fix the world and resume with an operator prompt
    std::fs::write(&marker, "").unwrap();
    orch.resume(&id, Some("try again")).await.unwrap();

    wait_for_state(&orch, &id, ClusterState::Stopped).await;
    let messages = orch.export(&id).unwrap();
    assert!(messages.iter().any(|m| m.topic == topics::CLUSTER_COMPLETE));

    // Iteration counter continued past the failed attempts
    let max_iteration = messages
        .iter()
        .filter(|m| m.topic == topics::AGENT_LIFECYCLE)
        .filter_map(|m| m.data_field("iteration").and_then(|v| v.as_u64()))
        .max()
        .unwrap();
    assert_eq!(max_iteration, 4);
}

// =============================================================================
// S5: isolation preservation across stop/resume
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn s5_container_workspace_survives_stop_and_is_reused_on_resume() {
    let storage = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("app.txt"), "seed").unwrap();

    let runtime = FakeRuntime::default();
    let orch = Orchestrator::new(
        storage.path().to_owned(),
        Settings::default(),
        runtime.clone(),
    );

    let id = orch
        .start(
            ClusterConfig::default(),
            ClusterInput::text("touch X"),
            StartOptions {
                isolation: Some(IsolationMode::Container),
                source_dir: Some(source.path().to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let work_dir = orch
        .status(&id)
        .unwrap()
        .record
        .isolation
        .expect("container isolation recorded")
        .work_dir;
    assert!(work_dir.join("app.txt").exists(), "workspace seeded from source");

    // The "worker" writes state into the isolated workspace
    std::fs::write(work_dir.join("X"), "precious").unwrap();

    orch.stop(&id).await.unwrap();

    // Container removed, workspace preserved with X
    assert!(runtime.state().lock().containers.is_empty());
    assert_eq!(std::fs::read_to_string(work_dir.join("X")).unwrap(), "precious");

    orch.resume(&id, None).await.unwrap();

    // Fresh container around the same preserved workspace
    assert_eq!(runtime.state().lock().containers.len(), 1);
    assert!(work_dir.join("X").exists());
    let resumed_work_dir = orch
        .status(&id)
        .unwrap()
        .record
        .isolation
        .unwrap()
        .work_dir;
    assert_eq!(resumed_work_dir, work_dir, "no fresh copy on resume");

    orch.stop(&id).await.unwrap();

    // Kill deletes the workspace for good
    orch.resume(&id, None).await.unwrap();
    orch.kill(&id).await.unwrap();
    assert!(!work_dir.exists());
}

// =============================================================================
// S6: cross-process visibility via ledger polling
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn s6_second_process_tails_the_ledger_by_polling() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    // "P1" starts a cluster and publishes messages
    let id = orch
        .start(
            ClusterConfig::default(),
            ClusterInput::text("observe me"),
            StartOptions::default(),
        )
        .await
        .unwrap();

    // "P2" opens the same ledger file independently and polls
    let ledger_path = zs_storage::ledger_path(dir.path(), &id);
    let (tx, rx) = std::sync::mpsc::channel();
    let poller = Ledger::poll_for_messages(ledger_path, Duration::from_millis(20), move |m| {
        let _ = tx.send((m.sequence, m.topic));
    });

    for i in 0..4 {
        orch.publish(
            &id,
            Message::new(format!("OBSERVED_{i}"), "system", MessageContent::text("x")),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    poller.stop();

    let mut seen = Vec::new();
    while let Ok(entry) = rx.try_recv() {
        seen.push(entry);
    }

    // Every message exactly once, in sequence order, starting at the
    // initial input
    let sequences: Vec<u64> = seen.iter().map(|(s, _)| *s).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    assert_eq!(seen[0].1, topics::ISSUE_OPENED);
    assert_eq!(seen[4].1, "OBSERVED_3");

    orch.stop(&id).await.unwrap();
}

// =============================================================================
// registry invariants across "processes"
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_orchestrators_never_clobber_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let p1 = orchestrator(&dir);
    let p2 = orchestrator(&dir);

    let id1 = p1
        .start(
            ClusterConfig::default(),
            ClusterInput::text("p1"),
            StartOptions {
                cluster_id: Some(ClusterId::new("p1-cluster")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let id2 = p2
        .start(
            ClusterConfig::default(),
            ClusterInput::text("p2"),
            StartOptions {
                cluster_id: Some(ClusterId::new("p2-cluster")),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Stopping p1's cluster must not disturb p2's entry
    p1.stop(&id1).await.unwrap();
    let statuses = p2.list().unwrap();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().any(|s| s.record.id == id2));

    p2.stop(&id2).await.unwrap();
    let statuses = p1.list().unwrap();
    assert!(statuses.iter().all(|s| s.state == ClusterState::Stopped));
}

// =============================================================================
// interrupted start leaves no corrupted entry behind
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn stop_waits_for_initialization_barrier() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    // Start concurrently with an immediate stop request
    let starter = orch.clone();
    let start_task = tokio::spawn(async move {
        starter
            .start(
                ClusterConfig::default(),
                ClusterInput::text("racy"),
                StartOptions {
                    cluster_id: Some(ClusterId::new("racy")),
                    ..Default::default()
                },
            )
            .await
    });

    let id = ClusterId::new("racy");
    // Spin until this process owns the cluster, then stop immediately
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if orch.owns(&id) {
            break;
        }
        assert!(std::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    orch.stop(&id).await.unwrap();
    start_task.await.unwrap().unwrap();

    // The stop waited for the initial publish: never a zero-message ledger
    let messages = orch.export(&id).unwrap();
    assert!(!messages.is_empty());
    let status = orch.status(&id).unwrap();
    assert_ne!(status.state, ClusterState::Corrupted);
}

// =============================================================================
// zombie listing
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn killed_cluster_cannot_be_resumed_but_zombie_can_be_killed() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir);

    let id = orch
        .start(
            ClusterConfig::default(),
            ClusterInput::text("x"),
            StartOptions::default(),
        )
        .await
        .unwrap();

    // Fake a zombie: owner pid replaced with a dead one
    {
        let mut status = orch.status(&id).unwrap();
        status.record.pid = Some(4_000_000);
        let mut upserts = std::collections::HashMap::new();
        upserts.insert(id.clone(), status.record);
        zs_storage::Registry::new(dir.path()).save_merge(&upserts, &[]).unwrap();
    }
    assert_eq!(orch.status(&id).unwrap().state, ClusterState::Zombie);

    // A different orchestrator process can kill the zombie entirely
    let other = orchestrator(&dir);
    other.kill(&id).await.unwrap();
    assert!(matches!(
        other.status(&id),
        Err(OrchestratorError::NotFound(_))
    ));
    assert!(matches!(
        other.resume(&id, None).await,
        Err(OrchestratorError::NotFound(_))
    ));
}
