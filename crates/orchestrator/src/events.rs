// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator-level bus subscriptions.
//!
//! Wired before any agent starts. Handlers spawn tasks for anything that
//! stops a cluster so the bus dispatcher is never blocked on its own
//! teardown.

use crate::cluster::ClusterHandle;
use crate::operations::{self, Operation};
use crate::orchestrator::Orchestrator;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use zs_core::message::topics;
use zs_core::{ClusterState, FailureInfo, Message, MessageContent, SystemClock, Clock, SENDER_ORCHESTRATOR};
use zs_isolation::ContainerRuntime;

pub(crate) fn wire<R: ContainerRuntime>(
    orchestrator: &Orchestrator<R>,
    handle: &Arc<ClusterHandle>,
) {
    let mut subscriptions = handle.subscriptions.lock();

    // CLUSTER_COMPLETE: log and stop with preservation
    {
        let orchestrator = orchestrator.clone();
        let handle = Arc::clone(handle);
        let bus = handle.bus.clone();
        subscriptions.push(bus.subscribe_topic(
            topics::CLUSTER_COMPLETE,
            Arc::new(move |message| {
                let orchestrator = orchestrator.clone();
                let handle = Arc::clone(&handle);
                Box::pin(async move {
                    info!(cluster = %handle.id, sender = %message.sender, "cluster complete");
                    tokio::spawn(async move {
                        if let Err(e) = orchestrator.stop(&handle.id).await {
                            warn!(cluster = %handle.id, error = %e, "stop after completion failed");
                        }
                    });
                    Ok(())
                })
            }),
        ));
    }

    // CLUSTER_FAILED: record the reason, stop with state failed
    {
        let orchestrator = orchestrator.clone();
        let handle = Arc::clone(handle);
        let bus = handle.bus.clone();
        subscriptions.push(bus.subscribe_topic(
            topics::CLUSTER_FAILED,
            Arc::new(move |message| {
                let orchestrator = orchestrator.clone();
                let handle = Arc::clone(&handle);
                Box::pin(async move {
                    let reason = message
                        .content
                        .text
                        .clone()
                        .unwrap_or_else(|| "cluster failed".to_string());
                    tokio::spawn(async move {
                        let info = FailureInfo {
                            agent_id: Some(message.sender.clone()),
                            role: None,
                            task_id: None,
                            iteration: 0,
                            reason,
                            failed_at: SystemClock.epoch_ms(),
                        };
                        orchestrator.fail_cluster(&handle, info).await;
                    });
                    Ok(())
                })
            }),
        ));
    }

    // CLUSTER_OPERATIONS: pre-validate the chain, then execute it
    {
        let orchestrator = orchestrator.clone();
        let handle = Arc::clone(handle);
        let bus = handle.bus.clone();
        subscriptions.push(bus.subscribe_topic(
            topics::CLUSTER_OPERATIONS,
            Arc::new(move |message| {
                let orchestrator = orchestrator.clone();
                let handle = Arc::clone(&handle);
                Box::pin(async move {
                    tokio::spawn(async move {
                        handle_operations(&orchestrator, &handle, message).await;
                    });
                    Ok(())
                })
            }),
        ));
    }

    // AGENT_ERROR: terminal implementation-role errors fail the cluster;
    // validator errors feed the loop and never stop anything
    {
        let orchestrator = orchestrator.clone();
        let handle = Arc::clone(handle);
        let bus = handle.bus.clone();
        subscriptions.push(bus.subscribe_topic(
            topics::AGENT_ERROR,
            Arc::new(move |message| {
                let orchestrator = orchestrator.clone();
                let handle = Arc::clone(&handle);
                Box::pin(async move {
                    let terminal = message.data_field("terminal").and_then(|v| v.as_bool());
                    let role = message
                        .data_field("role")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    if terminal != Some(true) || role == "validator" {
                        return Ok(());
                    }
                    let info = FailureInfo {
                        agent_id: message
                            .data_field("agent_id")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        role: Some(role.to_string()),
                        task_id: message
                            .data_field("task_id")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        iteration: message
                            .data_field("iteration")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0) as u32,
                        reason: message
                            .data_field("error")
                            .and_then(|v| v.as_str())
                            .unwrap_or("agent exhausted attempts")
                            .to_string(),
                        failed_at: SystemClock.epoch_ms(),
                    };
                    tokio::spawn(async move {
                        orchestrator.fail_cluster(&handle, info).await;
                    });
                    Ok(())
                })
            }),
        ));
    }

    // AGENT_LIFECYCLE: keep the cross-process agent-state snapshot fresh
    {
        let handle = Arc::clone(handle);
        let bus = handle.bus.clone();
        subscriptions.push(bus.subscribe_topic(
            topics::AGENT_LIFECYCLE,
            Arc::new(move |_message| {
                let handle = Arc::clone(&handle);
                Box::pin(async move {
                    handle.snapshot_agent_states();
                    Ok(())
                })
            }),
        ));
    }
}

/// Execute a pre-validated operations chain.
async fn handle_operations<R: ContainerRuntime>(
    orchestrator: &Orchestrator<R>,
    handle: &Arc<ClusterHandle>,
    message: Message,
) {
    let chain = match operations::parse_chain(&message) {
        Ok(chain) => chain,
        Err(error) => {
            publish_validation_failure(handle, &[error]).await;
            return;
        }
    };

    // Atomic pre-validation against the hypothetical post-chain agent set
    let current: Vec<zs_core::AgentConfig> =
        handle.agents.lock().iter().map(|a| a.config()).collect();
    let validation = {
        let resolver = orchestrator.inner.resolver.read();
        operations::pre_validate(&current, &chain, &resolver)
    };
    if let Err(errors) = validation {
        publish_validation_failure(handle, &errors).await;
        return;
    }

    for (index, op) in chain.into_iter().enumerate() {
        if let Err(error) = execute_operation(orchestrator, handle, op).await {
            warn!(cluster = %handle.id, index, error, "operation chain failed mid-execution");
            let failure = Message::new(
                topics::CLUSTER_OPERATIONS_FAILED,
                SENDER_ORCHESTRATOR,
                MessageContent {
                    text: Some(format!("operation {index} failed: {error}")),
                    data: Some(json!({ "index": index, "error": error })),
                },
            );
            if let Err(e) = handle.bus.publish(failure).await {
                warn!(cluster = %handle.id, error = %e, "failed to publish chain failure");
            }
            if let Err(e) = orchestrator
                .stop_with_state(handle, ClusterState::Failed)
                .await
            {
                warn!(cluster = %handle.id, error = %e, "failed to stop after chain failure");
            }
            return;
        }
    }
}

async fn publish_validation_failure(handle: &Arc<ClusterHandle>, errors: &[String]) {
    warn!(cluster = %handle.id, ?errors, "operation chain rejected");
    let message = Message::new(
        topics::CLUSTER_OPERATIONS_VALIDATION_FAILED,
        SENDER_ORCHESTRATOR,
        MessageContent {
            text: Some(format!("operation chain rejected: {}", errors.join("; "))),
            data: Some(json!({ "errors": errors })),
        },
    );
    if let Err(e) = handle.bus.publish(message).await {
        warn!(cluster = %handle.id, error = %e, "failed to publish validation failure");
    }
}

async fn execute_operation<R: ContainerRuntime>(
    orchestrator: &Orchestrator<R>,
    handle: &Arc<ClusterHandle>,
    op: Operation,
) -> Result<(), String> {
    match op {
        Operation::AddAgents { agents } => {
            for config in agents {
                add_unless_present(orchestrator, handle, config);
            }
            Ok(())
        }
        Operation::RemoveAgents { agent_ids } => {
            let removed: Vec<zs_engine::Agent> = {
                let mut agents = handle.agents.lock();
                let (drop_list, keep): (Vec<_>, Vec<_>) = agents
                    .drain(..)
                    .partition(|a| agent_ids.contains(&a.id()));
                *agents = keep;
                drop_list
            };
            handle
                .roster
                .write()
                .retain(|a| !agent_ids.contains(&a.id));
            for agent in removed {
                agent.stop().await;
            }
            Ok(())
        }
        Operation::UpdateAgent { agent_id, updates } => {
            let agent = handle
                .agents
                .lock()
                .iter()
                .find(|a| a.id() == agent_id)
                .cloned();
            match agent {
                Some(agent) => {
                    agent.update_config(&updates);
                    Ok(())
                }
                None => Err(format!("unknown agent '{agent_id}'")),
            }
        }
        Operation::Publish {
            topic,
            content,
            metadata,
        } => {
            let mut message = Message::new(topic, SENDER_ORCHESTRATOR, content);
            if !metadata.is_null() {
                message = message.with_metadata(metadata);
            }
            handle
                .bus
                .publish(message)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        Operation::LoadConfig { config } => {
            let resolved = {
                let resolver = orchestrator.inner.resolver.read();
                operations::resolve(&resolver, &config).map_err(|e| e.to_string())?
            };
            for agent_config in resolved.agents {
                add_unless_present(orchestrator, handle, agent_config);
            }
            Ok(())
        }
    }
}

fn add_unless_present<R: ContainerRuntime>(
    orchestrator: &Orchestrator<R>,
    handle: &Arc<ClusterHandle>,
    config: zs_core::AgentConfig,
) {
    let exists = handle.agents.lock().iter().any(|a| a.id() == config.id);
    if exists {
        warn!(cluster = %handle.id, agent = %config.id, "duplicate agent id skipped");
        return;
    }
    orchestrator.add_agent(handle, config, true);
}
