// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Post-task hook execution.

use crate::bus::MessageBus;
use crate::error::HookError;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;
use zs_core::{HookDef, Message, MessageContent};
use zs_logic::{run_transform, substitute_hook_template, ScriptContext, TemplateVars, TransformMeta};

/// Timeout for `execute_system_command` hooks.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything a hook needs from the finished task.
pub struct HookInputs {
    pub agent_id: String,
    pub agent_model: Option<String>,
    pub task_id: String,
    pub iteration: u32,
    pub cluster_id: String,
    pub cluster_created_at: u64,
    /// Parsed result object from the child's terminal event, if any.
    pub result: Option<Value>,
    /// Raw byte length of the observed child output.
    pub output_len: usize,
    pub error_message: Option<String>,
}

/// Run an agent's `on_complete` hook.
///
/// Errors are never swallowed here; the agent propagates them and the
/// orchestrator decides whether the owning role's failure stops the
/// cluster.
pub async fn run_on_complete(
    hook: &HookDef,
    bus: &MessageBus,
    inputs: HookInputs,
) -> Result<(), HookError> {
    match hook.action.as_str() {
        "publish_message" => publish_message(hook, bus, inputs).await,
        "execute_system_command" => execute_system_command(hook).await,
        other => Err(HookError::UnknownAction(other.to_string())),
    }
}

async fn publish_message(
    hook: &HookDef,
    bus: &MessageBus,
    inputs: HookInputs,
) -> Result<(), HookError> {
    let payload = if let Some(transform) = &hook.transform {
        let ctx = ScriptContext {
            cluster_id: inputs.cluster_id.clone(),
            cluster_created_at: inputs.cluster_created_at,
            iteration: inputs.iteration,
            result: inputs.result.clone(),
            error_message: inputs.error_message.clone(),
            ledger: Some(bus.ledger()),
            ..Default::default()
        };
        run_transform(
            transform,
            ctx,
            TransformMeta {
                agent_id: inputs.agent_id.clone(),
                task_id: inputs.task_id.clone(),
                iteration: inputs.iteration,
                output_len: inputs.output_len,
            },
        )
        .await?
    } else {
        let config = hook.config.as_ref().ok_or(HookError::EmptyConfig)?;
        let vars = TemplateVars {
            cluster_id: inputs.cluster_id.clone(),
            cluster_created_at: inputs.cluster_created_at,
            iteration: inputs.iteration,
            error_message: inputs.error_message.clone(),
            result: inputs.result.clone(),
        };
        substitute_hook_template(config, &vars)?
    };

    let message = message_from_payload(&payload, &inputs)?;
    bus.publish(message).await?;
    Ok(())
}

/// Build the bus message from a hook payload `{topic, content, ...}`.
fn message_from_payload(payload: &Value, inputs: &HookInputs) -> Result<Message, HookError> {
    let topic = payload
        .get("topic")
        .and_then(|t| t.as_str())
        .ok_or_else(|| HookError::Logic(zs_logic::LogicError::Contract {
            field: "topic".to_string(),
        }))?;
    let content = payload.get("content").cloned().ok_or_else(|| {
        HookError::Logic(zs_logic::LogicError::Contract {
            field: "content".to_string(),
        })
    })?;

    let content: MessageContent =
        serde_json::from_value(content).unwrap_or_else(|_| MessageContent::default());
    let mut message = Message::new(topic, inputs.agent_id.clone(), content);
    if let Some(receiver) = payload.get("receiver").and_then(|r| r.as_str()) {
        message = message.with_receiver(receiver);
    }
    if let Some(metadata) = payload.get("metadata") {
        if !metadata.is_null() {
            message = message.with_metadata(metadata.clone());
        }
    }
    if let Some(model) = &inputs.agent_model {
        message = message.with_sender_model(model.clone());
    }
    Ok(message)
}

async fn execute_system_command(hook: &HookDef) -> Result<(), HookError> {
    let command = hook
        .config
        .as_ref()
        .and_then(|c| c.get("command"))
        .and_then(|c| c.as_str())
        .ok_or(HookError::EmptyConfig)?;

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).kill_on_drop(true);

    let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output())
        .await
        .map_err(|_| HookError::Command {
            status: -1,
            stderr_tail: format!("timed out after {}s", COMMAND_TIMEOUT.as_secs()),
        })?
        .map_err(|e| HookError::Command {
            status: -1,
            stderr_tail: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail_start = stderr.len().saturating_sub(1024);
        return Err(HookError::Command {
            status: output.status.code().unwrap_or(-1),
            stderr_tail: stderr[tail_start..].trim().to_string(),
        });
    }

    info!(command, "hook command completed");
    Ok(())
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
