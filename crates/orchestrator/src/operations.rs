// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `CLUSTER_OPERATIONS` chains: parse, pre-validate atomically, execute
//! sequentially.
//!
//! Pre-validation builds the hypothetical post-chain agent set and runs
//! the config validator on it; a failing chain publishes
//! `CLUSTER_OPERATIONS_VALIDATION_FAILED` and has no side effects.

use serde::Deserialize;
use serde_json::Value;
use zs_core::{AgentConfig, ClusterConfig, ConfigRef, Message, MessageContent};
use zs_template::{validate_config, TemplateResolver};

/// One operation in a chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Operation {
    AddAgents {
        agents: Vec<AgentConfig>,
    },
    RemoveAgents {
        #[serde(rename = "agentIds", alias = "agent_ids")]
        agent_ids: Vec<String>,
    },
    UpdateAgent {
        #[serde(rename = "agentId", alias = "agent_id")]
        agent_id: String,
        updates: Value,
    },
    Publish {
        topic: String,
        #[serde(default)]
        content: MessageContent,
        #[serde(default)]
        metadata: Value,
    },
    LoadConfig {
        config: ConfigRef,
    },
}

/// Parse a chain from a `CLUSTER_OPERATIONS` message payload.
///
/// Accepts either a bare array or `{"operations": [...]}`.
pub fn parse_chain(message: &Message) -> Result<Vec<Operation>, String> {
    let data = message
        .content
        .data
        .as_ref()
        .ok_or_else(|| "CLUSTER_OPERATIONS message carries no data".to_string())?;
    let list = match data {
        Value::Array(_) => data.clone(),
        Value::Object(map) => map
            .get("operations")
            .cloned()
            .ok_or_else(|| "expected an 'operations' array".to_string())?,
        _ => return Err("expected an operations array".to_string()),
    };
    serde_json::from_value(list).map_err(|e| format!("invalid operation chain: {e}"))
}

/// Validate the whole chain against the hypothetical post-chain agent set.
///
/// Returns the human-readable errors on failure; the chain must then be
/// abandoned without side effects.
pub fn pre_validate(
    current_agents: &[AgentConfig],
    chain: &[Operation],
    resolver: &TemplateResolver,
) -> Result<(), Vec<String>> {
    let mut hypothetical: Vec<AgentConfig> = current_agents.to_vec();
    let mut errors = Vec::new();

    for (index, op) in chain.iter().enumerate() {
        match op {
            Operation::AddAgents { agents } => {
                hypothetical.extend(agents.iter().cloned());
            }
            Operation::RemoveAgents { agent_ids } => {
                hypothetical.retain(|a| !agent_ids.contains(&a.id));
            }
            Operation::UpdateAgent { agent_id, updates } => {
                let Some(agent) = hypothetical.iter_mut().find(|a| a.id == *agent_id) else {
                    errors.push(format!("operation {index}: unknown agent '{agent_id}'"));
                    continue;
                };
                if let Err(e) = apply_updates(agent, updates) {
                    errors.push(format!("operation {index}: {e}"));
                }
            }
            Operation::Publish { topic, .. } => {
                if topic.trim().is_empty() {
                    errors.push(format!("operation {index}: publish with empty topic"));
                }
            }
            Operation::LoadConfig { config } => match resolve(resolver, config) {
                Ok(resolved) => hypothetical.extend(resolved.agents),
                Err(e) => errors.push(format!("operation {index}: {e}")),
            },
        }
    }

    if let Err(e) = validate_config(&ClusterConfig::new(hypothetical)) {
        errors.extend(e.errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Resolve a `load_config` reference: a named static config or a
/// parameterized base.
pub fn resolve(
    resolver: &TemplateResolver,
    config: &ConfigRef,
) -> Result<ClusterConfig, zs_template::TemplateError> {
    match config {
        ConfigRef::Named(name) => resolver.load_named(name),
        ConfigRef::Template { base, params } => resolver.resolve(base, params),
    }
}

/// Shallow-merge a JSON patch into an agent config.
pub fn apply_updates(agent: &mut AgentConfig, updates: &Value) -> Result<(), String> {
    let mut tree = serde_json::to_value(&*agent).map_err(|e| e.to_string())?;
    let (Some(target), Some(patch)) = (tree.as_object_mut(), updates.as_object()) else {
        return Err("updates must be an object".to_string());
    };
    for (key, value) in patch {
        if key == "id" {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
    *agent = serde_json::from_value(tree).map_err(|e| format!("invalid updates: {e}"))?;
    Ok(())
}

#[cfg(test)]
#[path = "operations_tests.rs"]
mod tests;
