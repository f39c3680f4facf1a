// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster config validation.
//!
//! Used at cluster start and by the orchestrator's operations pre-check,
//! which validates the hypothetical post-chain agent set before any
//! operation runs.

use thiserror::Error;
use zs_core::{AgentKind, ClusterConfig};

/// Hook actions the runtime knows how to execute.
pub(crate) const KNOWN_HOOK_ACTIONS: [&str; 2] = ["publish_message", "execute_system_command"];

/// Aggregated validation failures for a config.
#[derive(Debug, Error)]
#[error("invalid cluster config: {}", errors.join("; "))]
pub struct ConfigValidationError {
    pub errors: Vec<String>,
}

/// Validate a resolved config; collects every problem rather than stopping
/// at the first.
pub fn validate_config(config: &ClusterConfig) -> Result<(), ConfigValidationError> {
    let mut errors = Vec::new();

    let mut seen = std::collections::HashSet::new();
    for agent in &config.agents {
        if agent.id.trim().is_empty() {
            errors.push("agent with empty id".to_string());
            continue;
        }
        if !seen.insert(agent.id.as_str()) {
            errors.push(format!("duplicate agent id '{}'", agent.id));
        }
        if agent.role.trim().is_empty() {
            errors.push(format!("agent '{}' has empty role", agent.id));
        }
        if agent.prompt.trim().is_empty() && agent.kind != AgentKind::Subcluster {
            errors.push(format!("agent '{}' has empty prompt", agent.id));
        }
        if agent.kind == AgentKind::Subcluster && agent.subcluster.is_none() {
            errors.push(format!(
                "agent '{}' is a subcluster agent but has no subcluster config",
                agent.id
            ));
        }
        for trigger in &agent.triggers {
            if trigger.topic.trim().is_empty() {
                errors.push(format!("agent '{}' has a trigger with empty topic", agent.id));
            }
        }
        if let Some(hooks) = &agent.hooks {
            if let Some(hook) = &hooks.on_complete {
                if !KNOWN_HOOK_ACTIONS.contains(&hook.action.as_str()) {
                    errors.push(format!(
                        "agent '{}' has unknown hook action '{}'",
                        agent.id, hook.action
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigValidationError { errors })
    }
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
