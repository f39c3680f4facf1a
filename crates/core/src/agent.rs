// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration: triggers, hooks, and runtime state.

use crate::cluster::ConfigRef;
use crate::id::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Match a trigger topic pattern against a concrete topic.
///
/// Patterns are exact, the wildcard `*`, or a prefix glob `PREFIX_*`
/// (matches topics starting with `PREFIX_`).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return topic.starts_with(prefix);
    }
    pattern == topic
}

/// Sandbox-evaluated predicate attached to a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicDef {
    pub script: String,
}

/// What a trigger does when its topic (and predicate) match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TriggerAction {
    /// Spawn the agent's child process with a synthesized prompt.
    #[default]
    ExecuteTask,
    /// Publish `CLUSTER_COMPLETE` so the orchestrator stops the cluster.
    StopCluster,
    /// Application-defined action name, resolved by the runtime.
    Custom(String),
}

impl TriggerAction {
    pub fn as_str(&self) -> &str {
        match self {
            TriggerAction::ExecuteTask => "execute_task",
            TriggerAction::StopCluster => "stop_cluster",
            TriggerAction::Custom(name) => name,
        }
    }
}

impl Serialize for TriggerAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TriggerAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "execute_task" => TriggerAction::ExecuteTask,
            "stop_cluster" => TriggerAction::StopCluster,
            _ => TriggerAction::Custom(s),
        })
    }
}

/// Wakes an agent when a matching message appears on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub topic: String,
    #[serde(default)]
    pub action: TriggerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<LogicDef>,
}

impl Trigger {
    pub fn on_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            action: TriggerAction::ExecuteTask,
            logic: None,
        }
    }

    pub fn with_logic(mut self, script: impl Into<String>) -> Self {
        self.logic = Some(LogicDef {
            script: script.into(),
        });
        self
    }

    pub fn with_action(mut self, action: TriggerAction) -> Self {
        self.action = action;
        self
    }
}

/// Transform producing a hook's message payload from the agent result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformDef {
    /// Expression engine tag; only `"expr"` is supported.
    pub engine: String,
    /// JSON template whose string leaves may embed `${...}` expressions.
    pub script: String,
}

/// Post-task hook definition.
///
/// `action` stays a free string so unknown actions surface at execution
/// time as `UnknownHookAction` rather than failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDef {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformDef>,
}

/// Hook attachment points for an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<HookDef>,
}

/// Kind of agent: a regular child-process worker or a nested cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    Default,
    Subcluster,
}

/// Child-cluster definition for subcluster agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubclusterDef {
    pub config: ConfigRef,
}

/// Static configuration of one agent within a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<AgentHooks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, rename = "type")]
    pub kind: AgentKind,
    /// Child command argv; the synthesized prompt is appended as the final
    /// argument. None selects the default LLM CLI invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcluster: Option<SubclusterDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_schema: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, role: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            model: None,
            triggers: Vec::new(),
            prompt: prompt.into(),
            hooks: None,
            cwd: None,
            kind: AgentKind::Default,
            command: None,
            subcluster: None,
            strict_schema: None,
            json_schema: None,
            max_tokens: None,
        }
    }

    /// True if any trigger's topic pattern matches the given topic.
    pub fn listens_to(&self, topic: &str) -> bool {
        self.triggers.iter().any(|t| topic_matches(&t.topic, topic))
    }
}

/// Observable phase of an agent's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    #[default]
    Idle,
    Evaluating,
    ExecutingTask,
    Error,
    Stopped,
}

impl std::fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentPhase::Idle => "idle",
            AgentPhase::Evaluating => "evaluating",
            AgentPhase::ExecutingTask => "executing_task",
            AgentPhase::Error => "error",
            AgentPhase::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Mutable runtime state of an agent, snapshotted into the registry for
/// cross-process status display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRuntimeState {
    pub state: AgentPhase,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_pid: Option<u32>,
    /// Epoch ms of the most recent child output, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output_at: Option<u64>,
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
