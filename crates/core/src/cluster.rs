// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster records as persisted in the registry.

use crate::agent::{AgentConfig, AgentRuntimeState};
use crate::id::ClusterId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Lifecycle state of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    Initializing,
    Running,
    Stopping,
    Stopped,
    Killed,
    Failed,
    /// Registry says running but the owning PID is dead.
    Zombie,
    /// Zero-message ledger observed after initialization (interrupted start).
    Corrupted,
}

impl ClusterState {
    /// True when no process owns this cluster anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClusterState::Stopped
                | ClusterState::Killed
                | ClusterState::Failed
                | ClusterState::Corrupted
        )
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterState::Initializing => "initializing",
            ClusterState::Running => "running",
            ClusterState::Stopping => "stopping",
            ClusterState::Stopped => "stopped",
            ClusterState::Killed => "killed",
            ClusterState::Failed => "failed",
            ClusterState::Zombie => "zombie",
            ClusterState::Corrupted => "corrupted",
        };
        write!(f, "{s}")
    }
}

/// Workspace isolation flavor for a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    #[default]
    None,
    Worktree,
    Container,
}

/// Reference to a cluster configuration: a named static config or a
/// parameterized template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigRef {
    Named(String),
    Template {
        base: String,
        #[serde(default)]
        params: HashMap<String, Value>,
    },
}

/// Container isolation details persisted for resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationRecord {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub image: String,
    /// Host path of the preserved workspace copy mounted into the container.
    pub work_dir: PathBuf,
}

/// Worktree isolation details persisted for resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorktreeRecord {
    pub enabled: bool,
    pub path: PathBuf,
    pub branch: String,
    pub repo_root: PathBuf,
    pub work_dir: PathBuf,
}

/// Why a cluster failed, persisted for resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub iteration: u32,
    pub reason: String,
    pub failed_at: u64,
}

/// Per-agent state snapshot for cross-process status display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStateSnapshot {
    pub agent_id: String,
    pub role: String,
    #[serde(flatten)]
    pub state: AgentRuntimeState,
}

/// Resolved agent definitions for a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

impl ClusterConfig {
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        Self { agents }
    }

    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }
}

/// A cluster as persisted in the shared registry file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub state: ClusterState,
    pub created_at: u64,
    /// PID of the owning orchestrator process; cleared on non-running states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub config: ClusterConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<WorktreeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    #[serde(default)]
    pub agent_states: Vec<AgentStateSnapshot>,
}

impl ClusterRecord {
    pub fn new(id: ClusterId, config: ClusterConfig, created_at: u64) -> Self {
        Self {
            id,
            state: ClusterState::Initializing,
            created_at,
            pid: Some(std::process::id()),
            config,
            isolation: None,
            worktree: None,
            failure_info: None,
            agent_states: Vec::new(),
        }
    }

    /// The working directory agents should run in, if isolated.
    pub fn workspace_dir(&self) -> Option<&PathBuf> {
        if let Some(wt) = &self.worktree {
            return Some(&wt.work_dir);
        }
        if let Some(iso) = &self.isolation {
            return Some(&iso.work_dir);
        }
        None
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
