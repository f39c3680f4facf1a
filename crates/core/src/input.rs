// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster input shapes.
//!
//! Issue identifiers and BMAD artifacts are resolved to task text by
//! external collaborators; the orchestrator only synthesizes the initial
//! `ISSUE_OPENED` message from whatever text it is handed.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// One of the accepted input shapes for a cluster start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClusterInput {
    Issue { issue: String },
    Text { text: String },
    Bmad { bmad: PathBuf },
}

impl ClusterInput {
    pub fn text(text: impl Into<String>) -> Self {
        ClusterInput::Text { text: text.into() }
    }

    /// The task text carried in the initial message.
    ///
    /// Issue and BMAD inputs are expected to be pre-resolved by the caller;
    /// the raw identifier is kept as a fallback so a cluster can still start.
    pub fn task_text(&self) -> String {
        match self {
            ClusterInput::Issue { issue } => issue.clone(),
            ClusterInput::Text { text } => text.clone(),
            ClusterInput::Bmad { bmad } => bmad.display().to_string(),
        }
    }

    /// Structured payload for `content.data` of the initial message.
    pub fn data(&self) -> Option<Value> {
        match self {
            ClusterInput::Issue { issue } => Some(json!({ "issue": issue })),
            ClusterInput::Text { .. } => None,
            ClusterInput::Bmad { bmad } => Some(json!({ "bmad": bmad.display().to_string() })),
        }
    }
}

#[cfg(test)]
#[path = "input_tests.rs"]
mod tests;
