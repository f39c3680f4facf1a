// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message model and well-known topics.
//!
//! Messages are immutable once appended to the ledger. The ledger assigns
//! `sequence`; the bus assigns `id`, `cluster_id`, and `timestamp` at publish.

use crate::id::ClusterId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sender name used for engine-internal messages.
pub const SENDER_SYSTEM: &str = "system";

/// Sender name used for orchestrator-originated messages.
pub const SENDER_ORCHESTRATOR: &str = "orchestrator";

/// Receiver name addressing every subscriber.
pub const RECEIVER_BROADCAST: &str = "broadcast";

/// Well-known topics exchanged on the cluster bus.
pub mod topics {
    /// Initial input message published by the orchestrator.
    pub const ISSUE_OPENED: &str = "ISSUE_OPENED";
    /// Agent state transition announcements (TASK_STARTED, TASK_COMPLETED, ...).
    pub const AGENT_LIFECYCLE: &str = "AGENT_LIFECYCLE";
    /// Raw child-process output, one message per stdout line.
    pub const AGENT_OUTPUT: &str = "AGENT_OUTPUT";
    /// Agent failure with attempt count; terminal after max attempts.
    pub const AGENT_ERROR: &str = "AGENT_ERROR";
    /// Validator verdict in feedback loops.
    pub const VALIDATION_RESULT: &str = "VALIDATION_RESULT";
    /// Dynamic reconfiguration chain addressed to the orchestrator.
    pub const CLUSTER_OPERATIONS: &str = "CLUSTER_OPERATIONS";
    /// Published when a chain fails atomic pre-validation.
    pub const CLUSTER_OPERATIONS_VALIDATION_FAILED: &str = "CLUSTER_OPERATIONS_VALIDATION_FAILED";
    /// Published when a chain fails mid-execution.
    pub const CLUSTER_OPERATIONS_FAILED: &str = "CLUSTER_OPERATIONS_FAILED";
    /// Terminal success topic.
    pub const CLUSTER_COMPLETE: &str = "CLUSTER_COMPLETE";
    /// Terminal failure topic.
    pub const CLUSTER_FAILED: &str = "CLUSTER_FAILED";
    pub const PLAN_READY: &str = "PLAN_READY";
    pub const IMPLEMENTATION_READY: &str = "IMPLEMENTATION_READY";
    pub const CONDUCTOR_ESCALATE: &str = "CONDUCTOR_ESCALATE";

    /// Topics used to locate the re-entry point when resuming a stopped cluster.
    pub const WORKFLOW_TRIGGERS: [&str; 5] = [
        ISSUE_OPENED,
        PLAN_READY,
        IMPLEMENTATION_READY,
        VALIDATION_RESULT,
        CONDUCTOR_ESCALATE,
    ];
}

/// Message payload: free text, a tagged data value, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            data: None,
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            text: None,
            data: Some(data),
        }
    }
}

/// A single ledger entry.
///
/// `sequence` is 0 until the ledger assigns it on append; readers never
/// observe an unassigned sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub cluster_id: ClusterId,
    #[serde(default)]
    pub sequence: u64,
    /// Wall-clock epoch milliseconds at publish.
    pub timestamp: u64,
    pub topic: String,
    pub sender: String,
    pub receiver: String,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    /// Tag of the LLM tier that produced this message, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_model: Option<String>,
}

impl Message {
    /// Build an unpublished message; id/cluster/sequence/timestamp are
    /// assigned by the bus at publish time.
    pub fn new(topic: impl Into<String>, sender: impl Into<String>, content: MessageContent) -> Self {
        Self {
            id: String::new(),
            cluster_id: ClusterId::new(""),
            sequence: 0,
            timestamp: 0,
            topic: topic.into(),
            sender: sender.into(),
            receiver: RECEIVER_BROADCAST.to_string(),
            content,
            metadata: Value::Null,
            sender_model: None,
        }
    }

    pub fn with_receiver(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = receiver.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_sender_model(mut self, model: impl Into<String>) -> Self {
        self.sender_model = Some(model.into());
        self
    }

    /// Fetch a field from `content.data` by key, when data is an object.
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.content.data.as_ref()?.get(key)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
