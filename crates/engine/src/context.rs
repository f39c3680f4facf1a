// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt context assembly.
//!
//! The child's prompt is composed from the agent's static prompt, the task
//! root, the triggering message, and a curated slice of recent ledger
//! activity in the topics the agent subscribes to. Nothing from the host
//! environment is ever included.

use parking_lot::Mutex;
use std::sync::Arc;
use zs_core::message::topics;
use zs_core::{AgentConfig, Message};
use zs_storage::{Ledger, MessageQuery};

/// Messages per subscribed topic included in the context slice.
const RECENT_PER_TOPIC: usize = 5;

fn render_message(msg: &Message) -> String {
    let mut line = format!("- [{}] {}", msg.topic, msg.sender);
    if let Some(text) = &msg.content.text {
        line.push_str(": ");
        line.push_str(text);
    }
    if let Some(data) = &msg.content.data {
        line.push_str(&format!(" {data}"));
    }
    line
}

/// Build the prompt block for one task attempt.
pub fn build_prompt(
    config: &AgentConfig,
    trigger: &Message,
    ledger: &Arc<Mutex<Ledger>>,
    iteration: u32,
    resume_preamble: Option<&str>,
) -> String {
    let mut prompt = String::new();

    if let Some(preamble) = resume_preamble {
        prompt.push_str(preamble);
        prompt.push_str("\n\n");
    }

    prompt.push_str(&config.prompt);

    // Task root: the cluster's initial input
    let root = ledger.lock().find_last(topics::ISSUE_OPENED).ok().flatten();
    if let Some(root) = &root {
        if let Some(text) = &root.content.text {
            prompt.push_str("\n\n## Task\n");
            prompt.push_str(text);
        }
    }

    prompt.push_str(&format!(
        "\n\n## Triggering message [{}] from {}\n",
        trigger.topic, trigger.sender
    ));
    if let Some(text) = &trigger.content.text {
        prompt.push_str(text);
        prompt.push('\n');
    }
    if let Some(data) = &trigger.content.data {
        prompt.push_str(&data.to_string());
        prompt.push('\n');
    }

    // Recent activity in the agent's subscribed topics
    let mut recent: Vec<Message> = Vec::new();
    for t in config.triggers.iter().map(|t| t.topic.as_str()) {
        if t.contains('*') {
            continue;
        }
        let messages = ledger
            .lock()
            .query(&MessageQuery {
                topic: Some(t.to_string()),
                limit: Some(RECENT_PER_TOPIC),
                ..Default::default()
            })
            .unwrap_or_default();
        recent.extend(messages);
    }
    recent.sort_by_key(|m| m.sequence);
    recent.dedup_by_key(|m| m.sequence);
    recent.retain(|m| m.sequence != trigger.sequence);

    if !recent.is_empty() {
        prompt.push_str("\n## Recent activity\n");
        for msg in &recent {
            prompt.push_str(&render_message(msg));
            prompt.push('\n');
        }
    }

    prompt.push_str(&format!("\n## Iteration\n{iteration}\n"));
    prompt
}

/// Preamble for a resumed task after failure.
pub fn resume_preamble(error: &str, recent: &[Message]) -> String {
    let mut preamble = format!(
        "You previously failed this task. The last error was:\n{error}\n"
    );
    if !recent.is_empty() {
        preamble.push_str("\nRecent context from the previous attempt:\n");
        for msg in recent {
            preamble.push_str(&render_message(msg));
            preamble.push('\n');
        }
    }
    preamble.push_str("\nPick up where you left off and finish the task.");
    preamble
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
