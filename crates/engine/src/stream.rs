// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process stdout grammar.
//!
//! The child emits newline-delimited JSON events tagged with a `type`
//! field. Unknown tags are ignored; non-JSON non-empty lines surface as
//! raw text so plain-print children still stream something useful.

use serde_json::Value;

/// One parsed stdout event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    /// Token chunk.
    Text { text: String },
    /// Internal reasoning surface; carried for observers, no payload kept.
    Thinking,
    ToolStart {
        tool_name: Option<String>,
    },
    ToolCall {
        tool_name: Option<String>,
        input: Option<Value>,
    },
    ToolInput,
    ToolResult {
        content: Option<String>,
        is_error: bool,
    },
    /// Terminal event.
    Result {
        success: bool,
        error: Option<String>,
        output: Option<String>,
    },
    /// Line that is not a structured event.
    Raw { line: String },
    /// Known-shape JSON with an unknown tag.
    Ignored,
}

fn get_str(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(|x| x.as_str()).map(String::from)
}

/// Parse a single stdout line. Returns None for empty lines.
pub fn parse_line(line: &str) -> Option<ChildEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let json: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => {
            return Some(ChildEvent::Raw {
                line: trimmed.to_string(),
            })
        }
    };

    let Some(kind) = json.get("type").and_then(|t| t.as_str()) else {
        return Some(ChildEvent::Raw {
            line: trimmed.to_string(),
        });
    };

    Some(match kind {
        "text" => ChildEvent::Text {
            text: get_str(&json, "text").unwrap_or_default(),
        },
        "thinking" | "thinking_start" => ChildEvent::Thinking,
        "tool_start" => ChildEvent::ToolStart {
            tool_name: get_str(&json, "toolName"),
        },
        "tool_call" => ChildEvent::ToolCall {
            tool_name: get_str(&json, "toolName"),
            input: json.get("input").cloned(),
        },
        "tool_input" => ChildEvent::ToolInput,
        "tool_result" => ChildEvent::ToolResult {
            content: get_str(&json, "content"),
            is_error: json
                .get("isError")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        },
        "result" => ChildEvent::Result {
            success: json
                .get("success")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            error: get_str(&json, "error"),
            output: match json.get("output") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) if !other.is_null() => Some(other.to_string()),
                _ => None,
            },
        },
        _ => ChildEvent::Ignored,
    })
}

/// Parse a result event's `output` payload into a structured object, when
/// it is one. Hooks receive this as `result.*`.
pub fn parse_result_output(output: &str) -> Option<Value> {
    let parsed: Value = serde_json::from_str(output.trim()).ok()?;
    parsed.is_object().then_some(parsed)
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
