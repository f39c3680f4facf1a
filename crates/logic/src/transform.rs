// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook transform execution.
//!
//! A transform script is a JSON template whose string leaves may embed
//! `${expr}` expressions. A leaf that is exactly one expression substitutes
//! the typed value; mixed text interpolates string forms. The produced
//! object must carry `topic` and `content`.

use crate::context::ScriptContext;
use crate::engine::TRANSFORM_TIMEOUT;
use crate::error::LogicError;
use crate::value::eval_to_json;
use evalexpr::eval_with_context;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;
use zs_core::TransformDef;

/// Expression pattern inside template string leaves.
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static EXPR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("constant regex pattern is valid"));

/// Identity of the task a transform runs for, used in diagnostics.
#[derive(Debug, Clone)]
pub struct TransformMeta {
    pub agent_id: String,
    pub task_id: String,
    pub iteration: u32,
    /// Byte length of the raw child output the result was parsed from.
    pub output_len: usize,
}

/// Execute a transform against the agent result, producing the hook's
/// message payload.
pub async fn run_transform(
    def: &TransformDef,
    ctx: ScriptContext,
    meta: TransformMeta,
) -> Result<JsonValue, LogicError> {
    if def.engine != "expr" {
        return Err(LogicError::Sandbox(format!(
            "unsupported transform engine '{}'",
            def.engine
        )));
    }

    // A script that reads result fields cannot run without a parsed result
    if def.script.contains("result.") && ctx.result.is_none() {
        return Err(LogicError::MissingOutput {
            agent_id: meta.agent_id,
            task_id: meta.task_id,
            iteration: meta.iteration,
            output_len: meta.output_len,
        });
    }

    let template: JsonValue = serde_json::from_str(&def.script)
        .map_err(|e| LogicError::Sandbox(format!("transform script is not valid JSON: {e}")))?;

    let task = tokio::task::spawn_blocking(move || -> Result<JsonValue, LogicError> {
        let context = ctx.build()?;
        substitute(&template, &context)
    });

    let produced = match tokio::time::timeout(TRANSFORM_TIMEOUT, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join)) => return Err(LogicError::Sandbox(join.to_string())),
        Err(_) => return Err(LogicError::Timeout(TRANSFORM_TIMEOUT)),
    };

    check_contract(&produced)?;
    Ok(produced)
}

fn substitute(
    template: &JsonValue,
    context: &evalexpr::HashMapContext,
) -> Result<JsonValue, LogicError> {
    Ok(match template {
        JsonValue::String(text) => substitute_leaf(text, context)?,
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| substitute(item, context))
                .collect::<Result<_, _>>()?,
        ),
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), substitute(value, context)?);
            }
            JsonValue::Object(out)
        }
        other => other.clone(),
    })
}

fn substitute_leaf(
    text: &str,
    context: &evalexpr::HashMapContext,
) -> Result<JsonValue, LogicError> {
    // Whole-leaf expression keeps the evaluated type
    if let Some(caps) = EXPR_PATTERN.captures(text) {
        if caps.get(0).map(|m| m.as_str()) == Some(text) {
            let value = eval_with_context(&caps[1], context)
                .map_err(|e| LogicError::Sandbox(e.to_string()))?;
            return Ok(eval_to_json(&value));
        }
    }

    // Mixed text interpolates string forms
    let mut failure = None;
    let replaced = EXPR_PATTERN.replace_all(text, |caps: &regex::Captures| {
        match eval_with_context(&caps[1], context) {
            Ok(value) => match eval_to_json(&value) {
                JsonValue::String(s) => s,
                other => other.to_string(),
            },
            Err(e) => {
                failure.get_or_insert_with(|| e.to_string());
                String::new()
            }
        }
    });
    if let Some(message) = failure {
        return Err(LogicError::Sandbox(message));
    }
    Ok(JsonValue::String(replaced.into_owned()))
}

fn check_contract(produced: &JsonValue) -> Result<(), LogicError> {
    let object = produced.as_object().ok_or_else(|| LogicError::Contract {
        field: "topic".to_string(),
    })?;
    for field in ["topic", "content"] {
        if !object.contains_key(field) {
            return Err(LogicError::Contract {
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "transform_tests.rs"]
mod tests;
