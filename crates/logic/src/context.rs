// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Evaluation context construction.
//!
//! A fresh context is built for every evaluation and dropped afterwards;
//! scripts cannot mutate engine state, reach the filesystem, or observe
//! anything beyond the bindings and helper functions enumerated here.

use crate::error::LogicError;
use crate::value::{flatten_into, json_to_eval};
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, DefaultNumericTypes,
    EvalexprError, Function, HashMapContext, Value as EvalValue,
};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use zs_core::Message;
use zs_storage::{Ledger, MessageQuery};

/// Agent roster entry exposed to scripts.
#[derive(Debug, Clone)]
pub struct AgentRef {
    pub id: String,
    pub role: String,
}

/// Inputs available to a script evaluation.
///
/// All fields are optional except cluster identity; predicates typically get
/// `message`, transforms get `result` and `error_message`.
#[derive(Clone, Default)]
pub struct ScriptContext {
    pub cluster_id: String,
    pub cluster_created_at: u64,
    pub iteration: u32,
    pub message: Option<Message>,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub agents: Vec<AgentRef>,
    /// Read access scoped to the current cluster's ledger.
    pub ledger: Option<Arc<Mutex<Ledger>>>,
}

impl ScriptContext {
    /// Build the frozen evaluator context: variable bindings plus the fixed
    /// helper function surface.
    pub fn build(&self) -> Result<HashMapContext, LogicError> {
        let mut ctx = HashMapContext::new();

        let set = |ctx: &mut HashMapContext, name: &str, value: EvalValue| {
            ctx.set_value(name.to_string(), value)
                .map_err(|e| LogicError::Sandbox(e.to_string()))
        };

        set(&mut ctx, "cluster.id", EvalValue::String(self.cluster_id.clone()))?;
        set(
            &mut ctx,
            "cluster.created_at",
            EvalValue::Int(self.cluster_created_at as i64),
        )?;
        set(&mut ctx, "iteration", EvalValue::Int(self.iteration as i64))?;

        if let Some(error) = &self.error_message {
            set(&mut ctx, "error.message", EvalValue::String(error.clone()))?;
        }

        if let Some(message) = &self.message {
            set(&mut ctx, "message.topic", EvalValue::String(message.topic.clone()))?;
            set(&mut ctx, "message.sender", EvalValue::String(message.sender.clone()))?;
            if let Some(text) = &message.content.text {
                set(&mut ctx, "message.text", EvalValue::String(text.clone()))?;
            }
            // Data fields bind both bare (`approved`) and dotted (`data.approved`)
            if let Some(data) = &message.content.data {
                let mut bindings = Vec::new();
                flatten_into("data", data, &mut bindings);
                if let JsonValue::Object(map) = data {
                    for (key, value) in map {
                        bindings.push((key.clone(), json_to_eval(value)));
                    }
                }
                for (name, value) in bindings {
                    set(&mut ctx, &name, value)?;
                }
            }
        }

        if let Some(result) = &self.result {
            let mut bindings = Vec::new();
            flatten_into("result", result, &mut bindings);
            for (name, value) in bindings {
                set(&mut ctx, &name, value)?;
            }
        }

        self.install_functions(&mut ctx)?;
        Ok(ctx)
    }

    fn install_functions(&self, ctx: &mut HashMapContext) -> Result<(), LogicError> {
        let add = |ctx: &mut HashMapContext, name: &str, function: Function<DefaultNumericTypes>| {
            ctx.set_function(name.to_string(), function)
                .map_err(|e| LogicError::Sandbox(e.to_string()))
        };

        // ledger_count(topic) -> int
        let ledger = self.ledger.clone();
        add(
            ctx,
            "ledger_count",
            Function::new(move |argument| {
                let topic = argument.as_string()?;
                let Some(ledger) = &ledger else {
                    return Ok(EvalValue::Int(0));
                };
                let count = ledger
                    .lock()
                    .count(Some(&topic))
                    .map_err(|e| EvalexprError::CustomMessage(e.to_string()))?;
                Ok(EvalValue::Int(count as i64))
            }),
        )?;

        // ledger_find_last_data(topic, field) -> value | empty
        let ledger = self.ledger.clone();
        add(
            ctx,
            "ledger_find_last_data",
            Function::new(move |argument| {
                let args = argument.as_tuple()?;
                if args.len() != 2 {
                    return Err(EvalexprError::CustomMessage(
                        "ledger_find_last_data expects (topic, field)".to_string(),
                    ));
                }
                let topic = args[0].as_string()?;
                let field = args[1].as_string()?;
                let Some(ledger) = &ledger else {
                    return Ok(EvalValue::Empty);
                };
                let last = ledger
                    .lock()
                    .find_last(&topic)
                    .map_err(|e| EvalexprError::CustomMessage(e.to_string()))?;
                Ok(last
                    .and_then(|m| m.data_field(&field).map(json_to_eval))
                    .unwrap_or(EvalValue::Empty))
            }),
        )?;

        // all_responded(role, topic, since_seq) -> bool
        let ledger = self.ledger.clone();
        let agents = self.agents.clone();
        add(
            ctx,
            "all_responded",
            Function::new(move |argument| {
                let args = argument.as_tuple()?;
                if args.len() != 3 {
                    return Err(EvalexprError::CustomMessage(
                        "all_responded expects (role, topic, since_seq)".to_string(),
                    ));
                }
                let role = args[0].as_string()?;
                let topic = args[1].as_string()?;
                let since = args[2].as_int()? as u64;
                let Some(ledger) = &ledger else {
                    return Ok(EvalValue::Boolean(false));
                };
                let messages = ledger
                    .lock()
                    .query(&MessageQuery {
                        topic: Some(topic),
                        since_seq: Some(since),
                        ..Default::default()
                    })
                    .map_err(|e| EvalexprError::CustomMessage(e.to_string()))?;
                let expected: Vec<&AgentRef> =
                    agents.iter().filter(|a| a.role == role).collect();
                let all = !expected.is_empty()
                    && expected
                        .iter()
                        .all(|a| messages.iter().any(|m| m.sender == a.id));
                Ok(EvalValue::Boolean(all))
            }),
        )?;

        // has_consensus(topic, since_seq) -> bool: at least one message and
        // every message's data.approved is true
        let ledger = self.ledger.clone();
        add(
            ctx,
            "has_consensus",
            Function::new(move |argument| {
                let args = argument.as_tuple()?;
                if args.len() != 2 {
                    return Err(EvalexprError::CustomMessage(
                        "has_consensus expects (topic, since_seq)".to_string(),
                    ));
                }
                let topic = args[0].as_string()?;
                let since = args[1].as_int()? as u64;
                let Some(ledger) = &ledger else {
                    return Ok(EvalValue::Boolean(false));
                };
                let messages = ledger
                    .lock()
                    .query(&MessageQuery {
                        topic: Some(topic),
                        since_seq: Some(since),
                        ..Default::default()
                    })
                    .map_err(|e| EvalexprError::CustomMessage(e.to_string()))?;
                let consensus = !messages.is_empty()
                    && messages.iter().all(|m| {
                        m.data_field("approved")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false)
                    });
                Ok(EvalValue::Boolean(consensus))
            }),
        )?;

        // agents_with_role(role) -> int
        let agents = self.agents.clone();
        add(
            ctx,
            "agents_with_role",
            Function::new(move |argument| {
                let role = argument.as_string()?;
                let count = agents.iter().filter(|a| a.role == role).count();
                Ok(EvalValue::Int(count as i64))
            }),
        )?;

        // get_config(complexity, task_type) -> template base name
        add(
            ctx,
            "get_config",
            Function::new(move |argument| {
                let args = argument.as_tuple()?;
                if args.len() != 2 {
                    return Err(EvalexprError::CustomMessage(
                        "get_config expects (complexity, task_type)".to_string(),
                    ));
                }
                let complexity = args[0].as_string()?;
                let task_type = args[1].as_string()?;
                Ok(EvalValue::String(route_config(&complexity, &task_type)))
            }),
        )?;

        // json_get(json_text, key) -> value | empty
        add(
            ctx,
            "json_get",
            Function::new(move |argument| {
                let args = argument.as_tuple()?;
                if args.len() != 2 {
                    return Err(EvalexprError::CustomMessage(
                        "json_get expects (json_text, key)".to_string(),
                    ));
                }
                let text = args[0].as_string()?;
                let key = args[1].as_string()?;
                let parsed: JsonValue = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(_) => return Ok(EvalValue::Empty),
                };
                Ok(parsed.get(&key).map(json_to_eval).unwrap_or(EvalValue::Empty))
            }),
        )?;

        Ok(())
    }
}

/// Template routing for conductor hooks: pick a workflow base from task
/// complexity and type.
fn route_config(complexity: &str, task_type: &str) -> String {
    if task_type == "debug" {
        return "debug-workflow".to_string();
    }
    match complexity {
        "high" => "full-workflow",
        "medium" => "worker-validator",
        _ => "single-worker",
    }
    .to_string()
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
