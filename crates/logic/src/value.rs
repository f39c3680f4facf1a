// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversions between JSON values and evaluator values.

use evalexpr::Value as EvalValue;
use serde_json::Value as JsonValue;

/// Convert a JSON value into an evaluator value.
///
/// Arrays become tuples; objects are carried as their compact JSON text so
/// scripts can pass them through or probe them with `json_get`.
pub fn json_to_eval(value: &JsonValue) -> EvalValue {
    match value {
        JsonValue::Null => EvalValue::Empty,
        JsonValue::Bool(b) => EvalValue::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                EvalValue::Int(i)
            } else {
                EvalValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => EvalValue::String(s.clone()),
        JsonValue::Array(items) => {
            EvalValue::Tuple(items.iter().map(json_to_eval).collect())
        }
        JsonValue::Object(_) => {
            EvalValue::String(serde_json::to_string(value).unwrap_or_default())
        }
    }
}

/// Convert an evaluator value back into JSON.
pub fn eval_to_json(value: &EvalValue) -> JsonValue {
    match value {
        EvalValue::Empty => JsonValue::Null,
        EvalValue::Boolean(b) => JsonValue::Bool(*b),
        EvalValue::Int(i) => JsonValue::from(*i),
        EvalValue::Float(f) => {
            serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
        }
        EvalValue::String(s) => JsonValue::String(s.clone()),
        EvalValue::Tuple(items) => JsonValue::Array(items.iter().map(eval_to_json).collect()),
    }
}

/// Flatten a JSON value into dotted variable bindings under `prefix`.
///
/// Objects recurse (`result.summary`), everything else binds at the prefix.
/// Object nodes additionally bind their JSON text at the prefix itself so a
/// script can reference either `result` or `result.summary`.
pub fn flatten_into(prefix: &str, value: &JsonValue, out: &mut Vec<(String, EvalValue)>) {
    match value {
        JsonValue::Object(map) => {
            out.push((prefix.to_string(), json_to_eval(value)));
            for (key, child) in map {
                flatten_into(&format!("{prefix}.{key}"), child, out);
            }
        }
        other => out.push((prefix.to_string(), json_to_eval(other))),
    }
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;
