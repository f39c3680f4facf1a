// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain hook template substitution.
//!
//! Hooks without a transform carry a literal config in which the known
//! variables `{{cluster.id}}`, `{{cluster.createdAt}}`, `{{iteration}}`,
//! `{{error.message}}`, and `{{result.<field>}}` are substituted with type
//! preservation: a string leaf that is exactly one placeholder becomes the
//! typed value, mixed text interpolates string forms. Only known prefixes
//! are checked for residuals; arbitrary `{{...}}` in user content passes
//! through untouched.

use crate::error::LogicError;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static KNOWN_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(cluster\.id|cluster\.createdAt|iteration|error\.message|result\.[A-Za-z0-9_.]+)\s*\}\}")
        .expect("constant regex pattern is valid")
});

/// Values available to hook templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub cluster_id: String,
    pub cluster_created_at: u64,
    pub iteration: u32,
    pub error_message: Option<String>,
    pub result: Option<JsonValue>,
}

impl TemplateVars {
    fn lookup(&self, name: &str) -> Option<JsonValue> {
        match name {
            "cluster.id" => Some(JsonValue::String(self.cluster_id.clone())),
            "cluster.createdAt" => Some(JsonValue::from(self.cluster_created_at)),
            "iteration" => Some(JsonValue::from(self.iteration)),
            "error.message" => self
                .error_message
                .as_ref()
                .map(|m| JsonValue::String(m.clone())),
            _ => {
                let field = name.strip_prefix("result.")?;
                lookup_path(self.result.as_ref()?, field).cloned()
            }
        }
    }
}

fn lookup_path<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = root;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Substitute known template variables throughout a hook config value.
///
/// Fails with a template error when a known variable has no value; the
/// usual cause is a `{{result.X}}` reference to a field the agent never
/// produced.
pub fn substitute_hook_template(
    config: &JsonValue,
    vars: &TemplateVars,
) -> Result<JsonValue, LogicError> {
    Ok(match config {
        JsonValue::String(text) => substitute_leaf(text, vars)?,
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| substitute_hook_template(item, vars))
                .collect::<Result<_, _>>()?,
        ),
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), substitute_hook_template(value, vars)?);
            }
            JsonValue::Object(out)
        }
        other => other.clone(),
    })
}

fn substitute_leaf(text: &str, vars: &TemplateVars) -> Result<JsonValue, LogicError> {
    // Whole-leaf placeholder keeps the substituted type
    if let Some(caps) = KNOWN_VAR.captures(text) {
        if caps.get(0).map(|m| m.as_str()) == Some(text) {
            let name = &caps[1];
            return vars.lookup(name).ok_or_else(|| LogicError::Template {
                variable: name.to_string(),
            });
        }
    }

    let mut missing = None;
    let replaced = KNOWN_VAR.replace_all(text, |caps: &regex::Captures| {
        let name = &caps[1];
        match vars.lookup(name) {
            Some(JsonValue::String(s)) => s,
            Some(other) => other.to_string(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    if let Some(variable) = missing {
        return Err(LogicError::Template { variable });
    }
    Ok(JsonValue::String(replaced.into_owned()))
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
