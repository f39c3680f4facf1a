// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template resolution: parameters in, resolved cluster config out.

use crate::catalog::find_base;
use crate::params::interpolate;
use crate::validate::{validate_config, ConfigValidationError};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use zs_core::ClusterConfig;

/// Errors resolving a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown template base '{0}'")]
    UnknownBase(String),

    #[error("missing required parameters for '{base}': {}", missing.join(", "))]
    MissingParams { base: String, missing: Vec<String> },

    #[error("parameter '{param}' has invalid value: {message}")]
    InvalidParam { param: String, message: String },

    #[error(transparent)]
    Invalid(#[from] ConfigValidationError),

    #[error("config serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A user-registered template: a config skeleton with `${param}`
/// placeholders in its string fields.
#[derive(Debug, Clone)]
pub struct CustomTemplate {
    pub name: String,
    pub required_params: Vec<String>,
    pub config: ClusterConfig,
}

/// Environment-driven enrichment applied during resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    /// Parallelism hint; values > 1 add an instruction to worker prompts.
    pub workers: u32,
    /// Inject the PR-creation agent.
    pub pr: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            pr: false,
        }
    }
}

impl ResolveOptions {
    pub fn from_env() -> Self {
        Self {
            workers: zs_core::env::workers(),
            pr: zs_core::env::pr_enabled(),
        }
    }
}

/// Resolves base templates with parameter maps.
#[derive(Default)]
pub struct TemplateResolver {
    custom: IndexMap<String, CustomTemplate>,
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a user template.
    pub fn register(&mut self, template: CustomTemplate) {
        self.custom.insert(template.name.clone(), template);
    }

    /// True if `name` is a known base (built-in or registered).
    pub fn knows(&self, name: &str) -> bool {
        find_base(name).is_some() || self.custom.contains_key(name)
    }

    /// Resolve with enrichment options taken from the environment.
    pub fn resolve(
        &self,
        base: &str,
        params: &HashMap<String, Value>,
    ) -> Result<ClusterConfig, TemplateError> {
        self.resolve_with(base, params, ResolveOptions::from_env())
    }

    /// Resolve a base with explicit options. Deterministic: equal inputs
    /// yield byte-identical configs.
    pub fn resolve_with(
        &self,
        base: &str,
        params: &HashMap<String, Value>,
        options: ResolveOptions,
    ) -> Result<ClusterConfig, TemplateError> {
        let mut params = params.clone();
        apply_defaults(&mut params);

        let (required, skeleton): (Vec<String>, ClusterConfig) = if let Some(built_in) =
            find_base(base)
        {
            let validator_count = validator_count(&params)?;
            (
                built_in.required_params.iter().map(|s| s.to_string()).collect(),
                ClusterConfig::new((built_in.build)(validator_count)),
            )
        } else if let Some(custom) = self.custom.get(base) {
            (custom.required_params.clone(), custom.config.clone())
        } else {
            return Err(TemplateError::UnknownBase(base.to_string()));
        };

        let missing: Vec<String> = required
            .iter()
            .filter(|name| !params.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TemplateError::MissingParams {
                base: base.to_string(),
                missing,
            });
        }

        let mut config = substitute_params(&skeleton, &params)?;

        if let Some(Value::Number(n)) = params.get("max_tokens") {
            if let Some(max_tokens) = n.as_u64() {
                for agent in &mut config.agents {
                    agent.max_tokens = Some(max_tokens);
                }
            }
        }

        enrich(&mut config, options);

        validate_config(&config)?;
        Ok(config)
    }

    /// Load a named static config: a registered template resolved with an
    /// empty parameter map.
    pub fn load_named(&self, name: &str) -> Result<ClusterConfig, TemplateError> {
        self.resolve_with(name, &HashMap::new(), ResolveOptions::from_env())
    }
}

fn apply_defaults(params: &mut HashMap<String, Value>) {
    params
        .entry("max_iterations".to_string())
        .or_insert_with(|| Value::from(3));
    params
        .entry("validator_count".to_string())
        .or_insert_with(|| Value::from(1));
}

fn validator_count(params: &HashMap<String, Value>) -> Result<usize, TemplateError> {
    match params.get("validator_count") {
        Some(Value::Number(n)) => {
            n.as_u64()
                .map(|v| v as usize)
                .ok_or_else(|| TemplateError::InvalidParam {
                    param: "validator_count".to_string(),
                    message: format!("expected a non-negative integer, got {n}"),
                })
        }
        Some(other) => Err(TemplateError::InvalidParam {
            param: "validator_count".to_string(),
            message: format!("expected a number, got {other}"),
        }),
        None => Ok(1),
    }
}

/// Substitute `${param}` placeholders in every string field of the config.
///
/// Operates on the serialized form so placeholders work uniformly in
/// prompts, models, predicate scripts, hook configs, and transforms.
fn substitute_params(
    config: &ClusterConfig,
    params: &HashMap<String, Value>,
) -> Result<ClusterConfig, TemplateError> {
    let mut tree = serde_json::to_value(config)?;
    substitute_tree(&mut tree, params);
    Ok(serde_json::from_value(tree)?)
}

fn substitute_tree(node: &mut Value, params: &HashMap<String, Value>) {
    match node {
        Value::String(text) => {
            if text.contains("${") {
                *text = interpolate(text, params);
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_tree(item, params);
            }
        }
        Value::Object(map) => {
            for (_, value) in map.iter_mut() {
                substitute_tree(value, params);
            }
        }
        _ => {}
    }
}

fn enrich(config: &mut ClusterConfig, options: ResolveOptions) {
    if options.workers > 1 {
        let instruction = format!(
            "\n\nYou may parallelize independent work across up to {} concurrent workers.",
            options.workers
        );
        for agent in &mut config.agents {
            if agent.role == "worker" {
                agent.prompt.push_str(&instruction);
            }
        }
    }

    if options.pr && config.agents.iter().all(|a| a.id != "pr-creator") {
        let mut pr = zs_core::AgentConfig::new(
            "pr-creator",
            "pr",
            "Create a pull request for the completed implementation. Summarize \
             the change set and link the originating task.",
        );
        pr.triggers = vec![zs_core::Trigger::on_topic(
            zs_core::message::topics::VALIDATION_RESULT,
        )
        .with_logic("approved == true")];
        config.agents.push(pr);
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
