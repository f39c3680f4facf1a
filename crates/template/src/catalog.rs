// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in workflow bases.
//!
//! Agents are constructed with `${param}` placeholders; the resolver
//! substitutes parameters after expansion. Feedback-loop triggers (worker
//! re-execution on a rejected validation) are part of the base definitions
//! and survive resolution untouched.

use serde_json::json;
use zs_core::message::topics;
use zs_core::{AgentConfig, AgentHooks, HookDef, Trigger, TriggerAction};

/// Names of all built-in bases.
pub fn builtin_bases() -> Vec<&'static str> {
    BASES.iter().map(|b| b.name).collect()
}

pub(crate) struct BaseTemplate {
    pub name: &'static str,
    pub required_params: &'static [&'static str],
    pub build: fn(validator_count: usize) -> Vec<AgentConfig>,
}

pub(crate) const BASES: [BaseTemplate; 4] = [
    BaseTemplate {
        name: "single-worker",
        required_params: &["worker_model"],
        build: build_single_worker,
    },
    BaseTemplate {
        name: "worker-validator",
        required_params: &["worker_model", "validator_model"],
        build: build_worker_validator,
    },
    BaseTemplate {
        name: "debug-workflow",
        required_params: &["worker_model"],
        build: build_debug_workflow,
    },
    BaseTemplate {
        name: "full-workflow",
        required_params: &["planner_model", "worker_model", "validator_model"],
        build: build_full_workflow,
    },
];

pub(crate) fn find_base(name: &str) -> Option<&'static BaseTemplate> {
    BASES.iter().find(|b| b.name == name)
}

fn publish_hook(topic: &str, text: &str) -> AgentHooks {
    AgentHooks {
        on_complete: Some(HookDef {
            action: "publish_message".to_string(),
            config: Some(json!({
                "topic": topic,
                "content": { "text": text },
            })),
            transform: None,
        }),
    }
}

fn worker_agent(completion_topic: &str) -> AgentConfig {
    let mut worker = AgentConfig::new(
        "worker",
        "worker",
        "You are the implementation worker for this cluster.\n\
         Read the task below, implement it completely, and report what you did.\n\
         Respond with a final result object containing a `summary` field.",
    );
    worker.model = Some("${worker_model}".to_string());
    worker.triggers = vec![Trigger::on_topic(topics::ISSUE_OPENED)];
    worker.hooks = Some(publish_hook(
        completion_topic,
        "worker finished (iteration {{iteration}})",
    ));
    worker
}

fn build_single_worker(_validators: usize) -> Vec<AgentConfig> {
    vec![worker_agent(topics::CLUSTER_COMPLETE)]
}

fn build_worker_validator(validators: usize) -> Vec<AgentConfig> {
    let mut worker = worker_agent(topics::IMPLEMENTATION_READY);
    // Rework loop: rejected validations re-trigger the worker until the
    // iteration budget runs out; an approval stops the cluster.
    worker.triggers.push(
        Trigger::on_topic(topics::VALIDATION_RESULT)
            .with_logic("approved == false && iteration < ${max_iterations}"),
    );
    worker.triggers.push(
        Trigger::on_topic(topics::VALIDATION_RESULT)
            .with_logic("approved == true")
            .with_action(TriggerAction::StopCluster),
    );

    let mut agents = vec![worker];
    agents.extend(validator_agents(validators));
    agents
}

fn validator_agents(count: usize) -> Vec<AgentConfig> {
    (1..=count)
        .map(|n| {
            let mut validator = AgentConfig::new(
                format!("validator-{n}"),
                "validator",
                "You are a validator. Review the implementation described in the \
                 conversation and decide whether it satisfies the task.\n\
                 Respond with a final result object containing `approved` (boolean) \
                 and `issues` (array of strings).",
            );
            validator.model = Some("${validator_model}".to_string());
            validator.triggers = vec![Trigger::on_topic(topics::IMPLEMENTATION_READY)];
            validator.hooks = Some(AgentHooks {
                on_complete: Some(HookDef {
                    action: "publish_message".to_string(),
                    config: None,
                    transform: Some(zs_core::TransformDef {
                        engine: "expr".to_string(),
                        script: r#"{"topic":"VALIDATION_RESULT","content":{"data":{"approved":"${result.approved}","issues":"${result.issues}"}}}"#.to_string(),
                    }),
                }),
            });
            validator
        })
        .collect()
}

fn build_debug_workflow(_validators: usize) -> Vec<AgentConfig> {
    let mut debugger = AgentConfig::new(
        "debugger",
        "worker",
        "You are a debugging specialist. Reproduce the reported failure, find \
         the root cause, and fix it. Describe the cause and the fix in your \
         final result object's `summary` field.",
    );
    debugger.model = Some("${worker_model}".to_string());
    debugger.triggers = vec![Trigger::on_topic(topics::ISSUE_OPENED)];
    debugger.hooks = Some(publish_hook(
        topics::CLUSTER_COMPLETE,
        "debugger finished (iteration {{iteration}})",
    ));
    vec![debugger]
}

fn build_full_workflow(validators: usize) -> Vec<AgentConfig> {
    let mut planner = AgentConfig::new(
        "planner",
        "planner",
        "You are the planner. Break the task below into a concrete implementation \
         plan with file-level steps. Respond with a final result object containing \
         a `plan` field.",
    );
    planner.model = Some("${planner_model}".to_string());
    planner.triggers = vec![Trigger::on_topic(topics::ISSUE_OPENED)];
    planner.hooks = Some(publish_hook(
        topics::PLAN_READY,
        "plan ready (iteration {{iteration}})",
    ));

    let mut worker = worker_agent(topics::IMPLEMENTATION_READY);
    worker.triggers = vec![Trigger::on_topic(topics::PLAN_READY)];
    worker.triggers.push(
        Trigger::on_topic(topics::VALIDATION_RESULT)
            .with_logic("approved == false && iteration < ${max_iterations}"),
    );
    worker.triggers.push(
        Trigger::on_topic(topics::VALIDATION_RESULT)
            .with_logic("approved == true")
            .with_action(TriggerAction::StopCluster),
    );

    let mut agents = vec![planner, worker];
    agents.extend(validator_agents(validators));
    agents
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
