// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use zs_core::message::topics as t;

#[test]
fn four_builtin_bases() {
    assert_eq!(
        builtin_bases(),
        vec![
            "single-worker",
            "worker-validator",
            "debug-workflow",
            "full-workflow"
        ]
    );
}

#[test]
fn single_worker_completes_the_cluster() {
    let agents = (find_base("single-worker").unwrap().build)(1);
    assert_eq!(agents.len(), 1);
    let worker = &agents[0];
    assert!(worker.listens_to(t::ISSUE_OPENED));

    let hook = worker.hooks.as_ref().unwrap().on_complete.as_ref().unwrap();
    assert_eq!(hook.action, "publish_message");
    assert_eq!(
        hook.config.as_ref().unwrap()["topic"],
        serde_json::json!(t::CLUSTER_COMPLETE)
    );
}

#[test]
fn worker_validator_keeps_feedback_loop_triggers() {
    let agents = (find_base("worker-validator").unwrap().build)(1);
    let worker = agents.iter().find(|a| a.id == "worker").unwrap();

    let rejection = worker
        .triggers
        .iter()
        .find(|tr| tr.topic == t::VALIDATION_RESULT && tr.action == TriggerAction::ExecuteTask)
        .unwrap();
    let script = &rejection.logic.as_ref().unwrap().script;
    assert!(script.contains("approved == false"), "script: {script}");

    let approval = worker
        .triggers
        .iter()
        .find(|tr| tr.topic == t::VALIDATION_RESULT && tr.action == TriggerAction::StopCluster)
        .unwrap();
    assert_eq!(
        approval.logic.as_ref().unwrap().script,
        "approved == true"
    );
}

#[test]
fn validator_count_expands_agents() {
    let agents = (find_base("worker-validator").unwrap().build)(3);
    let validators: Vec<&AgentConfig> =
        agents.iter().filter(|a| a.role == "validator").collect();
    assert_eq!(validators.len(), 3);
    assert_eq!(validators[0].id, "validator-1");
    assert_eq!(validators[2].id, "validator-3");
    for v in validators {
        assert!(v.listens_to(t::IMPLEMENTATION_READY));
        let hook = v.hooks.as_ref().unwrap().on_complete.as_ref().unwrap();
        assert!(hook.transform.as_ref().unwrap().script.contains("VALIDATION_RESULT"));
    }
}

#[test]
fn full_workflow_chains_plan_to_validation() {
    let agents = (find_base("full-workflow").unwrap().build)(1);
    let planner = agents.iter().find(|a| a.id == "planner").unwrap();
    let worker = agents.iter().find(|a| a.id == "worker").unwrap();

    assert!(planner.listens_to(t::ISSUE_OPENED));
    assert!(worker.listens_to(t::PLAN_READY));
    assert!(!worker.listens_to(t::ISSUE_OPENED));
}

#[yare::parameterized(
    single = { "single-worker", &["worker_model"] },
    worker_validator = { "worker-validator", &["worker_model", "validator_model"] },
    debug = { "debug-workflow", &["worker_model"] },
    full = { "full-workflow", &["planner_model", "worker_model", "validator_model"] },
)]
fn required_params_per_base(base: &str, required: &[&str]) {
    assert_eq!(find_base(base).unwrap().required_params, required);
}

#[test]
fn models_are_parameter_placeholders() {
    let agents = (find_base("worker-validator").unwrap().build)(1);
    for agent in agents {
        let model = agent.model.unwrap();
        assert!(model.starts_with("${"), "model not parameterized: {model}");
    }
}
