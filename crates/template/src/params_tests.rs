// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn substitutes_string_params_verbatim() {
    let vars = params(&[("worker_model", json!("sonnet"))]);
    assert_eq!(interpolate("model is ${worker_model}", &vars), "model is sonnet");
}

#[test]
fn substitutes_numbers_and_bools() {
    let vars = params(&[("max_iterations", json!(3)), ("strict", json!(true))]);
    assert_eq!(
        interpolate("iteration < ${max_iterations} && ${strict}", &vars),
        "iteration < 3 && true"
    );
}

#[test]
fn unknown_params_are_left_as_is() {
    let vars = params(&[]);
    assert_eq!(interpolate("keep ${unknown}", &vars), "keep ${unknown}");
}

#[test]
fn repeated_occurrences_all_substitute() {
    let vars = params(&[("m", json!("haiku"))]);
    assert_eq!(interpolate("${m} and ${m}", &vars), "haiku and haiku");
}

#[test]
fn non_identifier_braces_pass_through() {
    let vars = params(&[("x", json!("v"))]);
    assert_eq!(interpolate("${1bad} ${x}", &vars), "${1bad} v");
}
