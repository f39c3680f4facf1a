// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parameter interpolation into template strings.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Regex pattern for ${parameter_name}
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static PARAM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("constant regex pattern is valid")
});

/// Interpolate `${name}` placeholders with values from the parameter map.
///
/// Strings substitute verbatim; other JSON values substitute their compact
/// serialization. Unknown parameters are left as-is.
pub fn interpolate(template: &str, params: &HashMap<String, Value>) -> String {
    PARAM_PATTERN
        .replace_all(template, |caps: &regex::Captures| {
            match params.get(&caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .to_string()
}

#[cfg(test)]
#[path = "params_tests.rs"]
mod tests;
