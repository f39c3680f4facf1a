// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Predicate evaluation with wall-clock budgets.

use crate::context::ScriptContext;
use crate::error::LogicError;
use evalexpr::eval_boolean_with_context;
use std::time::Duration;
use tracing::warn;

/// Wall-clock budget for trigger predicates.
pub const PREDICATE_TIMEOUT: Duration = Duration::from_secs(1);

/// Wall-clock budget for hook transforms.
pub const TRANSFORM_TIMEOUT: Duration = Duration::from_secs(5);

/// Stateless front-end over the sandbox.
pub struct LogicEngine;

impl LogicEngine {
    /// Evaluate a trigger predicate to a strict boolean.
    ///
    /// Any error (parse failure, non-boolean result, helper failure, or
    /// timeout) is logged and treated as `false`, so a broken predicate
    /// can never wake an agent.
    pub async fn eval_predicate(script: &str, ctx: ScriptContext) -> bool {
        match Self::try_eval_predicate(script, ctx).await {
            Ok(value) => value,
            Err(e) => {
                warn!(script, error = %e, "trigger predicate failed, treating as false");
                false
            }
        }
    }

    /// Predicate evaluation surfacing the failure cause.
    pub async fn try_eval_predicate(
        script: &str,
        ctx: ScriptContext,
    ) -> Result<bool, LogicError> {
        let script = script.to_owned();
        let task = tokio::task::spawn_blocking(move || -> Result<bool, LogicError> {
            let context = ctx.build()?;
            eval_boolean_with_context(&script, &context)
                .map_err(|e| LogicError::Sandbox(e.to_string()))
        });

        match tokio::time::timeout(PREDICATE_TIMEOUT, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(LogicError::Sandbox(join.to_string())),
            Err(_) => Err(LogicError::Timeout(PREDICATE_TIMEOUT)),
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
