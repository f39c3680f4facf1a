// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for sandbox evaluation

use std::time::Duration;
use thiserror::Error;

/// Errors from predicate, transform, and template evaluation.
#[derive(Debug, Error)]
pub enum LogicError {
    /// Script failed to parse or evaluate.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// Wall-clock budget exceeded.
    #[error("script evaluation timed out after {0:?}")]
    Timeout(Duration),

    /// Transform output is missing a required field.
    #[error("transform output missing required field '{field}'")]
    Contract { field: String },

    /// Transform references `result.*` but the agent produced no parseable
    /// output.
    #[error(
        "transform references result fields but agent '{agent_id}' task '{task_id}' \
         (iteration {iteration}) produced no parseable output ({output_len} bytes observed)"
    )]
    MissingOutput {
        agent_id: String,
        task_id: String,
        iteration: u32,
        output_len: usize,
    },

    /// A known template variable survived substitution.
    #[error("unsubstituted template variable '{variable}'")]
    Template { variable: String },
}
