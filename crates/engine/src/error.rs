// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the agent runtime

use std::time::Duration;
use thiserror::Error;

/// Failures of a single task attempt.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to spawn child process: {0}")]
    ChildSpawn(String),

    #[error("child produced no output within {0:?}")]
    ChildTimeout(Duration),

    #[error("child exited with {status}: {stderr_tail}")]
    ChildFailed {
        status: i32,
        stderr_tail: String,
        retryable: bool,
    },

    #[error("child reported failure: {0}")]
    ResultFailure(String),

    #[error("subcluster failed: {0}")]
    Subcluster(String),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("storage error: {0}")]
    Storage(#[from] zs_storage::StorageError),
}

impl TaskError {
    /// Whether this failure should be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::ChildSpawn(_) => true,
            TaskError::ChildTimeout(_) => true,
            TaskError::ChildFailed { retryable, .. } => *retryable,
            TaskError::ResultFailure(_) => false,
            TaskError::Subcluster(_) => false,
            TaskError::Hook(_) => false,
            TaskError::Storage(_) => false,
        }
    }
}

/// Failures executing a post-task hook. Never swallowed: the orchestrator
/// treats these as cluster-affecting for the owning role.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("unknown hook action '{0}'")]
    UnknownAction(String),

    #[error("hook command failed with status {status}: {stderr_tail}")]
    Command { status: i32, stderr_tail: String },

    #[error("hook produced no publishable config")]
    EmptyConfig,

    #[error(transparent)]
    Logic(#[from] zs_logic::LogicError),

    #[error("failed to publish hook message: {0}")]
    Publish(#[from] zs_storage::StorageError),
}
