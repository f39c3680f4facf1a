// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for workspace isolation

use std::path::PathBuf;
use thiserror::Error;

/// Errors from workspace, worktree, and container operations.
#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("{0}")]
    Timeout(String),

    #[error(
        "preserved workspace missing at {0}: the cluster was killed, not stopped, \
         and cannot be resumed"
    )]
    WorkspaceMissing(PathBuf),

    #[error("container runtime error: {0}")]
    Runtime(String),
}
