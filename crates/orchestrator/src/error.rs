// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the orchestrator

use thiserror::Error;
use zs_core::{ClusterId, ClusterState};

/// Errors from cluster lifecycle operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("cluster '{0}' not found")]
    NotFound(ClusterId),

    #[error("cluster '{0}' is already running in this process")]
    AlreadyRunning(ClusterId),

    #[error("cluster '{id}' cannot be resumed from state '{state}'")]
    BadState { id: ClusterId, state: ClusterState },

    #[error("resume not possible for '{id}': {reason}")]
    ResumeNotPossible { id: ClusterId, reason: String },

    #[error(transparent)]
    Storage(#[from] zs_storage::StorageError),

    #[error(transparent)]
    Registry(#[from] zs_storage::RegistryError),

    #[error(transparent)]
    Template(#[from] zs_template::TemplateError),

    #[error(transparent)]
    Isolation(#[from] zs_isolation::IsolationError),
}
