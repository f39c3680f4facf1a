// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subcluster delegation seam.
//!
//! A subcluster agent's "task" is to run a nested cluster. The engine only
//! knows this trait; the orchestrator implements it, which keeps the
//! dependency arrow pointing downward.

use async_trait::async_trait;
use zs_core::{ClusterId, ClusterInput, ConfigRef};

/// Outcome of a child cluster run, mapped into the parent agent's result.
#[derive(Debug, Clone)]
pub struct SubclusterOutcome {
    pub cluster_id: ClusterId,
    pub success: bool,
    pub summary: Option<String>,
}

/// Starts nested clusters on behalf of subcluster agents.
#[async_trait]
pub trait ClusterSpawner: Send + Sync {
    /// Run a child cluster to completion and report its outcome.
    async fn run_subcluster(
        &self,
        config: ConfigRef,
        input: ClusterInput,
    ) -> Result<SubclusterOutcome, String>;
}
