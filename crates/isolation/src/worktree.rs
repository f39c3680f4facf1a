// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worktree isolation: a separate checkout of the host repository with a
//! branch named from the cluster id. No container runtime required and
//! fast enough for interactive starts.

use crate::error::IsolationError;
use crate::quote::sh_quote;
use crate::subprocess::{run_checked, GIT_TIMEOUT};
use std::path::Path;
use tokio::process::Command;
use tracing::info;
use zs_core::{ClusterId, WorktreeRecord};

/// Branch name for a cluster's worktree.
pub fn branch_name(cluster_id: &ClusterId) -> String {
    format!("zeroshot/{}", cluster_id)
}

/// Add a git worktree for the cluster under `base_dir`.
///
/// The repository at `repo_root` must already be a git checkout. Related
/// git operations are batched into a single shell invocation with every
/// interpolated value quoted.
pub async fn create_worktree(
    repo_root: &Path,
    cluster_id: &ClusterId,
    base_dir: &Path,
) -> Result<WorktreeRecord, IsolationError> {
    let work_dir = base_dir.join(cluster_id.as_str());
    std::fs::create_dir_all(base_dir)?;

    let branch = branch_name(cluster_id);
    let script = format!(
        "cd {root} && git worktree add -b {branch} {path}",
        root = sh_quote(&repo_root.display().to_string()),
        branch = sh_quote(&branch),
        path = sh_quote(&work_dir.display().to_string()),
    );

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&script);
    run_checked(cmd, GIT_TIMEOUT, "git worktree add").await?;

    info!(cluster_id = %cluster_id, path = %work_dir.display(), "worktree created");

    Ok(WorktreeRecord {
        enabled: true,
        path: work_dir.clone(),
        branch,
        repo_root: repo_root.to_owned(),
        work_dir,
    })
}

/// Remove a cluster's worktree and its branch.
///
/// Used on kill only; stop preserves the worktree for resume.
pub async fn remove_worktree(record: &WorktreeRecord) -> Result<(), IsolationError> {
    let script = format!(
        "cd {root} && git worktree remove --force {path} && git branch -D {branch}",
        root = sh_quote(&record.repo_root.display().to_string()),
        path = sh_quote(&record.path.display().to_string()),
        branch = sh_quote(&record.branch),
    );

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&script);
    run_checked(cmd, GIT_TIMEOUT, "git worktree remove").await?;
    Ok(())
}

#[cfg(test)]
#[path = "worktree_tests.rs"]
mod tests;
