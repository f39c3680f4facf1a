// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-cluster workspace lifecycle.
//!
//! The preservation contract: `stop` keeps the workspace (and worktree) on
//! disk so the cluster can resume into the same state; `kill` deletes
//! everything. Containers themselves are always removed on stop; resume
//! recreates one around the preserved workspace.

use crate::container::{container_name, ContainerRuntime, ContainerSpec, DEFAULT_IMAGE};
use crate::copy::copy_dir_filtered;
use crate::error::IsolationError;
use crate::mounts::{resolve_env_passthrough, resolve_mounts};
use crate::quote::sh_quote;
use crate::subprocess::{run_checked, GIT_TIMEOUT};
use crate::worktree::{create_worktree, remove_worktree};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};
use zs_core::{ClusterId, IsolationMode, IsolationRecord, RetryPolicy, Settings, WorktreeRecord};

/// Default container home when settings do not override it.
const DEFAULT_CONTAINER_HOME: &str = "/home/agent";

/// Prepared workspace handle returned from `prepare`.
#[derive(Debug, Clone)]
pub enum PreparedWorkspace {
    None,
    Worktree(WorktreeRecord),
    Container(IsolationRecord),
}

/// Owns workspace directories, credentials, and containers for clusters.
#[derive(Clone)]
pub struct IsolationManager<R: ContainerRuntime> {
    state_dir: PathBuf,
    runtime: R,
}

impl<R: ContainerRuntime> IsolationManager<R> {
    pub fn new(state_dir: PathBuf, runtime: R) -> Self {
        Self { state_dir, runtime }
    }

    fn workspaces_dir(&self) -> PathBuf {
        self.state_dir.join("workspaces")
    }

    fn worktrees_dir(&self) -> PathBuf {
        self.state_dir.join("worktrees")
    }

    fn credentials_dir(&self, cluster_id: &ClusterId) -> PathBuf {
        self.state_dir.join("credentials").join(cluster_id.as_str())
    }

    fn backup_dir(&self, cluster_id: &ClusterId) -> PathBuf {
        self.state_dir.join("backups").join(cluster_id.as_str())
    }

    /// Prepare an isolated workspace for a cluster start.
    ///
    /// Fails without leaving partial state: a half-created workspace is
    /// removed before the error propagates.
    pub async fn prepare(
        &self,
        cluster_id: &ClusterId,
        mode: IsolationMode,
        source: &Path,
        settings: &Settings,
    ) -> Result<PreparedWorkspace, IsolationError> {
        match mode {
            IsolationMode::None => Ok(PreparedWorkspace::None),
            IsolationMode::Worktree => {
                let record = create_worktree(source, cluster_id, &self.worktrees_dir()).await?;
                Ok(PreparedWorkspace::Worktree(record))
            }
            IsolationMode::Container => {
                match self.prepare_container(cluster_id, source, settings).await {
                    Ok(record) => Ok(PreparedWorkspace::Container(record)),
                    Err(e) => {
                        self.discard_partial(cluster_id).await;
                        Err(e)
                    }
                }
            }
        }
    }

    async fn prepare_container(
        &self,
        cluster_id: &ClusterId,
        source: &Path,
        settings: &Settings,
    ) -> Result<IsolationRecord, IsolationError> {
        // 1. Fresh workspace copy with a seeded repo and branch
        let work_dir = self.workspaces_dir().join(cluster_id.as_str());
        if work_dir.exists() {
            std::fs::remove_dir_all(&work_dir)?;
        }
        let copied = copy_dir_filtered(source, &work_dir, &[]).await?;
        init_workspace_repo(&work_dir, &format!("zeroshot/{cluster_id}"), None).await?;
        info!(cluster_id = %cluster_id, files = copied, "workspace seeded");

        // 2. Fresh per-cluster credential/home directory, never shared
        let home_dir = self.credentials_dir(cluster_id);
        if home_dir.exists() {
            std::fs::remove_dir_all(&home_dir)?;
        }
        write_restricted_home(&home_dir)?;

        // 3. Remove a stale container with the same deterministic name
        let name = container_name(cluster_id);
        if self.runtime.exists(&name).await? {
            warn!(name, "removing stale container");
            self.runtime.remove(&name).await?;
        }

        // 4. Create the container
        let spec = ContainerSpec {
            name: name.clone(),
            image: DEFAULT_IMAGE.to_string(),
            work_dir: work_dir.clone(),
            home_dir,
            container_home: settings
                .docker_container_home
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTAINER_HOME.to_string()),
            mounts: resolve_mounts(settings.docker_mounts.as_deref()),
            env: resolve_env_passthrough(
                settings.docker_env_passthrough.as_deref().unwrap_or(&[]),
            ),
        };
        let container_id = self.runtime.create(&spec).await?;

        // 5. Dependency install is best-effort
        self.install_dependencies(&name, &work_dir).await;

        Ok(IsolationRecord {
            enabled: true,
            container_id: Some(container_id),
            image: spec.image,
            work_dir,
        })
    }

    /// Install workspace dependencies inside the container, preferring the
    /// pre-baked cache. Failure is logged, never fatal.
    async fn install_dependencies(&self, name: &str, work_dir: &Path) {
        if !work_dir.join("package.json").exists() {
            return;
        }
        let policy = RetryPolicy::default();
        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(policy.delay_before(attempt)).await;
            let argv = vec![
                "sh".to_string(),
                "-c".to_string(),
                "cd /workspace && (npm ci --prefer-offline || npm install)".to_string(),
            ];
            match self.runtime.exec(name, &argv).await {
                Ok(output) if output.status.success() => {
                    info!(name, attempt, "dependencies installed");
                    return;
                }
                Ok(_) | Err(_) if attempt < policy.max_attempts => continue,
                Ok(output) => {
                    warn!(
                        name,
                        stderr = %String::from_utf8_lossy(&output.stderr),
                        "dependency install failed, continuing without"
                    );
                    return;
                }
                Err(e) => {
                    warn!(name, error = %e, "dependency install failed, continuing without");
                    return;
                }
            }
        }
    }

    /// Stop-time cleanup: remove the container, preserve the workspace.
    pub async fn stop(
        &self,
        cluster_id: &ClusterId,
        isolation: Option<&IsolationRecord>,
    ) -> Result<(), IsolationError> {
        if let Some(record) = isolation {
            if record.enabled {
                self.runtime.remove(&container_name(cluster_id)).await?;
            }
        }
        Ok(())
    }

    /// Kill-time cleanup: remove the container, back up terraform state,
    /// delete the workspace and worktree.
    pub async fn kill(
        &self,
        cluster_id: &ClusterId,
        isolation: Option<&IsolationRecord>,
        worktree: Option<&WorktreeRecord>,
    ) -> Result<(), IsolationError> {
        if let Some(record) = isolation {
            if record.enabled {
                self.runtime.remove(&container_name(cluster_id)).await?;
                backup_terraform_state(&record.work_dir, &self.backup_dir(cluster_id))?;
                if record.work_dir.exists() {
                    std::fs::remove_dir_all(&record.work_dir)?;
                }
            }
        }
        if let Some(record) = worktree {
            if record.enabled {
                backup_terraform_state(&record.work_dir, &self.backup_dir(cluster_id))?;
                remove_worktree(record).await?;
            }
        }
        let creds = self.credentials_dir(cluster_id);
        if creds.exists() {
            std::fs::remove_dir_all(&creds)?;
        }
        Ok(())
    }

    /// Recreate a container around the preserved workspace for resume.
    ///
    /// The workspace is reused, never re-copied; a missing workspace means
    /// the cluster was killed and resume is impossible.
    pub async fn resume_container(
        &self,
        cluster_id: &ClusterId,
        record: &IsolationRecord,
        settings: &Settings,
    ) -> Result<IsolationRecord, IsolationError> {
        if !record.work_dir.exists() {
            return Err(IsolationError::WorkspaceMissing(record.work_dir.clone()));
        }

        let name = container_name(cluster_id);
        if self.runtime.exists(&name).await? {
            self.runtime.remove(&name).await?;
        }

        let home_dir = self.credentials_dir(cluster_id);
        if !home_dir.exists() {
            write_restricted_home(&home_dir)?;
        }

        let spec = ContainerSpec {
            name,
            image: record.image.clone(),
            work_dir: record.work_dir.clone(),
            home_dir,
            container_home: settings
                .docker_container_home
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTAINER_HOME.to_string()),
            mounts: resolve_mounts(settings.docker_mounts.as_deref()),
            env: resolve_env_passthrough(
                settings.docker_env_passthrough.as_deref().unwrap_or(&[]),
            ),
        };
        let container_id = self.runtime.create(&spec).await?;

        Ok(IsolationRecord {
            container_id: Some(container_id),
            ..record.clone()
        })
    }

    async fn discard_partial(&self, cluster_id: &ClusterId) {
        let _ = self.runtime.remove(&container_name(cluster_id)).await;
        for dir in [
            self.workspaces_dir().join(cluster_id.as_str()),
            self.credentials_dir(cluster_id),
        ] {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    warn!(dir = %dir.display(), error = %e, "failed to discard partial workspace");
                }
            }
        }
    }
}

/// Initialize a fresh repository with the cluster branch in one shell
/// invocation. An authenticated origin may be added with the credential
/// injected into the URL.
pub async fn init_workspace_repo(
    work_dir: &Path,
    branch: &str,
    origin: Option<(&str, &str)>,
) -> Result<(), IsolationError> {
    let identity = "-c user.email=zeroshot@localhost -c user.name=zeroshot";
    let mut script = format!(
        "cd {dir} && git init -q && git checkout -qb {branch} && \
         git {identity} add -A && git {identity} commit -qm 'seed workspace' --allow-empty --no-verify",
        dir = sh_quote(&work_dir.display().to_string()),
        branch = sh_quote(branch),
    );
    if let Some((url, token)) = origin {
        let authenticated = inject_credential(url, token);
        script.push_str(&format!(
            " && git remote add origin {}",
            sh_quote(&authenticated)
        ));
    }

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&script);
    run_checked(cmd, GIT_TIMEOUT, "workspace repo init").await?;
    Ok(())
}

/// Inject a token into an https remote URL.
fn inject_credential(url: &str, token: &str) -> String {
    match url.strip_prefix("https://") {
        Some(rest) => format!("https://x-access-token:{token}@{rest}"),
        None => url.to_string(),
    }
}

/// Create the per-cluster home with a hooks policy that denies
/// interactive-prompt tools; the agent CLI inside the container must never
/// block on a question nobody can answer.
fn write_restricted_home(home_dir: &Path) -> Result<(), IsolationError> {
    let claude_dir = home_dir.join(".claude");
    std::fs::create_dir_all(&claude_dir)?;
    let hooks_dir = claude_dir.join("hooks");
    std::fs::create_dir_all(&hooks_dir)?;

    let settings = json!({
        "hooks": {
            "PreToolUse": [{
                "matcher": "AskUserQuestion|EnterPlanMode",
                "hooks": [{
                    "type": "command",
                    "command": "exit 2"
                }]
            }]
        }
    });
    std::fs::write(
        claude_dir.join("settings.json"),
        serde_json::to_string_pretty(&settings).unwrap_or_else(|_| "{}".to_string()),
    )?;
    Ok(())
}

/// Copy a terraform state file to the durable backup directory, if present.
fn backup_terraform_state(work_dir: &Path, backup_dir: &Path) -> Result<(), IsolationError> {
    let state_file = work_dir.join("terraform.tfstate");
    if state_file.exists() {
        std::fs::create_dir_all(backup_dir)?;
        std::fs::copy(&state_file, backup_dir.join("terraform.tfstate"))?;
        info!(backup = %backup_dir.display(), "terraform state backed up");
    }
    Ok(())
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
