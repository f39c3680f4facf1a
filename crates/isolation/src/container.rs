// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container isolation through an argv-driven container runtime.
//!
//! The runtime seam is a trait so tests run without Docker. Containers are
//! named deterministically from the cluster id; a stale container with the
//! same name is removed before creation.

use crate::error::IsolationError;
use crate::subprocess::{run_checked, run_with_timeout, RUNTIME_TIMEOUT};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::process::Output;
use tokio::process::Command;
use zs_core::ClusterId;

/// Default image when settings do not name one.
pub const DEFAULT_IMAGE: &str = "zeroshot-agent:latest";

/// Deterministic container name for a cluster.
///
/// The slug keeps names readable; the digest suffix keeps them unique even
/// for ids that sanitize to the same prefix.
pub fn container_name(cluster_id: &ClusterId) -> String {
    let sanitized: String = cluster_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let digest = Sha256::digest(cluster_id.as_str().as_bytes());
    let suffix: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("zeroshot-{}-{}", sanitized.trim_matches('-'), suffix)
}

/// Everything needed to create a cluster's container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host workspace directory, mounted at /workspace.
    pub work_dir: PathBuf,
    /// Host per-cluster credential/config directory, mounted at the
    /// container home.
    pub home_dir: PathBuf,
    pub container_home: String,
    pub mounts: Vec<crate::mounts::MountSpec>,
    pub env: Vec<(String, String)>,
}

/// Argv-level container runtime operations.
#[async_trait]
pub trait ContainerRuntime: Clone + Send + Sync + 'static {
    /// Create and start a container; returns the runtime's container id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, IsolationError>;
    /// Remove a container by name; missing containers are not an error.
    async fn remove(&self, name: &str) -> Result<(), IsolationError>;
    /// True if a container with this name exists (running or not).
    async fn exists(&self, name: &str) -> Result<bool, IsolationError>;
    /// Run a command inside the container.
    async fn exec(&self, name: &str, argv: &[String]) -> Result<Output, IsolationError>;
}

/// Docker CLI runtime. All invocations use argv arrays, never shell
/// strings.
#[derive(Debug, Clone, Default)]
pub struct DockerRuntime;

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, IsolationError> {
        let mut cmd = Command::new("docker");
        cmd.arg("run")
            .arg("-d")
            .arg("--name")
            .arg(&spec.name)
            .arg("-v")
            .arg(format!("{}:/workspace", spec.work_dir.display()))
            .arg("-v")
            .arg(format!(
                "{}:{}",
                spec.home_dir.display(),
                spec.container_home
            ))
            .arg("-w")
            .arg("/workspace");
        for mount in &spec.mounts {
            cmd.arg("-v").arg(mount.to_arg());
        }
        for (name, value) in &spec.env {
            cmd.arg("-e").arg(format!("{name}={value}"));
        }
        cmd.arg(&spec.image).arg("sleep").arg("infinity");

        let output = run_checked(cmd, RUNTIME_TIMEOUT, "docker run").await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn remove(&self, name: &str) -> Result<(), IsolationError> {
        let mut cmd = Command::new("docker");
        cmd.arg("rm").arg("-f").arg(name);
        // Missing container exits non-zero; treat as already removed
        let _ = run_with_timeout(cmd, RUNTIME_TIMEOUT, "docker rm").await?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, IsolationError> {
        let mut cmd = Command::new("docker");
        cmd.arg("inspect").arg("--format").arg("{{.Id}}").arg(name);
        let output = run_with_timeout(cmd, RUNTIME_TIMEOUT, "docker inspect").await?;
        Ok(output.status.success())
    }

    async fn exec(&self, name: &str, argv: &[String]) -> Result<Output, IsolationError> {
        let mut cmd = Command::new("docker");
        cmd.arg("exec").arg(name);
        for arg in argv {
            cmd.arg(arg);
        }
        run_with_timeout(cmd, RUNTIME_TIMEOUT, "docker exec").await
    }
}

/// In-memory runtime for tests: records created containers and exec calls.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone, Default)]
pub struct FakeRuntime {
    state: std::sync::Arc<parking_lot::Mutex<FakeRuntimeState>>,
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
pub struct FakeRuntimeState {
    pub containers: Vec<ContainerSpec>,
    pub removed: Vec<String>,
    pub execs: Vec<(String, Vec<String>)>,
    /// Names that `exists` reports as present before any create.
    pub preexisting: Vec<String>,
    /// When set, exec calls fail this many times before succeeding.
    pub exec_failures: u32,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeRuntime {
    pub fn with_preexisting(names: &[&str]) -> Self {
        let runtime = Self::default();
        runtime.state.lock().preexisting = names.iter().map(|s| s.to_string()).collect();
        runtime
    }

    pub fn state(&self) -> std::sync::Arc<parking_lot::Mutex<FakeRuntimeState>> {
        std::sync::Arc::clone(&self.state)
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, IsolationError> {
        let mut state = self.state.lock();
        state.containers.push(spec.clone());
        Ok(format!("fake-{}", spec.name))
    }

    async fn remove(&self, name: &str) -> Result<(), IsolationError> {
        let mut state = self.state.lock();
        state.removed.push(name.to_string());
        state.containers.retain(|c| c.name != name);
        state.preexisting.retain(|n| n != name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, IsolationError> {
        let state = self.state.lock();
        Ok(state.preexisting.iter().any(|n| n == name)
            || state.containers.iter().any(|c| c.name == name))
    }

    async fn exec(&self, name: &str, argv: &[String]) -> Result<Output, IsolationError> {
        use std::os::unix::process::ExitStatusExt;
        let mut state = self.state.lock();
        state.execs.push((name.to_string(), argv.to_vec()));
        let status = if state.exec_failures > 0 {
            state.exec_failures -= 1;
            std::process::ExitStatus::from_raw(256)
        } else {
            std::process::ExitStatus::from_raw(0)
        };
        Ok(Output {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;
