// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container mount presets and environment passthrough.

use std::path::PathBuf;

/// A host path mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl MountSpec {
    /// Parse a `host:container[:ro]` spec. Invalid specs return None.
    pub fn parse(spec: &str) -> Option<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [host, container] if !host.is_empty() && !container.is_empty() => Some(Self {
                host: PathBuf::from(host),
                container: container.to_string(),
                read_only: false,
            }),
            [host, container, "ro"] if !host.is_empty() && !container.is_empty() => Some(Self {
                host: PathBuf::from(host),
                container: container.to_string(),
                read_only: true,
            }),
            _ => None,
        }
    }

    /// Render as a container runtime `-v` argument.
    pub fn to_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.host.display(), self.container);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Preset mounts applied to every container: read-only git identity so
/// commits inside the workspace attribute correctly.
fn preset_mounts() -> Vec<MountSpec> {
    let mut mounts = Vec::new();
    if let Some(home) = dirs_home() {
        let gitconfig = home.join(".gitconfig");
        if gitconfig.exists() {
            mounts.push(MountSpec {
                host: gitconfig,
                container: "/home/agent/.gitconfig".to_string(),
                read_only: true,
            });
        }
    }
    mounts
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Resolve the effective mount list: presets, then user settings, then the
/// `ZEROSHOT_DOCKER_MOUNTS` env override (which replaces the user list).
pub fn resolve_mounts(user_mounts: Option<&[String]>) -> Vec<MountSpec> {
    let mut mounts = preset_mounts();

    let user: Vec<String> = zs_core::env::docker_mounts_override()
        .or_else(|| user_mounts.map(|m| m.to_vec()))
        .unwrap_or_default();

    for spec in &user {
        if let Some(parsed) = MountSpec::parse(spec) {
            // User specs override presets mounting to the same target
            mounts.retain(|m| m.container != parsed.container);
            mounts.push(parsed);
        } else {
            tracing::warn!(spec, "ignoring invalid mount spec");
        }
    }
    mounts
}

/// Resolve environment passthrough specs into concrete `NAME=VALUE` pairs.
///
/// Three forms: a simple name (passed if set on the host), a glob pattern
/// (all matching host vars), and a forced `NAME=VALUE`.
pub fn resolve_env_passthrough(specs: &[String]) -> Vec<(String, String)> {
    let mut resolved = Vec::new();
    for spec in specs {
        if let Some((name, value)) = spec.split_once('=') {
            resolved.push((name.to_string(), value.to_string()));
        } else if spec.contains('*') {
            if let Ok(pattern) = glob::Pattern::new(spec) {
                for (name, value) in std::env::vars() {
                    if pattern.matches(&name) {
                        resolved.push((name, value));
                    }
                }
            }
        } else if let Ok(value) = std::env::var(spec) {
            resolved.push((spec.clone(), value));
        }
    }
    resolved.sort();
    resolved.dedup_by(|a, b| a.0 == b.0);
    resolved
}

#[cfg(test)]
#[path = "mounts_tests.rs"]
mod tests;
