// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the engine.

use std::path::PathBuf;

/// Optional override for generated cluster ids.
pub fn cluster_id_override() -> Option<String> {
    std::env::var("ZEROSHOT_CLUSTER_ID")
        .ok()
        .filter(|s| !s.is_empty())
}

/// JSON mount-spec override for container isolation.
///
/// Takes precedence over the user settings `dockerMounts` list.
pub fn docker_mounts_override() -> Option<Vec<String>> {
    let raw = std::env::var("ZEROSHOT_DOCKER_MOUNTS").ok()?;
    serde_json::from_str(&raw).ok()
}

/// Worker parallelism; values > 1 inject a parallelism instruction into
/// the worker agent prompt.
pub fn workers() -> u32 {
    std::env::var("ZEROSHOT_WORKERS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1)
}

/// Whether PR-creation agent injection is enabled.
pub fn pr_enabled() -> bool {
    std::env::var("ZEROSHOT_PR")
        .map(|s| !s.is_empty() && s != "0" && s.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Resolve storage directory: ZEROSHOT_STATE_DIR > XDG_STATE_HOME/zeroshot
/// > ~/.local/state/zeroshot.
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("ZEROSHOT_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("zeroshot"));
    }
    dirs::home_dir().map(|h| h.join(".local/state/zeroshot"))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
