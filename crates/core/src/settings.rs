// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-scoped settings file.
//!
//! Stored as JSON at `~/.config/zeroshot/settings.json`. Unknown keys are
//! preserved across load/save so newer or external tooling can share the
//! file; invalid values are rejected with an actionable message.

use crate::cluster::IsolationMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Errors loading or validating the settings file
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid setting {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("could not determine config directory")]
    NoConfigDir,
}

/// User settings for cluster defaults and container behavior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_isolation: Option<IsolationMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_schema: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Host mounts as `host:container[:ro]` specs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_mounts: Option<Vec<String>>,
    /// Env passthrough: simple names, glob patterns, or `NAME=VALUE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_env_passthrough: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_container_home: Option<String>,
    /// Unknown keys, preserved verbatim on write.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Settings {
    /// Default settings file path: `~/.config/zeroshot/settings.json`.
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        dirs::config_dir()
            .map(|d| d.join("zeroshot").join("settings.json"))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// Load settings from the given path; missing file yields defaults.
    pub fn load(path: &std::path::Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_owned(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&content).map_err(|source| SettingsError::Json {
                path: path.to_owned(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings, preserving unknown keys captured at load.
    pub fn save(&self, path: &std::path::Path) -> Result<(), SettingsError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: path.to_owned(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Json {
            path: path.to_owned(),
            source,
        })?;
        std::fs::write(path, content).map_err(|source| SettingsError::Io {
            path: path.to_owned(),
            source,
        })
    }

    /// Reject values that would misconfigure the engine.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(level) = &self.log_level {
            if !VALID_LOG_LEVELS.contains(&level.as_str()) {
                return Err(SettingsError::InvalidValue {
                    key: "logLevel".to_string(),
                    message: format!(
                        "'{}' is not a log level (expected one of: {})",
                        level,
                        VALID_LOG_LEVELS.join(", ")
                    ),
                });
            }
        }
        if let Some(mounts) = &self.docker_mounts {
            for spec in mounts {
                let parts: Vec<&str> = spec.split(':').collect();
                if parts.len() < 2 || parts.len() > 3 || parts[0].is_empty() || parts[1].is_empty()
                {
                    return Err(SettingsError::InvalidValue {
                        key: "dockerMounts".to_string(),
                        message: format!(
                            "'{}' is not a mount spec (expected host:container[:ro])",
                            spec
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
