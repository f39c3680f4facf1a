// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess execution helpers

use crate::error::IsolationError;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Default timeout for git operations.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for container runtime commands.
pub const RUNTIME_TIMEOUT: Duration = Duration::from_secs(120);

/// Run a subprocess command with a timeout.
///
/// Wraps `Command::output()` with `tokio::time::timeout`, converting
/// timeout expiration into a descriptive error. The child process is
/// killed automatically if the timeout elapses (via the tokio `Child`
/// drop implementation).
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    description: &str,
) -> Result<Output, IsolationError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(io_err)) => Err(IsolationError::CommandFailed {
            command: description.to_string(),
            stderr: io_err.to_string(),
        }),
        Err(_elapsed) => Err(IsolationError::Timeout(format!(
            "{} timed out after {}s",
            description,
            timeout.as_secs()
        ))),
    }
}

/// Run a command and fail on non-zero exit, capturing stderr.
pub async fn run_checked(
    cmd: Command,
    timeout: Duration,
    description: &str,
) -> Result<Output, IsolationError> {
    let output = run_with_timeout(cmd, timeout, description).await?;
    if !output.status.success() {
        return Err(IsolationError::CommandFailed {
            command: description.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}
