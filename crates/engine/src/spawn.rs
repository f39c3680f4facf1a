// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process spawning and termination.

use crate::error::TaskError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};
use zs_core::AgentConfig;

/// stderr patterns that mark a non-zero exit as transient.
const RETRYABLE_STDERR: [&str; 7] = [
    "rate limit",
    "overloaded",
    "connection reset",
    "connection refused",
    "timed out",
    "529",
    "503",
];

/// Build the child argv for an agent. The synthesized prompt is appended
/// by the caller as the final argument.
pub fn build_argv(config: &AgentConfig, default_model: Option<&str>) -> Vec<String> {
    if let Some(command) = &config.command {
        return command.clone();
    }

    let mut argv = vec![
        "claude".to_string(),
        "-p".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];
    if let Some(model) = config.model.as_deref().or(default_model) {
        argv.push("--model".to_string());
        argv.push(model.to_string());
    }
    argv
}

/// A running child with a line reader over its stdout.
#[derive(Debug)]
pub struct RunningChild {
    pub child: Child,
    pub pid: Option<u32>,
    pub stdout: Lines<BufReader<ChildStdout>>,
}

/// Spawn the agent's child process in `cwd` with the prompt appended as
/// the final argument. Only the explicitly passed environment reaches the
/// child beyond the inherited minimum; host secrets never ride the prompt.
pub fn spawn_child(
    argv: &[String],
    prompt: &str,
    cwd: Option<&Path>,
    env: &[(String, String)],
) -> Result<RunningChild, TaskError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(TaskError::ChildSpawn("empty command".to_string()));
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .arg(prompt)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (name, value) in env {
        cmd.env(name, value);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| TaskError::ChildSpawn(format!("{program}: {e}")))?;
    let pid = child.id();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TaskError::ChildSpawn("child stdout not captured".to_string()))?;

    debug!(program, pid, "child spawned");
    Ok(RunningChild {
        child,
        pid,
        stdout: BufReader::new(stdout).lines(),
    })
}

/// Wait for exit and classify a non-zero status by its stderr tail.
pub async fn wait_and_classify(mut running: RunningChild) -> Result<(), TaskError> {
    let mut stderr_tail = String::new();
    if let Some(mut stderr) = running.child.stderr.take() {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        let tail_start = buf.len().saturating_sub(2048);
        stderr_tail = buf[tail_start..].trim().to_string();
    }

    let status = running
        .child
        .wait()
        .await
        .map_err(|e| TaskError::ChildSpawn(e.to_string()))?;

    if status.success() {
        return Ok(());
    }

    let lowered = stderr_tail.to_lowercase();
    let retryable = RETRYABLE_STDERR.iter().any(|p| lowered.contains(p));
    Err(TaskError::ChildFailed {
        status: status.code().unwrap_or(-1),
        stderr_tail,
        retryable,
    })
}

/// Terminate a child gracefully: SIGTERM, bounded wait, then SIGKILL.
pub async fn stop_child(mut child: Child, grace: Duration) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        warn!(pid, "child ignored SIGTERM, force-killing");
    }
    let _ = child.kill().await;
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
