// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PID liveness probes for zombie-cluster detection.

use nix::sys::signal::kill;
use nix::unistd::Pid;

/// True if a process with this pid exists (signal 0 probe).
pub fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
#[path = "pid_tests.rs"]
mod tests;
