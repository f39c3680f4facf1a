// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only child-process sampling.
//!
//! Surfaces liveness alongside stale warnings. Reads `/proc` where
//! available and falls back to `ps`; sampling never signals the process.

use std::path::PathBuf;

/// One point-in-time sample of a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSample {
    pub pid: u32,
    pub rss_bytes: u64,
    /// Cumulative user+system CPU time in clock ticks.
    pub cpu_ticks: u64,
}

/// Sample a process by pid. Returns None when the process is gone or the
/// platform exposes neither `/proc` nor `ps`.
pub fn sample_process(pid: u32) -> Option<ProcessSample> {
    sample_proc(pid).or_else(|| sample_ps(pid))
}

/// Parse `/proc/<pid>/stat` (fields 14/15: utime/stime) and
/// `/proc/<pid>/statm` (field 2: resident pages).
fn sample_proc(pid: u32) -> Option<ProcessSample> {
    let stat = std::fs::read_to_string(PathBuf::from(format!("/proc/{pid}/stat"))).ok()?;
    // comm may contain spaces; fields are positioned after the closing paren
    let after_comm = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;

    let statm = std::fs::read_to_string(PathBuf::from(format!("/proc/{pid}/statm"))).ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = 4096u64;

    Some(ProcessSample {
        pid,
        rss_bytes: resident_pages * page_size,
        cpu_ticks: utime + stime,
    })
}

/// `ps -o rss= -p <pid>` fallback for non-/proc platforms.
fn sample_ps(pid: u32) -> Option<ProcessSample> {
    let output = std::process::Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let rss_kb: u64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
    Some(ProcessSample {
        pid,
        rss_bytes: rss_kb * 1024,
        cpu_ticks: 0,
    })
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
