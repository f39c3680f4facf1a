// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared cluster registry with advisory file locking.
//!
//! The registry file maps cluster id to its persisted record and is shared
//! by every orchestrator process on the machine. Writes are read-merge-write
//! under an exclusive lock on a sidecar lock file; a process only ever
//! merges entries it owns or has explicitly stopped/killed, so concurrent
//! orchestrators never clobber each other's clusters.

use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use zs_core::{ClusterId, ClusterRecord};

/// Total time budget for acquiring the registry lock.
const LOCK_DEADLINE: Duration = Duration::from_secs(30);

/// Base retry pause while the lock is contended; jittered per attempt.
const LOCK_RETRY_BASE: Duration = Duration::from_millis(50);

/// Errors that can occur in registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("registry lock at {path} not acquired within {waited_ms}ms")]
    LockTimeout { path: PathBuf, waited_ms: u64 },
}

/// Handle to the shared registry file.
pub struct Registry {
    path: PathBuf,
    lock_path: PathBuf,
    lock_deadline: Duration,
}

/// Held advisory lock; released on drop.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl Registry {
    /// Registry rooted at the given storage directory.
    pub fn new(storage_dir: &Path) -> Self {
        let path = crate::registry_path(storage_dir);
        let lock_path = path.with_extension("json.lock");
        Self {
            path,
            lock_path,
            lock_deadline: LOCK_DEADLINE,
        }
    }

    /// Override the lock acquisition deadline.
    pub fn with_lock_deadline(mut self, deadline: Duration) -> Self {
        self.lock_deadline = deadline;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full registry under a shared lock.
    ///
    /// A missing file is an empty registry.
    pub fn load(&self) -> Result<HashMap<ClusterId, ClusterRecord>, RegistryError> {
        let _guard = self.acquire(false)?;
        self.read_unlocked()
    }

    /// Merge this process's entries into the registry under an exclusive
    /// lock: read current contents, overwrite `upserts`, drop `removals`,
    /// write back atomically.
    ///
    /// Entries not named by either argument are preserved verbatim, which is
    /// what keeps two orchestrator processes from overwriting each other.
    pub fn save_merge(
        &self,
        upserts: &HashMap<ClusterId, ClusterRecord>,
        removals: &[ClusterId],
    ) -> Result<(), RegistryError> {
        let _guard = self.acquire(true)?;

        let mut merged = self.read_unlocked()?;
        for (id, record) in upserts {
            merged.insert(id.clone(), record.clone());
        }
        for id in removals {
            merged.remove(id);
        }

        self.write_unlocked(&merged)
    }

    fn read_unlocked(&self) -> Result<HashMap<ClusterId, ClusterRecord>, RegistryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the registry atomically (tmp file + rename).
    fn write_unlocked(
        &self,
        entries: &HashMap<ClusterId, ClusterRecord>,
    ) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(serde_json::to_string_pretty(entries)?.as_bytes())?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Acquire the sidecar lock with bounded, jittered retries.
    ///
    /// The lock is an OS advisory lock, so a crashed holder releases it
    /// automatically; the 30s deadline covers a live-but-slow holder, after
    /// which `LockTimeout` is surfaced with no partial write performed.
    fn acquire(&self, exclusive: bool) -> Result<LockGuard, RegistryError> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;

        let start = Instant::now();
        loop {
            let acquired = if exclusive {
                file.try_lock_exclusive().is_ok()
            } else {
                file.try_lock_shared().is_ok()
            };
            if acquired {
                if exclusive {
                    // Record the holder for diagnostics; failures are harmless
                    let _ = (&file).set_len(0);
                    let _ = writeln!(&file, "{}", std::process::id());
                }
                return Ok(LockGuard { file });
            }

            let waited = start.elapsed();
            if waited >= self.lock_deadline {
                return Err(RegistryError::LockTimeout {
                    path: self.lock_path.clone(),
                    waited_ms: waited.as_millis() as u64,
                });
            }

            let pause = jittered(LOCK_RETRY_BASE);
            debug!(
                path = %self.lock_path.display(),
                waited_ms = waited.as_millis() as u64,
                "registry lock contended, retrying"
            );
            std::thread::sleep(pause);
        }
    }
}

fn jittered(base: Duration) -> Duration {
    use rand::Rng;
    let mut rng = rand::rng();
    let factor: f64 = rng.random_range(1.0..3.0);
    base.mul_f64(factor)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
