// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer for zeroshot: per-cluster message ledgers and the shared
//! cluster registry.

mod ledger;
mod registry;

pub use ledger::{Ledger, MessageQuery, PollHandle, StorageError};
pub use registry::{Registry, RegistryError};

use std::path::{Path, PathBuf};
use zs_core::ClusterId;

/// Path of a cluster's ledger file under the storage directory.
pub fn ledger_path(storage_dir: &Path, cluster_id: &ClusterId) -> PathBuf {
    storage_dir.join(format!("{}.jsonl", cluster_id))
}

/// Path of the shared cluster registry file.
pub fn registry_path(storage_dir: &Path) -> PathBuf {
    storage_dir.join("clusters.json")
}
