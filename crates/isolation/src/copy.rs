// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filtered directory copy.
//!
//! Workspace seeding copies the project tree while skipping heavy build
//! artifacts. The walk is sequential; file payload copies are spread over
//! blocking worker tasks.

use crate::error::IsolationError;
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Directory and file names excluded from every workspace copy.
pub const DEFAULT_EXCLUDES: [&str; 12] = [
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    "target",
    ".DS_Store",
];

/// Number of parallel copy workers.
const COPY_WORKERS: usize = 4;

enum WorkItem {
    Dir(PathBuf),
    File { src: PathBuf, dst: PathBuf },
    Symlink { target: PathBuf, dst: PathBuf },
}

struct ExcludeSet {
    names: Vec<String>,
    patterns: Vec<Pattern>,
}

impl ExcludeSet {
    fn new(excludes: &[String]) -> Self {
        let mut names = Vec::new();
        let mut patterns = Vec::new();
        for exclude in excludes {
            if exclude.contains('*') {
                if let Ok(pattern) = Pattern::new(exclude) {
                    patterns.push(pattern);
                }
            } else {
                names.push(exclude.clone());
            }
        }
        Self { names, patterns }
    }

    fn matches(&self, file_name: &str) -> bool {
        self.names.iter().any(|n| n == file_name)
            || self.patterns.iter().any(|p| p.matches(file_name))
    }
}

/// Copy `src` into `dst`, skipping excluded names and `*.ext` globs.
///
/// Symlinks are re-created as symlinks; unreadable entries are skipped with
/// a warning rather than failing the whole copy.
pub async fn copy_dir_filtered(
    src: &Path,
    dst: &Path,
    extra_excludes: &[String],
) -> Result<usize, IsolationError> {
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend_from_slice(extra_excludes);
    let excludes = ExcludeSet::new(&excludes);

    let src = src.to_owned();
    let dst = dst.to_owned();

    // Walk on a blocking thread; directory trees can be large
    let items = tokio::task::spawn_blocking(move || -> Result<Vec<WorkItem>, IsolationError> {
        let mut items = vec![WorkItem::Dir(dst.clone())];
        walk(&src, &dst, &excludes, &mut items)?;
        Ok(items)
    })
    .await
    .map_err(|e| IsolationError::Runtime(e.to_string()))??;

    // Create directories and symlinks first, in order
    let mut files = Vec::new();
    for item in items {
        match item {
            WorkItem::Dir(path) => std::fs::create_dir_all(&path)?,
            WorkItem::Symlink { target, dst } => {
                #[cfg(unix)]
                if let Err(e) = std::os::unix::fs::symlink(&target, &dst) {
                    warn!(dst = %dst.display(), error = %e, "skipping symlink");
                }
            }
            WorkItem::File { src, dst } => files.push((src, dst)),
        }
    }

    // Copy file payloads over a small pool of blocking workers
    let total = files.len();
    let chunk_size = total.div_ceil(COPY_WORKERS).max(1);
    let mut handles = Vec::new();
    for chunk in files.chunks(chunk_size) {
        let chunk: Vec<(PathBuf, PathBuf)> = chunk.to_vec();
        handles.push(tokio::task::spawn_blocking(move || {
            for (src, dst) in chunk {
                if let Err(e) = std::fs::copy(&src, &dst) {
                    warn!(src = %src.display(), error = %e, "skipping unreadable file");
                }
            }
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| IsolationError::Runtime(e.to_string()))?;
    }

    Ok(total)
}

fn walk(
    src: &Path,
    dst: &Path,
    excludes: &ExcludeSet,
    items: &mut Vec<WorkItem>,
) -> Result<(), IsolationError> {
    let entries = match std::fs::read_dir(src) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %src.display(), error = %e, "skipping unreadable directory");
            return Ok(());
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %src.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if excludes.matches(&name) {
            continue;
        }

        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %src_path.display(), error = %e, "skipping entry");
                continue;
            }
        };

        if file_type.is_symlink() {
            match std::fs::read_link(&src_path) {
                Ok(target) => items.push(WorkItem::Symlink {
                    target,
                    dst: dst_path,
                }),
                Err(e) => warn!(path = %src_path.display(), error = %e, "skipping symlink"),
            }
        } else if file_type.is_dir() {
            items.push(WorkItem::Dir(dst_path.clone()));
            walk(&src_path, &dst_path, excludes, items)?;
        } else {
            items.push(WorkItem::File {
                src: src_path,
                dst: dst_path,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "copy_tests.rs"]
mod tests;
