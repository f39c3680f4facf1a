// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL append-only message ledger, one file per cluster.
//!
//! Each entry is a single line of JSON holding one [`Message`] with its
//! assigned sequence. Sequences are dense, gap-free, starting at 1. The
//! owning orchestrator is the only writer; any number of processes may read
//! by re-scanning the file, so readers tolerate a partial trailing line from
//! an in-flight append.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;
use zs_core::{ClusterId, Message};

/// Errors that can occur in ledger operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt ledger entry at line {line}: {message}")]
    Corrupt { line: usize, message: String },
    #[error("ledger for cluster {0} is closed")]
    Closed(ClusterId),
    #[error("ledger file missing: {0}")]
    Missing(PathBuf),
}

/// Filter for indexed ledger queries. Results are always in ascending
/// sequence order.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub topic: Option<String>,
    pub sender: Option<String>,
    /// Only messages with `sequence > since_seq`.
    pub since_seq: Option<u64>,
    /// Only messages with `timestamp >= since_ts` (epoch ms).
    pub since_ts: Option<u64>,
    /// Keep at most this many results, from the tail.
    pub limit: Option<usize>,
}

impl MessageQuery {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::default()
        }
    }

    fn matches(&self, msg: &Message) -> bool {
        if let Some(topic) = &self.topic {
            if msg.topic != *topic {
                return false;
            }
        }
        if let Some(sender) = &self.sender {
            if msg.sender != *sender {
                return false;
            }
        }
        if let Some(since) = self.since_seq {
            if msg.sequence <= since {
                return false;
            }
        }
        if let Some(since) = self.since_ts {
            if msg.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Cancel handle returned by [`Ledger::poll_for_messages`].
pub struct PollHandle {
    stop_tx: watch::Sender<bool>,
}

impl PollHandle {
    /// Stop the poller. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Durable append-only message log for one cluster.
#[derive(Debug)]
pub struct Ledger {
    cluster_id: ClusterId,
    path: PathBuf,
    /// Append handle; None after close.
    file: Option<File>,
    /// Next sequence number to assign.
    next_seq: u64,
}

impl Ledger {
    /// Open or create the ledger for a cluster under `storage_dir`.
    ///
    /// Scans existing entries to find the highest assigned sequence.
    pub fn open(storage_dir: &Path, cluster_id: ClusterId) -> Result<Self, StorageError> {
        let path = crate::ledger_path(storage_dir, &cluster_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let messages = read_messages(&path)?;
        let next_seq = messages.last().map(|m| m.sequence).unwrap_or(0) + 1;

        Ok(Self {
            cluster_id,
            path,
            file: Some(file),
            next_seq,
        })
    }

    /// Open the ledger of an existing cluster; fails with
    /// [`StorageError::Missing`] if the file is absent (orphan registry entry).
    pub fn open_existing(storage_dir: &Path, cluster_id: ClusterId) -> Result<Self, StorageError> {
        let path = crate::ledger_path(storage_dir, &cluster_id);
        if !path.exists() {
            return Err(StorageError::Missing(path));
        }
        Self::open(storage_dir, cluster_id)
    }

    /// True if a ledger file exists for this cluster.
    pub fn exists(storage_dir: &Path, cluster_id: &ClusterId) -> bool {
        crate::ledger_path(storage_dir, cluster_id).exists()
    }

    /// Remove the ledger file (whole-cluster removal only).
    pub fn remove(storage_dir: &Path, cluster_id: &ClusterId) -> Result<(), StorageError> {
        let path = crate::ledger_path(storage_dir, cluster_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a message, assigning the next dense sequence number.
    ///
    /// The entry is fsynced before this returns; a successful return means
    /// the message is durable and visible to readers.
    pub fn append(&mut self, mut message: Message) -> Result<Message, StorageError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::Closed(self.cluster_id.clone()))?;

        message.sequence = self.next_seq;
        message.cluster_id = self.cluster_id.clone();

        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.sync_data()?;

        self.next_seq += 1;
        Ok(message)
    }

    /// Full history in sequence order.
    pub fn get_all(&self) -> Result<Vec<Message>, StorageError> {
        read_messages(&self.path)
    }

    /// Indexed filter over the history; ascending sequence order.
    pub fn query(&self, query: &MessageQuery) -> Result<Vec<Message>, StorageError> {
        let mut matched: Vec<Message> = read_messages(&self.path)?
            .into_iter()
            .filter(|m| query.matches(m))
            .collect();
        if let Some(limit) = query.limit {
            if matched.len() > limit {
                matched.drain(..matched.len() - limit);
            }
        }
        Ok(matched)
    }

    /// Most recent message on a topic, if any.
    pub fn find_last(&self, topic: &str) -> Result<Option<Message>, StorageError> {
        Ok(self.query(&MessageQuery::topic(topic))?.pop())
    }

    /// Number of messages, optionally restricted to a topic.
    pub fn count(&self, topic: Option<&str>) -> Result<usize, StorageError> {
        let query = match topic {
            Some(t) => MessageQuery::topic(t),
            None => MessageQuery::default(),
        };
        Ok(self.query(&query)?.len())
    }

    /// Poll the persisted file for new messages every `interval`.
    ///
    /// Each durably committed message is delivered to `handler` exactly once
    /// within this poller, in sequence order. Returns a cancel handle. This
    /// is the only change-notification mechanism available to processes that
    /// do not own the cluster.
    pub fn poll_for_messages<F>(path: PathBuf, interval: Duration, handler: F) -> PollHandle
    where
        F: FnMut(Message) + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let mut handler = handler;

        tokio::spawn(async move {
            let mut last_seen = 0u64;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            return;
                        }
                    }
                }

                let messages = match read_messages(&path) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "ledger poll failed");
                        continue;
                    }
                };
                for msg in messages {
                    if msg.sequence > last_seen {
                        last_seen = msg.sequence;
                        handler(msg);
                    }
                }
            }
        });

        PollHandle { stop_tx }
    }

    /// Release the file handle. Idempotent; later appends fail.
    pub fn close(&mut self) {
        self.file = None;
    }
}

/// Read every committed message from a ledger file.
///
/// A final line without a trailing newline is an in-flight append from the
/// writer and is skipped; an unparseable interior line is corruption and is
/// surfaced as an error.
fn read_messages(path: &Path) -> Result<Vec<Message>, StorageError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;

    let mut messages = Vec::new();
    let mut line = String::new();
    let mut line_no = 0usize;

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            break;
        }
        line_no += 1;

        if !line.ends_with('\n') {
            // Partial trailing write; not yet committed from this reader's view
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<Message>(trimmed) {
            Ok(msg) => messages.push(msg),
            Err(e) => {
                return Err(StorageError::Corrupt {
                    line: line_no,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(messages)
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
