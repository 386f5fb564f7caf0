//! Append Log for Durability
//!
//! Provides local disk durability for accepted messages before the periodic
//! drain into the long-term store.
//!
//! ## Problem
//!
//! The long-term store is written in batches, once a minute. Without a
//! journal, every message accepted since the last batch would be LOST if the
//! process crashes.
//!
//! ## Solution
//!
//! Write each accepted message to a sequential log and force it to stable
//! storage before acknowledging the sender. On restart the log is replayed
//! by the next drain; after a successful batch insert the drained entries
//! are compacted away.
//!
//! ```text
//! Session → Message Service → Append Log (fsync) → ack
//!                                   │
//!                              drain tick
//!                                   ▼
//!                            Long-Term Store → compact log
//! ```
//!
//! ## File Format
//!
//! One complete JSON object per line:
//!
//! ```text
//! {"message_id":"…","user_id":"…","content":"…","timestamp":"…"}\n
//! ```
//!
//! A crash mid-append may leave a torn trailing line; replay skips malformed
//! lines silently. Compaction rewrites the file through a temp file and an
//! atomic rename, so the old file stays authoritative until the rename
//! succeeds.
//!
//! ## Concurrency
//!
//! One mutex over the open file covers append, snapshot and compact. There
//! is no in-memory index; the log is small (at most one drain interval of
//! traffic) and snapshot reads it whole.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// One accepted message as recorded in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Crash-safe journal of accepted messages.
pub struct MessageWal {
    path: PathBuf,
    file: Mutex<File>,
}

impl MessageWal {
    /// Open (or create) the log at `path`. The parent directory is created
    /// with owner-only permissions.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                        .await?;
                }
            }
        }

        let file = Self::open_append(&path).await?;
        let size = file.metadata().await?.len();

        info!(path = %path.display(), size, "append log opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    async fn open_append(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .await?)
    }

    /// Append one entry and force it to stable storage.
    ///
    /// Until this returns `Ok`, the message is not accepted: a failed write
    /// or sync must be surfaced to the sender.
    pub async fn append(&self, entry: &WalEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.sync_all().await?;

        debug!(message_id = %entry.message_id, "log entry appended and synced");
        Ok(())
    }

    /// Read every committed entry in insertion order.
    ///
    /// Takes the same lock as `append`/`compact` because compaction replaces
    /// the file underneath concurrent readers.
    pub async fn snapshot(&self) -> Result<Vec<WalEntry>> {
        let _file = self.file.lock().await;
        self.read_all().await
    }

    /// Rewrite the log without the entries whose ids are in `persisted`.
    ///
    /// The new content is written to a temp file, synced, and atomically
    /// renamed over the log; if anything fails before the rename, the old
    /// file remains authoritative and no data is lost. The appending handle
    /// is reopened on the new file.
    pub async fn compact(&self, persisted: &HashSet<Uuid>) -> Result<()> {
        let mut file = self.file.lock().await;

        let entries = self.read_all().await?;
        let before = entries.len();
        let remaining: Vec<&WalEntry> = entries
            .iter()
            .filter(|entry| !persisted.contains(&entry.message_id))
            .collect();

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path).await?;
        for entry in &remaining {
            let mut line = serde_json::to_vec(entry)?;
            line.push(b'\n');
            tmp.write_all(&line).await?;
        }
        tmp.sync_all().await?;
        drop(tmp);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        *file = Self::open_append(&self.path).await?;

        info!(
            before,
            removed = before - remaining.len(),
            remaining = remaining.len(),
            "append log compacted"
        );
        Ok(())
    }

    /// Read and parse the whole file. Callers must hold the file lock.
    async fn read_all(&self) -> Result<Vec<WalEntry>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in data.split(|byte| *byte == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<WalEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(_) => {
                    // Torn write from a crash mid-append.
                    debug!("skipping malformed log line");
                }
            }
        }
        Ok(entries)
    }
}
