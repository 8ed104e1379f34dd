//! Local filesystem seen-set store.
//!
//! The snapshot is a single pretty-printed JSON array:
//!
//! ```text
//! [
//!   {"id": "...", "title": "...", "link": "...", "company": "...",
//!    "role": null, "badges": ["..."], "index": 0},
//!   ...
//! ]
//! ```
//!
//! Writes go to `<file>.tmp` and are renamed over the target, so a reader
//! sees either the previous snapshot or the new one. Corrupt files are
//! renamed to `<file>.backup` (or `<file>.backup.<unix_ts>` when an earlier
//! backup exists) and the store starts over empty.
//!
//! Only one process may use a state file at a time; there is no locking.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Item;
use crate::storage::{SeenSnapshot, SeenStore, SnapshotOrigin, cap_snapshot};

/// JSON file backed seen-set.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
    capacity: usize,
}

impl LocalStore {
    /// Create a store for the given state file.
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path the first corrupt state file is moved to.
    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, ".backup")
    }

    /// A backup path not used by an earlier archived file.
    async fn unused_backup_path(&self) -> PathBuf {
        let first = self.backup_path();
        if !path_exists(&first).await {
            return first;
        }

        let stamped = with_suffix(&first, &format!(".{}", Utc::now().timestamp()));
        let mut candidate = stamped.clone();
        let mut n = 1;
        while path_exists(&candidate).await {
            candidate = with_suffix(&stamped, &format!("-{n}"));
            n += 1;
        }
        candidate
    }

    /// Read the snapshot without touching the file.
    ///
    /// `Ok(None)` means no state file exists; a corrupt file is reported as
    /// a validation error and left where it is.
    pub async fn peek(&self) -> Result<Option<Vec<Item>>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Io(e)),
        };

        Self::decode(&bytes)
            .map(Some)
            .map_err(|reason| AppError::validation(format!("corrupt state file: {reason}")))
    }

    /// Decode a snapshot, normalizing entries from older state files.
    fn decode(bytes: &[u8]) -> std::result::Result<Vec<Item>, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8: {e}"))?;
        if text.trim().is_empty() {
            return Err("file is empty".to_string());
        }

        let raw: Vec<Item> = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let items = raw
            .into_iter()
            .filter_map(|mut item| item.normalize().then_some(item))
            .enumerate()
            .map(|(index, item)| Item {
                position: index,
                ..item
            })
            .collect();
        Ok(items)
    }

    /// Move a corrupt state file aside.
    async fn archive_corrupt(&self, reason: &str) {
        let backup = self.unused_backup_path().await;
        log::warn!(
            "State file {} is corrupt ({}); moving it to {}",
            self.path.display(),
            reason,
            backup.display()
        );
        if let Err(e) = tokio::fs::rename(&self.path, &backup).await {
            log::error!(
                "Failed to archive corrupt state file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

#[async_trait]
impl SeenStore for LocalStore {
    async fn load_snapshot(&self) -> SeenSnapshot {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No state file at {}", self.path.display());
                return SeenSnapshot::empty(SnapshotOrigin::Missing);
            }
            Err(e) => {
                log::error!("Failed to read state file {}: {}", self.path.display(), e);
                return SeenSnapshot::empty(SnapshotOrigin::Unreadable);
            }
        };

        match Self::decode(&bytes) {
            Ok(items) => {
                log::debug!(
                    "Loaded {} seen postings from {}",
                    items.len(),
                    self.path.display()
                );
                SeenSnapshot {
                    items,
                    origin: SnapshotOrigin::Persisted,
                }
            }
            Err(reason) => {
                self.archive_corrupt(&reason).await;
                SeenSnapshot::empty(SnapshotOrigin::Recovered)
            }
        }
    }

    async fn save(&self, items: &[Item]) -> Result<usize> {
        let snapshot = cap_snapshot(items, self.capacity);
        write_json_atomic(&self.path, &snapshot)
            .await
            .map_err(|e| AppError::persist(&self.path, e))?;

        log::debug!(
            "Saved {} postings to {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(snapshot.len())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Write bytes atomically (write to temp, then rename).
pub async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = with_suffix(path, ".tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes).await
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
