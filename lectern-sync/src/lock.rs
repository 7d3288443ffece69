//! Per-course run lock.
//!
//! An exclusive advisory lock on `_course_metadata/.lock` keeps two runs
//! (a watcher and a manual sync, say) from writing the same cache. The lock
//! file carries JSON metadata about the holder so contention errors can say
//! who is running.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::LockError;

/// Metadata written into the lock file by the holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub command: String,
}

/// Held for the duration of a run; released on drop.
#[derive(Debug)]
pub struct CourseLock {
    file: File,
    path: PathBuf,
}

impl CourseLock {
    /// Take the lock without blocking.
    pub fn acquire(path: &Path, command: &str) -> Result<CourseLock, LockError> {
        let io = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io)?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
                || err.kind() == std::io::ErrorKind::WouldBlock
            {
                let holder = CourseLock::holder(path);
                return Err(LockError::Contention {
                    path: path.to_path_buf(),
                    pid: holder.as_ref().map_or(0, |h| h.pid),
                    command: holder
                        .as_ref()
                        .map_or_else(|| "unknown".to_string(), |h| h.command.clone()),
                    started_at: holder
                        .map_or_else(|| "unknown".to_string(), |h| h.started_at.to_rfc3339()),
                });
            }
            return Err(io(err));
        }

        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
            command: command.to_string(),
        };
        let json = serde_json::to_string(&info).map_err(|source| LockError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        file.set_len(0).map_err(io)?;
        file.seek(SeekFrom::Start(0)).map_err(io)?;
        file.write_all(json.as_bytes()).map_err(io)?;
        file.sync_all().map_err(io)?;

        tracing::debug!("acquired course lock {}", path.display());
        Ok(CourseLock {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Metadata of the current holder, if the file is readable.
    pub fn holder(path: &Path) -> Option<LockInfo> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CourseLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        if let Err(e) = self.file.unlock() {
            tracing::warn!("failed to release lock {}: {e}", self.path.display());
        }
    }
}
