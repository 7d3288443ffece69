use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the watch loop.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("change detection error: {0}")]
    Change(#[from] lectern_changes::ChangeError),

    #[error("sync error: {0}")]
    Sync(#[from] lectern_sync::SyncError),

    #[error("sync task join error: {0}")]
    Join(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WatchError {
    WatchError::Io {
        path: path.into(),
        source,
    }
}
