//! Error types for lectern-sync.

use std::path::PathBuf;

use thiserror::Error;

use lectern_core::CoreError;
use lectern_template::TemplateError;

use crate::remote::RemoteError;

/// Fatal errors: the run stops before (or between) stages.
///
/// Item-level problems never surface here; they are collected as
/// [`crate::summary::ItemFailure`]s in the run summary.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Course tree or configuration could not be loaded.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Shared template resources (variables, wrappers) could not be loaded.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Another run holds the course lock.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The rayon worker pool could not be built.
    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cache or state file JSON error.
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Why one item (or bank, outcome, rubric) failed within a stage.
///
/// Recorded in the run summary; the stage carries on with the next item.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A dependency this item needs has no remote id (bank, outcome, assignment).
    #[error("{what} '{name}' has no remote id; was it published?")]
    MissingDependency { what: &'static str, name: String },

    /// The item's own declaration is unusable (e.g. a link without a URL).
    #[error("{0}")]
    Invalid(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Skipped because the run was interrupted.
    #[error("cancelled")]
    Cancelled,
}

/// Errors from the per-course run lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the lock.
    #[error("course is locked by pid {pid} ({command}, since {started_at}); lock file {path}")]
    Contention {
        path: PathBuf,
        pid: u32,
        command: String,
        started_at: String,
    },

    #[error("lock I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode lock holder for {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Json`].
pub(crate) fn json_err(path: impl Into<PathBuf>, source: serde_json::Error) -> SyncError {
    SyncError::Json {
        path: path.into(),
        source,
    }
}
