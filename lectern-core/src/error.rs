//! Error types for lectern-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ContentKind;

/// All errors that can arise while loading a course tree or its configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the file that failed.
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// JSON parse error on load, with the file that failed.
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Frontmatter present but structurally unusable.
    #[error("invalid frontmatter in {path}: {message}")]
    Frontmatter { path: PathBuf, message: String },

    /// A content item resolved to an empty declared name.
    #[error("content item at {path} has an empty name")]
    EmptyName { path: PathBuf },

    /// Two items of the same kind declare the same name.
    #[error("duplicate {kind} name '{name}': {first} and {second}")]
    DuplicateName {
        kind: ContentKind,
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// The course root does not contain a content directory.
    #[error("no content directory under {root} (expected content/ or pages/)")]
    NoContentDir { root: PathBuf },

    /// No remote course id could be resolved from any source.
    #[error(
        "no course id configured; pass --course-id, set LECTERN_COURSE_ID, \
         add course_id to lectern.yaml, or store it in _course_metadata/defaults.json"
    )]
    CourseIdMissing,

    /// API credentials could not be resolved or read.
    #[error("credentials unavailable: {message}")]
    Credentials { message: String },

    /// An environment override held an unparseable value.
    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
