//! Error types for lectern-template.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which placeholder family a cycle was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Include,
    RubricRow,
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleKind::Include => f.write_str("include"),
            CycleKind::RubricRow => f.write_str("rubric_row"),
        }
    }
}

/// A name re-entered while it was still being expanded.
///
/// `chain` is the active resolution stack followed by the repeated name,
/// e.g. `["a", "b", "a"]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} cycle: {}", chain.join(" -> "))]
pub struct TemplateCycleError {
    pub kind: CycleKind,
    pub chain: Vec<String>,
}

impl TemplateCycleError {
    /// The name that closed the cycle.
    pub fn offending(&self) -> &str {
        self.chain.last().map(String::as_str).unwrap_or_default()
    }
}

/// All errors that can arise while expanding a single item.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Cycle(#[from] TemplateCycleError),

    /// `{{rubric_row:name}}` with no row file under `rubrics/rows/`.
    #[error("rubric row '{name}' not found (referenced from {referenced_from})")]
    UnresolvedRubricRow {
        name: String,
        referenced_from: PathBuf,
    },

    /// `use_rubric` names a shared rubric that does not exist.
    #[error("shared rubric '{name}' not found under rubrics/")]
    UnknownSharedRubric { name: String },

    /// Rubric failed structural validation; one message per issue.
    #[error("invalid rubric {path}: {}", issues.join("; "))]
    InvalidRubric { path: PathBuf, issues: Vec<String> },

    /// Frontmatter `template` names a wrapper that does not exist.
    #[error("page template '{name}' not found in templates/")]
    UnknownTemplate { name: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    #[error("template io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> TemplateError {
    TemplateError::Io {
        path: path.into(),
        source,
    }
}
