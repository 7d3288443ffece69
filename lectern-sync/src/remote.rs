//! The remote LMS capability surface the pipeline drives.
//!
//! [`LmsClient`] is the only way stages touch the remote course. The HTTP
//! implementation lives in the CLI crate; tests use an in-memory recorder.
//! Every method takes the remote course id so one client can serve several
//! courses.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use lectern_core::types::ContentKind;

// ---------------------------------------------------------------------------
// Identifiers and kinds
// ---------------------------------------------------------------------------

const PROVISIONAL_PREFIX: &str = "provisional-";

/// Opaque remote object id. Dry runs hand out `provisional-<n>` ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        RemoteId(id.into())
    }

    pub fn provisional(n: u64) -> Self {
        RemoteId(format!("{PROVISIONAL_PREFIX}{n}"))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        RemoteId(s.to_string())
    }
}

/// Remote object classes addressed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteKind {
    Page,
    Assignment,
    Quiz,
    File,
    Outcome,
    QuestionBank,
    Rubric,
}

impl RemoteKind {
    /// The remote class a content item publishes to; links have none.
    pub fn for_content(kind: ContentKind) -> Option<RemoteKind> {
        match kind {
            ContentKind::Page => Some(RemoteKind::Page),
            ContentKind::Assignment => Some(RemoteKind::Assignment),
            ContentKind::Quiz => Some(RemoteKind::Quiz),
            ContentKind::File => Some(RemoteKind::File),
            ContentKind::Link => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RemoteKind::Page => "page",
            RemoteKind::Assignment => "assignment",
            RemoteKind::Quiz => "quiz",
            RemoteKind::File => "file",
            RemoteKind::Outcome => "outcome",
            RemoteKind::QuestionBank => "question bank",
            RemoteKind::Rubric => "rubric",
        }
    }
}

impl fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Remote records
// ---------------------------------------------------------------------------

/// A remote object as listed: id plus the name used as the join key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: RemoteId,
    pub name: String,
}

/// Module item types the pipeline understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleItemKind {
    Page,
    Assignment,
    Quiz,
    File,
    ExternalUrl,
    SubHeader,
    Other(String),
}

impl ModuleItemKind {
    pub fn for_content(kind: ContentKind) -> ModuleItemKind {
        match kind {
            ContentKind::Page => ModuleItemKind::Page,
            ContentKind::Assignment => ModuleItemKind::Assignment,
            ContentKind::Quiz => ModuleItemKind::Quiz,
            ContentKind::File => ModuleItemKind::File,
            ContentKind::Link => ModuleItemKind::ExternalUrl,
        }
    }

    /// Inverse of [`ModuleItemKind::for_content`].
    pub fn content_kind(&self) -> Option<ContentKind> {
        match self {
            ModuleItemKind::Page => Some(ContentKind::Page),
            ModuleItemKind::Assignment => Some(ContentKind::Assignment),
            ModuleItemKind::Quiz => Some(ContentKind::Quiz),
            ModuleItemKind::File => Some(ContentKind::File),
            ModuleItemKind::ExternalUrl => Some(ContentKind::Link),
            ModuleItemKind::SubHeader | ModuleItemKind::Other(_) => None,
        }
    }
}

/// One entry of a remote module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteModuleItem {
    pub id: RemoteId,
    pub kind: ModuleItemKind,
    pub title: String,
    /// Id of the underlying content object (absent for links and headers).
    pub content_id: Option<RemoteId>,
    pub external_url: Option<String>,
    pub indent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteModule {
    pub id: RemoteId,
    pub name: String,
    pub position: u32,
    pub items: Vec<RemoteModuleItem>,
}

/// Request to place an item in a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleItemRequest {
    pub kind: ModuleItemKind,
    pub title: String,
    pub content_id: Option<RemoteId>,
    pub external_url: Option<String>,
    pub new_tab: bool,
    pub indent: u32,
    pub position: u32,
}

/// Body of a create-or-update call.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured fields for pages, assignments, quizzes and outcomes.
    Json(Value),
    /// Binary upload for file items.
    File { file_name: String, bytes: Vec<u8> },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by an [`LmsClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The addressed object does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The remote refused the request as invalid (4xx other than 404/429).
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The client cannot express this request (e.g. unsupported bank format).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A long-running remote job (bank import) failed or never finished.
    #[error("remote job failed: {0}")]
    Job(String),
}

impl RemoteError {
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited { .. }
                | RemoteError::Server { .. }
                | RemoteError::Timeout(_)
                | RemoteError::Transport(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    /// Server-requested delay, when given.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// Remote operations used by the pipeline.
///
/// Implementations must be shareable across the stage worker pool.
pub trait LmsClient: Send + Sync {
    /// Every object of `kind` in the course.
    fn list(&self, course: &str, kind: RemoteKind) -> Result<Vec<RemoteObject>, RemoteError>;

    /// Create `name`, or update it in place.
    ///
    /// `known` is the cached id from a previous run; without it the client
    /// looks the object up by name where the remote allows that. A stale
    /// `known` id yields [`RemoteError::NotFound`].
    fn create_or_update(
        &self,
        course: &str,
        kind: RemoteKind,
        name: &str,
        known: Option<&RemoteId>,
        payload: &Payload,
    ) -> Result<RemoteId, RemoteError>;

    fn delete(&self, course: &str, kind: RemoteKind, id: &RemoteId) -> Result<(), RemoteError>;

    /// Modules in remote order, each with its items.
    fn list_modules(&self, course: &str) -> Result<Vec<RemoteModule>, RemoteError>;

    fn create_module(&self, course: &str, name: &str, position: u32)
        -> Result<RemoteId, RemoteError>;

    fn delete_module(&self, course: &str, module: &RemoteId) -> Result<(), RemoteError>;

    fn add_module_item(
        &self,
        course: &str,
        module: &RemoteId,
        item: &ModuleItemRequest,
    ) -> Result<RemoteId, RemoteError>;

    fn remove_module_item(
        &self,
        course: &str,
        module: &RemoteId,
        item: &RemoteId,
    ) -> Result<(), RemoteError>;

    /// Import a question bank package and wait for the remote job to finish.
    fn import_question_bank(
        &self,
        course: &str,
        name: &str,
        package: &[u8],
    ) -> Result<RemoteId, RemoteError>;

    fn create_rubric(&self, course: &str, payload: &Value) -> Result<RemoteId, RemoteError>;

    fn attach_rubric(
        &self,
        course: &str,
        rubric: &RemoteId,
        assignment: &RemoteId,
    ) -> Result<(), RemoteError>;
}
