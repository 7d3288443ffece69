//! # lectern-sync
//!
//! The reconciliation engine: stages, content-addressed cache, prune
//! planning and the [`LmsClient`] seam.
//!
//! Call [`pipeline::run`] with a course layout, a client and
//! [`SyncOptions`]; the returned [`RunSummary`] lists what each stage did.
//! [`validate::validate`] runs the offline checks only.

pub mod artifacts;
pub mod cache;
pub mod error;
pub mod lock;
pub mod payload;
pub mod pipeline;
pub mod reconcile;
pub mod remote;
pub mod retry;
mod stages;
pub mod state;
pub mod summary;
pub mod validate;

pub use cache::ContentCache;
pub use error::{ItemError, LockError, SyncError};
pub use lock::{CourseLock, LockInfo};
pub use pipeline::{CancelToken, SyncOptions};
pub use reconcile::{reconcile, LocalDeclared, Protections, ReconcilePlan, RemoteActual};
pub use remote::{
    LmsClient, ModuleItemKind, ModuleItemRequest, Payload, RemoteError, RemoteId, RemoteKind,
    RemoteModule, RemoteModuleItem, RemoteObject,
};
pub use retry::RetryPolicy;
pub use state::WatchState;
pub use summary::{ItemFailure, PlannedAction, PlannedOp, RunSummary, StageReport};
pub use validate::{Issue, Severity, ValidationReport};
