//! End-of-run reporting: per-stage counters, planned operations, failures.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use lectern_core::types::Stage;

use crate::artifacts::ArtifactDiff;

/// A mutation a stage performed, or would perform in a dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlannedOp {
    Create,
    Update,
    Delete,
    RemoveFromModule,
    Write,
}

impl fmt::Display for PlannedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlannedOp::Create => "create",
            PlannedOp::Update => "update",
            PlannedOp::Delete => "delete",
            PlannedOp::RemoveFromModule => "remove-from-module",
            PlannedOp::Write => "write",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAction {
    pub op: PlannedOp,
    /// Human-readable target, e.g. `page 'Welcome'`.
    pub target: String,
}

/// One item that failed in one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Course-relative path of the item (or bank / outcomes file).
    pub item: PathBuf,
    pub stage: Stage,
    pub error: String,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.item.display(), self.error)
    }
}

/// Counters and details for one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Not touched by the change set: zero remote calls were made.
    pub skipped_stage: bool,
    pub created: usize,
    pub updated: usize,
    /// Items processed but unchanged (cache hit, already placed, ...).
    pub skipped: usize,
    pub deleted: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub planned: Vec<PlannedAction>,
    #[serde(skip)]
    pub diffs: Vec<ArtifactDiff>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        StageReport {
            stage,
            skipped_stage: false,
            created: 0,
            updated: 0,
            skipped: 0,
            deleted: 0,
            failed: 0,
            cancelled: 0,
            planned: Vec::new(),
            diffs: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn skipped_entirely(stage: Stage) -> Self {
        StageReport {
            skipped_stage: true,
            ..StageReport::new(stage)
        }
    }

    /// Remote (or artifact) mutations counted by this stage.
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    pub fn plan(&mut self, op: PlannedOp, target: impl Into<String>) {
        self.planned.push(PlannedAction {
            op,
            target: target.into(),
        });
    }
}

/// Result of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub course_id: String,
    pub dry_run: bool,
    pub stages: Vec<StageReport>,
    pub failures: Vec<ItemFailure>,
    /// Cancelled between items; the watch state was not advanced.
    pub interrupted: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl RunSummary {
    pub fn new(course_id: impl Into<String>, dry_run: bool) -> Self {
        RunSummary {
            course_id: course_id.into(),
            dry_run,
            stages: Vec::new(),
            failures: Vec::new(),
            interrupted: false,
            duration: Duration::ZERO,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Total mutations across all stages.
    pub fn mutations(&self) -> usize {
        self.stages.iter().map(StageReport::mutations).sum()
    }

    /// 0 on full success, 1 if any item failed or the run was interrupted.
    pub fn exit_code(&self) -> u8 {
        if self.has_failures() || self.interrupted {
            1
        } else {
            0
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
