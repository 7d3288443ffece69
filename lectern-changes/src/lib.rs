//! Change detection for `lectern-changes`.
//!
//! [`resolve`] maps a [`ChangeSet`] (changed paths, or "full") to an
//! [`AffectedSet`]: for every pipeline stage, either skip it, run it over
//! everything, or run it over a specific set of items. Shared resources
//! escalate only the stages that consume them.
//!
//! | changed path                 | stages                                         |
//! |------------------------------|------------------------------------------------|
//! | item file                    | expand, publish or quizzes, modules, rubrics*  |
//! | item `index.md` (or deleted) | + prune                                        |
//! | include / wrapper template   | expand, publish, quizzes, rubrics (all)        |
//! | shared variables             | expand, publish, quizzes, rubrics (all)        |
//! | shared rubric / rubric row   | expand, rubrics (all)                          |
//! | outcomes file                | outcomes, rubrics (all)                        |
//! | module order / module folder | modules, prune (all)                           |
//! | question bank                | banks (that bank), quizzes (all)               |
//!
//! `*` assignments only.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use lectern_core::layout::CourseLayout;
use lectern_core::types::{ContentKind, Stage};
use thiserror::Error;

pub mod classify;
pub mod scan;

pub use classify::{classify, is_ignored, PathClass};
pub use scan::scan_modified_since;

/// Environment variable carrying an externally supplied change list.
pub const CHANGED_FILES_ENV: &str = lectern_core::config::ENV_CHANGED_FILES;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Errors from change detection.
#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Paths modified since the last successful run, or everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    Full,
    Paths(BTreeSet<PathBuf>),
}

impl ChangeSet {
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        ChangeSet::Paths(paths.into_iter().map(Into::into).collect())
    }

    /// Parse a newline-separated hint; relative entries resolve against `root`.
    pub fn from_hint(text: &str, root: &Path) -> Self {
        ChangeSet::from_paths(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| {
                    let p = Path::new(l);
                    if p.is_absolute() {
                        p.to_path_buf()
                    } else {
                        root.join(p)
                    }
                }),
        )
    }

    /// Read [`CHANGED_FILES_ENV`]; `None` when unset or blank.
    pub fn from_env(root: &Path) -> Option<Self> {
        let raw = std::env::var(CHANGED_FILES_ENV).ok()?;
        if raw.trim().is_empty() {
            return None;
        }
        Some(ChangeSet::from_hint(&raw, root))
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ChangeSet::Full)
    }

    /// True for an empty path set (never for `Full`).
    pub fn is_empty(&self) -> bool {
        matches!(self, ChangeSet::Paths(p) if p.is_empty())
    }

    /// Fold `other` into `self`; `Full` absorbs everything.
    pub fn merge(&mut self, other: ChangeSet) {
        match (&mut *self, other) {
            (ChangeSet::Full, _) => {}
            (this, ChangeSet::Full) => *this = ChangeSet::Full,
            (ChangeSet::Paths(mine), ChangeSet::Paths(theirs)) => mine.extend(theirs),
        }
    }
}

/// Which items one stage must process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StageScope {
    /// Untouched: zero remote calls.
    #[default]
    Skip,
    All,
    /// Course-relative item folders (or bank files for the bank stage).
    Items(BTreeSet<PathBuf>),
}

impl StageScope {
    pub fn is_skip(&self) -> bool {
        matches!(self, StageScope::Skip)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, StageScope::All)
    }

    pub fn includes(&self, logical_path: &Path) -> bool {
        match self {
            StageScope::Skip => false,
            StageScope::All => true,
            StageScope::Items(set) => set.contains(logical_path),
        }
    }

    pub fn merge(&mut self, other: StageScope) {
        match other {
            StageScope::Skip => {}
            StageScope::All => *self = StageScope::All,
            StageScope::Items(theirs) => match self {
                StageScope::Skip => *self = StageScope::Items(theirs),
                StageScope::All => {}
                StageScope::Items(mine) => mine.extend(theirs),
            },
        }
    }

    fn add(&mut self, item: &Path) {
        self.merge(StageScope::Items(BTreeSet::from([item.to_path_buf()])));
    }
}

/// Per-stage work for one pipeline invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffectedSet {
    scopes: BTreeMap<Stage, StageScope>,
    deleted: BTreeSet<PathBuf>,
}

impl AffectedSet {
    pub fn none() -> Self {
        AffectedSet::default()
    }

    pub fn full() -> Self {
        AffectedSet {
            scopes: Stage::ALL.iter().map(|s| (*s, StageScope::All)).collect(),
            deleted: BTreeSet::new(),
        }
    }

    pub fn scope(&self, stage: Stage) -> &StageScope {
        const SKIP: &StageScope = &StageScope::Skip;
        self.scopes.get(&stage).unwrap_or(SKIP)
    }

    pub fn set_scope(&mut self, stage: Stage, scope: StageScope) {
        self.scopes.insert(stage, scope);
    }

    /// Widen `stage` to cover `scope` as well.
    pub fn widen(&mut self, stage: Stage, scope: StageScope) {
        self.scopes.entry(stage).or_default().merge(scope);
    }

    /// Skip every stage not in `keep`.
    pub fn retain_stages(&mut self, keep: &[Stage]) {
        self.scopes.retain(|stage, _| keep.contains(stage));
    }

    /// True when every stage is skipped.
    pub fn is_noop(&self) -> bool {
        self.scopes.values().all(StageScope::is_skip)
    }

    /// Item folders whose `index.md` disappeared.
    pub fn deleted(&self) -> &BTreeSet<PathBuf> {
        &self.deleted
    }

    fn add_item(&mut self, stage: Stage, item: &Path) {
        self.scopes.entry(stage).or_default().add(item);
    }

    fn all(&mut self, stages: &[Stage]) {
        for stage in stages {
            self.widen(*stage, StageScope::All);
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Map `changes` to the stages and items they affect.
pub fn resolve(layout: &CourseLayout, changes: &ChangeSet) -> AffectedSet {
    let paths = match changes {
        ChangeSet::Full => return AffectedSet::full(),
        ChangeSet::Paths(paths) => paths,
    };

    let mut affected = AffectedSet::none();
    for path in paths {
        let class = classify(layout, path);
        match &class {
            PathClass::Outside => {
                tracing::warn!("ignoring {} (outside the course root)", path.display());
                continue;
            }
            PathClass::Ignored => {
                tracing::debug!("ignoring {}", path.display());
                continue;
            }
            _ => {}
        }
        tracing::debug!("{} -> {:?}", path.display(), class);
        apply(&mut affected, class);
    }
    affected
}

fn apply(affected: &mut AffectedSet, class: PathClass) {
    match class {
        PathClass::Item { item, kind, index, deleted } => {
            if deleted {
                affected.deleted.insert(item);
                affected.all(&[Stage::Prune]);
                return;
            }
            affected.add_item(Stage::Expand, &item);
            match kind {
                ContentKind::Quiz => affected.add_item(Stage::Quizzes, &item),
                ContentKind::Link => {}
                ContentKind::Page | ContentKind::File => affected.add_item(Stage::Publish, &item),
                ContentKind::Assignment => {
                    affected.add_item(Stage::Publish, &item);
                    affected.add_item(Stage::Rubrics, &item);
                }
            }
            affected.add_item(Stage::Modules, &item);
            if index {
                affected.all(&[Stage::Prune]);
            }
        }
        PathClass::Include | PathClass::Template | PathClass::Variables => affected.all(&[
            Stage::Expand,
            Stage::Publish,
            Stage::Quizzes,
            Stage::Rubrics,
        ]),
        PathClass::SharedRubric | PathClass::RubricRow => {
            affected.all(&[Stage::Expand, Stage::Rubrics])
        }
        PathClass::Outcomes => affected.all(&[Stage::Outcomes, Stage::Rubrics]),
        PathClass::ModuleOrder | PathClass::ModuleFolder | PathClass::ContentFolder => {
            affected.all(&[Stage::Modules, Stage::Prune])
        }
        PathClass::Bank(bank) => {
            affected.add_item(Stage::Banks, &bank);
            affected.all(&[Stage::Quizzes]);
        }
        PathClass::Ignored | PathClass::Outside => {}
    }
}
