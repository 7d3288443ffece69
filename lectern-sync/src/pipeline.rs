//! Shared sync pipeline entrypoint used by the CLI and the watcher.
//!
//! One invocation:
//!
//! 1. takes the course lock (fatal on contention),
//! 2. loads the course, templates, cache and watch state (fatal on error,
//!    before any remote call),
//! 3. resolves the change set into per-stage scopes,
//! 4. runs every stage in [`Stage::ALL`] order, flushing the cache after each,
//! 5. advances the watch state when the run was complete and clean.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use lectern_changes::{resolve, AffectedSet, ChangeSet};
use lectern_core::config::{PruneSettings, Settings};
use lectern_core::course::{load_course, LoadFailure};
use lectern_core::layout::CourseLayout;
use lectern_core::types::Stage;
use lectern_template::Renderer;

use crate::cache::ContentCache;
use crate::error::SyncError;
use crate::lock::CourseLock;
use crate::remote::LmsClient;
use crate::retry::RetryPolicy;
use crate::stages::{self, StageContext, StageRun};
use crate::state::WatchState;
use crate::summary::{ItemFailure, RunSummary, StageReport};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Everything one pipeline invocation needs besides the course tree.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub course_id: String,
    pub dry_run: bool,
    /// Report unified diffs of `source.md` (dry runs only).
    pub diff: bool,
    pub skip_prune: bool,
    /// Only expand and publish `.file` items.
    pub assets_only: bool,
    pub change_set: ChangeSet,
    /// Restrict the run to these stages (`None` = all).
    pub stages: Option<Vec<Stage>>,
    pub prune: PruneSettings,
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Recorded in the lock file.
    pub command: String,
}

impl SyncOptions {
    pub fn new(course_id: impl Into<String>) -> Self {
        SyncOptions {
            course_id: course_id.into(),
            dry_run: false,
            diff: false,
            skip_prune: false,
            assets_only: false,
            change_set: ChangeSet::Full,
            stages: None,
            prune: PruneSettings {
                apply: true,
                assignments: true,
            },
            workers: 4,
            retry: RetryPolicy::default(),
            command: "lectern sync".to_string(),
        }
    }

    pub fn from_settings(course_id: impl Into<String>, settings: &Settings) -> Self {
        SyncOptions {
            prune: settings.prune.clone(),
            workers: settings.workers,
            retry: RetryPolicy::new(settings.http.retry_attempts),
            ..SyncOptions::new(course_id)
        }
    }

    /// Only the prune stage; used by `lectern prune`.
    pub fn prune_only(mut self) -> Self {
        self.stages = Some(vec![Stage::Prune]);
        self
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Per-stage scopes after applying the option filters.
pub fn plan_scopes(layout: &CourseLayout, options: &SyncOptions) -> AffectedSet {
    let mut affected = resolve(layout, &options.change_set);
    if options.assets_only {
        affected.retain_stages(&[Stage::Expand, Stage::Publish]);
    }
    if let Some(stages) = &options.stages {
        affected.retain_stages(stages);
    }
    if options.skip_prune {
        affected.retain_stages(
            &Stage::ALL
                .into_iter()
                .filter(|s| *s != Stage::Prune)
                .collect::<Vec<_>>(),
        );
    }
    affected
}

/// Run the sync pipeline for one course.
///
/// Returns `Err` only for fatal problems (lock, config, unreadable course
/// tree, cache I/O); item-level failures are in the summary.
pub fn run(
    layout: &CourseLayout,
    client: &dyn LmsClient,
    options: &SyncOptions,
    cancel: &CancelToken,
) -> Result<RunSummary, SyncError> {
    let started = Instant::now();
    let started_at = Utc::now();
    let _lock = CourseLock::acquire(&layout.lock_file(), &options.command)?;

    let course = load_course(layout)?;
    let renderer = Renderer::load(layout)?;
    let cache = ContentCache::load_at(&layout.cache_file())?;
    let mut state = WatchState::load_at(&layout.watch_state_file())?;
    let affected = plan_scopes(layout, options);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build()?;

    tracing::info!(
        "sync course {} ({} item(s), {}{})",
        options.course_id,
        course.items.len(),
        if options.change_set.is_full() { "full" } else { "incremental" },
        if options.dry_run { ", dry run" } else { "" }
    );

    let ctx = StageContext::new(layout, &course, &renderer, client, options, cancel, &pool, cache);
    let mut summary = RunSummary::new(options.course_id.clone(), options.dry_run);

    for stage in Stage::ALL {
        let scope = affected.scope(stage);
        if scope.is_skip() {
            tracing::debug!("stage {stage}: nothing to do");
            summary.stages.push(StageReport::skipped_entirely(stage));
            continue;
        }
        if cancel.is_cancelled() {
            summary.interrupted = true;
            summary.stages.push(StageReport::skipped_entirely(stage));
            continue;
        }

        let applied = !options.dry_run && (stage != Stage::Prune || stages::prune::applies(options));
        let mut run = StageRun::new(stage, applied);
        let stage_started = Instant::now();
        stages::run_stage(stage, &ctx, scope, &mut run);
        run.report.duration = stage_started.elapsed();

        ctx.mark_failed(run.failures.iter().map(|f| f.item.clone()));
        ctx.flush_cache()?;
        if run.report.cancelled > 0 {
            summary.interrupted = true;
        }
        tracing::info!(
            "stage {stage}: {} created, {} updated, {} unchanged, {} deleted, {} failed",
            run.report.created,
            run.report.updated,
            run.report.skipped,
            run.report.deleted,
            run.report.failed
        );
        summary.failures.extend(run.failures);
        summary.stages.push(run.report);
    }
    drop(ctx);
    report_load_failures(&course.load_failures, &mut summary);

    if !options.dry_run && !summary.has_failures() && !summary.interrupted {
        state.advance(started_at);
        state.save_at(&layout.watch_state_file())?;
    } else {
        tracing::debug!("watch state not advanced");
    }

    summary.duration = started.elapsed();
    Ok(summary)
}

/// Items that never loaded count as expansion failures, whatever the scope.
fn report_load_failures(failures: &[LoadFailure], summary: &mut RunSummary) {
    if failures.is_empty() {
        return;
    }
    if let Some(report) = summary.stages.iter_mut().find(|r| r.stage == Stage::Expand) {
        report.skipped_stage = false;
        report.failed += failures.len();
    }
    for failure in failures {
        tracing::warn!("[{}] {}: {}", Stage::Expand, failure.logical_path.display(), failure.error);
        summary.failures.push(ItemFailure {
            item: failure.logical_path.clone(),
            stage: Stage::Expand,
            error: failure.error.clone(),
        });
    }
}
