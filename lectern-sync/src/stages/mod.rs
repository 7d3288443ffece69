//! Stage implementations and the per-run context they share.
//!
//! Every stage follows the same shape: pick the items its [`StageScope`]
//! names, run the per-item work on the worker pool, and fold the results
//! into a [`StageRun`]. A failing item is recorded and the stage moves on.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;

use lectern_changes::StageScope;
use lectern_core::course::Course;
use lectern_core::layout::CourseLayout;
use lectern_core::types::{normalize_name, ContentItem, Stage};
use lectern_template::Renderer;

use crate::cache::ContentCache;
use crate::error::{ItemError, SyncError};
use crate::payload::fingerprint;
use crate::pipeline::{CancelToken, SyncOptions};
use crate::remote::{LmsClient, Payload, RemoteError, RemoteId, RemoteKind, RemoteObject};
use crate::summary::{ItemFailure, PlannedOp, StageReport};

pub(crate) mod banks;
pub(crate) mod expand;
pub(crate) mod modules;
pub(crate) mod outcomes;
pub(crate) mod prune;
pub(crate) mod publish;
pub(crate) mod quizzes;
pub(crate) mod rubrics;

/// Run one stage over `scope`.
pub(crate) fn run_stage(stage: Stage, ctx: &StageContext<'_>, scope: &StageScope, run: &mut StageRun) {
    match stage {
        Stage::Expand => expand::run(ctx, scope, run),
        Stage::Publish => publish::run(ctx, scope, run),
        Stage::Banks => banks::run(ctx, scope, run),
        Stage::Quizzes => quizzes::run(ctx, scope, run),
        Stage::Modules => modules::run(ctx, scope, run),
        Stage::Outcomes => outcomes::run(ctx, scope, run),
        Stage::Rubrics => rubrics::run(ctx, scope, run),
        Stage::Prune => prune::run(ctx, scope, run),
    }
}

// ---------------------------------------------------------------------------
// Per-item results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    Created,
    Updated,
    Deleted,
    RemovedFromModule,
    Written,
    Unchanged,
}

/// One thing a stage did (or would do) for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Done {
    pub change: Change,
    pub target: String,
}

impl Done {
    pub fn new(change: Change, target: impl Into<String>) -> Self {
        Done {
            change,
            target: target.into(),
        }
    }
}

/// Accumulates one stage's report and failures.
#[derive(Debug)]
pub(crate) struct StageRun {
    pub report: StageReport,
    pub failures: Vec<ItemFailure>,
    /// False in dry runs and report-only prunes: mutations are planned, not counted.
    applied: bool,
}

impl StageRun {
    pub fn new(stage: Stage, applied: bool) -> Self {
        StageRun {
            report: StageReport::new(stage),
            failures: Vec::new(),
            applied,
        }
    }

    pub fn with_applied(mut self, applied: bool) -> Self {
        self.applied = applied;
        self
    }

    pub fn record(&mut self, done: Done) {
        let op = match done.change {
            Change::Unchanged => {
                self.report.skipped += 1;
                return;
            }
            Change::Created => PlannedOp::Create,
            Change::Updated => PlannedOp::Update,
            Change::Deleted => PlannedOp::Delete,
            Change::RemovedFromModule => PlannedOp::RemoveFromModule,
            Change::Written => PlannedOp::Write,
        };
        if !self.applied {
            self.report.plan(op, done.target);
            return;
        }
        match done.change {
            Change::Created => self.report.created += 1,
            Change::Updated | Change::Written => self.report.updated += 1,
            Change::Deleted | Change::RemovedFromModule => self.report.deleted += 1,
            Change::Unchanged => {}
        }
    }

    pub fn fail(&mut self, item: impl Into<PathBuf>, error: impl fmt::Display) {
        let item = item.into();
        let error = error.to_string();
        tracing::warn!("[{}] {}: {error}", self.report.stage, item.display());
        self.report.failed += 1;
        self.failures.push(ItemFailure {
            item,
            stage: self.report.stage,
            error,
        });
    }

    pub fn absorb(&mut self, item: PathBuf, result: Result<Vec<Done>, ItemError>) {
        match result {
            Ok(done) => done.into_iter().for_each(|d| self.record(d)),
            Err(ItemError::Cancelled) => self.report.cancelled += 1,
            Err(e) => self.fail(item, e),
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Outcome of a cached create-or-update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Upserted {
    pub id: RemoteId,
    pub change: Change,
}

/// State shared by every stage of one run.
///
/// The cache and the run's id registry sit behind mutexes so workers can
/// record results as soon as the remote confirms them.
pub(crate) struct StageContext<'a> {
    pub layout: &'a CourseLayout,
    pub course: &'a Course,
    pub renderer: &'a Renderer,
    pub client: &'a dyn LmsClient,
    pub options: &'a SyncOptions,
    pub cancel: &'a CancelToken,
    pub pool: &'a rayon::ThreadPool,
    cache: Mutex<ContentCache>,
    ids: Mutex<BTreeMap<String, RemoteId>>,
    bodies: Mutex<BTreeMap<PathBuf, String>>,
    failed: Mutex<BTreeSet<PathBuf>>,
    listings: Mutex<BTreeMap<RemoteKind, Vec<RemoteObject>>>,
    provisional: AtomicU64,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<'a> StageContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        layout: &'a CourseLayout,
        course: &'a Course,
        renderer: &'a Renderer,
        client: &'a dyn LmsClient,
        options: &'a SyncOptions,
        cancel: &'a CancelToken,
        pool: &'a rayon::ThreadPool,
        cache: ContentCache,
    ) -> Self {
        StageContext {
            layout,
            course,
            renderer,
            client,
            options,
            cancel,
            pool,
            cache: Mutex::new(cache),
            ids: Mutex::new(BTreeMap::new()),
            bodies: Mutex::new(BTreeMap::new()),
            failed: Mutex::new(BTreeSet::new()),
            listings: Mutex::new(BTreeMap::new()),
            provisional: AtomicU64::new(1),
        }
    }

    pub fn course_id(&self) -> &str {
        &self.options.course_id
    }

    pub fn dry_run(&self) -> bool {
        self.options.dry_run
    }

    pub fn into_cache(self) -> ContentCache {
        self.cache.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist the cache (no-op in dry runs).
    pub fn flush_cache(&self) -> Result<(), SyncError> {
        if self.dry_run() {
            return Ok(());
        }
        guard(&self.cache).save_at(&self.layout.cache_file())
    }

    // -- item bookkeeping ---------------------------------------------------

    pub fn mark_failed(&self, items: impl IntoIterator<Item = PathBuf>) {
        guard(&self.failed).extend(items);
    }

    pub fn has_failed(&self, item: &Path) -> bool {
        guard(&self.failed).contains(item)
    }

    pub fn store_body(&self, item: &Path, body: String) {
        guard(&self.bodies).insert(item.to_path_buf(), body);
    }

    /// Expanded body of `item`, rendering it now if the expansion stage did
    /// not cover it.
    pub fn body(&self, item: &ContentItem) -> Result<String, ItemError> {
        if let Some(body) = guard(&self.bodies).get(&item.logical_path) {
            return Ok(body.clone());
        }
        let expansion = self.renderer.render_body(item)?;
        self.store_body(&item.logical_path, expansion.text.clone());
        Ok(expansion.text)
    }

    /// Items of the course selected by `scope`, minus earlier failures.
    pub fn items_in(
        &self,
        scope: &StageScope,
        keep: impl Fn(&ContentItem) -> bool,
    ) -> Vec<&'a ContentItem> {
        self.course
            .items
            .iter()
            .filter(|i| scope.includes(&i.logical_path))
            .filter(|i| keep(i))
            .filter(|i| !self.has_failed(&i.logical_path))
            .collect()
    }

    // -- ids ----------------------------------------------------------------

    pub fn next_provisional(&self) -> RemoteId {
        RemoteId::provisional(self.provisional.fetch_add(1, Ordering::Relaxed))
    }

    /// Note an id produced (or planned) in this run.
    pub fn remember(&self, key: &str, id: RemoteId) {
        guard(&self.ids).insert(key.to_string(), id);
    }

    /// Id from this run, else the cache, without touching the remote.
    pub fn known(&self, key: &str) -> Option<RemoteId> {
        if let Some(id) = guard(&self.ids).get(key) {
            return Some(id.clone());
        }
        guard(&self.cache)
            .known_id(self.course_id(), key)
            .cloned()
    }

    /// [`StageContext::known`], falling back to a by-name remote listing.
    pub fn resolve_id(
        &self,
        kind: RemoteKind,
        key: &str,
        name: &str,
    ) -> Result<Option<RemoteId>, RemoteError> {
        if let Some(id) = self.known(key) {
            return Ok(Some(id));
        }
        let wanted = normalize_name(name);
        let found = self
            .listing(kind)?
            .into_iter()
            .find(|o| normalize_name(&o.name) == wanted)
            .map(|o| o.id);
        if let Some(id) = &found {
            self.remember(key, id.clone());
        }
        Ok(found)
    }

    /// Remote objects of `kind`, listed once per run.
    pub fn listing(&self, kind: RemoteKind) -> Result<Vec<RemoteObject>, RemoteError> {
        if let Some(cached) = guard(&self.listings).get(&kind) {
            return Ok(cached.clone());
        }
        let listed = self
            .options
            .retry
            .run(&format!("list {kind}"), || self.client.list(self.course_id(), kind))?;
        guard(&self.listings).insert(kind, listed.clone());
        Ok(listed)
    }

    pub fn forget_remote(&self, id: &RemoteId) {
        if !self.dry_run() {
            guard(&self.cache).forget_remote(self.course_id(), id);
        }
    }

    // -- cached writes ------------------------------------------------------

    /// Fingerprint-gated create-or-update.
    ///
    /// 1. Cache hit → unchanged, reuse the stored id.
    /// 2. Dry run → planned create/update with the known or a provisional id.
    /// 3. Write with the known id; a `NotFound` for it drops the stale entry
    ///    and retries as a create.
    /// 4. Record in the cache only after the remote confirmed.
    pub fn upsert(
        &self,
        kind: RemoteKind,
        key: &str,
        name: &str,
        payload: &Payload,
    ) -> Result<Upserted, ItemError> {
        let fp = fingerprint(payload);
        let hit = guard(&self.cache)
            .lookup(self.course_id(), key, &fp)
            .cloned();
        if let Some(id) = hit {
            self.remember(key, id.clone());
            return Ok(Upserted {
                id,
                change: Change::Unchanged,
            });
        }

        let known = self.known(key).filter(|id| !id.is_provisional());
        if self.dry_run() {
            let id = known.clone().unwrap_or_else(|| self.next_provisional());
            self.remember(key, id.clone());
            let change = if known.is_some() { Change::Updated } else { Change::Created };
            return Ok(Upserted { id, change });
        }
        if self.cancel.is_cancelled() {
            return Err(ItemError::Cancelled);
        }

        let what = format!("{kind} '{name}'");
        let write = |target: Option<&RemoteId>| {
            self.options.retry.run(&what, || {
                self.client
                    .create_or_update(self.course_id(), kind, name, target, payload)
            })
        };
        let (id, change) = match (write(known.as_ref()), known.as_ref()) {
            (Ok(id), Some(_)) => (id, Change::Updated),
            (Ok(id), None) => (id, Change::Created),
            (Err(e), Some(stale)) if e.is_not_found() => {
                tracing::warn!("{what}: cached id {stale} is gone remotely, recreating");
                guard(&self.cache).forget(self.course_id(), key);
                (write(None)?, Change::Created)
            }
            (Err(e), _) => return Err(e.into()),
        };

        guard(&self.cache).record(self.course_id(), key, &fp, id.clone());
        self.remember(key, id.clone());
        Ok(Upserted { id, change })
    }

    /// Cache hit check for writes that do not go through [`StageContext::upsert`].
    pub fn cached(&self, key: &str, fp: &str) -> Option<RemoteId> {
        guard(&self.cache).lookup(self.course_id(), key, fp).cloned()
    }

    pub fn record(&self, key: &str, fp: &str, id: RemoteId) {
        if !self.dry_run() {
            guard(&self.cache).record(self.course_id(), key, fp, id.clone());
        }
        self.remember(key, id);
    }

    // -- pool ---------------------------------------------------------------

    /// Run `work` for every element of `jobs` on the worker pool.
    ///
    /// The cancel token is checked before each job; results keep `jobs` order.
    pub fn run_jobs<T, P, F>(&self, jobs: &[T], path_of: P, work: F, run: &mut StageRun)
    where
        T: Sync,
        P: Fn(&T) -> PathBuf + Sync,
        F: Fn(&T) -> Result<Vec<Done>, ItemError> + Sync,
    {
        let results: Vec<(PathBuf, Result<Vec<Done>, ItemError>)> = self.pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let path = path_of(job);
                    if self.cancel.is_cancelled() {
                        return (path, Err(ItemError::Cancelled));
                    }
                    (path, work(job))
                })
                .collect()
        });
        for (path, result) in results {
            run.absorb(path, result);
        }
    }
}

/// Label used in plans and logs, e.g. `page 'Welcome'`.
pub(crate) fn target(kind: impl fmt::Display, name: &str) -> String {
    format!("{kind} '{name}'")
}
