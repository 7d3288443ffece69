use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use lectern_changes::{classify, scan_modified_since, ChangeSet, PathClass};
use lectern_core::layout::CourseLayout;
use lectern_sync::pipeline::{self, CancelToken, SyncOptions};
use lectern_sync::{LmsClient, RunSummary, WatchState};

use crate::batch::Batcher;
use crate::error::{io_err, WatchError};

/// Knobs for one watch session.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Quiet period after the last event before a batch runs.
    pub debounce: Duration,
    /// Run once at startup over everything modified since the last clean run.
    pub catch_up: bool,
    /// Ceiling for the delay before a fatally failed batch is retried.
    pub max_retry_delay: Duration,
}

impl WatchConfig {
    pub fn new(debounce: Duration) -> Self {
        WatchConfig {
            debounce,
            catch_up: true,
            max_retry_delay: Duration::from_secs(300),
        }
    }
}

/// What a watch session did before it stopped.
#[derive(Debug, Default)]
pub struct WatchReport {
    pub runs: u64,
    /// Runs that ended in a fatal error (lock contention, unreadable course).
    pub failed_runs: u64,
    pub last: Option<RunSummary>,
    last_fatal: bool,
    /// Fatal runs since the last run that completed.
    consecutive_fatal: u32,
}

impl WatchReport {
    /// Exit code of the most recent run.
    pub fn exit_code(&self) -> u8 {
        if self.last_fatal {
            return 1;
        }
        self.last.as_ref().map_or(0, RunSummary::exit_code)
    }
}

struct Finished {
    changes: ChangeSet,
    result: Result<RunSummary, WatchError>,
}

/// Build a runtime and block the current thread until the watch stops.
pub fn watch_blocking(
    layout: CourseLayout,
    client: Arc<dyn LmsClient>,
    options: SyncOptions,
    config: WatchConfig,
) -> Result<WatchReport, WatchError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(watch(layout, client, options, config))
}

/// Watch the course tree and sync every debounced batch of changes until
/// Ctrl-C.
pub async fn watch(
    layout: CourseLayout,
    client: Arc<dyn LmsClient>,
    options: SyncOptions,
    config: WatchConfig,
) -> Result<WatchReport, WatchError> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
    let _watcher = start_watcher(&layout, event_tx)?;
    tracing::info!(
        root = %layout.root().display(),
        debounce_ms = config.debounce.as_millis() as u64,
        "watching course",
    );

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received ctrl-c, cancelling the current run"),
            Err(err) => {
                tracing::warn!(error = %err, "ctrl-c handler failed");
                std::future::pending::<()>().await;
            }
        }
    };
    drive(layout, client, options, config, event_rx, shutdown).await
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Core loop, independent of notify and signals.
///
/// - `events` carries raw changed paths; irrelevant ones are dropped here.
/// - `shutdown` completing cancels the in-flight run between items and
///   stops once it returns. Pending changes are left for the next catch-up.
/// - `events` closing runs whatever is pending without waiting out the quiet
///   period, then stops.
pub(crate) async fn drive<S>(
    layout: CourseLayout,
    client: Arc<dyn LmsClient>,
    options: SyncOptions,
    config: WatchConfig,
    mut events: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    shutdown: S,
) -> Result<WatchReport, WatchError>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut batcher = Batcher::new(config.debounce);
    let mut report = WatchReport::default();
    let cancel = CancelToken::new();
    let (done_tx, mut done_rx) = mpsc::channel::<Finished>(1);
    let mut stopping = false;
    let mut draining = false;

    if config.catch_up {
        let changes = catch_up_changes(&layout)?;
        if !changes.is_empty() {
            tracing::info!(changes = %describe(&changes), "catching up on changes made while not watching");
        }
        batcher.push_now(changes, Instant::now());
    }

    loop {
        if stopping && !batcher.is_running() {
            break;
        }
        if draining && !batcher.is_running() && !batcher.has_pending() {
            break;
        }
        let deadline = batcher.deadline();

        tokio::select! {
            biased;

            _ = &mut shutdown, if !stopping => {
                stopping = true;
                cancel.cancel();
            }
            finished = done_rx.recv(), if batcher.is_running() => {
                let Some(finished) = finished else { break };
                batcher.finish();
                if let Err(changes) = record(&mut report, finished) {
                    if !draining && !stopping {
                        let delay = retry_delay(
                            config.debounce,
                            report.consecutive_fatal,
                            config.max_retry_delay,
                        );
                        tracing::warn!(
                            attempt = report.consecutive_fatal,
                            retry_in_ms = delay.as_millis() as u64,
                            "retrying the batch; an edit retries sooner",
                        );
                        batcher.push_after(changes, Instant::now(), delay);
                    }
                }
                if draining {
                    batcher.flush(Instant::now());
                }
            }
            paths = events.recv(), if !stopping && !draining => {
                match paths {
                    Some(paths) => {
                        let relevant = relevant_paths(&layout, paths);
                        if !relevant.is_empty() {
                            tracing::debug!(count = relevant.len(), "change event");
                            batcher.push(ChangeSet::from_paths(relevant), Instant::now());
                        }
                    }
                    None => {
                        draining = true;
                        batcher.flush(Instant::now());
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() && !stopping => {
                if let Some(changes) = batcher.start() {
                    spawn_run(&layout, &client, &options, &cancel, changes, done_tx.clone());
                }
            }
            else => break,
        }
    }

    tracing::info!(runs = report.runs, failed_runs = report.failed_runs, "watch stopped");
    Ok(report)
}

fn spawn_run(
    layout: &CourseLayout,
    client: &Arc<dyn LmsClient>,
    options: &SyncOptions,
    cancel: &CancelToken,
    changes: ChangeSet,
    done: mpsc::Sender<Finished>,
) {
    tracing::info!(changes = %describe(&changes), "starting sync");
    let layout = layout.clone();
    let client = Arc::clone(client);
    let cancel = cancel.clone();
    let mut options = options.clone();
    options.change_set = changes.clone();

    tokio::spawn(async move {
        let job = tokio::task::spawn_blocking(move || {
            pipeline::run(&layout, client.as_ref(), &options, &cancel)
        });
        let result = match job.await {
            Ok(result) => result.map_err(WatchError::from),
            Err(err) => Err(WatchError::Join(err.to_string())),
        };
        let _ = done.send(Finished { changes, result }).await;
    });
}

/// Fold a finished run into the report; a fatal error hands back its
/// change set so the batch can be retried.
fn record(report: &mut WatchReport, finished: Finished) -> Result<(), ChangeSet> {
    report.runs += 1;
    match finished.result {
        Ok(summary) => {
            log_summary(&summary);
            report.last_fatal = false;
            report.consecutive_fatal = 0;
            report.last = Some(summary);
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, "sync failed");
            report.failed_runs += 1;
            report.last_fatal = true;
            report.consecutive_fatal += 1;
            Err(finished.changes)
        }
    }
}

/// Quiet period doubled per consecutive fatal run, capped at `max`.
fn retry_delay(quiet: Duration, attempt: u32, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    quiet.saturating_mul(factor).min(max)
}

fn log_summary(summary: &RunSummary) {
    let duration_ms = summary.duration.as_millis() as u64;
    if summary.has_failures() || summary.interrupted {
        for failure in &summary.failures {
            tracing::warn!(
                item = %failure.item.display(),
                stage = %failure.stage,
                error = %failure.error,
                "item failed",
            );
        }
        tracing::warn!(
            mutations = summary.mutations(),
            failed = summary.failures.len(),
            interrupted = summary.interrupted,
            duration_ms,
            "sync finished with problems",
        );
    } else {
        tracing::info!(mutations = summary.mutations(), duration_ms, "sync completed");
    }
}

// ---------------------------------------------------------------------------
// Change sources
// ---------------------------------------------------------------------------

/// Everything modified since the last clean run, or the whole course when
/// there never was one.
fn catch_up_changes(layout: &CourseLayout) -> Result<ChangeSet, WatchError> {
    let state = WatchState::load_at(&layout.watch_state_file())?;
    match state.last_run_system_time() {
        None => Ok(ChangeSet::Full),
        Some(since) => Ok(ChangeSet::from_paths(scan_modified_since(layout, since)?)),
    }
}

fn relevant_paths(layout: &CourseLayout, paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths
        .into_iter()
        .filter(|path| !matches!(classify(layout, path), PathClass::Ignored | PathClass::Outside))
        .collect()
}

fn describe(changes: &ChangeSet) -> String {
    match changes {
        ChangeSet::Full => "full".to_string(),
        ChangeSet::Paths(paths) => format!("{} path(s)", paths.len()),
    }
}

/// Watched directory as notify reports it, and as the layout names it.
#[derive(Debug, Clone)]
struct Rebase {
    real: PathBuf,
    logical: PathBuf,
}

fn start_watcher(
    layout: &CourseLayout,
    tx: mpsc::UnboundedSender<Vec<PathBuf>>,
) -> Result<RecommendedWatcher, WatchError> {
    let mut roots = vec![layout.root().to_path_buf()];
    let global = layout.global_root();
    if global.is_dir() && !global.starts_with(layout.root()) {
        roots.push(global.to_path_buf());
    }

    // Events arrive with resolved paths (e.g. /private/var/... on macOS).
    let mut bases = Vec::with_capacity(roots.len());
    for root in &roots {
        let real = std::fs::canonicalize(root).map_err(|e| io_err(root, e))?;
        bases.push(Rebase {
            real,
            logical: root.clone(),
        });
    }

    let mut watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
        Ok(event) => {
            let paths = event_paths(&event, &bases);
            if !paths.is_empty() {
                let _ = tx.send(paths);
            }
        }
        Err(err) => tracing::warn!(error = %err, "watcher event error"),
    })?;
    for root in &roots {
        watcher.watch(root, RecursiveMode::Recursive)?;
    }
    Ok(watcher)
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        _ => false,
    }
}

fn event_paths(event: &Event, bases: &[Rebase]) -> Vec<PathBuf> {
    if !is_relevant_event_kind(&event.kind) {
        return Vec::new();
    }
    event.paths.iter().map(|path| rebase(path, bases)).collect()
}

fn rebase(path: &Path, bases: &[Rebase]) -> PathBuf {
    bases
        .iter()
        .find_map(|base| {
            path.strip_prefix(&base.real)
                .ok()
                .map(|rest| base.logical.join(rest))
        })
        .unwrap_or_else(|| path.to_path_buf())
}
