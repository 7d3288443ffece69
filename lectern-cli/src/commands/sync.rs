//! `lectern sync`: expand, publish and reconcile the course.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use lectern_changes::ChangeSet;
use lectern_core::config::{save_defaults, CourseDefaults, CourseIdSource};
use lectern_sync::pipeline::{self, CancelToken, SyncOptions};
use lectern_watch::WatchConfig;

use crate::commands::OpenCourse;
use crate::output::print_summary;
use crate::GlobalArgs;

/// Arguments for `lectern sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Report what would change without touching the LMS or work artifacts.
    #[arg(long)]
    pub dry_run: bool,

    /// With --dry-run, print unified diffs of the expanded sources.
    #[arg(long, requires = "dry_run")]
    pub diff: bool,

    /// Keep running and sync after every change to the course folder.
    #[arg(long, conflicts_with = "dry_run")]
    pub watch: bool,

    /// Leave remote content that is no longer declared locally.
    #[arg(long, visible_alias = "no-prune")]
    pub skip_prune: bool,

    /// Only upload `.file` items.
    #[arg(long)]
    pub assets_only: bool,

    /// Remote course id (wins over environment and config files).
    #[arg(long)]
    pub course_id: Option<String>,
}

impl SyncArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<u8> {
        let course = OpenCourse::open(global)?;
        let (course_id, source) = course.course_id(self.course_id.as_deref())?;
        tracing::debug!("course id {course_id} ({source:?})");

        let mut options = SyncOptions::from_settings(&course_id, &course.settings);
        options.dry_run = self.dry_run;
        options.diff = self.diff;
        options.skip_prune = self.skip_prune;
        options.assets_only = self.assets_only;
        options.command = if self.watch { "lectern sync --watch" } else { "lectern sync" }.to_string();
        if let Some(changes) = ChangeSet::from_env(course.layout.root()) {
            tracing::info!("using change list from the environment");
            options.change_set = changes;
        }
        let client = course.client()?;

        if source == CourseIdSource::Flag && !self.dry_run {
            save_defaults(
                &course.layout,
                &CourseDefaults {
                    course_id: Some(course_id.clone()),
                },
            )
            .context("failed to store the course id default")?;
        }

        if self.watch {
            let config = WatchConfig::new(course.settings.debounce);
            let report =
                lectern_watch::watch_blocking(course.layout, Arc::new(client), options, config)
                    .context("watch failed")?;
            println!("✓ watch stopped after {} run(s)", report.runs);
            return Ok(report.exit_code());
        }

        let summary = pipeline::run(&course.layout, &client, &options, &CancelToken::new())
            .with_context(|| format!("sync failed for course {course_id}"))?;
        print_summary(&summary);
        Ok(summary.exit_code())
    }
}
