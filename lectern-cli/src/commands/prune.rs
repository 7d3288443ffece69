//! `lectern prune`: remove remote content no longer declared locally.

use anyhow::{Context, Result};
use clap::Args;

use lectern_sync::pipeline::{self, CancelToken, SyncOptions};

use crate::commands::OpenCourse;
use crate::output::print_summary;
use crate::GlobalArgs;

/// Arguments for `lectern prune`.
#[derive(Args, Debug)]
pub struct PruneArgs {
    /// List what would be deleted without deleting it.
    #[arg(long)]
    pub dry_run: bool,

    /// Never delete remote assignments.
    #[arg(long)]
    pub skip_assignments: bool,

    /// Remote course id (wins over environment and config files).
    #[arg(long)]
    pub course_id: Option<String>,
}

impl PruneArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<u8> {
        let course = OpenCourse::open(global)?;
        let (course_id, _) = course.course_id(self.course_id.as_deref())?;

        let mut options = SyncOptions::from_settings(&course_id, &course.settings).prune_only();
        options.dry_run = self.dry_run;
        if self.skip_assignments {
            options.prune.assignments = false;
        }
        options.command = "lectern prune".to_string();
        if !options.prune.apply && !self.dry_run {
            println!("prune.apply is off: reporting only");
        }
        let client = course.client()?;

        let summary = pipeline::run(&course.layout, &client, &options, &CancelToken::new())
            .with_context(|| format!("prune failed for course {course_id}"))?;
        print_summary(&summary);
        Ok(summary.exit_code())
    }
}
