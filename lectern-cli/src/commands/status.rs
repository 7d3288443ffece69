//! `lectern status`: course id resolution, last run and cache size.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use lectern_core::config::CourseIdSource;
use lectern_sync::{ContentCache, WatchState};

use crate::commands::OpenCourse;
use crate::GlobalArgs;

/// Arguments for `lectern status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    course_root: String,
    course_id: Option<String>,
    course_id_source: Option<CourseIdSource>,
    last_run_at: Option<DateTime<Utc>>,
    run_count: u64,
    cache_entries: usize,
    prune_apply: bool,
    prune_assignments: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "setting")]
    key: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

impl StatusArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<u8> {
        let course = OpenCourse::open(global)?;
        let layout = &course.layout;
        let state = WatchState::load_at(&layout.watch_state_file())
            .context("failed to read watch state")?;
        let cache = ContentCache::load_at(&layout.cache_file()).context("failed to read cache")?;
        let resolved = course.settings.course_id.clone();

        let report = StatusReport {
            course_root: layout.root().display().to_string(),
            course_id: resolved.as_ref().map(|(id, _)| id.clone()),
            course_id_source: resolved.map(|(_, source)| source),
            last_run_at: state.last_run_at,
            run_count: state.run_count,
            cache_entries: cache.len(),
            prune_apply: course.settings.prune.apply,
            prune_assignments: course.settings.prune.assignments,
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
        } else {
            print_table(&report, Utc::now());
        }
        Ok(0)
    }
}

fn print_table(report: &StatusReport, now: DateTime<Utc>) {
    println!("Lectern v{} | {}", env!("CARGO_PKG_VERSION"), report.course_root);
    let course_id = match (&report.course_id, report.course_id_source) {
        (Some(id), Some(source)) => format!("{id} (from {})", source_label(source)),
        _ => "not set".yellow().to_string(),
    };
    let last_run = match report.last_run_at {
        Some(at) => format!("{} ({})", format_age(at, now), at.to_rfc3339()),
        None => "never".to_string(),
    };
    let rows = vec![
        StatusRow {
            key: "course id",
            value: course_id,
        },
        StatusRow {
            key: "last clean run",
            value: last_run,
        },
        StatusRow {
            key: "runs",
            value: report.run_count.to_string(),
        },
        StatusRow {
            key: "cache entries",
            value: report.cache_entries.to_string(),
        },
        StatusRow {
            key: "prune",
            value: match (report.prune_apply, report.prune_assignments) {
                (false, _) => "report only".to_string(),
                (true, true) => "apply (assignments included)".to_string(),
                (true, false) => "apply (assignments kept)".to_string(),
            },
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn source_label(source: CourseIdSource) -> &'static str {
    match source {
        CourseIdSource::Flag => "--course-id",
        CourseIdSource::Env => "LECTERN_COURSE_ID",
        CourseIdSource::CourseConfig => "lectern.yaml",
        CourseIdSource::StoredDefault => "stored default",
        CourseIdSource::UserConfig => "~/.lectern/config.yaml",
    }
}

fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn ages_round_down_to_the_largest_unit() {
        let now = Utc::now();
        assert_eq!(format_age(now, now), "just now");
        assert_eq!(format_age(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(format_age(now - Duration::hours(30), now), "1d ago");
        assert_eq!(format_age(now + Duration::minutes(5), now), "just now");
    }
}
