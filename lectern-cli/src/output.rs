//! Terminal rendering of run summaries and validation reports.

use std::time::Duration;

use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use lectern_sync::{PlannedOp, RunSummary, Severity, StageReport, ValidationReport};

#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "stage")]
    stage: String,
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "updated")]
    updated: String,
    #[tabled(rename = "unchanged")]
    unchanged: String,
    #[tabled(rename = "deleted")]
    deleted: String,
    #[tabled(rename = "failed")]
    failed: String,
    #[tabled(rename = "time")]
    time: String,
}

impl StageRow {
    fn from_report(report: &StageReport) -> Self {
        if report.skipped_stage {
            let dash = || "·".to_string();
            return StageRow {
                stage: report.stage.to_string(),
                created: dash(),
                updated: dash(),
                unchanged: dash(),
                deleted: dash(),
                failed: dash(),
                time: "skipped".to_string(),
            };
        }
        StageRow {
            stage: report.stage.to_string(),
            created: report.created.to_string(),
            updated: report.updated.to_string(),
            unchanged: report.skipped.to_string(),
            deleted: report.deleted.to_string(),
            failed: report.failed.to_string(),
            time: format_duration(report.duration),
        }
    }
}

pub fn print_summary(summary: &RunSummary) {
    let prefix = if summary.dry_run { "[dry-run] " } else { "" };
    let headline = format!(
        "{prefix}course {} — {} change(s) in {}",
        summary.course_id,
        summary.mutations(),
        format_duration(summary.duration)
    );
    if summary.has_failures() {
        println!("{} {headline}, {} failure(s)", "✗".red().bold(), summary.failures.len());
    } else if summary.interrupted {
        println!("{} {headline} (interrupted)", "!".yellow().bold());
    } else {
        println!("{} {headline}", "✓".green().bold());
    }

    let rows: Vec<StageRow> = summary.stages.iter().map(StageRow::from_report).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for stage in &summary.stages {
        for action in &stage.planned {
            let glyph = match action.op {
                PlannedOp::Delete | PlannedOp::RemoveFromModule => "-".red().to_string(),
                PlannedOp::Write => "✎".to_string(),
                PlannedOp::Create | PlannedOp::Update => "~".to_string(),
            };
            println!("  {glyph}  [{}] {} {}", stage.stage, action.op, action.target);
        }
        for diff in &stage.diffs {
            println!("{}", format!("--- {}", diff.path.display()).bold());
            print_diff(&diff.unified_diff);
        }
    }

    for failure in &summary.failures {
        println!(
            "  {}  [{}] {}: {}",
            "✗".red(),
            failure.stage,
            failure.item.display(),
            failure.error
        );
    }
    if summary.interrupted {
        println!(
            "{}",
            "Run was interrupted; the next sync picks up the remaining work.".yellow()
        );
    }
}

fn print_diff(diff: &str) {
    for line in diff.lines() {
        if line.starts_with('+') && !line.starts_with("+++") {
            println!("{}", line.green());
        } else if line.starts_with('-') && !line.starts_with("---") {
            println!("{}", line.red());
        } else {
            println!("{line}");
        }
    }
}

#[derive(Tabled)]
struct IssueRow {
    #[tabled(rename = "severity")]
    severity: String,
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "message")]
    message: String,
}

pub fn print_validation(report: &ValidationReport) {
    if report.issues.is_empty() {
        println!(
            "{} {} item(s) checked, no issues",
            "✓".green().bold(),
            report.items_checked
        );
        return;
    }

    let rows: Vec<IssueRow> = report
        .issues
        .iter()
        .map(|issue| IssueRow {
            severity: severity_label(issue.severity),
            file: issue.file.display().to_string(),
            message: match &issue.suggestion {
                Some(hint) => format!("{}\n→ {hint}", issue.message),
                None => issue.message.clone(),
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let errors = report.count(Severity::Error);
    let line = format!(
        "{} item(s) checked: {} error(s), {} warning(s), {} note(s)",
        report.items_checked,
        errors,
        report.count(Severity::Warning),
        report.count(Severity::Info)
    );
    if errors > 0 {
        println!("{} {line}", "✗".red().bold());
    } else {
        println!("{} {line}", "✓".green().bold());
    }
}

fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Error => "error".red().bold().to_string(),
        Severity::Warning => "warning".yellow().to_string(),
        Severity::Info => "info".bright_black().to_string(),
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 60 {
        format!("{}m{:02}s", duration.as_secs() / 60, duration.as_secs() % 60)
    } else if duration.as_millis() >= 1000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_pick_a_readable_unit() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
    }
}
