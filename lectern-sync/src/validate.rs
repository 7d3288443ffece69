//! Offline course validation: everything `sync` would check, no remote calls
//! and no writes.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use lectern_core::course::{load_course, load_outcomes, Course};
use lectern_core::layout::CourseLayout;
use lectern_core::types::{normalize_name, ContentKind};
use lectern_template::Renderer;

use crate::payload::file_payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        })
    }
}

/// One finding, tied to the file a fix belongs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub file: PathBuf,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub items_checked: usize,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    fn push(&mut self, severity: Severity, file: impl Into<PathBuf>, message: impl Into<String>) {
        self.issues.push(Issue {
            severity,
            file: file.into(),
            message: message.into(),
            suggestion: None,
        });
    }

    fn suggest(&mut self, suggestion: impl Into<String>) {
        if let Some(last) = self.issues.last_mut() {
            last.suggestion = Some(suggestion.into());
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn exit_code(&self) -> u8 {
        u8::from(self.has_errors())
    }
}

/// Validate the course rooted at `layout`.
pub fn validate(layout: &CourseLayout) -> ValidationReport {
    let mut report = ValidationReport::default();

    let course = match load_course(layout) {
        Ok(course) => course,
        Err(e) => {
            report.push(Severity::Error, layout.content_dir(), e.to_string());
            return report;
        }
    };
    report.items_checked = course.items.len() + course.load_failures.len();
    for failure in &course.load_failures {
        report.push(Severity::Error, failure.logical_path.join("index.md"), failure.error.clone());
    }
    if course.items.is_empty() {
        report.push(Severity::Info, layout.content_dir(), "course has no content items");
    }

    let outcome_codes = check_outcomes(layout, &mut report);
    match Renderer::load(layout) {
        Ok(renderer) => check_items(&course, &renderer, &outcome_codes, &mut report),
        Err(e) => report.push(Severity::Error, layout.root(), e.to_string()),
    }
    check_modules(layout, &course, &mut report);
    check_banks(&course, &mut report);

    report.issues.sort_by(|a, b| (a.severity, &a.file).cmp(&(b.severity, &b.file)));
    tracing::debug!(
        "validated {} item(s): {} error(s), {} warning(s)",
        report.items_checked,
        report.count(Severity::Error),
        report.count(Severity::Warning)
    );
    report
}

fn check_items(
    course: &Course,
    renderer: &Renderer,
    outcome_codes: &BTreeSet<String>,
    report: &mut ValidationReport,
) {
    for item in &course.items {
        let file = item.logical_path.join("index.md");
        match renderer.render_body(item) {
            Ok(expansion) => {
                for key in &expansion.unresolved_vars {
                    report.push(Severity::Warning, &file, format!("unresolved variable '{key}'"));
                    report.suggest(format!("define '{key}' in frontmatter or shared/variables.yaml"));
                }
                for name in &expansion.missing_includes {
                    report.push(Severity::Warning, &file, format!("include '{name}' not found"));
                }
            }
            Err(e) => report.push(Severity::Error, &file, e.to_string()),
        }

        match item.kind {
            ContentKind::Link if item.frontmatter.external_url.is_none() => {
                report.push(Severity::Error, &file, "link has no external_url");
            }
            ContentKind::File => {
                if let Err(e) = file_payload(item) {
                    report.push(Severity::Error, &file, e.to_string());
                    report.suggest("set `filename` or keep exactly one attachment in the folder");
                }
            }
            ContentKind::Assignment => match renderer.rubric(item) {
                Ok(Some(rubric)) => {
                    if rubric.criteria.is_empty() {
                        report.push(Severity::Warning, &file, format!("rubric '{}' has no criteria", rubric.title));
                    }
                    for code in rubric.criteria.iter().filter_map(|c| c.outcome_code.as_deref()) {
                        if !outcome_codes.contains(code.trim()) {
                            report.push(
                                Severity::Warning,
                                &file,
                                format!("rubric criterion refers to unknown outcome '{code}'"),
                            );
                            report.suggest("add the outcome to outcomes/outcomes.yaml");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => report.push(Severity::Error, &file, e.to_string()),
            },
            _ => {}
        }
        if item.module_memberships.is_empty() && item.kind != ContentKind::File {
            report.push(Severity::Info, &file, "item is not placed in any module");
        }
    }
}

fn check_outcomes(layout: &CourseLayout, report: &mut ValidationReport) -> BTreeSet<String> {
    let file = layout.relative(&layout.outcomes_file()).unwrap_or_else(|| layout.outcomes_file());
    let outcomes = match load_outcomes(layout) {
        Ok(outcomes) => outcomes,
        Err(e) => {
            report.push(Severity::Error, &file, e.to_string());
            return BTreeSet::new();
        }
    };
    let mut codes = BTreeSet::new();
    for outcome in &outcomes {
        let code = outcome.code.trim();
        if code.is_empty() {
            report.push(Severity::Error, &file, format!("outcome '{}' has no code", outcome.title));
            continue;
        }
        if !codes.insert(code.to_string()) {
            report.push(Severity::Error, &file, format!("duplicate outcome code '{code}'"));
        }
        if outcome.title.trim().is_empty() {
            report.push(Severity::Error, &file, format!("outcome '{code}' has no title"));
        }
    }
    codes
}

fn check_modules(layout: &CourseLayout, course: &Course, report: &mut ValidationReport) {
    let file = layout
        .relative(&layout.module_order_file())
        .unwrap_or_else(|| layout.module_order_file());
    let mut seen = BTreeSet::new();
    for name in &course.module_order {
        if !seen.insert(normalize_name(name)) {
            report.push(Severity::Warning, &file, format!("module '{name}' listed twice"));
        }
    }
    for module in course.modules() {
        if module.members.is_empty() {
            report.push(
                Severity::Info,
                &file,
                format!("module '{}' is empty (kept because it is listed)", module.name),
            );
        }
    }
}

fn check_banks(course: &Course, report: &mut ValidationReport) {
    let local: BTreeSet<String> = course.banks.iter().map(|b| normalize_name(&b.name)).collect();
    for quiz in course.items.iter().filter(|i| i.kind == ContentKind::Quiz) {
        let file = quiz.logical_path.join("index.md");
        for group in &quiz.frontmatter.question_groups {
            if group.pick == 0 {
                report.push(Severity::Error, &file, format!("question group '{}' picks 0 questions", group.bank));
            }
            if !local.contains(&normalize_name(&group.bank)) {
                report.push(
                    Severity::Warning,
                    &file,
                    format!("question bank '{}' is not in quiz-banks/", group.bank),
                );
                report.suggest("the bank must already exist remotely or be added locally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write(root: &std::path::Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, text).expect("write");
    }

    fn layout(tmp: &TempDir) -> CourseLayout {
        CourseLayout::new(tmp.path().join("course")).with_global_root(tmp.path().join("global"))
    }

    #[test]
    fn clean_course_has_no_errors() {
        let tmp = TempDir::new().expect("tmp");
        write(
            &tmp.path().join("course"),
            "content/01-Week 1.module/intro.page/index.md",
            "---\nname: Intro\n---\nHello {{var:name}}\n",
        );
        let report = validate(&layout(&tmp));
        assert!(!report.has_errors(), "{:?}", report.issues);
        assert_eq!(report.items_checked, 1);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn unresolved_variable_is_a_warning_with_suggestion() {
        let tmp = TempDir::new().expect("tmp");
        write(
            &tmp.path().join("course"),
            "content/01-Week 1.module/intro.page/index.md",
            "---\nname: Intro\n---\nDue {{var:deadline}}\n",
        );
        let report = validate(&layout(&tmp));
        let issue = report
            .issues
            .iter()
            .find(|i| i.message.contains("deadline"))
            .expect("warning for deadline");
        assert_eq!(issue.severity, Severity::Warning);
        assert!(issue.suggestion.is_some());
        assert!(!report.has_errors());
    }

    #[test]
    fn duplicate_outcome_codes_are_errors() {
        let tmp = TempDir::new().expect("tmp");
        write(
            &tmp.path().join("course"),
            "outcomes/outcomes.yaml",
            "course_outcomes:\n  - code: LO1\n    title: One\n  - code: LO1\n    title: Again\n",
        );
        let report = validate(&layout(&tmp));
        assert!(report.has_errors());
        assert!(report.issues.iter().any(|i| i.message.contains("duplicate outcome code 'LO1'")));
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn unparsable_item_is_an_error_and_the_rest_is_checked() {
        let tmp = TempDir::new().expect("tmp");
        let root = tmp.path().join("course");
        write(&root, "content/good.page/index.md", "---\nname: Good\n---\nBody\n");
        write(&root, "content/typo.page/index.md", "---\nposition: [oops]\n---\nBody\n");
        let report = validate(&layout(&tmp));
        assert_eq!(report.items_checked, 2);
        let errors: Vec<&Issue> =
            report.issues.iter().filter(|i| i.severity == Severity::Error).collect();
        assert_eq!(errors.len(), 1, "{:?}", report.issues);
        assert_eq!(errors[0].file, std::path::PathBuf::from("content/typo.page/index.md"));
    }

    #[test]
    fn link_without_url_is_an_error() {
        let tmp = TempDir::new().expect("tmp");
        write(
            &tmp.path().join("course"),
            "content/01-Week 1.module/docs.link/index.md",
            "---\nname: Docs\n---\n",
        );
        let report = validate(&layout(&tmp));
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == Severity::Error && i.message.contains("external_url")));
    }

    #[test]
    fn unknown_bank_reference_is_a_warning() {
        let tmp = TempDir::new().expect("tmp");
        write(
            &tmp.path().join("course"),
            "content/01-Week 1.module/check.quiz/index.md",
            "---\nname: Check\nquestion_groups:\n  - bank: Week 1 Bank\n    pick: 2\n---\n",
        );
        let report = validate(&layout(&tmp));
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == Severity::Warning && i.message.contains("Week 1 Bank")));
        assert!(!report.has_errors());
    }
}
