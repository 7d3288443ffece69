//! `lectern list`: the content items of the course folder, by kind.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use lectern_core::{load_course, normalize_name, ContentItem, ContentKind, Course};

use crate::commands::OpenCourse;
use crate::GlobalArgs;

/// Arguments for `lectern list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only list items of this kind.
    #[arg(long, value_enum)]
    pub kind: Option<KindFilter>,

    /// Only list members of this module.
    #[arg(long, value_name = "NAME")]
    pub module: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Page,
    Assignment,
    Quiz,
    Link,
    File,
}

impl From<KindFilter> for ContentKind {
    fn from(filter: KindFilter) -> Self {
        match filter {
            KindFilter::Page => ContentKind::Page,
            KindFilter::Assignment => ContentKind::Assignment,
            KindFilter::Quiz => ContentKind::Quiz,
            KindFilter::Link => ContentKind::Link,
            KindFilter::File => ContentKind::File,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct ListedItem {
    kind: ContentKind,
    name: String,
    modules: Vec<String>,
    published: bool,
    path: String,
}

#[derive(Debug, Serialize)]
struct ListReport {
    items: Vec<ListedItem>,
    unreadable: Vec<String>,
}

#[derive(Tabled)]
struct ListRow {
    kind: String,
    name: String,
    modules: String,
    published: String,
    path: String,
}

impl ListArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<u8> {
        let course = OpenCourse::open(global)?;
        let loaded = load_course(&course.layout).with_context(|| {
            format!("failed to load course at {}", course.layout.root().display())
        })?;
        let report = ListReport {
            items: select(&loaded, self.kind.map(ContentKind::from), self.module.as_deref()),
            unreadable: loaded
                .load_failures
                .iter()
                .map(|f| format!("{}: {}", f.logical_path.display(), f.error))
                .collect(),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize item list")?
            );
        } else {
            print_table(&report);
        }
        Ok(0)
    }
}

/// Items matching the filters, ordered by kind then name.
fn select(course: &Course, kind: Option<ContentKind>, module: Option<&str>) -> Vec<ListedItem> {
    let module = module.map(normalize_name);
    let mut items: Vec<ListedItem> = course
        .items
        .iter()
        .filter(|item| kind.map_or(true, |k| item.kind == k))
        .filter(|item| {
            module.as_deref().map_or(true, |wanted| {
                item.module_memberships
                    .iter()
                    .any(|m| normalize_name(&m.module) == wanted)
            })
        })
        .map(listed)
        .collect();
    items.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
    items
}

fn listed(item: &ContentItem) -> ListedItem {
    ListedItem {
        kind: item.kind,
        name: item.declared_name.clone(),
        modules: item
            .module_memberships
            .iter()
            .map(|m| m.module.clone())
            .collect(),
        published: item.frontmatter.published.unwrap_or(true),
        path: item.logical_path.display().to_string(),
    }
}

fn print_table(report: &ListReport) {
    if report.items.is_empty() {
        println!("{}", "no matching items".dimmed());
    } else {
        let rows: Vec<ListRow> = report
            .items
            .iter()
            .map(|item| ListRow {
                kind: item.kind.to_string(),
                name: item.name.clone(),
                modules: item.modules.join(", "),
                published: if item.published { "yes" } else { "no" }.to_string(),
                path: item.path.clone(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        println!("{} item(s)", report.items.len());
    }
    for failure in &report.unreadable {
        println!("{} {failure}", "unreadable:".yellow());
    }
}
