//! Domain types for a file-based course.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Frontmatter is a typed record with an `extra` bag for keys the engine does
//! not interpret; the bag is passed through verbatim to remote payloads.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The kind of remote object a content item folder maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Page,
    Assignment,
    Quiz,
    Link,
    File,
}

impl ContentKind {
    /// Every kind, in publish order.
    pub const ALL: [ContentKind; 5] = [
        ContentKind::Page,
        ContentKind::Assignment,
        ContentKind::Quiz,
        ContentKind::Link,
        ContentKind::File,
    ];

    /// Folder-name suffix (without the dot) that tags a directory as this kind.
    pub fn suffix(self) -> &'static str {
        match self {
            ContentKind::Page => "page",
            ContentKind::Assignment => "assignment",
            ContentKind::Quiz => "quiz",
            ContentKind::Link => "link",
            ContentKind::File => "file",
        }
    }

    /// Classify a directory name such as `01-welcome.page`.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let (stem, suffix) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        ContentKind::ALL
            .into_iter()
            .find(|kind| kind.suffix().eq_ignore_ascii_case(suffix))
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Pipeline stages in their fixed execution order.
///
/// The derived `Ord` follows declaration order, which is the run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Expand,
    Publish,
    Banks,
    Quizzes,
    Modules,
    Outcomes,
    Rubrics,
    Prune,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Expand,
        Stage::Publish,
        Stage::Banks,
        Stage::Quizzes,
        Stage::Modules,
        Stage::Outcomes,
        Stage::Rubrics,
        Stage::Prune,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Expand => "expand",
            Stage::Publish => "publish",
            Stage::Banks => "banks",
            Stage::Quizzes => "quizzes",
            Stage::Modules => "modules",
            Stage::Outcomes => "outcomes",
            Stage::Rubrics => "rubrics",
            Stage::Prune => "prune",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Frontmatter
// ---------------------------------------------------------------------------

/// One question group of a quiz, drawing `pick` questions from a bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionGroup {
    pub bank: String,
    #[serde(default = "default_pick")]
    pub pick: u32,
    #[serde(default)]
    pub points_per_question: f64,
}

fn default_pick() -> u32 {
    1
}

/// Typed view of an item's `index.md` frontmatter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
    /// Single-module shorthand; merged into `modules` by the loader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_possible: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tab: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_rubric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub question_groups: Vec<QuestionGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_attempts: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_answers: Option<bool>,
    /// Unrecognised keys, passed through verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Frontmatter {
    /// Look up a frontmatter key for `{{var:key}}` substitution.
    ///
    /// Scalars are rendered as plain text; sequences and mappings are not
    /// substitutable and yield `None`.
    pub fn variable(&self, key: &str) -> Option<String> {
        match key {
            "name" => self.name.clone(),
            "due_at" => self.due_at.clone(),
            "unlock_at" => self.unlock_at.clone(),
            "lock_at" => self.lock_at.clone(),
            "external_url" => self.external_url.clone(),
            "filename" => self.filename.clone(),
            "points_possible" => self.points_possible.map(format_number),
            "time_limit" => self.time_limit.map(|v| v.to_string()),
            _ => self.extra.get(key).and_then(scalar_text),
        }
    }
}

/// Render a JSON scalar as substitution text.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

// ---------------------------------------------------------------------------
// Content items and modules
// ---------------------------------------------------------------------------

/// Placement of an item inside one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMembership {
    pub module: String,
    pub indent: u32,
}

/// Ordering key of an item inside its modules.
///
/// Tier 0: explicit `position`; tier 1: numeric folder prefix; tier 2: name only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemSortKey {
    pub tier: u8,
    pub rank: u32,
    pub folder: String,
}

/// One local folder representing one remote object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentItem {
    /// Path relative to the course root; stable identity.
    pub logical_path: PathBuf,
    /// Absolute folder path.
    pub dir: PathBuf,
    pub kind: ContentKind,
    /// Join key against remote objects of the same kind.
    pub declared_name: String,
    pub module_memberships: Vec<ModuleMembership>,
    pub sort_key: ItemSortKey,
    pub frontmatter: Frontmatter,
    /// Body text before expansion.
    pub body_template: String,
}

/// A module member as planned from local declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleMember {
    pub item: PathBuf,
    pub kind: ContentKind,
    pub name: String,
    pub indent: u32,
}

/// A named ordering container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Module {
    pub name: String,
    pub order_key: Option<u32>,
    /// Listed in the module order file; never deleted even when empty.
    pub protected: bool,
    pub members: Vec<ModuleMember>,
}

/// A `.module` folder found in the content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDir {
    pub name: String,
    pub prefix: Option<u32>,
}

// ---------------------------------------------------------------------------
// Rubrics
// ---------------------------------------------------------------------------

/// One rating level of a rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    pub points: f64,
}

/// A fully specified rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    pub points: f64,
    #[serde(default)]
    pub ratings: Vec<Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_range: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_code: Option<String>,
    /// Extra fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A criteria-list entry: either a criterion or a `{{rubric_row:name}}` reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CriterionEntry {
    Criterion(Criterion),
    RowRef(String),
}

/// A rubric before row expansion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RubricSpec {
    pub title: Option<String>,
    pub free_form_criterion_comments: Option<bool>,
    pub criteria: Vec<CriterionEntry>,
}

// ---------------------------------------------------------------------------
// Outcomes and question banks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRating {
    pub description: String,
    pub points: f64,
}

/// A course learning outcome from `outcomes/outcomes.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSpec {
    pub code: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mastery_points: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ratings: Vec<OutcomeRating>,
}

/// A question bank source file under `quiz-banks/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionBankSource {
    pub name: String,
    /// Path relative to the course root.
    pub logical_path: PathBuf,
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Name normalisation
// ---------------------------------------------------------------------------

/// Normalise a declared or remote name for comparison.
///
/// Trims, collapses internal whitespace runs to one space, and lowercases.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_dir_name() {
        assert_eq!(ContentKind::from_dir_name("01-intro.page"), Some(ContentKind::Page));
        assert_eq!(ContentKind::from_dir_name("essay.Assignment"), Some(ContentKind::Assignment));
        assert_eq!(ContentKind::from_dir_name("notes"), None);
        assert_eq!(ContentKind::from_dir_name(".page"), None);
        assert_eq!(ContentKind::from_dir_name("week.module"), None);
    }

    #[test]
    fn stage_order_matches_declaration() {
        let mut shuffled = vec![Stage::Prune, Stage::Expand, Stage::Rubrics, Stage::Banks];
        shuffled.sort();
        assert_eq!(shuffled, vec![Stage::Expand, Stage::Banks, Stage::Rubrics, Stage::Prune]);
    }

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(normalize_name("  Week  1\tIntro "), "week 1 intro");
        assert_eq!(normalize_name("Week 1 Intro"), normalize_name("week 1  INTRO"));
    }

    #[test]
    fn frontmatter_variable_reads_extra_scalars() {
        let mut fm = Frontmatter {
            points_possible: Some(10.0),
            ..Frontmatter::default()
        };
        fm.extra.insert("instructor".into(), Value::String("Dr. Reyes".into()));
        fm.extra.insert("tags".into(), serde_json::json!(["a", "b"]));
        assert_eq!(fm.variable("instructor").as_deref(), Some("Dr. Reyes"));
        assert_eq!(fm.variable("points_possible").as_deref(), Some("10"));
        assert_eq!(fm.variable("tags"), None);
        assert_eq!(fm.variable("missing"), None);
    }
}
