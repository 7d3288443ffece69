//! Rubric loading, row inlining, and validation.
//!
//! # Sources (first match wins)
//!
//! 1. `<assignment>/rubric.yaml|yml|json` holding an inline spec
//! 2. the same file holding only `use_rubric: <name>`
//! 3. frontmatter `use_rubric: <name>`
//!
//! Shared specs live in `rubrics/<name>.*`, reusable rows in
//! `rubrics/rows/<name>.*`. A criteria entry that is exactly
//! `{{rubric_row:name}}` is replaced in place by every criterion of that row
//! file; row files may themselves reference rows. Shared files are never
//! modified; each consumer gets its own resolved copy.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use lectern_core::layout::{first_existing, CourseLayout};
use lectern_core::types::{ContentItem, Criterion, CriterionEntry, Rating, RubricSpec};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{io_err, CycleKind, TemplateCycleError, TemplateError};
use crate::expand::{ExpandScope, Expander};

fn row_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\{\{\s*rubric_row:([A-Za-z0-9_\-]+)\s*\}\}\s*$")
            .expect("rubric row regex is valid")
    })
}

/// Row name when `text` is exactly a row-reference token.
pub fn row_reference(text: &str) -> Option<&str> {
    row_ref_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// A parsed rubric and the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RubricSource {
    pub path: PathBuf,
    /// Shared rubric name when reached through `use_rubric`.
    pub shared: Option<String>,
    pub spec: RubricSpec,
}

/// A rubric with every row inlined and every text field expanded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRubric {
    pub title: String,
    pub free_form_criterion_comments: bool,
    pub criteria: Vec<Criterion>,
    #[serde(skip)]
    pub source: PathBuf,
    /// Row files consulted, in first-use order.
    #[serde(skip)]
    pub rows: Vec<PathBuf>,
}

impl ResolvedRubric {
    pub fn points_possible(&self) -> f64 {
        self.criteria.iter().map(|c| c.points).sum()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Find and parse the rubric attached to `item`, if any.
pub fn load_item_rubric(
    layout: &CourseLayout,
    item: &ContentItem,
) -> Result<Option<RubricSource>, TemplateError> {
    if let Some(path) = first_existing(&layout.item_rubric_candidates(&item.dir)) {
        let doc = read_document(path)?;
        if let Some(name) = doc.get("use_rubric") {
            let name = name.as_str().map(str::trim).filter(|n| !n.is_empty()).ok_or_else(|| {
                TemplateError::InvalidRubric {
                    path: path.clone(),
                    issues: vec!["'use_rubric' must be a non-empty string".to_string()],
                }
            })?;
            return load_shared_rubric(layout, name).map(Some);
        }
        let spec = parse_spec(path, &doc)?;
        return Ok(Some(RubricSource {
            path: path.clone(),
            shared: None,
            spec,
        }));
    }
    match item.frontmatter.use_rubric.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => load_shared_rubric(layout, name).map(Some),
        _ => Ok(None),
    }
}

/// Load `rubrics/<name>.*`.
pub fn load_shared_rubric(layout: &CourseLayout, name: &str) -> Result<RubricSource, TemplateError> {
    let path = first_existing(&layout.shared_rubric_candidates(name))
        .cloned()
        .ok_or_else(|| TemplateError::UnknownSharedRubric {
            name: name.to_string(),
        })?;
    let doc = read_document(&path)?;
    let spec = parse_spec(&path, &doc)?;
    Ok(RubricSource {
        path,
        shared: Some(name.to_string()),
        spec,
    })
}

/// Read a YAML or JSON document by extension.
pub fn read_document(path: &Path) -> Result<Value, TemplateError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str::<Value>(&text).map_err(|e| e.to_string())
    } else if text.trim().is_empty() {
        Ok(Value::Null)
    } else {
        serde_yaml::from_str::<Value>(&text).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| TemplateError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse a rubric mapping into a [`RubricSpec`], reporting every issue at once.
pub fn parse_spec(path: &Path, doc: &Value) -> Result<RubricSpec, TemplateError> {
    let Some(map) = doc.as_object() else {
        return Err(TemplateError::InvalidRubric {
            path: path.to_path_buf(),
            issues: vec!["rubric must be a mapping".to_string()],
        });
    };

    let mut issues = Vec::new();
    let title = map
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    if title.is_none() {
        issues.push("missing 'title'".to_string());
    }

    let entries: &[Value] = match map.get("criteria") {
        Some(Value::Array(list)) if !list.is_empty() => list.as_slice(),
        _ => {
            issues.push("missing or empty 'criteria' list".to_string());
            &[]
        }
    };
    let criteria = parse_entries(entries, "criterion", &mut issues);

    if !issues.is_empty() {
        return Err(TemplateError::InvalidRubric {
            path: path.to_path_buf(),
            issues,
        });
    }
    Ok(RubricSpec {
        title,
        free_form_criterion_comments: map.get("free_form_criterion_comments").and_then(Value::as_bool),
        criteria,
    })
}

fn parse_entries(entries: &[Value], label: &str, issues: &mut Vec<String>) -> Vec<CriterionEntry> {
    let mut out = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        match entry {
            Value::String(text) => match row_reference(text) {
                Some(name) => out.push(CriterionEntry::RowRef(name.to_string())),
                None => issues.push(format!("{label} {i}: unexpected text '{text}'")),
            },
            Value::Object(_) => {
                if let Some(c) = criterion_from_value(entry, &format!("{label} {i}"), issues) {
                    out.push(CriterionEntry::Criterion(c));
                }
            }
            _ => issues.push(format!("{label} {i}: expected a mapping or a rubric_row reference")),
        }
    }
    out
}

fn criterion_from_value(value: &Value, label: &str, issues: &mut Vec<String>) -> Option<Criterion> {
    let before = issues.len();
    let description = value.get("description").and_then(Value::as_str).unwrap_or_default();
    if description.trim().is_empty() {
        issues.push(format!("{label}: missing 'description'"));
    }
    if !value.get("points").is_some_and(Value::is_number) {
        issues.push(format!("{label}: missing or non-numeric 'points'"));
    }
    match value.get("ratings").and_then(Value::as_array) {
        Some(ratings) if !ratings.is_empty() => {
            for (j, rating) in ratings.iter().enumerate() {
                let desc = rating.get("description").and_then(Value::as_str).unwrap_or_default();
                if desc.trim().is_empty() {
                    issues.push(format!("{label}, rating {j}: missing 'description'"));
                }
                if !rating.get("points").is_some_and(Value::is_number) {
                    issues.push(format!("{label}, rating {j}: missing or non-numeric 'points'"));
                }
            }
        }
        _ => issues.push(format!("{label}: missing or empty 'ratings'")),
    }
    if issues.len() > before {
        return None;
    }
    match serde_json::from_value::<Criterion>(value.clone()) {
        Ok(c) => Some(c),
        Err(e) => {
            issues.push(format!("{label}: {e}"));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Row inlining
// ---------------------------------------------------------------------------

struct RowFrame {
    name: Option<String>,
    path: PathBuf,
    entries: std::vec::IntoIter<CriterionEntry>,
}

/// Inline every row reference of `source`, then expand text fields with
/// `expander` in the owning item's scope.
pub fn resolve_rubric(
    layout: &CourseLayout,
    source: &RubricSource,
    expander: &Expander<'_>,
    scope: ExpandScope<'_>,
) -> Result<ResolvedRubric, TemplateError> {
    let mut criteria = Vec::new();
    let mut rows = Vec::new();
    let mut stack = vec![RowFrame {
        name: None,
        path: source.path.clone(),
        entries: source.spec.criteria.clone().into_iter(),
    }];

    while let Some(frame) = stack.last_mut() {
        let Some(entry) = frame.entries.next() else {
            stack.pop();
            continue;
        };
        match entry {
            CriterionEntry::Criterion(c) => criteria.push(c),
            CriterionEntry::RowRef(name) => {
                if stack.iter().any(|f| f.name.as_deref() == Some(name.as_str())) {
                    let mut chain: Vec<String> = stack.iter().filter_map(|f| f.name.clone()).collect();
                    chain.push(name);
                    return Err(TemplateCycleError {
                        kind: CycleKind::RubricRow,
                        chain,
                    }
                    .into());
                }
                let referenced_from = stack.last().map(|f| f.path.clone()).unwrap_or_default();
                let path = first_existing(&layout.rubric_row_candidates(&name))
                    .cloned()
                    .ok_or_else(|| TemplateError::UnresolvedRubricRow {
                        name: name.clone(),
                        referenced_from,
                    })?;
                let entries = load_row_entries(&path)?;
                if !rows.contains(&path) {
                    rows.push(path.clone());
                }
                stack.push(RowFrame {
                    name: Some(name),
                    path,
                    entries: entries.into_iter(),
                });
            }
        }
    }

    if criteria.is_empty() {
        return Err(TemplateError::InvalidRubric {
            path: source.path.clone(),
            issues: vec!["no criteria after row expansion".to_string()],
        });
    }

    let title = source.spec.title.clone().unwrap_or_default();
    let mut resolved = ResolvedRubric {
        title: expander.expand_str(&title, scope)?,
        free_form_criterion_comments: source.spec.free_form_criterion_comments.unwrap_or(false),
        criteria,
        source: source.path.clone(),
        rows,
    };
    for criterion in &mut resolved.criteria {
        expand_criterion(criterion, expander, scope)?;
    }
    Ok(resolved)
}

/// Row file: one criterion mapping or a list of criteria and row references.
fn load_row_entries(path: &Path) -> Result<Vec<CriterionEntry>, TemplateError> {
    let doc = read_document(path)?;
    let list = match doc {
        Value::Object(_) => vec![doc],
        Value::Array(list) => list,
        Value::Null => Vec::new(),
        _ => {
            return Err(TemplateError::InvalidRubric {
                path: path.to_path_buf(),
                issues: vec!["row file must be a mapping or a list".to_string()],
            })
        }
    };
    let mut issues = Vec::new();
    let entries = parse_entries(&list, "row criterion", &mut issues);
    if !issues.is_empty() {
        return Err(TemplateError::InvalidRubric {
            path: path.to_path_buf(),
            issues,
        });
    }
    Ok(entries)
}

fn expand_criterion(
    criterion: &mut Criterion,
    expander: &Expander<'_>,
    scope: ExpandScope<'_>,
) -> Result<(), TemplateError> {
    criterion.description = expander.expand_str(&criterion.description, scope)?;
    if let Some(long) = criterion.long_description.as_mut() {
        *long = expander.expand_str(long, scope)?;
    }
    for rating in &mut criterion.ratings {
        expand_rating(rating, expander, scope)?;
    }
    Ok(())
}

fn expand_rating(
    rating: &mut Rating,
    expander: &Expander<'_>,
    scope: ExpandScope<'_>,
) -> Result<(), TemplateError> {
    rating.description = expander.expand_str(&rating.description, scope)?;
    if let Some(long) = rating.long_description.as_mut() {
        *long = expander.expand_str(long, scope)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("{{rubric_row:writing}}", Some("writing"))]
    #[case("  {{ rubric_row:apa-style }} ", Some("apa-style"))]
    #[case("see {{rubric_row:writing}}", None)]
    #[case("{{include:writing}}", None)]
    fn recognises_row_tokens(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(row_reference(text), expected);
    }

    #[test]
    fn parse_collects_every_issue() {
        let doc = json!({
            "criteria": [
                {"description": "Clarity", "ratings": []},
                "free text",
            ]
        });
        let err = parse_spec(Path::new("rubric.yaml"), &doc).unwrap_err();
        let TemplateError::InvalidRubric { issues, .. } = err else {
            panic!("expected InvalidRubric");
        };
        assert!(issues.iter().any(|i| i.contains("title")));
        assert!(issues.iter().any(|i| i.contains("criterion 0: missing or non-numeric 'points'")));
        assert!(issues.iter().any(|i| i.contains("criterion 0: missing or empty 'ratings'")));
        assert!(issues.iter().any(|i| i.contains("criterion 1: unexpected text")));
    }

    #[test]
    fn parse_keeps_extra_fields() {
        let doc = json!({
            "title": "Essay",
            "criteria": [{
                "description": "Thesis",
                "points": 5,
                "outcome_code": "CLO1",
                "weight_note": "double",
                "ratings": [{"description": "Full", "points": 5}, {"description": "None", "points": 0}]
            }]
        });
        let spec = parse_spec(Path::new("rubric.yaml"), &doc).expect("parse");
        let CriterionEntry::Criterion(c) = &spec.criteria[0] else {
            panic!("expected criterion");
        };
        assert_eq!(c.outcome_code.as_deref(), Some("CLO1"));
        assert_eq!(c.extra.get("weight_note"), Some(&json!("double")));
    }
}
