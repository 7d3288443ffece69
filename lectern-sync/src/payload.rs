//! Remote payloads built from expanded items, and their fingerprints.
//!
//! A fingerprint is the SHA-256 hex digest of exactly what would be sent:
//! the canonical JSON of a structured payload (object keys sorted) or the
//! raw bytes of an upload. Text is normalised to LF first, so a checkout
//! with CRLF line endings does not re-upload everything.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use lectern_core::layout::{ARTIFACT_FILES, INDEX_FILE};
use lectern_core::types::{ContentItem, OutcomeSpec};
use lectern_template::ResolvedRubric;

use crate::error::ItemError;
use crate::remote::{Payload, RemoteId};

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

pub fn fingerprint_text(text: &str) -> String {
    fingerprint_bytes(text.replace("\r\n", "\n").as_bytes())
}

pub fn fingerprint_json(value: &Value) -> String {
    fingerprint_text(&value.to_string())
}

pub fn fingerprint(payload: &Payload) -> String {
    match payload {
        Payload::Json(value) => fingerprint_json(value),
        Payload::File { file_name, bytes } => {
            let mut h = Sha256::new();
            h.update(file_name.as_bytes());
            h.update([0u8]);
            h.update(bytes);
            hex::encode(h.finalize())
        }
    }
}

// ---------------------------------------------------------------------------
// Content payloads
// ---------------------------------------------------------------------------

fn with_extra(mut fields: Map<String, Value>, item: &ContentItem) -> Value {
    for (key, value) in &item.frontmatter.extra {
        fields.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Value::Object(fields)
}

fn insert_opt<T: Into<Value>>(fields: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        fields.insert(key.to_string(), v.into());
    }
}

pub fn page_payload(item: &ContentItem, body: &str) -> Payload {
    let fm = &item.frontmatter;
    let mut fields = Map::new();
    fields.insert("title".into(), json!(item.declared_name));
    fields.insert("body".into(), json!(body.replace("\r\n", "\n")));
    fields.insert("published".into(), json!(fm.published.unwrap_or(true)));
    Payload::Json(with_extra(fields, item))
}

pub fn assignment_payload(item: &ContentItem, body: &str) -> Payload {
    let fm = &item.frontmatter;
    let mut fields = Map::new();
    fields.insert("name".into(), json!(item.declared_name));
    fields.insert("description".into(), json!(body.replace("\r\n", "\n")));
    fields.insert("published".into(), json!(fm.published.unwrap_or(true)));
    insert_opt(&mut fields, "points_possible", fm.points_possible);
    insert_opt(&mut fields, "submission_types", fm.submission_types.clone());
    insert_opt(&mut fields, "due_at", fm.due_at.clone());
    insert_opt(&mut fields, "unlock_at", fm.unlock_at.clone());
    insert_opt(&mut fields, "lock_at", fm.lock_at.clone());
    Payload::Json(with_extra(fields, item))
}

/// Quiz settings plus question groups bound to remote bank ids.
pub fn quiz_payload(
    item: &ContentItem,
    body: &str,
    bank_id: impl Fn(&str) -> Option<RemoteId>,
) -> Result<Payload, ItemError> {
    let fm = &item.frontmatter;
    let mut groups = Vec::with_capacity(fm.question_groups.len());
    for group in &fm.question_groups {
        let id = bank_id(&group.bank).ok_or_else(|| ItemError::MissingDependency {
            what: "question bank",
            name: group.bank.clone(),
        })?;
        groups.push(json!({
            "bank": group.bank,
            "bank_id": id,
            "pick_count": group.pick,
            "question_points": group.points_per_question,
        }));
    }
    let mut fields = Map::new();
    fields.insert("title".into(), json!(item.declared_name));
    fields.insert("description".into(), json!(body.replace("\r\n", "\n")));
    fields.insert("published".into(), json!(fm.published.unwrap_or(true)));
    insert_opt(&mut fields, "time_limit", fm.time_limit);
    insert_opt(&mut fields, "allowed_attempts", fm.allowed_attempts);
    insert_opt(&mut fields, "shuffle_answers", fm.shuffle_answers);
    insert_opt(&mut fields, "due_at", fm.due_at.clone());
    insert_opt(&mut fields, "unlock_at", fm.unlock_at.clone());
    insert_opt(&mut fields, "lock_at", fm.lock_at.clone());
    fields.insert("question_groups".into(), Value::Array(groups));
    Ok(Payload::Json(with_extra(fields, item)))
}

/// Upload payload for a `.file` item.
///
/// Uses frontmatter `filename` (relative to the item folder), else the only
/// regular file in the folder besides `index.md` and work artifacts.
pub fn file_payload(item: &ContentItem) -> Result<Payload, ItemError> {
    let path = match &item.frontmatter.filename {
        Some(name) => item.dir.join(name),
        None => sole_attachment(&item.dir)?,
    };
    let bytes = std::fs::read(&path).map_err(|source| ItemError::Io {
        path: path.clone(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| item.declared_name.clone());
    Ok(Payload::File { file_name, bytes })
}

fn sole_attachment(dir: &Path) -> Result<std::path::PathBuf, ItemError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ItemError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut found: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            name != INDEX_FILE && !ARTIFACT_FILES.contains(&name.as_str()) && !name.starts_with('.')
        })
        .collect();
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(ItemError::Invalid(format!(
            "{}: no file to upload; add one or set `filename`",
            dir.display()
        ))),
        n => Err(ItemError::Invalid(format!(
            "{}: {n} candidate files; set `filename` to pick one",
            dir.display()
        ))),
    }
}

/// `meta.json` work artifact: the item's typed metadata.
pub fn meta_json(item: &ContentItem) -> Value {
    json!({
        "name": item.declared_name,
        "kind": item.kind,
        "path": item.logical_path,
        "modules": item.module_memberships,
        "frontmatter": item.frontmatter,
    })
}

// ---------------------------------------------------------------------------
// Outcomes and rubrics
// ---------------------------------------------------------------------------

pub fn outcome_payload(outcome: &OutcomeSpec) -> Payload {
    let mut fields = Map::new();
    fields.insert("code".into(), json!(outcome.code));
    fields.insert("title".into(), json!(outcome.title));
    insert_opt(&mut fields, "description", outcome.description.clone());
    insert_opt(&mut fields, "vendor_guid", outcome.vendor_guid.clone());
    insert_opt(&mut fields, "mastery_points", outcome.mastery_points);
    if !outcome.ratings.is_empty() {
        fields.insert("ratings".into(), json!(outcome.ratings));
    }
    Payload::Json(Value::Object(fields))
}

/// Rubric body bound to an assignment, with outcome codes resolved to ids.
pub fn rubric_payload(
    rubric: &ResolvedRubric,
    assignment_id: &RemoteId,
    outcome_id: impl Fn(&str) -> Option<RemoteId>,
) -> Result<Value, ItemError> {
    let mut criteria = Vec::with_capacity(rubric.criteria.len());
    for criterion in &rubric.criteria {
        let mut fields: BTreeMap<String, Value> = criterion
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        fields.insert("description".into(), json!(criterion.description));
        fields.insert("points".into(), json!(criterion.points));
        fields.insert("ratings".into(), json!(criterion.ratings));
        if let Some(long) = &criterion.long_description {
            fields.insert("long_description".into(), json!(long));
        }
        if let Some(range) = criterion.use_range {
            fields.insert("criterion_use_range".into(), json!(range));
        }
        if let Some(code) = &criterion.outcome_code {
            let id = outcome_id(code).ok_or_else(|| ItemError::MissingDependency {
                what: "outcome",
                name: code.clone(),
            })?;
            fields.insert("learning_outcome_id".into(), json!(id));
        }
        criteria.push(json!(fields));
    }
    Ok(json!({
        "title": rubric.title,
        "free_form_criterion_comments": rubric.free_form_criterion_comments,
        "points_possible": rubric.points_possible(),
        "assignment_id": assignment_id,
        "criteria": criteria,
    }))
}
