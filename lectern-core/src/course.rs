//! Course-tree loader.
//!
//! [`load_course`] walks the content directory, parses every item's
//! `index.md`, infers names and module memberships, and collects the shared
//! declarations (module order, module folders, question banks) the pipeline
//! needs. An item whose `index.md` cannot be read or parsed is set aside in
//! [`Course::load_failures`] and the rest of the tree still loads. An empty
//! or ambiguous name aborts before any remote work starts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::{io_err, CoreError};
use crate::layout::{CourseLayout, INDEX_FILE, LEGACY_MODULE_PREFIX, MODULE_SUFFIX};
use crate::types::{
    normalize_name, ContentItem, ContentKind, Frontmatter, ItemSortKey, Module, ModuleDir,
    ModuleMember, ModuleMembership, OutcomeSpec, QuestionBankSource,
};

// ---------------------------------------------------------------------------
// Course
// ---------------------------------------------------------------------------

/// Everything declared locally for one course.
#[derive(Debug, Clone, Default)]
pub struct Course {
    pub items: Vec<ContentItem>,
    /// Module names from the module order file, in order.
    pub module_order: Vec<String>,
    /// `.module` / `module-*` folders, including empty ones.
    pub module_dirs: Vec<ModuleDir>,
    pub banks: Vec<QuestionBankSource>,
    /// Item folders that could not be loaded.
    pub load_failures: Vec<LoadFailure>,
}

/// An item folder whose `index.md` could not be read or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    /// Course-relative folder path.
    pub logical_path: PathBuf,
    pub kind: ContentKind,
    /// Name inferred from the folder; frontmatter was not available.
    pub inferred_name: String,
    pub error: String,
}

impl Course {
    /// Item by course-relative folder path.
    pub fn item(&self, logical_path: &Path) -> Option<&ContentItem> {
        self.items.iter().find(|i| i.logical_path == logical_path)
    }

    /// Item by kind and declared name (normalised comparison).
    pub fn find(&self, kind: ContentKind, name: &str) -> Option<&ContentItem> {
        let wanted = normalize_name(name);
        self.items
            .iter()
            .find(|i| i.kind == kind && normalize_name(&i.declared_name) == wanted)
    }

    /// Kinds with at least one item that failed to load.
    pub fn unsettled_kinds(&self) -> BTreeSet<ContentKind> {
        self.load_failures.iter().map(|f| f.kind).collect()
    }

    /// Names of modules that must survive empty-module pruning.
    pub fn protected_modules(&self) -> Vec<String> {
        self.module_order.clone()
    }

    /// Every module name declared locally: order file, folders, and memberships.
    pub fn declared_module_names(&self) -> Vec<String> {
        self.modules().into_iter().map(|m| m.name).collect()
    }

    /// Plan the module structure from local declarations.
    ///
    /// Order-file modules come first in listed order; the rest follow by
    /// folder prefix, then name. Members are ordered by [`ItemSortKey`].
    pub fn modules(&self) -> Vec<Module> {
        let mut by_name: BTreeMap<String, Module> = BTreeMap::new();
        let mut listed: HashMap<String, usize> = HashMap::new();

        for (idx, name) in self.module_order.iter().enumerate() {
            let key = normalize_name(name);
            listed.entry(key.clone()).or_insert(idx);
            by_name.entry(key).or_insert_with(|| Module {
                name: name.clone(),
                order_key: Some(idx as u32),
                protected: true,
                members: Vec::new(),
            });
        }

        for dir in &self.module_dirs {
            let entry = by_name
                .entry(normalize_name(&dir.name))
                .or_insert_with(|| Module {
                    name: dir.name.clone(),
                    order_key: None,
                    protected: false,
                    members: Vec::new(),
                });
            if entry.order_key.is_none() {
                entry.order_key = dir.prefix;
            }
        }

        let mut sorted_items: Vec<&ContentItem> = self.items.iter().collect();
        sorted_items.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
        for item in sorted_items {
            for membership in &item.module_memberships {
                let module = by_name
                    .entry(normalize_name(&membership.module))
                    .or_insert_with(|| Module {
                        name: membership.module.clone(),
                        order_key: None,
                        protected: false,
                        members: Vec::new(),
                    });
                module.members.push(ModuleMember {
                    item: item.logical_path.clone(),
                    kind: item.kind,
                    name: item.declared_name.clone(),
                    indent: membership.indent,
                });
            }
        }

        let mut modules: Vec<(String, Module)> = by_name.into_iter().collect();
        modules.sort_by(|(ka, a), (kb, b)| {
            let la = listed.get(ka).copied().unwrap_or(usize::MAX);
            let lb = listed.get(kb).copied().unwrap_or(usize::MAX);
            la.cmp(&lb)
                .then(a.order_key.unwrap_or(u32::MAX).cmp(&b.order_key.unwrap_or(u32::MAX)))
                .then(ka.cmp(kb))
        });
        modules.into_iter().map(|(_, m)| m).collect()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load the whole course tree under `layout`.
pub fn load_course(layout: &CourseLayout) -> Result<Course, CoreError> {
    let content = layout.content_dir();
    if !content.is_dir() {
        return Err(CoreError::NoContentDir {
            root: layout.root().to_path_buf(),
        });
    }

    let mut items = Vec::new();
    let mut module_dirs = Vec::new();
    let mut load_failures = Vec::new();

    let mut walker = WalkDir::new(&content)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(walk_err)?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            walker.skip_current_dir();
            continue;
        }
        if let Some(module) = module_dir_name(&name) {
            module_dirs.push(ModuleDir {
                name: module,
                prefix: numeric_prefix(&name),
            });
            continue;
        }
        if let Some(kind) = ContentKind::from_dir_name(&name) {
            walker.skip_current_dir();
            if !entry.path().join(INDEX_FILE).is_file() {
                tracing::debug!("skipping {} (no {INDEX_FILE})", entry.path().display());
                continue;
            }
            match load_item(layout, entry.path()) {
                Ok(item) => items.push(item),
                Err(e @ CoreError::EmptyName { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!("skipping {}: {e}", entry.path().display());
                    load_failures.push(failed_item(layout, entry.path(), kind, &name, e));
                }
            }
        }
    }

    check_unique_names(&items)?;

    Ok(Course {
        items,
        module_order: load_module_order(layout)?,
        module_dirs,
        banks: list_banks(layout)?,
        load_failures,
    })
}

fn failed_item(
    layout: &CourseLayout,
    dir: &Path,
    kind: ContentKind,
    folder: &str,
    error: CoreError,
) -> LoadFailure {
    LoadFailure {
        logical_path: layout.relative(dir).unwrap_or_else(|| dir.to_path_buf()),
        kind,
        inferred_name: infer_name(folder),
        error: error.to_string(),
    }
}

/// Load one item folder (`*.page`, `*.assignment`, ...).
pub fn load_item(layout: &CourseLayout, dir: &Path) -> Result<ContentItem, CoreError> {
    let folder = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = ContentKind::from_dir_name(&folder).ok_or_else(|| CoreError::Frontmatter {
        path: dir.to_path_buf(),
        message: format!("'{folder}' has no recognised kind suffix"),
    })?;

    let index = dir.join(INDEX_FILE);
    let text = std::fs::read_to_string(&index).map_err(|e| io_err(&index, e))?;
    let (mut frontmatter, body) = parse_frontmatter(&index, &text)?;

    let declared_name = frontmatter
        .name
        .clone()
        .map(|n| n.trim().to_string())
        .unwrap_or_else(|| infer_name(&folder));
    if declared_name.is_empty() {
        return Err(CoreError::EmptyName { path: dir.to_path_buf() });
    }

    if let Some(single) = frontmatter.module.take() {
        if !frontmatter.modules.iter().any(|m| m == &single) {
            frontmatter.modules.insert(0, single);
        }
    }
    let indent = frontmatter.indent.unwrap_or(0);
    let module_names = if frontmatter.modules.is_empty() {
        infer_module(layout, dir).into_iter().collect()
    } else {
        frontmatter.modules.clone()
    };
    let module_memberships = module_names
        .into_iter()
        .map(|module| ModuleMembership { module, indent })
        .collect();

    let stem = folder
        .rsplit_once('.')
        .map(|(s, _)| s.to_string())
        .unwrap_or_else(|| folder.clone());
    let sort_key = match (frontmatter.position, numeric_prefix(&stem)) {
        (Some(pos), _) => ItemSortKey { tier: 0, rank: pos, folder: stem },
        (None, Some(prefix)) => ItemSortKey { tier: 1, rank: prefix, folder: stem },
        (None, None) => ItemSortKey { tier: 2, rank: 0, folder: stem },
    };

    let logical_path = layout
        .relative(dir)
        .unwrap_or_else(|| dir.to_path_buf());

    Ok(ContentItem {
        logical_path,
        dir: dir.to_path_buf(),
        kind,
        declared_name,
        module_memberships,
        sort_key,
        frontmatter,
        body_template: body,
    })
}

/// Split `---` delimited YAML frontmatter from the body.
///
/// Returns `(None, text)` when the file has no frontmatter block.
pub fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let rest = match text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n")) {
        Some(rest) => rest,
        None => return (None, text),
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(yaml), body);
        }
        offset += line.len();
    }
    (None, text)
}

/// Parse frontmatter into the typed record; returns the body alongside.
pub fn parse_frontmatter(path: &Path, text: &str) -> Result<(Frontmatter, String), CoreError> {
    let (yaml, body) = split_frontmatter(text);
    let frontmatter = match yaml {
        Some(y) if !y.trim().is_empty() => {
            serde_yaml::from_str::<Frontmatter>(y).map_err(|source| CoreError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        }
        _ => Frontmatter::default(),
    };
    Ok((frontmatter, body.trim_start_matches(['\r', '\n']).to_string()))
}

/// Derive a display name from a folder name.
///
/// `03-lab_safety-rules.page` becomes `Lab Safety Rules`.
pub fn infer_name(folder: &str) -> String {
    let stem = match ContentKind::from_dir_name(folder) {
        Some(_) => folder.rsplit_once('.').map(|(s, _)| s).unwrap_or(folder),
        None => folder,
    };
    let stem = strip_numeric_prefix(stem);
    stem.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Module name from the nearest module-folder ancestor of `dir`, if any.
pub fn infer_module(layout: &CourseLayout, dir: &Path) -> Option<String> {
    let content = layout.content_dir();
    for ancestor in dir.ancestors().skip(1) {
        if ancestor == content || !ancestor.starts_with(&content) {
            break;
        }
        let name = ancestor.file_name()?.to_string_lossy();
        if let Some(module) = module_dir_name(&name) {
            return Some(module);
        }
    }
    None
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModuleOrderDoc {
    Keyed { modules: Vec<String> },
    List(Vec<String>),
}

/// Module names listed in `modules/module_order.yaml`; empty when absent.
pub fn load_module_order(layout: &CourseLayout) -> Result<Vec<String>, CoreError> {
    let path = layout.module_order_file();
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let doc: ModuleOrderDoc =
        serde_yaml::from_str(&text).map_err(|source| CoreError::Yaml { path, source })?;
    let names = match doc {
        ModuleOrderDoc::Keyed { modules } => modules,
        ModuleOrderDoc::List(list) => list,
    };
    Ok(names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect())
}

#[derive(Deserialize)]
struct OutcomesDoc {
    #[serde(default)]
    course_outcomes: Vec<OutcomeSpec>,
}

/// Outcomes from `outcomes/outcomes.yaml`; empty when absent.
pub fn load_outcomes(layout: &CourseLayout) -> Result<Vec<OutcomeSpec>, CoreError> {
    let path = layout.outcomes_file();
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let doc: OutcomesDoc =
        serde_yaml::from_str(&text).map_err(|source| CoreError::Yaml { path, source })?;
    Ok(doc.course_outcomes)
}

/// Question bank sources under `quiz-banks/`, sorted by name.
pub fn list_banks(layout: &CourseLayout) -> Result<Vec<QuestionBankSource>, CoreError> {
    let dir = layout.quiz_banks_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut banks = Vec::new();
    for entry in WalkDir::new(&dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(walk_err)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file = entry.file_name().to_string_lossy();
        if let Some(name) = bank_name(&file) {
            banks.push(QuestionBankSource {
                name,
                logical_path: layout
                    .relative(entry.path())
                    .unwrap_or_else(|| entry.path().to_path_buf()),
                path: entry.path().to_path_buf(),
            });
        }
    }
    Ok(banks)
}

/// Bank name of a `quiz-banks` file name (`week1.bank.md` gives `week1`).
pub fn bank_name(file_name: &str) -> Option<String> {
    let (stem, _ext) = file_name.rsplit_once('.')?;
    let name = stem.strip_suffix(".bank")?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Module name declared by a folder, if the folder is a module folder.
pub fn module_dir_name(folder: &str) -> Option<String> {
    if let Some(stem) = folder.strip_suffix(&format!(".{MODULE_SUFFIX}")) {
        let name = strip_numeric_prefix(stem).trim();
        return (!name.is_empty()).then(|| name.to_string());
    }
    folder
        .strip_prefix(LEGACY_MODULE_PREFIX)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Leading `NN-` / `NN_` number of a folder name.
pub fn numeric_prefix(name: &str) -> Option<u32> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    match name[digits.len()..].chars().next() {
        Some('-') | Some('_') => digits.parse().ok(),
        _ => None,
    }
}

fn strip_numeric_prefix(name: &str) -> &str {
    match numeric_prefix(name) {
        Some(_) => {
            let digits = name.chars().take_while(|c| c.is_ascii_digit()).count();
            &name[digits + 1..]
        }
        None => name,
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn check_unique_names(items: &[ContentItem]) -> Result<(), CoreError> {
    let mut seen: HashMap<(ContentKind, String), &PathBuf> = HashMap::new();
    for item in items {
        let key = (item.kind, normalize_name(&item.declared_name));
        if let Some(first) = seen.insert(key, &item.logical_path) {
            return Err(CoreError::DuplicateName {
                kind: item.kind,
                name: item.declared_name.clone(),
                first: first.clone(),
                second: item.logical_path.clone(),
            });
        }
    }
    Ok(())
}

fn walk_err(err: walkdir::Error) -> CoreError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
    io_err(path, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("03-lab_safety-rules.page", "Lab Safety Rules")]
    #[case("welcome.page", "Welcome")]
    #[case("final-EXAM.quiz", "Final Exam")]
    #[case("10_syllabus", "Syllabus")]
    fn infers_names_from_folders(#[case] folder: &str, #[case] expected: &str) {
        assert_eq!(infer_name(folder), expected);
    }

    #[rstest]
    #[case("01-Getting Started.module", Some("Getting Started"))]
    #[case("Week 2.module", Some("Week 2"))]
    #[case("module-Week 3", Some("Week 3"))]
    #[case("notes", None)]
    fn module_folder_names(#[case] folder: &str, #[case] expected: Option<&str>) {
        assert_eq!(module_dir_name(folder).as_deref(), expected);
    }

    #[test]
    fn frontmatter_split_handles_missing_block() {
        let (yaml, body) = split_frontmatter("# Title\n\nbody");
        assert!(yaml.is_none());
        assert_eq!(body, "# Title\n\nbody");
    }

    #[test]
    fn frontmatter_split_extracts_yaml() {
        let (yaml, body) = split_frontmatter("---\nname: Intro\n---\n\nHello\n");
        assert_eq!(yaml, Some("name: Intro\n"));
        assert_eq!(body, "\nHello\n");
    }

    #[test]
    fn bank_names() {
        assert_eq!(bank_name("week1.bank.md").as_deref(), Some("week1"));
        assert_eq!(bank_name("week1.bank.zip").as_deref(), Some("week1"));
        assert_eq!(bank_name("notes.md"), None);
        assert_eq!(bank_name(".bank.md"), None);
    }

    #[test]
    fn numeric_prefix_requires_separator() {
        assert_eq!(numeric_prefix("02-intro"), Some(2));
        assert_eq!(numeric_prefix("2024report"), None);
        assert_eq!(numeric_prefix("intro"), None);
    }
}
