//! Path classification: which course resource a changed path belongs to.
//!
//! Checks run in order of specificity: ignore rules, global shared files,
//! fixed course files, then the content tree where the nearest kind-suffixed
//! ancestor owns the path.

use std::path::{Component, Path, PathBuf};

use lectern_core::course::{bank_name, module_dir_name};
use lectern_core::layout::{
    CourseLayout, ARTIFACT_FILES, CONFIG_FILE, CONTENT_DIR, INDEX_FILE, LEGACY_CONTENT_DIR,
    METADATA_DIR,
};
use lectern_core::types::ContentKind;

/// What a changed path means for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathClass {
    /// A file inside a content item folder.
    Item {
        /// Item folder relative to the course root.
        item: PathBuf,
        kind: ContentKind,
        /// The changed file is the item's `index.md`.
        index: bool,
        /// The item's `index.md` no longer exists.
        deleted: bool,
    },
    /// A `*.module` or `module-*` folder itself.
    ModuleFolder,
    /// Any other directory of the content tree, the content root included.
    /// Its mtime moves when an item folder below it is added or removed.
    ContentFolder,
    Include,
    Template,
    Variables,
    SharedRubric,
    RubricRow,
    Outcomes,
    ModuleOrder,
    /// A question bank file, relative to the course root.
    Bank(PathBuf),
    /// Inside the course but irrelevant to the pipeline.
    Ignored,
    /// Not under the course root or the global root.
    Outside,
}

/// Classify `path` (absolute, or relative to the course root).
pub fn classify(layout: &CourseLayout, path: &Path) -> PathClass {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        layout.root().join(path)
    };

    let rel = match layout.relative(&absolute) {
        Some(rel) => rel,
        None => return classify_global(layout, &absolute),
    };
    if rel.as_os_str().is_empty() || is_ignored(&rel) {
        return PathClass::Ignored;
    }

    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let first = parts[0].as_str();
    let file_name = parts[parts.len() - 1].as_str();

    match first {
        "shared" | "includes" if parts.len() >= 2 => {
            if parts.len() == 2 && is_variables_file(file_name) {
                PathClass::Variables
            } else if has_extension(file_name, "md") {
                PathClass::Include
            } else {
                PathClass::Ignored
            }
        }
        "templates" if file_name.ends_with(".md.tera") => PathClass::Template,
        "rubrics" if parts.len() >= 3 && parts[1] == "rows" => PathClass::RubricRow,
        "rubrics" if parts.len() == 2 => PathClass::SharedRubric,
        "outcomes" if parts.len() == 2 && is_yaml(file_name) => PathClass::Outcomes,
        "modules" if parts.len() == 2 && file_name.starts_with("module_order.") => {
            PathClass::ModuleOrder
        }
        "quiz-banks" if bank_name(file_name).is_some() => PathClass::Bank(rel.clone()),
        CONTENT_DIR | LEGACY_CONTENT_DIR => classify_content(layout, &rel, &parts),
        _ => PathClass::Ignored,
    }
}

fn classify_content(layout: &CourseLayout, rel: &Path, parts: &[String]) -> PathClass {
    let owner = parts
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, part)| ContentKind::from_dir_name(part).map(|kind| (i, kind)));

    match owner {
        Some((i, kind)) => {
            let item: PathBuf = parts[..=i].iter().collect();
            let index = parts.len() == i + 2 && parts[i + 1] == INDEX_FILE;
            let deleted = !layout.root().join(&item).join(INDEX_FILE).is_file();
            PathClass::Item {
                item,
                kind,
                index: index || parts.len() == i + 1,
                deleted,
            }
        }
        None => {
            let last = parts[parts.len() - 1].as_str();
            if module_dir_name(last).is_some() && !layout.root().join(rel).is_file() {
                PathClass::ModuleFolder
            } else if layout.root().join(rel).is_dir() {
                PathClass::ContentFolder
            } else {
                PathClass::Ignored
            }
        }
    }
}

fn classify_global(layout: &CourseLayout, absolute: &Path) -> PathClass {
    let Ok(rel) = absolute.strip_prefix(layout.global_root()) else {
        return PathClass::Outside;
    };
    let parts: Vec<&str> = rel.iter().filter_map(|s| s.to_str()).collect();
    match parts.as_slice() {
        ["shared", file] if is_variables_file(file) => PathClass::Variables,
        ["shared" | "includes", .., file] if has_extension(file, "md") => PathClass::Include,
        _ => PathClass::Outside,
    }
}

/// Paths the pipeline never reacts to: metadata, work artifacts, temp and
/// hidden files, and the course config file.
pub fn is_ignored(rel: &Path) -> bool {
    let mut components = rel.components().peekable();
    let mut first = true;
    while let Some(c) = components.next() {
        let Component::Normal(name) = c else { continue };
        let name = name.to_string_lossy();
        let is_last = components.peek().is_none();
        if name.starts_with('.') || (first && name == METADATA_DIR) {
            return true;
        }
        if is_last {
            if first && name == CONFIG_FILE {
                return true;
            }
            if ARTIFACT_FILES.contains(&name.as_ref())
                || name.ends_with(".tmp")
                || name.ends_with('~')
                || name.ends_with(".swp")
            {
                return true;
            }
        }
        first = false;
    }
    false
}

fn is_variables_file(name: &str) -> bool {
    name == "variables.yaml" || name == "variables.yml"
}

fn is_yaml(name: &str) -> bool {
    has_extension(name, "yaml") || has_extension(name, "yml")
}

fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
