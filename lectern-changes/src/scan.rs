//! Modified-since scan used to catch up on edits made while nothing watched.
//!
//! Files report edits. Deletions leave no file behind, so directories of the
//! content tree are reported too: a folder's mtime moves when an entry in it
//! is removed. Item folders only count once their `index.md` is gone, since
//! artifact writes bump them on every run.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lectern_core::layout::{CourseLayout, INDEX_FILE};
use lectern_core::types::ContentKind;
use walkdir::{DirEntry, WalkDir};

use crate::classify::is_ignored;
use crate::ChangeError;

/// Files under the course root (and the global shared folders) whose mtime
/// is strictly newer than `since`, plus content-tree directories whose
/// listing changed since then. Ignored paths are never returned.
pub fn scan_modified_since(
    layout: &CourseLayout,
    since: SystemTime,
) -> Result<Vec<PathBuf>, ChangeError> {
    let mut out = Vec::new();
    let content = layout.content_dir();
    scan_tree(layout.root(), since, &mut out, Some(&content))?;
    for dir in ["shared", "includes"] {
        let global = layout.global_root().join(dir);
        if global.is_dir() && !global.starts_with(layout.root()) {
            scan_tree(&global, since, &mut out, None)?;
        }
    }
    out.sort();
    Ok(out)
}

fn scan_tree(
    root: &Path,
    since: SystemTime,
    out: &mut Vec<PathBuf>,
    content: Option<&Path>,
) -> Result<(), ChangeError> {
    let apply_ignore = content.is_some();
    if !root.is_dir() {
        return Ok(());
    }
    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !apply_ignore || !skip_entry(root, e));
    for entry in walker {
        let entry = entry.map_err(|e| walk_err(root, e))?;
        let wanted = if entry.file_type().is_dir() {
            content.is_some_and(|c| tracks_dir(c, entry.path()))
        } else {
            entry.file_type().is_file()
        };
        if !wanted {
            continue;
        }
        let modified = entry
            .metadata()
            .map_err(|e| walk_err(root, e))?
            .modified()
            .map_err(|source| ChangeError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
        if modified > since {
            out.push(entry.path().to_path_buf());
        }
    }
    Ok(())
}

/// Content-tree directories whose mtime signals an add or remove: the content
/// root and grouping folders always, item folders only without `index.md`.
fn tracks_dir(content: &Path, dir: &Path) -> bool {
    let Ok(rel) = dir.strip_prefix(content) else {
        return false;
    };
    let names: Vec<String> = rel
        .iter()
        .map(|part| part.to_string_lossy().into_owned())
        .collect();
    match names.iter().position(|n| ContentKind::from_dir_name(n).is_some()) {
        None => true,
        Some(i) if i + 1 == names.len() => !dir.join(INDEX_FILE).is_file(),
        Some(_) => false,
    }
}

fn skip_entry(root: &Path, entry: &DirEntry) -> bool {
    entry
        .path()
        .strip_prefix(root)
        .map(is_ignored)
        .unwrap_or(false)
}

fn walk_err(root: &Path, err: walkdir::Error) -> ChangeError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
    ChangeError::Io { path, source }
}
