//! Work artifacts: `source.md` and `meta.json` beside each item's `index.md`.
//!
//! ## `write_artifact` protocol
//!
//! 1. Normalise line endings to LF.
//! 2. SHA-256 the new content and the file on disk (if any).
//! 3. Equal digests → `Unchanged`, the file is not touched.
//! 4. Dry run → `WouldWrite`, nothing on disk changes.
//! 5. Write `<path>.tmp`, then rename over the final path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use similar::TextDiff;
use walkdir::WalkDir;

use lectern_core::layout::{CourseLayout, ARTIFACT_FILES, INDEX_FILE};

use crate::error::{io_err, SyncError};
use crate::payload::fingerprint_text;

pub const SOURCE_FILE: &str = "source.md";
pub const META_FILE: &str = "meta.json";

/// Outcome of an individual artifact write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Written { path: PathBuf },
    Unchanged { path: PathBuf },
    WouldWrite { path: PathBuf },
}

impl WriteResult {
    pub fn changed(&self) -> bool {
        !matches!(self, WriteResult::Unchanged { .. })
    }
}

/// A dry-run diff of an item's expanded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDiff {
    pub path: PathBuf,
    pub unified_diff: String,
}

/// Hash-gated atomic write of one artifact.
pub fn write_artifact(path: &Path, content: &str, dry_run: bool) -> Result<WriteResult, SyncError> {
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    write_artifact_with_tmp(path, content, dry_run, &tmp)
}

fn write_artifact_with_tmp(
    path: &Path,
    content: &str,
    dry_run: bool,
    tmp: &Path,
) -> Result<WriteResult, SyncError> {
    let normalized = content.replace("\r\n", "\n");

    if let Some(existing) = read_existing(path)? {
        if fingerprint_text(&existing) == fingerprint_text(&normalized) {
            tracing::debug!("unchanged: {}", path.display());
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }

    if dry_run {
        tracing::info!("[dry-run] would write: {}", path.display());
        return Ok(WriteResult::WouldWrite {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(tmp, &normalized).map_err(|e| io_err(tmp, e))?;
    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

fn read_existing(path: &Path) -> Result<Option<String>, SyncError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.replace("\r\n", "\n"))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Unified diff between the current `source.md` of `item_dir` and `new_body`.
///
/// `None` when they are identical.
pub fn diff_source(
    layout: &CourseLayout,
    item_dir: &Path,
    new_body: &str,
) -> Result<Option<ArtifactDiff>, SyncError> {
    let path = item_dir.join(SOURCE_FILE);
    let existing = read_existing(&path)?.unwrap_or_default();
    let new_body = new_body.replace("\r\n", "\n");
    if existing == new_body {
        return Ok(None);
    }
    let relative = layout.relative(&path).unwrap_or_else(|| path.clone());
    let old_header = format!("a/{}", relative.display());
    let new_header = format!("b/{}", relative.display());
    let unified = TextDiff::from_lines(&existing, &new_body)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string();
    Ok(Some(ArtifactDiff {
        path,
        unified_diff: unified,
    }))
}

/// Remove work artifacts whose item folder no longer has an `index.md`.
///
/// Returns the affected files; in a dry run nothing is deleted.
pub fn cleanup_orphans(layout: &CourseLayout, dry_run: bool) -> Result<Vec<PathBuf>, SyncError> {
    let content = layout.content_dir();
    if !content.is_dir() {
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    for entry in WalkDir::new(&content).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !ARTIFACT_FILES.contains(&name.as_ref()) {
            continue;
        }
        let path = entry.path();
        let orphaned = path
            .parent()
            .map_or(false, |dir| !dir.join(INDEX_FILE).is_file());
        if !orphaned {
            continue;
        }
        if !dry_run {
            std::fs::remove_file(path).map_err(|e| io_err(path, e))?;
        }
        tracing::info!("removed orphaned artifact {}", path.display());
        removed.push(path.to_path_buf());
    }
    removed.sort();
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn first_write_then_unchanged() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("a.page").join(SOURCE_FILE);
        let first = write_artifact(&path, "hello", false).expect("write");
        assert!(matches!(first, WriteResult::Written { .. }));
        let second = write_artifact(&path, "hello", false).expect("write");
        assert!(matches!(second, WriteResult::Unchanged { .. }));
        assert!(!PathBuf::from(format!("{}.tmp", path.display())).exists());
    }

    #[test]
    fn crlf_and_lf_are_the_same_content() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join(SOURCE_FILE);
        write_artifact(&path, "a\r\nb\r\n", false).expect("write");
        let again = write_artifact(&path, "a\nb\n", false).expect("write");
        assert!(matches!(again, WriteResult::Unchanged { .. }));
        assert_eq!(fs::read_to_string(&path).expect("read"), "a\nb\n");
    }

    #[test]
    fn dry_run_leaves_disk_alone() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join(META_FILE);
        let result = write_artifact(&path, "{}", true).expect("dry run");
        assert!(matches!(result, WriteResult::WouldWrite { .. }));
        assert!(!path.exists());
    }

    #[test]
    #[cfg(unix)]
    fn rename_failure_keeps_original_and_cleans_tmp() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().expect("tmp");
        let locked = root.path().join("locked");
        fs::create_dir_all(&locked).expect("mkdir");
        let path = locked.join(SOURCE_FILE);
        fs::write(&path, "original").expect("seed");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).expect("chmod");

        let elsewhere = TempDir::new().expect("tmp");
        let tmp_path = elsewhere.path().join("source.md.tmp");
        let result = write_artifact_with_tmp(&path, "new", false, &tmp_path);

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("chmod back");
        if result.is_ok() {
            // Running as root: permissions are not enforced.
            return;
        }
        assert_eq!(fs::read_to_string(&path).expect("read"), "original");
        assert!(!tmp_path.exists());
    }

    #[test]
    fn diff_reports_changed_lines_only_when_different() {
        let tmp = TempDir::new().expect("tmp");
        let layout = CourseLayout::new(tmp.path());
        let dir = tmp.path().join("content").join("a.page");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(SOURCE_FILE), "one\ntwo\n").expect("seed");

        assert!(diff_source(&layout, &dir, "one\ntwo\n").expect("diff").is_none());
        let diff = diff_source(&layout, &dir, "one\nthree\n")
            .expect("diff")
            .expect("some diff");
        assert!(diff.unified_diff.contains("-two"));
        assert!(diff.unified_diff.contains("+three"));
        assert!(diff.unified_diff.contains("a/content/a.page/source.md"));
    }

    #[test]
    fn orphaned_artifacts_are_removed() {
        let tmp = TempDir::new().expect("tmp");
        let layout = CourseLayout::new(tmp.path());
        let live = tmp.path().join("content").join("live.page");
        let gone = tmp.path().join("content").join("gone.page");
        fs::create_dir_all(&live).expect("mkdir");
        fs::create_dir_all(&gone).expect("mkdir");
        fs::write(live.join(INDEX_FILE), "x").expect("index");
        fs::write(live.join(SOURCE_FILE), "x").expect("artifact");
        fs::write(gone.join(SOURCE_FILE), "x").expect("artifact");
        fs::write(gone.join(META_FILE), "{}").expect("artifact");

        let planned = cleanup_orphans(&layout, true).expect("dry run");
        assert_eq!(planned.len(), 2);
        assert!(gone.join(SOURCE_FILE).exists());

        let removed = cleanup_orphans(&layout, false).expect("cleanup");
        assert_eq!(removed, vec![gone.join(META_FILE), gone.join(SOURCE_FILE)]);
        assert!(live.join(SOURCE_FILE).exists());
    }
}
