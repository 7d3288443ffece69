//! Course directory layout.
//!
//! # Storage layout
//!
//! ```text
//! <course_root>/
//!   lectern.yaml                  (optional course config)
//!   content/ | pages/             (content items, `*.page`, `*.assignment`, ...)
//!     01-Intro.module/
//!       welcome.page/index.md
//!   shared/variables.yaml         (course variables)
//!   shared/<name>.md              (course includes)
//!   rubrics/<name>.yaml           (shared rubrics)
//!   rubrics/rows/<name>.yaml      (reusable rubric rows)
//!   outcomes/outcomes.yaml
//!   modules/module_order.yaml
//!   quiz-banks/<name>.bank.*
//!   templates/<name>.md.tera      (page wrappers)
//!   _course_metadata/             (cache, watch state, defaults, lock)
//! <global_root>/                  (defaults to <course_root>/../_all_courses)
//!   shared/variables.yaml
//!   shared/<name>.md
//! ```

use std::path::{Component, Path, PathBuf};

pub const CONTENT_DIR: &str = "content";
pub const LEGACY_CONTENT_DIR: &str = "pages";
pub const METADATA_DIR: &str = "_course_metadata";
pub const GLOBAL_DIR: &str = "_all_courses";
pub const CONFIG_FILE: &str = "lectern.yaml";
pub const INDEX_FILE: &str = "index.md";
pub const MODULE_SUFFIX: &str = "module";
pub const LEGACY_MODULE_PREFIX: &str = "module-";

/// Derived files the expansion stage writes into each item folder.
pub const ARTIFACT_FILES: [&str; 2] = ["source.md", "meta.json"];

const YAML_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Resolves every well-known path of one course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseLayout {
    root: PathBuf,
    global_root: PathBuf,
}

impl CourseLayout {
    /// Layout rooted at `root`, with the global directory beside it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let global_root = root
            .parent()
            .map(|p| p.join(GLOBAL_DIR))
            .unwrap_or_else(|| root.join(GLOBAL_DIR));
        CourseLayout { root, global_root }
    }

    /// Override the all-courses directory.
    pub fn with_global_root(mut self, global_root: impl Into<PathBuf>) -> Self {
        self.global_root = global_root.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn global_root(&self) -> &Path {
        &self.global_root
    }

    /// `content/`, or the legacy `pages/` when only that exists.
    pub fn content_dir(&self) -> PathBuf {
        let content = self.root.join(CONTENT_DIR);
        let legacy = self.root.join(LEGACY_CONTENT_DIR);
        if !content.exists() && legacy.exists() {
            legacy
        } else {
            content
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.metadata_dir().join("cache.json")
    }

    pub fn watch_state_file(&self) -> PathBuf {
        self.metadata_dir().join("watch_state.json")
    }

    pub fn defaults_file(&self) -> PathBuf {
        self.metadata_dir().join("defaults.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.metadata_dir().join(".lock")
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.root.join("shared")
    }

    pub fn course_variable_files(&self) -> Vec<PathBuf> {
        variable_files(&self.shared_dir())
    }

    pub fn global_variable_files(&self) -> Vec<PathBuf> {
        variable_files(&self.global_root.join("shared"))
    }

    /// Candidate files for `{{include:name}}`, in search order.
    ///
    /// Item-local first, then course level, then global; legacy `includes/`
    /// folders follow the preferred `shared/` folder at each level.
    pub fn include_candidates(&self, item_dir: Option<&Path>, name: &str) -> Vec<PathBuf> {
        let file = format!("{name}.md");
        let mut out = Vec::with_capacity(5);
        if let Some(dir) = item_dir {
            out.push(dir.join("includes").join(&file));
        }
        out.push(self.shared_dir().join(&file));
        out.push(self.root.join("includes").join(&file));
        out.push(self.global_root.join("shared").join(&file));
        out.push(self.global_root.join("includes").join(&file));
        out
    }

    pub fn item_rubric_candidates(&self, item_dir: &Path) -> Vec<PathBuf> {
        with_extensions(item_dir, "rubric")
    }

    pub fn rubrics_dir(&self) -> PathBuf {
        self.root.join("rubrics")
    }

    pub fn rubric_rows_dir(&self) -> PathBuf {
        self.rubrics_dir().join("rows")
    }

    pub fn shared_rubric_candidates(&self, name: &str) -> Vec<PathBuf> {
        with_extensions(&self.rubrics_dir(), name)
    }

    pub fn rubric_row_candidates(&self, name: &str) -> Vec<PathBuf> {
        with_extensions(&self.rubric_rows_dir(), name)
    }

    pub fn outcomes_dir(&self) -> PathBuf {
        self.root.join("outcomes")
    }

    pub fn outcomes_file(&self) -> PathBuf {
        self.outcomes_dir().join("outcomes.yaml")
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.root.join("modules")
    }

    pub fn module_order_file(&self) -> PathBuf {
        self.modules_dir().join("module_order.yaml")
    }

    pub fn quiz_banks_dir(&self) -> PathBuf {
        self.root.join("quiz-banks")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    /// Express `path` relative to the course root.
    ///
    /// Relative inputs are taken as already course-relative. Returns `None`
    /// for paths outside the root or containing `..` components.
    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.root).ok()?.to_path_buf()
        } else {
            path.to_path_buf()
        };
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(rel.components().filter(|c| !matches!(c, Component::CurDir)).collect())
    }
}

fn variable_files(dir: &Path) -> Vec<PathBuf> {
    vec![dir.join("variables.yaml"), dir.join("variables.yml")]
}

fn with_extensions(dir: &Path, stem: &str) -> Vec<PathBuf> {
    YAML_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .collect()
}

/// First existing path among `candidates`.
pub fn first_existing(candidates: &[PathBuf]) -> Option<&PathBuf> {
    candidates.iter().find(|p| p.is_file())
}
