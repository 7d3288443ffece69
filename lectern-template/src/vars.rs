//! Shared variables for `{{var:key}}` resolution.
//!
//! Lookup order: item frontmatter, then course `shared/variables.yaml`, then
//! global `<global_root>/shared/variables.yaml`. First match wins.

use std::collections::BTreeMap;
use std::path::Path;

use lectern_core::layout::{first_existing, CourseLayout};
use lectern_core::types::{scalar_text, Frontmatter};
use serde_json::Value;

use crate::error::{io_err, TemplateError};

/// Course and global variable tables, loaded once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedVariables {
    course: BTreeMap<String, String>,
    global: BTreeMap<String, String>,
}

impl SharedVariables {
    pub fn load(layout: &CourseLayout) -> Result<Self, TemplateError> {
        Ok(SharedVariables {
            course: read_table(first_existing(&layout.course_variable_files()))?,
            global: read_table(first_existing(&layout.global_variable_files()))?,
        })
    }

    pub fn from_maps(course: BTreeMap<String, String>, global: BTreeMap<String, String>) -> Self {
        SharedVariables { course, global }
    }

    /// Resolve `key` with frontmatter taking precedence over shared tables.
    pub fn lookup(&self, frontmatter: Option<&Frontmatter>, key: &str) -> Option<String> {
        frontmatter
            .and_then(|fm| fm.variable(key))
            .or_else(|| self.course.get(key).cloned())
            .or_else(|| self.global.get(key).cloned())
    }

    /// Course over global, as one table (wrapper template context).
    pub fn merged(&self) -> BTreeMap<String, String> {
        let mut out = self.global.clone();
        out.extend(self.course.clone());
        out
    }

    pub fn is_empty(&self) -> bool {
        self.course.is_empty() && self.global.is_empty()
    }
}

fn read_table(path: Option<&std::path::PathBuf>) -> Result<BTreeMap<String, String>, TemplateError> {
    let Some(path) = path else {
        return Ok(BTreeMap::new());
    };
    let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse_table(path, &text)
}

/// Parse a variables file; non-scalar values are skipped with a warning.
pub fn parse_table(path: &Path, text: &str) -> Result<BTreeMap<String, String>, TemplateError> {
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<String, Value> =
        serde_yaml::from_str(text).map_err(|e| TemplateError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        match scalar_text(&value) {
            Some(text) => {
                out.insert(key, text);
            }
            None if value.is_null() => {}
            None => tracing::warn!("{}: variable '{key}' is not a scalar; ignored", path.display()),
        }
    }
    tracing::debug!("loaded {} variable(s) from {}", out.len(), path.display());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn frontmatter_beats_course_beats_global() {
        let vars = SharedVariables::from_maps(
            table(&[("term", "Fall"), ("room", "B12")]),
            table(&[("term", "Any"), ("school", "North")]),
        );
        let mut fm = Frontmatter::default();
        fm.extra.insert("room".into(), Value::String("Lab 3".into()));

        assert_eq!(vars.lookup(Some(&fm), "room").as_deref(), Some("Lab 3"));
        assert_eq!(vars.lookup(Some(&fm), "term").as_deref(), Some("Fall"));
        assert_eq!(vars.lookup(None, "school").as_deref(), Some("North"));
        assert_eq!(vars.lookup(None, "nope"), None);
    }

    #[test]
    fn merged_prefers_course_values() {
        let vars = SharedVariables::from_maps(table(&[("a", "course")]), table(&[("a", "global"), ("b", "g")]));
        let merged = vars.merged();
        assert_eq!(merged["a"], "course");
        assert_eq!(merged["b"], "g");
    }

    #[test]
    fn parse_table_keeps_scalars_only() {
        let parsed = parse_table(
            Path::new("variables.yaml"),
            "instructor: Dr. Reyes\ncredits: 3\nlist: [1, 2]\nempty:\n",
        )
        .expect("parse");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["credits"], "3");
    }
}
