//! Tera page wrappers: `templates/<name>.md.tera` around an item body.
//!
//! # Selection
//!
//! | frontmatter `template` | course file                      | used                      |
//! |------------------------|----------------------------------|---------------------------|
//! | `name`                 | `templates/name.md.tera`         | that file                 |
//! | `name`                 | missing                          | error                     |
//! | absent                 | `templates/default.md.tera`      | that file                 |
//! | absent                 | missing                          | embedded `{{ body }}`     |
//!
//! Wrapping happens before placeholder expansion, so wrapper text may carry
//! `{{include:...}}` tokens through a tera string literal.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use lectern_core::types::ContentItem;
use serde::Serialize;
use tera::Tera;

use crate::error::{io_err, TemplateError};

pub const DEFAULT_TEMPLATE: &str = "default";
const TEMPLATE_SUFFIX: &str = ".md.tera";

const EMBEDDED: &[(&str, &str)] = &[(DEFAULT_TEMPLATE, "{{ body }}")];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn normalize_template_name(rel: &Path) -> Option<String> {
    let name = rel.to_string_lossy().replace('\\', "/");
    name.strip_suffix(TEMPLATE_SUFFIX).map(str::to_lowercase)
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), TemplateError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_course_templates(dir: &Path) -> Result<Vec<(String, String)>, TemplateError> {
    if !dir.is_dir() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let Some(name) = normalize_template_name(rel) else {
            continue;
        };
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents.replace("\r\n", "\n")));
    }
    Ok(templates)
}

// ---------------------------------------------------------------------------
// PageWrapper
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WrapContext<'a> {
    body: &'a str,
    name: &'a str,
    kind: &'a str,
    vars: &'a BTreeMap<String, String>,
}

/// Course wrapper templates, compiled once per run.
pub struct PageWrapper {
    tera: Tera,
    course_names: Vec<String>,
}

impl PageWrapper {
    /// Embedded default plus every `*.md.tera` under `templates_dir`.
    pub fn new(templates_dir: Option<&Path>) -> Result<Self, TemplateError> {
        let mut templates: HashMap<String, String> = EMBEDDED
            .iter()
            .map(|(n, c)| (n.to_string(), c.to_string()))
            .collect();
        let mut course_names = Vec::new();
        if let Some(dir) = templates_dir {
            for (name, content) in load_course_templates(dir)? {
                course_names.push(name.clone());
                templates.insert(name, content);
            }
        }
        course_names.sort();

        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_templates(templates)?;
        Ok(PageWrapper { tera, course_names })
    }

    /// Names of course-provided templates, sorted.
    pub fn course_templates(&self) -> &[String] {
        &self.course_names
    }

    /// Template name `item` resolves to.
    pub fn select(&self, item: &ContentItem) -> Result<String, TemplateError> {
        match item.frontmatter.template.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => {
                let wanted = name.to_lowercase();
                if self.tera.get_template_names().any(|n| n == wanted) {
                    Ok(wanted)
                } else {
                    Err(TemplateError::UnknownTemplate {
                        name: name.to_string(),
                    })
                }
            }
            _ => Ok(DEFAULT_TEMPLATE.to_string()),
        }
    }

    /// Render `item`'s body template through its wrapper.
    pub fn wrap(
        &self,
        item: &ContentItem,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, TemplateError> {
        let name = self.select(item)?;
        let ctx = WrapContext {
            body: &item.body_template,
            name: &item.declared_name,
            kind: item.kind.suffix(),
            vars,
        };
        let ctx = tera::Context::from_serialize(ctx)?;
        Ok(self.tera.render(&name, &ctx)?)
    }
}

impl std::fmt::Debug for PageWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWrapper")
            .field("course_names", &self.course_names)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::types::{ContentKind, Frontmatter, ItemSortKey};
    use tempfile::TempDir;

    fn item(template: Option<&str>, body: &str) -> ContentItem {
        ContentItem {
            logical_path: PathBuf::from("content/a.page"),
            dir: PathBuf::from("/c/content/a.page"),
            kind: ContentKind::Page,
            declared_name: "Welcome".into(),
            module_memberships: vec![],
            sort_key: ItemSortKey { tier: 2, rank: 0, folder: "a".into() },
            frontmatter: Frontmatter {
                template: template.map(str::to_string),
                ..Frontmatter::default()
            },
            body_template: body.into(),
        }
    }

    #[test]
    fn embedded_default_is_identity() {
        let wrapper = PageWrapper::new(None).expect("wrapper");
        let body = "Hello {{var:term}}\n<b>raw</b>\n";
        let out = wrapper.wrap(&item(None, body), &BTreeMap::new()).expect("wrap");
        assert_eq!(out, body);
    }

    #[test]
    fn course_default_overrides_embedded() {
        let tmp = TempDir::new().expect("tmp");
        std::fs::write(
            tmp.path().join("default.md.tera"),
            "# {{ name }} ({{ kind }})\n{{ body }}\n-- {{ vars.term }}",
        )
        .expect("tpl");
        let wrapper = PageWrapper::new(Some(tmp.path())).expect("wrapper");
        let vars = BTreeMap::from([("term".to_string(), "Fall".to_string())]);
        let out = wrapper.wrap(&item(None, "Body"), &vars).expect("wrap");
        assert_eq!(out, "# Welcome (page)\nBody\n-- Fall");
    }

    #[test]
    fn named_template_must_exist() {
        let wrapper = PageWrapper::new(None).expect("wrapper");
        let err = wrapper.wrap(&item(Some("fancy"), "x"), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownTemplate { .. }));
    }

    #[test]
    fn non_template_files_are_ignored() {
        let tmp = TempDir::new().expect("tmp");
        std::fs::write(tmp.path().join("notes.txt"), "{{ broken").expect("txt");
        std::fs::write(tmp.path().join("lab.md.tera"), "LAB {{ body }}").expect("lab");
        let wrapper = PageWrapper::new(Some(tmp.path())).expect("wrapper");
        assert_eq!(wrapper.course_templates(), ["lab".to_string()]);
        let out = wrapper.wrap(&item(Some("Lab"), "x"), &BTreeMap::new()).expect("wrap");
        assert_eq!(out, "LAB x");
    }
}
