//! [`Renderer`]: per-run bundle of variables, wrappers and the expander.
//!
//! # Item pipeline
//!
//! | step | input                     | output                         |
//! |------|---------------------------|--------------------------------|
//! | 1    | `index.md` body template  | wrapped body (tera)            |
//! | 2    | wrapped body              | expanded body (vars, includes) |
//! | 3    | rubric file / use_rubric  | resolved rubric (assignments)  |

use lectern_core::layout::CourseLayout;
use lectern_core::types::{ContentItem, ContentKind};

use crate::error::TemplateError;
use crate::expand::{ExpandScope, Expander, Expansion};
use crate::rubric::{load_item_rubric, resolve_rubric, ResolvedRubric};
use crate::vars::SharedVariables;
use crate::wrapper::PageWrapper;

/// Loaded once per run; shared read-only across worker threads.
#[derive(Debug)]
pub struct Renderer {
    layout: CourseLayout,
    vars: SharedVariables,
    wrapper: PageWrapper,
}

impl Renderer {
    /// Load shared variables and course wrapper templates for `layout`.
    pub fn load(layout: &CourseLayout) -> Result<Self, TemplateError> {
        let vars = SharedVariables::load(layout)?;
        let wrapper = PageWrapper::new(Some(&layout.templates_dir()))?;
        Ok(Renderer {
            layout: layout.clone(),
            vars,
            wrapper,
        })
    }

    pub fn from_parts(layout: CourseLayout, vars: SharedVariables, wrapper: PageWrapper) -> Self {
        Renderer { layout, vars, wrapper }
    }

    pub fn layout(&self) -> &CourseLayout {
        &self.layout
    }

    pub fn variables(&self) -> &SharedVariables {
        &self.vars
    }

    pub fn expander(&self) -> Expander<'_> {
        Expander::new(&self.layout, &self.vars)
    }

    /// Wrap and expand `item`'s body.
    ///
    /// Link and file items carry no body and are returned unexpanded.
    pub fn render_body(&self, item: &ContentItem) -> Result<Expansion, TemplateError> {
        let scope = ExpandScope {
            frontmatter: Some(&item.frontmatter),
            item_dir: Some(&item.dir),
        };
        match item.kind {
            ContentKind::Page | ContentKind::Assignment => {
                let wrapped = self.wrapper.wrap(item, &self.vars.merged())?;
                self.expander().expand(&wrapped, scope)
            }
            ContentKind::Quiz => self.expander().expand(&item.body_template, scope),
            ContentKind::Link | ContentKind::File => Ok(Expansion {
                text: item.body_template.clone(),
                ..Expansion::default()
            }),
        }
    }

    /// Resolve the rubric attached to an assignment; `None` for other kinds
    /// or when no rubric is declared.
    pub fn rubric(&self, item: &ContentItem) -> Result<Option<ResolvedRubric>, TemplateError> {
        if item.kind != ContentKind::Assignment {
            return Ok(None);
        }
        let Some(source) = load_item_rubric(&self.layout, item)? else {
            return Ok(None);
        };
        let scope = ExpandScope {
            frontmatter: Some(&item.frontmatter),
            item_dir: Some(&item.dir),
        };
        resolve_rubric(&self.layout, &source, &self.expander(), scope).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::types::{Frontmatter, ItemSortKey};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn item(root: &std::path::Path, kind: ContentKind, body: &str) -> ContentItem {
        let dir = root.join("content").join(format!("x.{}", kind.suffix()));
        std::fs::create_dir_all(&dir).expect("mkdir item");
        ContentItem {
            logical_path: PathBuf::from(format!("content/x.{}", kind.suffix())),
            dir,
            kind,
            declared_name: "X".into(),
            module_memberships: vec![],
            sort_key: ItemSortKey { tier: 2, rank: 0, folder: "x".into() },
            frontmatter: Frontmatter::default(),
            body_template: body.into(),
        }
    }

    #[test]
    fn render_is_deterministic() {
        let tmp = TempDir::new().expect("tmp");
        std::fs::create_dir_all(tmp.path().join("shared")).expect("shared");
        std::fs::write(tmp.path().join("shared/variables.yaml"), "term: Fall\n").expect("vars");
        let layout = CourseLayout::new(tmp.path());
        let renderer = Renderer::load(&layout).expect("renderer");
        let page = item(tmp.path(), ContentKind::Page, "Term: {{var:term}}\n");

        let first = renderer.render_body(&page).expect("first");
        let second = renderer.render_body(&page).expect("second");
        assert_eq!(first.text, "Term: Fall\n");
        assert_eq!(first, second);
    }

    #[test]
    fn links_are_not_expanded() {
        let tmp = TempDir::new().expect("tmp");
        let layout = CourseLayout::new(tmp.path());
        let renderer = Renderer::load(&layout).expect("renderer");
        let link = item(tmp.path(), ContentKind::Link, "{{var:term}}");
        assert_eq!(renderer.render_body(&link).expect("render").text, "{{var:term}}");
    }

    #[test]
    fn pages_have_no_rubric() {
        let tmp = TempDir::new().expect("tmp");
        let layout = CourseLayout::new(tmp.path());
        let renderer = Renderer::load(&layout).expect("renderer");
        let page = item(tmp.path(), ContentKind::Page, "");
        assert!(renderer.rubric(&page).expect("rubric").is_none());
    }
}
