//! Placeholder expansion for `{{var:key}}` and `{{include:name}}`.
//!
//! # Resolution
//!
//! 1. Text is scanned left to right for placeholders.
//! 2. A variable is replaced by its value (see [`SharedVariables::lookup`]);
//!    the value is inserted literally and not scanned again. Unknown
//!    variables stay as literal placeholder text.
//! 3. An include pushes a new frame holding the fragment's text, which is
//!    scanned the same way before being spliced into its parent.
//! 4. An include whose name is already on the frame stack is a
//!    [`TemplateCycleError`]. A missing include stays literal, with a warning.
//!
//! Expansion is a pure function of the input text, the frontmatter, and the
//! referenced files on disk.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use lectern_core::layout::{first_existing, CourseLayout};
use lectern_core::types::Frontmatter;
use regex::Regex;

use crate::error::{io_err, CycleKind, TemplateCycleError, TemplateError};
use crate::vars::SharedVariables;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*(var|include):([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*\}\}")
            .expect("placeholder regex is valid")
    })
}

/// Where an expansion runs: the owning item's frontmatter and folder.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandScope<'a> {
    pub frontmatter: Option<&'a Frontmatter>,
    pub item_dir: Option<&'a Path>,
}

/// Expanded text plus what was consulted to produce it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub text: String,
    /// Include files read, in first-use order.
    pub includes: Vec<PathBuf>,
    /// Variable keys left unresolved.
    pub unresolved_vars: Vec<String>,
    /// Include names with no file in any search location.
    pub missing_includes: Vec<String>,
}

struct Frame {
    name: Option<String>,
    text: String,
    pos: usize,
    out: String,
}

enum Token {
    Var(String),
    Include(String),
}

/// Expands placeholders against one course's variables and include folders.
#[derive(Debug, Clone, Copy)]
pub struct Expander<'a> {
    layout: &'a CourseLayout,
    vars: &'a SharedVariables,
}

impl<'a> Expander<'a> {
    pub fn new(layout: &'a CourseLayout, vars: &'a SharedVariables) -> Self {
        Expander { layout, vars }
    }

    pub fn variables(&self) -> &SharedVariables {
        self.vars
    }

    /// Expand `text` within `scope`.
    pub fn expand(&self, text: &str, scope: ExpandScope<'_>) -> Result<Expansion, TemplateError> {
        let mut result = Expansion::default();
        let mut frames = vec![Frame {
            name: None,
            text: text.to_string(),
            pos: 0,
            out: String::with_capacity(text.len()),
        }];

        loop {
            let Some(top) = frames.last_mut() else { break };

            let found = placeholder_re().captures_at(&top.text, top.pos).map(|caps| {
                let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
                let key = caps[2].to_string();
                let token = if &caps[1] == "var" {
                    Token::Var(key)
                } else {
                    Token::Include(key)
                };
                (whole, token)
            });

            let Some(((start, end), token)) = found else {
                let mut out = std::mem::take(&mut top.out);
                out.push_str(&top.text[top.pos..]);
                frames.pop();
                match frames.last_mut() {
                    Some(parent) => parent.out.push_str(&out),
                    None => {
                        result.text = out;
                        return Ok(result);
                    }
                }
                continue;
            };

            let literal = top.text[start..end].to_string();
            top.out.push_str(&top.text[top.pos..start]);
            top.pos = end;

            match token {
                Token::Var(key) => match self.vars.lookup(scope.frontmatter, &key) {
                    Some(value) => top.out.push_str(&value),
                    None => {
                        top.out.push_str(&literal);
                        if !result.unresolved_vars.contains(&key) {
                            result.unresolved_vars.push(key);
                        }
                    }
                },
                Token::Include(name) => {
                    if frames.iter().any(|f| f.name.as_deref() == Some(name.as_str())) {
                        let mut chain: Vec<String> =
                            frames.iter().filter_map(|f| f.name.clone()).collect();
                        chain.push(name);
                        return Err(TemplateCycleError {
                            kind: CycleKind::Include,
                            chain,
                        }
                        .into());
                    }
                    let candidates = self.layout.include_candidates(scope.item_dir, &name);
                    match first_existing(&candidates) {
                        Some(path) => {
                            let body = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
                            if !result.includes.contains(path) {
                                result.includes.push(path.clone());
                            }
                            frames.push(Frame {
                                name: Some(name),
                                out: String::with_capacity(body.len()),
                                text: body,
                                pos: 0,
                            });
                        }
                        None => {
                            if let Some(top) = frames.last_mut() {
                                top.out.push_str(&literal);
                            }
                            tracing::warn!(
                                "include '{name}' not found{}",
                                scope
                                    .item_dir
                                    .map(|d| format!(" for {}", d.display()))
                                    .unwrap_or_default()
                            );
                            if !result.missing_includes.contains(&name) {
                                result.missing_includes.push(name);
                            }
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    /// Expand a short text field, discarding the bookkeeping.
    pub fn expand_str(&self, text: &str, scope: ExpandScope<'_>) -> Result<String, TemplateError> {
        Ok(self.expand(text, scope)?.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn setup() -> (TempDir, CourseLayout) {
        let tmp = TempDir::new().expect("tmp");
        let root = tmp.path().join("course");
        std::fs::create_dir_all(root.join("shared")).expect("mkdir shared");
        let layout = CourseLayout::new(&root).with_global_root(tmp.path().join("global"));
        (tmp, layout)
    }

    fn vars(pairs: &[(&str, &str)]) -> SharedVariables {
        let course: BTreeMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        SharedVariables::from_maps(course, BTreeMap::new())
    }

    #[test]
    fn unresolved_variables_stay_literal() {
        let (_tmp, layout) = setup();
        let v = vars(&[("term", "Fall")]);
        let out = Expander::new(&layout, &v)
            .expand("{{var:term}} / {{ var:room }}", ExpandScope::default())
            .expect("expand");
        assert_eq!(out.text, "Fall / {{ var:room }}");
        assert_eq!(out.unresolved_vars, vec!["room".to_string()]);
    }

    #[test]
    fn variable_values_are_not_rescanned() {
        let (_tmp, layout) = setup();
        let v = vars(&[("a", "{{var:b}}"), ("b", "B")]);
        let out = Expander::new(&layout, &v)
            .expand("{{var:a}}", ExpandScope::default())
            .expect("expand");
        assert_eq!(out.text, "{{var:b}}");
    }

    #[test]
    fn nested_includes_expand_variables() {
        let (_tmp, layout) = setup();
        std::fs::write(layout.shared_dir().join("outer.md"), "[{{include:inner}}]").expect("outer");
        std::fs::write(layout.shared_dir().join("inner.md"), "term={{var:term}}").expect("inner");
        let v = vars(&[("term", "Fall")]);
        let out = Expander::new(&layout, &v)
            .expand("A {{include:outer}} Z", ExpandScope::default())
            .expect("expand");
        assert_eq!(out.text, "A [term=Fall] Z");
        assert_eq!(out.includes.len(), 2);
    }

    #[test]
    fn same_include_twice_in_sequence_is_not_a_cycle() {
        let (_tmp, layout) = setup();
        std::fs::write(layout.shared_dir().join("sig.md"), "S").expect("sig");
        let v = vars(&[]);
        let out = Expander::new(&layout, &v)
            .expand("{{include:sig}}{{include:sig}}", ExpandScope::default())
            .expect("expand");
        assert_eq!(out.text, "SS");
    }

    #[test]
    fn self_include_is_a_cycle() {
        let (_tmp, layout) = setup();
        std::fs::write(layout.shared_dir().join("loop.md"), "x {{include:loop}}").expect("loop");
        let v = vars(&[]);
        let err = Expander::new(&layout, &v)
            .expand("{{include:loop}}", ExpandScope::default())
            .unwrap_err();
        match err {
            TemplateError::Cycle(cycle) => {
                assert_eq!(cycle.chain, vec!["loop".to_string(), "loop".to_string()]);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn missing_include_stays_literal() {
        let (_tmp, layout) = setup();
        let v = vars(&[]);
        let out = Expander::new(&layout, &v)
            .expand("before {{include:ghost}} after", ExpandScope::default())
            .expect("expand");
        assert_eq!(out.text, "before {{include:ghost}} after");
        assert_eq!(out.missing_includes, vec!["ghost".to_string()]);
    }
}
