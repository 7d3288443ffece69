//! # lectern-template
//!
//! Template expansion for course items: tera page wrappers, `{{var:...}}` and
//! `{{include:...}}` placeholders, and `{{rubric_row:...}}` inlining in
//! rubric criteria lists.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lectern_core::{course, CourseLayout};
//! use lectern_template::Renderer;
//!
//! fn expand_all(layout: &CourseLayout) {
//!     let Ok(loaded) = course::load_course(layout) else { return };
//!     if let Ok(renderer) = Renderer::load(layout) {
//!         for item in &loaded.items {
//!             if let Ok(expansion) = renderer.render_body(item) {
//!                 println!("{}: {} bytes", item.logical_path.display(), expansion.text.len());
//!             }
//!         }
//!     }
//! }
//! ```

pub mod engine;
pub mod error;
pub mod expand;
pub mod rubric;
pub mod vars;
pub mod wrapper;

pub use engine::Renderer;
pub use error::{CycleKind, TemplateCycleError, TemplateError};
pub use expand::{ExpandScope, Expander, Expansion};
pub use rubric::{load_item_rubric, resolve_rubric, ResolvedRubric, RubricSource};
pub use vars::SharedVariables;
pub use wrapper::PageWrapper;
