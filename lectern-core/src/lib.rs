//! Lectern core library: course layout, content model, configuration, errors.
//!
//! - [`layout`]: well-known paths of a course root
//! - [`types`]: content items, modules, rubrics, outcomes
//! - [`course`]: loading the course tree from disk
//! - [`config`]: settings and credential resolution
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod course;
pub mod error;
pub mod layout;
pub mod types;

pub use config::{
    load_settings, load_settings_at, CourseIdSource, Credentials, EnvOverrides, Settings,
};
pub use course::{load_course, Course, LoadFailure};
pub use error::CoreError;
pub use layout::CourseLayout;
pub use types::{
    normalize_name, ContentItem, ContentKind, Criterion, CriterionEntry, Frontmatter, Module,
    ModuleMember, OutcomeSpec, QuestionBankSource, Rating, RubricSpec, Stage,
};
