//! Subcommands and the course/settings resolution they share.

pub mod list;
pub mod prune;
pub mod status;
pub mod sync;
pub mod validate;

use anyhow::{Context, Result};

use lectern_core::config::{load_settings, CourseIdSource, EnvOverrides, Settings};
use lectern_core::layout::CourseLayout;

use crate::canvas::CanvasClient;
use crate::GlobalArgs;

/// A course folder with its merged settings.
pub struct OpenCourse {
    pub layout: CourseLayout,
    pub settings: Settings,
}

impl OpenCourse {
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let root = match &global.course_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().context("could not determine current directory")?,
        };
        let layout = CourseLayout::new(&root);
        let settings = load_settings(&layout, &EnvOverrides::from_env())
            .with_context(|| format!("failed to load settings for {}", root.display()))?;
        let layout = match &settings.global_root {
            Some(global_root) => layout.with_global_root(root.join(global_root)),
            None => layout,
        };
        Ok(OpenCourse { layout, settings })
    }

    pub fn course_id(&self, explicit: Option<&str>) -> Result<(String, CourseIdSource)> {
        self.settings.course_id(explicit).context(
            "no course id: pass --course-id, set LECTERN_COURSE_ID or add course_id to lectern.yaml",
        )
    }

    pub fn client(&self) -> Result<CanvasClient> {
        let credentials = self
            .settings
            .credentials()
            .context("LMS credentials are not configured")?;
        tracing::debug!("using API at {}", credentials.api_url);
        Ok(CanvasClient::new(&credentials, &self.settings.http))
    }
}
