//! `lectern validate`: offline checks.

use anyhow::{Context, Result};
use clap::Args;

use lectern_sync::validate::validate;

use crate::commands::OpenCourse;
use crate::output::print_validation;
use crate::GlobalArgs;

/// Arguments for `lectern validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ValidateArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<u8> {
        let course = OpenCourse::open(global)?;
        let report = validate(&course.layout);
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize report")?
            );
        } else {
            print_validation(&report);
        }
        Ok(report.exit_code())
    }
}
