//! Lectern: keep a course folder and its LMS course in step.
//!
//! # Usage
//!
//! ```text
//! lectern [--course-root DIR] [--verbose] sync [--dry-run [--diff]] [--watch] [--skip-prune] [--assets-only] [--course-id ID]
//! lectern [--course-root DIR] prune [--dry-run] [--skip-assignments] [--course-id ID]
//! lectern [--course-root DIR] validate [--json]
//! lectern [--course-root DIR] status [--json]
//! lectern [--course-root DIR] list [--kind KIND] [--module NAME] [--json]
//! ```

mod canvas;
mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use commands::{
    list::ListArgs, prune::PruneArgs, status::StatusArgs, sync::SyncArgs, validate::ValidateArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "lectern",
    version,
    about = "Publish a course folder to an LMS course and keep them in sync",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Course folder (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    pub course_root: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit log records as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Expand, publish and reconcile the course.
    Sync(SyncArgs),

    /// Delete remote content that is no longer declared locally.
    Prune(PruneArgs),

    /// Check the course folder without contacting the LMS.
    Validate(ValidateArgs),

    /// Show course id resolution and the last run.
    Status(StatusArgs),

    /// List content items by kind and module.
    List(ListArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn run(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::Sync(args) => args.run(&cli.global),
        Commands::Prune(args) => args.run(&cli.global),
        Commands::Validate(args) => args.run(&cli.global),
        Commands::Status(args) => args.run(&cli.global),
        Commands::List(args) => args.run(&cli.global),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    lectern_watch::init_tracing(cli.global.verbose, cli.global.log_json);
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(1)
        }
    }
}
