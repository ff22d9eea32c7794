//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::error::{RecipeError, ResolverError};
use commands::{Commands, Session};
use output::OutputConfig;

/// kiln - package build orchestrator
///
/// Resolve a recipe's dependencies, build and install every node, write
/// post-install configuration and verify the result.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding `<id>.toml` recipes
    #[arg(long, global = true, env = "KILN_RECIPES", value_name = "DIR")]
    pub recipes: Option<PathBuf>,

    /// Root of the installed artifact trees
    #[arg(long, global = true, env = "KILN_PREFIX", value_name = "DIR")]
    pub prefix: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Everything succeeded
    Success,
    /// At least one node failed, or the command hit an error
    Failed,
    /// The plan could not be resolved
    ResolutionFailed,
    /// The self-test reported failed assertions
    VerificationFailed,
}

impl RunStatus {
    /// Process exit code
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::ResolutionFailed => 2,
            Self::VerificationFailed => 3,
        }
    }

    /// Status for a command that ended in `error`
    ///
    /// Unloadable recipes and unresolvable plans count as resolution
    /// failures; anything else is a plain failure.
    pub fn for_error(error: &anyhow::Error) -> Self {
        let resolution = error
            .chain()
            .any(|cause| cause.is::<ResolverError>() || cause.is::<RecipeError>());
        if resolution {
            Self::ResolutionFailed
        } else {
            Self::Failed
        }
    }
}

impl Cli {
    /// Output settings requested on the command line
    pub fn output(&self) -> OutputConfig {
        OutputConfig::new(self.quiet, self.json, self.verbose)
    }

    /// Execute the CLI command
    pub async fn run(self) -> Result<RunStatus> {
        let output = self.output();
        let session = Session::new(self.recipes, self.prefix, output)?;
        self.command.run(&session).await
    }
}
