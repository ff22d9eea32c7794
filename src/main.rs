//! kiln CLI - package build orchestrator
//!
//! Entry point for the kiln command-line application.

use std::process::ExitCode;

use clap::Parser;

use kiln::cli::output::display_error;
use kiln::cli::{Cli, RunStatus};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    cli.output().init_tracing();

    // Run the command and map the outcome to an exit code
    let status = match cli.run().await {
        Ok(status) => status,
        Err(e) => {
            display_error(&e);
            RunStatus::for_error(&e)
        }
    };
    ExitCode::from(status.code())
}
