//! Output formatting and progress indicators
//!
//! This module provides utilities for displaying progress bars,
//! status-prefixed messages and JSON reports to the user.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// How much the user wants to see
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// Only errors
    pub quiet: bool,
    /// Machine-readable reports on stdout
    pub json: bool,
    /// `-v` count
    pub verbose: u8,
}

impl OutputConfig {
    /// Create an output configuration from the global flags
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self {
            quiet,
            json,
            verbose,
        }
    }

    /// Default log level: WARN, raised by `-v` (INFO) and `-vv` (DEBUG)
    pub fn log_level(&self) -> Level {
        match (self.quiet, self.verbose) {
            (true, _) => Level::ERROR,
            (false, 0) => Level::WARN,
            (false, 1) => Level::INFO,
            (false, _) => Level::DEBUG,
        }
    }

    /// Install the tracing subscriber; `RUST_LOG` still refines the filter
    pub fn init_tracing(&self) {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(self.log_level().into()))
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    /// Whether human-readable output goes to stdout
    pub fn human(&self) -> bool {
        !self.quiet && !self.json
    }

    /// Print a success line
    pub fn success(&self, message: &str) {
        if self.human() {
            println!("{} {message}", status::SUCCESS);
        }
    }

    /// Print a failure line (to stderr, even in quiet mode)
    pub fn failure(&self, message: &str) {
        if !self.json {
            eprintln!("{} {message}", status::ERROR);
        }
    }

    /// Print a warning line
    pub fn warning(&self, message: &str) {
        if !self.quiet && !self.json {
            eprintln!("{} {message}", status::WARNING);
        }
    }

    /// Print an informational line
    pub fn info(&self, message: &str) {
        if self.human() {
            println!("{} {message}", status::INFO);
        }
    }

    /// Print a value as pretty JSON
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Display an error with its cause chain
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} Error: {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Create a progress bar for plan nodes
pub fn create_build_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} recipes ({msg})")
            .map(|style| style.progress_chars("█▓▒░"))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}
