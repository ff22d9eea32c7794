//! Error types for kiln
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Recipe loading errors
#[derive(Error, Debug)]
pub enum RecipeError {
    /// Recipe not found in the recipe store
    #[error("Recipe '{id}' not found in {dir}")]
    NotFound { id: String, dir: PathBuf },

    /// Recipe file could not be read
    #[error("Failed to read recipe '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Recipe file is not valid TOML or misses fields
    #[error("Failed to parse recipe '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// Recipe file name and declared id disagree
    #[error("Recipe file '{path}' declares id '{declared}', expected '{expected}'")]
    IdMismatch {
        path: PathBuf,
        declared: String,
        expected: String,
    },

    /// Two recipe files declare the same id
    #[error("Recipe '{id}' is defined more than once (again in '{path}')")]
    Duplicate { id: String, path: PathBuf },

    /// Missing required field
    #[error("Recipe '{recipe}' is missing required field '{field}'")]
    MissingField { recipe: String, field: String },

    /// Field present but not acceptable
    #[error("Recipe '{recipe}' has invalid {field}: {reason}")]
    InvalidField {
        recipe: String,
        field: String,
        reason: String,
    },
}

/// Dependency resolution errors
///
/// Resolution errors are fatal for the whole run and are raised before any
/// process is spawned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    /// Circular dependency detected; `cycle` lists the members in discovery order
    #[error("Circular dependency detected: {} -> {}", cycle.join(" -> "), cycle.first().map_or("", String::as_str))]
    CircularDependency { cycle: Vec<String> },

    /// A declared dependency is absent from the recipe universe
    #[error("Missing dependency: '{dependency}' required by '{package}'")]
    MissingDependency { package: String, dependency: String },

    /// The requested target is not a known recipe
    #[error("Unknown recipe: '{id}'")]
    UnknownRecipe { id: String },
}

/// Failure of a single build, install or test step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The process could not be started
    #[error("Step {index} of '{node}' failed to start `{program}`: {error}")]
    Spawn {
        node: String,
        index: usize,
        program: String,
        error: String,
    },

    /// The process exited unsuccessfully
    #[error("Step {index} of '{node}' exited with {status}: {stderr_tail}")]
    NonZeroExit {
        node: String,
        index: usize,
        status: String,
        stderr_tail: String,
    },

    /// The process exceeded its timeout and was killed
    #[error("Step {index} of '{node}' timed out after {seconds}s: {stderr_tail}")]
    TimedOut {
        node: String,
        index: usize,
        seconds: u64,
        stderr_tail: String,
    },
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove directory
    #[error("Failed to remove directory '{path}': {error}")]
    RemoveDir { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to create a symlink
    #[error("Failed to link '{link}' -> '{target}': {error}")]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        error: String,
    },
}

/// Post-install config file could not be written
///
/// Fatal for that one file only; the configurator keeps going with the rest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to write config file '{path}': {error}")]
pub struct ConfigWriteError {
    pub path: PathBuf,
    pub error: String,
}

/// Verification setup errors
///
/// Assertion mismatches are not errors; they are collected in the report.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// The artifact tree to verify does not exist
    #[error("Installed tree not found at '{path}'. Build the recipe first.")]
    TreeMissing { path: PathBuf },

    /// Fixture setup failed
    #[error("Failed to prepare test fixtures: {error}")]
    Fixture { error: String },

    /// Pattern in an assertion is not a valid regex
    #[error("Assertion {index} has invalid pattern '{pattern}': {error}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        error: String,
    },
}
