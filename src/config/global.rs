//! Global configuration management
//!
//! Reads and manages global settings from `config.toml` in the config
//! directory: default build options, path overrides and output preferences.
//! Command-line flags take precedence over these values, and these values
//! over the built-in defaults.

use crate::config::defaults::{DEFAULT_BUILD_JOBS, DEFAULT_RECIPES_DIR};
use crate::infra::dirs::KilnDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Global configuration error types
#[derive(Error, Debug)]
pub enum GlobalConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },
}

/// Global configuration for kiln
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Default build options
    #[serde(default)]
    pub build: BuildConfig,

    /// Path overrides
    #[serde(default)]
    pub paths: PathsConfig,

    /// Output preferences
    #[serde(default)]
    pub output: OutputConfig,
}

/// Default build options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildConfig {
    /// Default number of parallel jobs
    pub jobs: Option<usize>,

    /// Default per-step timeout in seconds
    pub step_timeout: Option<u64>,

    /// Keep staging directories after successful builds
    pub keep_staging: Option<bool>,
}

/// Path overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathsConfig {
    /// Recipes directory
    pub recipes: Option<PathBuf>,

    /// Root of installed artifact trees
    pub prefix: Option<PathBuf>,

    /// Root of staging directories
    pub staging: Option<PathBuf>,
}

/// Output preferences
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Enable quiet mode
    pub quiet: Option<bool>,

    /// Enable JSON output
    pub json: Option<bool>,
}

impl GlobalConfig {
    /// Load global configuration from the config directory
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// If the config file exists but is invalid, returns an error.
    pub fn load(dirs: &KilnDirs) -> Result<Self, GlobalConfigError> {
        Self::load_from_path(&dirs.global_config_path())
    }

    /// Load global configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, GlobalConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GlobalConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| GlobalConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Get the effective number of build jobs
    ///
    /// Falls back to the CPU count, then to the built-in default.
    #[must_use]
    pub fn build_jobs(&self) -> usize {
        self.build.jobs.filter(|j| *j > 0).unwrap_or_else(|| {
            let cpus = num_cpus::get();
            if cpus == 0 {
                DEFAULT_BUILD_JOBS
            } else {
                cpus
            }
        })
    }

    /// Get the default step timeout, if any
    #[must_use]
    pub fn step_timeout(&self) -> Option<Duration> {
        self.build.step_timeout.map(Duration::from_secs)
    }

    /// Whether staging directories are kept by default
    #[must_use]
    pub fn keep_staging(&self) -> bool {
        self.build.keep_staging.unwrap_or(false)
    }

    /// Get the effective recipes directory
    #[must_use]
    pub fn recipes_dir(&self) -> PathBuf {
        self.paths
            .recipes
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECIPES_DIR))
    }

    /// Get the effective prefix root
    #[must_use]
    pub fn prefix_root(&self, dirs: &KilnDirs) -> PathBuf {
        self.paths.prefix.clone().unwrap_or_else(|| dirs.prefix_root())
    }

    /// Get the effective staging root
    #[must_use]
    pub fn staging_root(&self, dirs: &KilnDirs) -> PathBuf {
        self.paths
            .staging
            .clone()
            .unwrap_or_else(|| dirs.staging_root())
    }
}
