//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Test project context
///
/// Creates a temporary directory holding a recipes directory and the
/// cache, config and data roots, and runs the kiln binary against them.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        let project = Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        };
        project.create_dir("recipes");
        project
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test project
    pub fn create_dir(&self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path).expect("Failed to create directory");
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Write `recipes/<id>.toml`
    pub fn add_recipe(&self, id: &str, toml: &str) {
        self.create_file(&format!("recipes/{id}.toml"), toml);
    }

    /// Installed tree of `id` at `version`, relative to the project
    pub fn installed(&self, id: &str, version: &str) -> String {
        format!("data/cellar/{id}/{version}")
    }

    /// Run kiln with `args` against this project
    pub fn kiln(&self, args: &[&str]) -> Output {
        let root = self.dir.path();
        Command::new(env!("CARGO_BIN_EXE_kiln"))
            .current_dir(root)
            .env("KILN_RECIPES", root.join("recipes"))
            .env("KILN_CACHE_DIR", root.join("cache"))
            .env("KILN_CONFIG_DIR", root.join("config"))
            .env("KILN_DATA_DIR", root.join("data"))
            .env_remove("KILN_PREFIX")
            .env_remove("RUST_LOG")
            .args(args)
            .output()
            .expect("Failed to execute kiln")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Exit code of a finished kiln run
pub fn exit_code(output: &Output) -> i32 {
    output.status.code().expect("kiln was killed by a signal")
}

/// Stdout as text
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Stderr as text
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Recipe whose single install step runs `script` under `sh -c`
pub fn shell_recipe(id: &str, deps: &[(&str, &str)], script: &str) -> String {
    let mut toml = format!("[package]\nid = \"{id}\"\nversion = \"1.0.0\"\n");
    for (dep, phase) in deps {
        toml.push_str(&format!(
            "\n[[dependencies]]\nid = \"{dep}\"\nphase = \"{phase}\"\n"
        ));
    }
    toml.push_str(&format!(
        "\n[[install.steps]]\nrun = [\"sh\", \"-c\", '''{script}''']\n"
    ));
    toml
}
