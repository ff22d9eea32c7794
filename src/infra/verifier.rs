//! Verification runner
//!
//! Runs a recipe's self-test against its installed artifact tree. Fixture
//! files are written into a fresh temporary directory that is the working
//! directory of every assertion; the tree itself is only read.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info};

use crate::core::build_env::InstalledTree;
use crate::core::recipe::Recipe;
use crate::core::template::{self, Vars};
use crate::core::verify::{
    evaluate, AssertionOutcome, Expectation, Observation, TestProcedure, VerificationReport,
};
use crate::error::VerifyError;
use crate::infra::linkage;
use crate::infra::process::{self, ProcessSpec, StepStatus};

/// Runs test procedures
#[derive(Debug, Clone)]
pub struct Verifier {
    system_path: String,
    dependency_bins: Vec<PathBuf>,
    timeout: Option<Duration>,
}

impl Verifier {
    /// Create a verifier whose commands see `tree/bin` ahead of `system_path`
    pub fn new(system_path: impl Into<String>) -> Self {
        Self {
            system_path: system_path.into(),
            dependency_bins: Vec::new(),
            timeout: None,
        }
    }

    /// Put the `bin` directories of `deps` on the search path, after the
    /// tree under test and ahead of the system path
    #[must_use]
    pub fn with_dependencies(mut self, deps: &[InstalledTree]) -> Self {
        let mut deps: Vec<&InstalledTree> = deps.iter().collect();
        deps.sort_by(|a, b| a.id.cmp(&b.id));
        self.dependency_bins = deps.iter().map(|d| d.bin()).collect();
        self
    }

    /// Kill assertion commands after `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn search_path(&self, tree: &Path) -> String {
        let mut path: Vec<String> = std::iter::once(tree.join("bin"))
            .chain(self.dependency_bins.iter().cloned())
            .map(|p| p.display().to_string())
            .collect();
        if !self.system_path.is_empty() {
            path.push(self.system_path.clone());
        }
        path.join(":")
    }

    /// Run `procedure` against the tree at `tree`
    ///
    /// Every assertion runs and is reported, even after a failure.
    pub async fn verify(
        &self,
        recipe: &Recipe,
        tree: &Path,
        procedure: &TestProcedure,
    ) -> Result<VerificationReport, VerifyError> {
        if !tree.is_dir() {
            return Err(VerifyError::TreeMissing {
                path: tree.to_path_buf(),
            });
        }
        validate(procedure)?;

        let scratch = TempDir::new().map_err(|e| VerifyError::Fixture {
            error: e.to_string(),
        })?;
        write_fixtures(scratch.path(), procedure)?;

        let mut vars = Vars::new();
        vars.insert("prefix", tree.display().to_string());
        vars.insert("testdir", scratch.path().display().to_string());
        vars.insert("version", recipe.version().to_string());
        vars.insert("major", recipe.version_major());

        let mut base_env = BTreeMap::new();
        base_env.insert("PATH".to_string(), self.search_path(tree));
        base_env.insert("PREFIX".to_string(), tree.display().to_string());
        base_env.insert("HOME".to_string(), scratch.path().display().to_string());

        let mut outcomes = Vec::with_capacity(procedure.assertions.len());
        for (index, assertion) in procedure.assertions.iter().enumerate() {
            let mut observed = Observation::default();

            if !assertion.run.is_empty() {
                let mut env = base_env.clone();
                for (key, value) in &assertion.env {
                    env.insert(key.clone(), template::render(value, &vars));
                }
                let spec = ProcessSpec {
                    argv: assertion
                        .run
                        .iter()
                        .map(|arg| template::render(arg, &vars))
                        .collect(),
                    cwd: scratch.path().to_path_buf(),
                    env,
                    timeout: self.timeout,
                };
                let output = process::run(&spec).await;
                match &output.status {
                    StepStatus::Exited { code } => observed.exit_code = Some(*code),
                    StepStatus::Signaled { .. } => {}
                    other => observed.error = Some(other.to_string()),
                }
                observed.stdout = output.stdout;
                observed.stderr = output.stderr;
            }

            if let Expectation::Linkage(expected) = &assertion.expect {
                let file = scratch.path().join(template::render(&expected.file, &vars));
                observed.libraries = Some(linkage::linked_libraries(&file));
            }

            let detail = evaluate(&assertion.expect, &observed);
            let name = assertion.label(index);
            debug!("assertion {index} ({name}): {}", if detail.is_none() { "ok" } else { "failed" });

            outcomes.push(AssertionOutcome {
                index,
                name,
                category: assertion.expect.category().to_string(),
                passed: detail.is_none(),
                detail,
            });
        }

        let report = VerificationReport {
            recipe: recipe.identity(),
            outcomes,
        };
        info!(
            "{}: {} of {} assertions passed",
            report.recipe,
            report.outcomes.iter().filter(|o| o.passed).count(),
            report.outcomes.len()
        );
        Ok(report)
    }
}

fn validate(procedure: &TestProcedure) -> Result<(), VerifyError> {
    let invalid = |index: usize, pattern: &str, error: regex::Error| VerifyError::InvalidPattern {
        index,
        pattern: pattern.to_string(),
        error: error.to_string(),
    };

    for (index, assertion) in procedure.assertions.iter().enumerate() {
        match &assertion.expect {
            Expectation::Pattern(pattern) => {
                Regex::new(pattern).map_err(|e| invalid(index, pattern, e))?;
            }
            Expectation::Linkage(linkage) => {
                for pattern in &linkage.excludes {
                    Regex::new(pattern).map_err(|e| invalid(index, pattern, e))?;
                }
            }
            Expectation::Output(_) | Expectation::ExitCode(_) => {}
        }
    }
    Ok(())
}

fn write_fixtures(dir: &Path, procedure: &TestProcedure) -> Result<(), VerifyError> {
    for (name, content) in &procedure.fixtures {
        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(VerifyError::Fixture {
                error: format!("fixture name '{name}' must be a plain relative path"),
            });
        }
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VerifyError::Fixture {
                error: format!("{}: {e}", parent.display()),
            })?;
        }
        std::fs::write(&path, content).map_err(|e| VerifyError::Fixture {
            error: format!("{}: {e}", path.display()),
        })?;
    }
    Ok(())
}
