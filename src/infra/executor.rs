//! Build executor
//!
//! Runs one plan node: verifies a local source archive against the recipe
//! checksum, then runs the build steps and the install steps in declared
//! order inside the node's staging directory. Stops at the first step that
//! does not succeed.
//!
//! The staging directory is recreated empty for every run, so a node never
//! sees what an earlier, failed attempt left behind.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::build_env::{Environment, StagingLayout};
use crate::core::builder::NodeOutcome;
use crate::core::recipe::Step;
use crate::core::resolver::PlanNode;
use crate::error::FilesystemError;
use crate::infra::filesystem;
use crate::infra::process::{self, ProcessSpec, StepId, StepPhase, StepResult, StepStatus};

/// Name of the synthetic step recording a source checksum failure
pub const VERIFY_SOURCE_STEP: &str = "verify-source";

/// Executor options
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    /// Timeout for steps that do not declare their own
    pub step_timeout: Option<Duration>,
    /// Leave the staging directory in place after a successful node
    pub keep_staging: bool,
}

/// Everything one node's execution produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeRun {
    /// Results of the steps that ran, in order
    pub steps: Vec<StepResult>,
    /// The staging or install directory could not be prepared
    pub setup_error: Option<String>,
}

impl NodeRun {
    /// The step that stopped the node, if any
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.success())
    }
}

impl NodeOutcome for NodeRun {
    fn failure(&self) -> Option<String> {
        if let Some(error) = &self.setup_error {
            return Some(error.clone());
        }
        self.failed_step()
            .and_then(StepResult::error)
            .map(|e| e.to_string())
    }
}

/// Runs the steps of plan nodes
#[derive(Debug, Clone)]
pub struct Executor {
    layout: StagingLayout,
    options: ExecutorOptions,
}

impl Executor {
    /// Create an executor
    pub fn new(layout: StagingLayout, options: ExecutorOptions) -> Self {
        Self { layout, options }
    }

    /// Run `node` and fold any setup error into the outcome
    pub async fn run_node(&self, node: &PlanNode, env: &Environment) -> NodeRun {
        match self.execute(node, env).await {
            Ok(steps) => NodeRun {
                steps,
                setup_error: None,
            },
            Err(e) => NodeRun {
                steps: Vec::new(),
                setup_error: Some(e.to_string()),
            },
        }
    }

    /// Run `node`'s steps under `env`
    ///
    /// Step failures, including a step whose working directory is unusable,
    /// are reported through the returned results; an `Err` means the staging
    /// or install directory could not be prepared before any step ran.
    pub async fn execute(
        &self,
        node: &PlanNode,
        env: &Environment,
    ) -> Result<Vec<StepResult>, FilesystemError> {
        let recipe = &node.recipe;
        let staging = self.layout.staging_dir(recipe);
        let prefix = self.layout.install_dir(recipe);

        filesystem::remove_dir_all(&staging)?;
        filesystem::create_dir_all(&staging)?;
        filesystem::create_dir_all(&prefix)?;

        if let Some(result) = self.verify_source(node).await {
            return Ok(vec![result]);
        }

        let steps = recipe
            .build
            .steps
            .iter()
            .map(|s| (StepPhase::Build, s))
            .chain(recipe.install.steps.iter().map(|s| (StepPhase::Install, s)));

        let mut results = Vec::new();
        for (index, (phase, step)) in steps.enumerate() {
            let id = StepId {
                node: node.id().to_string(),
                phase,
                index,
                name: step.label(),
            };
            info!("{}: {} step {} ({})", node.id(), phase, index, id.name);

            let spec = match self.process_spec(step, env, &staging) {
                Ok(spec) => spec,
                Err(error) => {
                    results.push(StepResult {
                        id,
                        status: StepStatus::SpawnFailed { error },
                        stdout: String::new(),
                        stderr: String::new(),
                        duration: Duration::ZERO,
                    });
                    return Ok(results);
                }
            };
            let output = process::run(&spec).await;
            debug!("{id} stdout:\n{}", output.stdout);
            if !output.stderr.is_empty() {
                debug!("{id} stderr:\n{}", output.stderr);
            }

            let result = StepResult {
                id,
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
                duration: output.duration,
            };
            let ok = result.success();
            results.push(result);
            if !ok {
                return Ok(results);
            }
        }

        if !self.options.keep_staging {
            if let Err(e) = filesystem::remove_dir_all(&staging) {
                warn!("{}: {e}", node.id());
            }
        }
        Ok(results)
    }

    fn process_spec(
        &self,
        step: &Step,
        env: &Environment,
        staging: &Path,
    ) -> Result<ProcessSpec, String> {
        let cwd = match &step.cwd {
            Some(dir) => step_dir(staging, &env.expand(dir))?,
            None => staging.to_path_buf(),
        };
        filesystem::create_dir_all(&cwd).map_err(|e| e.to_string())?;

        let mut vars: BTreeMap<String, String> = env.to_env_map();
        for (key, value) in &step.env {
            vars.insert(key.clone(), env.expand(value));
        }

        Ok(ProcessSpec {
            argv: env.expand_args(&step.run),
            cwd,
            env: vars,
            timeout: step
                .timeout_secs
                .map(Duration::from_secs)
                .or(self.options.step_timeout),
        })
    }

    /// Check a local source archive; `Some` carries the failure
    async fn verify_source(&self, node: &PlanNode) -> Option<StepResult> {
        let source = node.recipe.source.as_ref()?;
        let archive = source.local_archive()?;
        let started = Instant::now();

        let error = match filesystem::sha256_file(&archive).await {
            Ok(actual) if actual.eq_ignore_ascii_case(source.sha256.trim()) => {
                debug!("Checksum verified for {}", archive.display());
                return None;
            }
            Ok(actual) => format!(
                "checksum mismatch for {}: expected {}, got {actual}",
                archive.display(),
                source.sha256
            ),
            Err(e) => e.to_string(),
        };

        Some(StepResult {
            id: StepId {
                node: node.id().to_string(),
                phase: StepPhase::Source,
                index: 0,
                name: VERIFY_SOURCE_STEP.to_string(),
            },
            status: StepStatus::CheckFailed { error },
            stdout: String::new(),
            stderr: String::new(),
            duration: started.elapsed(),
        })
    }
}

/// Resolve a step's working directory inside `staging`
///
/// Absolute paths are accepted only when they point into `staging`.
fn step_dir(staging: &Path, dir: &str) -> Result<PathBuf, String> {
    let dir = Path::new(dir);
    let relative = dir.strip_prefix(staging).unwrap_or(dir);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(format!(
            "working directory '{}' is outside the staging directory",
            dir.display()
        ));
    }
    Ok(staging.join(relative))
}
