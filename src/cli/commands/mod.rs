//! CLI command implementations
//!
//! Each command is implemented in its own submodule. [`Session`] carries
//! what every command needs: directories, the global config, the detected
//! host and the output settings.

pub mod build;
pub mod plan;
pub mod post_install;

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::output::OutputConfig;
use crate::cli::RunStatus;
use crate::config::global::GlobalConfig;
use crate::config::defaults;
use crate::core::build_env::{EnvironmentBuilder, InstalledTree, StagingLayout};
use crate::core::platform::PlatformFacts;
use crate::core::recipe::{Recipe, RecipeStore};
use crate::core::resolver::{self, BuildPlan, PhaseFilter};
use crate::error::ResolverError;
use crate::infra::dirs::KilnDirs;
use crate::infra::{host, recipes};

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve, build and install a recipe and its dependencies
    Build {
        /// Recipe id
        target: String,

        /// Build test dependencies and run the self-test afterwards
        #[arg(long)]
        test: bool,

        /// Number of parallel jobs
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Print the plan without running anything
        #[arg(long)]
        dry_run: bool,

        /// Kill steps that run longer than this many seconds
        #[arg(long, value_name = "SECS")]
        step_timeout: Option<u64>,

        /// Keep staging directories after successful nodes
        #[arg(long)]
        keep_staging: bool,
    },

    /// Print the resolved build plan
    Plan {
        /// Recipe id
        target: String,

        /// Include test dependencies
        #[arg(long)]
        test: bool,

        /// Output in DOT graph format
        #[arg(long)]
        graph: bool,
    },

    /// Write missing post-install config files for the running host
    PostInstall {
        /// Recipe id
        target: String,
    },

    /// Run a recipe's self-test against its installed tree
    Test {
        /// Recipe id
        target: String,

        /// Kill assertion commands that run longer than this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
}

impl Commands {
    /// Execute the command
    pub async fn run(self, session: &Session) -> Result<RunStatus> {
        match self {
            Self::Build {
                target,
                test,
                jobs,
                dry_run,
                step_timeout,
                keep_staging,
            } => {
                build::execute(
                    session,
                    build::BuildOptions {
                        target,
                        test,
                        jobs,
                        dry_run,
                        step_timeout,
                        keep_staging,
                    },
                )
                .await
            }
            Self::Plan {
                target,
                test,
                graph,
            } => plan::execute(session, &target, test, graph),
            Self::PostInstall { target } => post_install::execute(session, &target),
            Self::Test { target, timeout } => test::execute(session, &target, timeout).await,
        }
    }
}

/// Shared state of one kiln invocation
#[derive(Debug, Clone)]
pub struct Session {
    /// Platform directories
    pub dirs: KilnDirs,
    /// Global configuration
    pub config: GlobalConfig,
    /// Where recipes are loaded from
    pub recipes_dir: PathBuf,
    /// Installed tree and staging roots
    pub layout: StagingLayout,
    /// Detected host
    pub facts: PlatformFacts,
    /// Output settings, flags merged with the config file
    pub output: OutputConfig,
}

impl Session {
    /// Load the global config and detect the host
    ///
    /// Command-line values win over the config file, which wins over the
    /// built-in defaults.
    pub fn new(
        recipes: Option<PathBuf>,
        prefix: Option<PathBuf>,
        output: OutputConfig,
    ) -> Result<Self> {
        let dirs = KilnDirs::new();
        let config = GlobalConfig::load(&dirs).context("Failed to load global configuration")?;

        let output = OutputConfig {
            quiet: output.quiet || config.output.quiet.unwrap_or(false),
            json: output.json || config.output.json.unwrap_or(false),
            verbose: output.verbose,
        };
        let recipes_dir = recipes.unwrap_or_else(|| config.recipes_dir());
        let layout = StagingLayout::new(
            prefix.unwrap_or_else(|| config.prefix_root(&dirs)),
            config.staging_root(&dirs),
        );

        Ok(Self {
            facts: host::detect(),
            dirs,
            config,
            recipes_dir,
            layout,
            output,
        })
    }

    /// Load every recipe in the recipes directory
    pub fn load_recipes(&self) -> Result<RecipeStore> {
        recipes::load_dir(&self.recipes_dir).with_context(|| {
            format!("Failed to load recipes from {}", self.recipes_dir.display())
        })
    }

    /// Load one recipe by id
    pub fn recipe(&self, id: &str) -> Result<Arc<Recipe>> {
        let store = self.load_recipes()?;
        store
            .get(id)
            .cloned()
            .ok_or_else(|| ResolverError::UnknownRecipe { id: id.to_string() }.into())
    }

    /// Resolve the plan for `target`
    pub fn resolve(&self, target: &str, test: bool) -> Result<BuildPlan> {
        let store = self.load_recipes()?;
        let filter = if test {
            PhaseFilter::with_tests()
        } else {
            PhaseFilter::build()
        };
        let plan = resolver::resolve(target, &store, &self.facts, &filter)
            .with_context(|| format!("Failed to resolve '{target}'"))?;
        tracing::info!("Resolved {} node(s) for {target}", plan.len());
        Ok(plan)
    }

    /// Installed trees of the plan target's direct dependencies
    pub fn target_dependencies(&self, plan: &BuildPlan) -> Vec<InstalledTree> {
        let Some(node) = plan.get(plan.target()) else {
            return Vec::new();
        };
        let universe: Vec<&Recipe> = plan.nodes().iter().map(|n| n.recipe.as_ref()).collect();
        EnvironmentBuilder::new(self.layout.clone(), defaults::sysroot_table())
            .dependency_trees(node, &universe)
    }
}
