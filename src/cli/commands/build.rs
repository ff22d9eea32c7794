//! Build command implementation
//!
//! Implements `kiln build`: resolve the plan, run every node through the
//! environment builder and the executor under the orchestrator, apply each
//! installed recipe's post-install hook, and with `--test` verify the
//! target afterwards.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::commands::{test, Session};
use crate::cli::output::create_build_bar;
use crate::cli::RunStatus;
use crate::config::defaults;
use crate::core::build_env::EnvironmentBuilder;
use crate::core::builder::{BuildOrchestrator, BuildReport, NodeOutcome, NodeStatus};
use crate::core::platform::PlatformFacts;
use crate::core::recipe::Recipe;
use crate::core::resolver::BuildPlan;
use crate::core::verify::VerificationReport;
use crate::infra::executor::{Executor, ExecutorOptions, NodeRun};
use crate::infra::host;
use crate::infra::postinstall::{self, PostInstallReport};
use crate::infra::verifier::Verifier;

/// Build options
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Recipe to build
    pub target: String,
    /// Include test dependencies and verify the target
    pub test: bool,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
    /// Resolve and print only
    pub dry_run: bool,
    /// Default step timeout in seconds
    pub step_timeout: Option<u64>,
    /// Keep staging directories
    pub keep_staging: bool,
}

/// What one node produced
#[derive(Debug, Clone, Serialize)]
pub struct NodeResult {
    /// Step execution
    pub run: NodeRun,
    /// Post-install hook, only after a successful run
    pub post_install: Option<PostInstallReport>,
}

impl NodeOutcome for NodeResult {
    fn failure(&self) -> Option<String> {
        self.run.failure()
    }
}

/// Everything `kiln build --json` prints
#[derive(Debug, Serialize)]
struct BuildSummary<'a> {
    build: &'a BuildReport<NodeResult>,
    verification: Option<&'a VerificationReport>,
}

/// Execute the build command
pub async fn execute(session: &Session, options: BuildOptions) -> Result<RunStatus> {
    let plan = session.resolve(&options.target, options.test)?;

    if options.dry_run {
        if session.output.json {
            session.output.print_json(&plan.ids())?;
        } else if !session.output.quiet {
            for node in plan.nodes() {
                println!("{}", node.recipe.identity());
            }
        }
        return Ok(RunStatus::Success);
    }

    let jobs = options
        .jobs
        .filter(|j| *j > 0)
        .unwrap_or_else(|| session.config.build_jobs());
    let step_timeout = options
        .step_timeout
        .map(Duration::from_secs)
        .or_else(|| session.config.step_timeout());
    tracing::info!("Building {} with {} node(s), {jobs} job(s)", options.target, plan.len());
    warn_missing_sdk(session);

    let report = run_plan(
        session,
        &plan,
        jobs,
        ExecutorOptions {
            step_timeout,
            keep_staging: options.keep_staging || session.config.keep_staging(),
        },
    )
    .await;
    print_report(session, &report);

    if !report.success() {
        if session.output.json {
            session.output.print_json(&BuildSummary {
                build: &report,
                verification: None,
            })?;
        }
        return Ok(RunStatus::Failed);
    }

    let verification = if options.test {
        verify_target(session, &plan, step_timeout).await?
    } else {
        None
    };

    if session.output.json {
        session.output.print_json(&BuildSummary {
            build: &report,
            verification: verification.as_ref(),
        })?;
    }

    match verification {
        Some(report) if !report.passed() => Ok(RunStatus::VerificationFailed),
        _ => Ok(RunStatus::Success),
    }
}

async fn run_plan(
    session: &Session,
    plan: &BuildPlan,
    jobs: usize,
    options: ExecutorOptions,
) -> BuildReport<NodeResult> {
    let table = defaults::sysroot_table();
    let env_builder = Arc::new(
        EnvironmentBuilder::new(session.layout.clone(), table.clone()).with_jobs(jobs),
    );
    let executor = Arc::new(Executor::new(session.layout.clone(), options));
    let facts = Arc::new(session.facts.clone());
    let table = Arc::new(table);
    let config_root = Arc::new(session.dirs.post_install_config_root());
    let universe: Arc<Vec<Arc<Recipe>>> =
        Arc::new(plan.nodes().iter().map(|n| Arc::clone(&n.recipe)).collect());

    let bar = create_build_bar(plan.len() as u64);
    if !session.output.human() {
        bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let report = BuildOrchestrator::new()
        .with_jobs(jobs)
        .run(plan, |node| {
            let env_builder = Arc::clone(&env_builder);
            let executor = Arc::clone(&executor);
            let facts = Arc::clone(&facts);
            let table = Arc::clone(&table);
            let config_root = Arc::clone(&config_root);
            let universe = Arc::clone(&universe);
            let bar = bar.clone();

            async move {
                bar.set_message(node.recipe.identity());
                let env = {
                    let recipes: Vec<&Recipe> = universe.iter().map(AsRef::as_ref).collect();
                    let trees = env_builder.dependency_trees(&node, &recipes);
                    env_builder.build(&node, &trees, &facts)
                };

                let run = executor.run_node(&node, &env).await;
                let post_install = run.failure().is_none().then(|| {
                    let tree = env_builder.layout().install_dir(&node.recipe);
                    postinstall::run_hook(&node.recipe, &facts, &table, &config_root, &tree)
                });

                bar.inc(1);
                NodeResult { run, post_install }
            }
        })
        .await;

    bar.finish_and_clear();
    report
}

fn print_report(session: &Session, report: &BuildReport<NodeResult>) {
    let out = &session.output;
    for node in &report.nodes {
        match &node.status {
            NodeStatus::Success => {
                out.success(&format!("{} installed", node.identity));
                let Some(hook) = node.output.as_ref().and_then(|o| o.post_install.as_ref()) else {
                    continue;
                };
                for warning in &hook.warnings {
                    out.warning(&format!("{}: {warning}", node.id));
                }
                if let Some(caveats) = &hook.caveats {
                    out.info(caveats);
                }
            }
            NodeStatus::Failed { reason } => out.failure(&format!("{} failed: {reason}", node.identity)),
            NodeStatus::Skipped { due_to } => {
                out.warning(&format!("{} skipped: dependency '{due_to}' failed", node.identity));
            }
        }
    }

    let failed = report.failed().count();
    let skipped = report.skipped().count();
    if failed == 0 {
        out.success(&format!("Built {} recipe(s) for {}", report.nodes.len(), report.target));
    } else {
        out.failure(&format!(
            "{failed} recipe(s) failed, {skipped} skipped while building {}",
            report.target
        ));
    }
}

async fn verify_target(
    session: &Session,
    plan: &BuildPlan,
    timeout: Option<Duration>,
) -> Result<Option<VerificationReport>> {
    let Some(node) = plan.get(plan.target()) else {
        return Ok(None);
    };
    let Some(procedure) = &node.recipe.test else {
        session
            .output
            .warning(&format!("{} has no test procedure", node.recipe.identity()));
        return Ok(None);
    };

    let tree = session.layout.install_dir(&node.recipe);
    let report = Verifier::new(session.facts.system_path())
        .with_dependencies(&session.target_dependencies(plan))
        .with_timeout(timeout)
        .verify(&node.recipe, &tree, procedure)
        .await?;
    test::print_verification(session, &report);
    Ok(Some(report))
}

fn warn_missing_sdk(session: &Session) {
    if let PlatformFacts::MacOs(mac) = &session.facts {
        if let Some(sdk) = &mac.sdk_root {
            if !host::sdk_exists(sdk) {
                session
                    .output
                    .warning(&format!("SDKROOT {} does not look like an SDK", sdk.display()));
            }
        }
    }
}
