//! Build orchestration logic
//!
//! Coordinates the build across the nodes of a [`BuildPlan`]. Independent
//! nodes run concurrently up to the job limit; a node starts only after
//! every one of its plan dependencies succeeded. When a node fails, all of
//! its transitive dependents are recorded as skipped and never started,
//! while unrelated nodes keep going.
//!
//! Running a node is delegated to a caller-supplied runner, so the scheduling
//! here never touches the filesystem or spawns processes itself.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::recipe::RecipeId;
use crate::core::resolver::{BuildPlan, PlanNode};

/// Result a node runner hands back to the orchestrator
pub trait NodeOutcome {
    /// Why the node failed, or `None` if it succeeded
    fn failure(&self) -> Option<String>;
}

/// Final state of a plan node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum NodeStatus {
    /// All steps succeeded
    Success,
    /// A step failed
    Failed { reason: String },
    /// Never started because a dependency failed
    Skipped { due_to: RecipeId },
}

/// One node's entry in the report
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport<R> {
    /// Recipe id
    pub id: RecipeId,
    /// `id@version`
    pub identity: String,
    /// Final state
    pub status: NodeStatus,
    /// What the runner produced; absent for skipped nodes
    pub output: Option<R>,
}

/// Result of running a whole plan
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport<R> {
    /// Target recipe id
    pub target: RecipeId,
    /// Node reports in plan order
    pub nodes: Vec<NodeReport<R>>,
}

impl<R> BuildReport<R> {
    /// Whether every node succeeded
    pub fn success(&self) -> bool {
        self.nodes.iter().all(|n| n.status == NodeStatus::Success)
    }

    /// Report for one node
    pub fn get(&self, id: &str) -> Option<&NodeReport<R>> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Status of one node
    #[cfg(test)]
    pub fn status(&self, id: &str) -> Option<&NodeStatus> {
        self.get(id).map(|n| &n.status)
    }

    /// Nodes that failed
    pub fn failed(&self) -> impl Iterator<Item = &NodeReport<R>> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.status, NodeStatus::Failed { .. }))
    }

    /// Nodes that were skipped
    pub fn skipped(&self) -> impl Iterator<Item = &NodeReport<R>> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.status, NodeStatus::Skipped { .. }))
    }
}

/// Build orchestrator state
#[derive(Debug, Clone)]
pub struct BuildOrchestrator {
    /// Maximum number of nodes running at once
    jobs: usize,
}

impl Default for BuildOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildOrchestrator {
    /// Create a new build orchestrator using one job per CPU
    pub fn new() -> Self {
        Self {
            jobs: num_cpus::get(),
        }
    }

    /// Set the job limit
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Run every node of `plan` through `runner`
    ///
    /// Ready nodes are started in plan order, so with one job the nodes run
    /// exactly in plan order.
    pub async fn run<F, Fut, R>(&self, plan: &BuildPlan, runner: F) -> BuildReport<R>
    where
        F: Fn(PlanNode) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
        R: NodeOutcome + Send + 'static,
    {
        let mut settled: BTreeMap<RecipeId, (NodeStatus, Option<R>)> = BTreeMap::new();
        let mut started: BTreeSet<RecipeId> = BTreeSet::new();
        let mut tasks: JoinSet<(RecipeId, R)> = JoinSet::new();

        loop {
            for node in plan.nodes() {
                if tasks.len() >= self.jobs {
                    break;
                }
                let id = node.id();
                if started.contains(id) || settled.contains_key(id) {
                    continue;
                }
                let ready = node.dependency_ids().all(|dep| {
                    matches!(settled.get(dep), Some((NodeStatus::Success, _)))
                });
                if !ready {
                    continue;
                }

                info!("Starting {}", node.recipe.identity());
                started.insert(id.to_string());
                let fut = runner(node.clone());
                let id = id.to_string();
                tasks.spawn(async move { (id, fut.await) });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (id, output) = match joined {
                Ok(done) => done,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    warn!("Build task ended abnormally: {e}");
                    continue;
                }
            };
            started.remove(&id);

            match output.failure() {
                None => {
                    debug!("{id} succeeded");
                    settled.insert(id, (NodeStatus::Success, Some(output)));
                }
                Some(reason) => {
                    warn!("{id} failed: {reason}");
                    for dependent in plan.dependents_of(&id) {
                        settled.entry(dependent).or_insert_with(|| {
                            (
                                NodeStatus::Skipped {
                                    due_to: id.clone(),
                                },
                                None,
                            )
                        });
                    }
                    settled.insert(id, (NodeStatus::Failed { reason }, Some(output)));
                }
            }
        }

        let nodes = plan
            .nodes()
            .iter()
            .map(|node| {
                let (status, output) = settled.remove(node.id()).unwrap_or_else(|| {
                    (
                        NodeStatus::Failed {
                            reason: "build task was cancelled".to_string(),
                        },
                        None,
                    )
                });
                NodeReport {
                    id: node.id().to_string(),
                    identity: node.recipe.identity(),
                    status,
                    output,
                }
            })
            .collect();

        BuildReport {
            target: plan.target().to_string(),
            nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::fixtures::linux;
    use crate::core::recipe::fixtures::recipe;
    use crate::core::recipe::{Phase, RecipeStore};
    use crate::core::resolver::{resolve, PhaseFilter};
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug)]
    struct Outcome(Option<String>);

    impl NodeOutcome for Outcome {
        fn failure(&self) -> Option<String> {
            self.0.clone()
        }
    }

    fn plan(target: &str, recipes: Vec<crate::core::recipe::Recipe>) -> BuildPlan {
        resolve(
            target,
            &RecipeStore::from_recipes(recipes),
            &linux(),
            &PhaseFilter::build(),
        )
        .unwrap()
    }

    /// Runner recording start order; nodes named in `failing` fail
    fn recording_runner(
        log: Arc<Mutex<Vec<String>>>,
        failing: &'static [&'static str],
    ) -> impl Fn(PlanNode) -> Pin<Box<dyn Future<Output = Outcome> + Send>> {
        move |node: PlanNode| -> Pin<Box<dyn Future<Output = Outcome> + Send>> {
            let log = Arc::clone(&log);
            Box::pin(async move {
                let id = node.id().to_string();
                log.lock().unwrap().push(id.clone());
                tokio::time::sleep(Duration::from_millis(5)).await;
                if failing.contains(&id.as_str()) {
                    Outcome(Some(format!("{id} exploded")))
                } else {
                    Outcome(None)
                }
            })
        }
    }

    #[tokio::test]
    async fn test_sequential_run_follows_plan_order() {
        let plan = plan(
            "app",
            vec![
                recipe("app", &[("lib", Phase::Build), ("tool", Phase::Build)]),
                recipe("lib", &[("base", Phase::Runtime)]),
                recipe("tool", &[]),
                recipe("base", &[]),
            ],
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        let report = BuildOrchestrator::new()
            .with_jobs(1)
            .run(&plan, recording_runner(Arc::clone(&log), &[]))
            .await;

        assert!(report.success());
        assert_eq!(*log.lock().unwrap(), plan.ids());
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_but_not_siblings() {
        // X depends on Y and Z; Y fails; Z is independent of Y
        let plan = plan(
            "x",
            vec![
                recipe("x", &[("y", Phase::Build), ("z", Phase::Build)]),
                recipe("y", &[]),
                recipe("z", &[]),
            ],
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        let report = BuildOrchestrator::new()
            .with_jobs(2)
            .run(&plan, recording_runner(Arc::clone(&log), &["y"]))
            .await;

        assert!(!report.success());
        assert!(matches!(report.status("y"), Some(NodeStatus::Failed { .. })));
        assert_eq!(report.status("z"), Some(&NodeStatus::Success));
        assert_eq!(
            report.status("x"),
            Some(&NodeStatus::Skipped {
                due_to: "y".to_string()
            })
        );
        assert!(report.get("x").unwrap().output.is_none());
        assert!(!log.lock().unwrap().contains(&"x".to_string()));
    }

    #[tokio::test]
    async fn test_skip_propagates_transitively() {
        let plan = plan(
            "top",
            vec![
                recipe("top", &[("mid", Phase::Build), ("side", Phase::Build)]),
                recipe("mid", &[("bottom", Phase::Runtime)]),
                recipe("bottom", &[]),
                recipe("side", &[]),
            ],
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        let report = BuildOrchestrator::new()
            .with_jobs(4)
            .run(&plan, recording_runner(Arc::clone(&log), &["bottom"]))
            .await;

        for id in ["mid", "top"] {
            assert_eq!(
                report.status(id),
                Some(&NodeStatus::Skipped {
                    due_to: "bottom".to_string()
                })
            );
        }
        assert_eq!(report.status("side"), Some(&NodeStatus::Success));
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.skipped().count(), 2);

        let started: BTreeSet<String> = log.lock().unwrap().iter().cloned().collect();
        let expected: BTreeSet<String> = ["bottom", "side"].iter().map(ToString::to_string).collect();
        assert_eq!(started, expected);
    }

    #[tokio::test]
    async fn test_job_limit_is_respected() {
        let recipes: Vec<_> = (0..6).map(|i| recipe(&format!("leaf{i}"), &[])).collect();
        let deps: Vec<String> = (0..6).map(|i| format!("leaf{i}")).collect();
        let decls: Vec<(&str, Phase)> = deps.iter().map(|d| (d.as_str(), Phase::Build)).collect();
        let mut all = recipes;
        all.push(recipe("root", &decls));
        let plan = plan("root", all);

        let running = Arc::new(Mutex::new((0usize, 0usize)));
        let runner = {
            let running = Arc::clone(&running);
            move |_node: PlanNode| {
                let running = Arc::clone(&running);
                async move {
                    {
                        let mut r = running.lock().unwrap();
                        r.0 += 1;
                        r.1 = r.1.max(r.0);
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.lock().unwrap().0 -= 1;
                    Outcome(None)
                }
            }
        };

        let report = BuildOrchestrator::new().with_jobs(2).run(&plan, runner).await;
        assert!(report.success());
        let peak = running.lock().unwrap().1;
        assert!(peak <= 2, "peak concurrency {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_dependency_finishes_before_dependent_starts() {
        let plan = plan(
            "a",
            vec![recipe("a", &[("b", Phase::Build)]), recipe("b", &[])],
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let runner = {
            let events = Arc::clone(&events);
            move |node: PlanNode| {
                let events = Arc::clone(&events);
                async move {
                    let id = node.id().to_string();
                    events.lock().unwrap().push(format!("start {id}"));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    events.lock().unwrap().push(format!("end {id}"));
                    Outcome(None)
                }
            }
        };

        BuildOrchestrator::new().with_jobs(4).run(&plan, runner).await;
        assert_eq!(
            *events.lock().unwrap(),
            ["start b", "end b", "start a", "end a"]
        );
    }
}
