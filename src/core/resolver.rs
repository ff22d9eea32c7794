//! Dependency resolution
//!
//! Computes the build plan for a target recipe: the recipes reachable through
//! phase-filtered, platform-matching dependency edges, in a deterministic
//! topological order (ties broken by recipe id).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::core::platform::PlatformFacts;
use crate::core::recipe::{Phase, Recipe, RecipeId, RecipeStore};
use crate::error::ResolverError;

/// Set of dependency phases a run honours
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFilter {
    phases: BTreeSet<Phase>,
}

impl PhaseFilter {
    /// Build and runtime edges (a plain build)
    pub fn build() -> Self {
        Self {
            phases: [Phase::Build, Phase::Runtime].into_iter().collect(),
        }
    }

    /// Build, runtime and test edges (a build followed by verification)
    pub fn with_tests() -> Self {
        Self {
            phases: [Phase::Build, Phase::Runtime, Phase::Test]
                .into_iter()
                .collect(),
        }
    }

    /// Whether edges of `phase` are honoured
    pub fn includes(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }
}

impl Default for PhaseFilter {
    fn default() -> Self {
        Self::build()
    }
}

/// Dependency graph: package -> dependencies, both kept ordered
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package to the graph
    pub fn add_package(&mut self, name: &str, dependencies: impl IntoIterator<Item = String>) {
        let deps: BTreeSet<String> = dependencies.into_iter().collect();
        for dep in &deps {
            self.edges.entry(dep.clone()).or_default();
        }
        self.edges.entry(name.to_string()).or_default().extend(deps);
    }

    /// Find a cycle with a depth-first walk
    ///
    /// Returns the cycle members in the order the walk entered them, starting
    /// at the first member reached.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();

        for node in self.edges.keys() {
            if !visited.contains(node) {
                if let Some(cycle) = self.cycle_dfs(node, &mut visited, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn cycle_dfs(
        &self,
        node: &str,
        visited: &mut BTreeSet<String>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        stack.push(node.to_string());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if let Some(pos) = stack.iter().position(|n| n == dep) {
                    return Some(stack[pos..].to_vec());
                }
                if !visited.contains(dep) {
                    if let Some(cycle) = self.cycle_dfs(dep, visited, stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        None
    }

    /// Compute topological sort (build order)
    ///
    /// Dependencies come before dependents; among nodes that are ready at the
    /// same time the lexically smallest goes first.
    pub fn topological_sort(&self) -> Result<Vec<String>, ResolverError> {
        if let Some(cycle) = self.detect_cycle() {
            return Err(ResolverError::CircularDependency { cycle });
        }

        let mut remaining: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(node, deps)| (node.as_str(), deps.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (node, deps) in &self.edges {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(node.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(node) = ready.pop_first() {
            order.push(node.to_string());
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        Ok(order)
    }
}

/// One recipe's position within a build plan
#[derive(Debug, Clone)]
pub struct PlanNode {
    /// The recipe
    pub recipe: Arc<Recipe>,
    /// Direct dependencies honoured by this plan, with the phases that pulled them in
    pub dependencies: BTreeMap<RecipeId, BTreeSet<Phase>>,
    /// Index in the plan
    pub position: usize,
}

impl PlanNode {
    /// Recipe id
    pub fn id(&self) -> &str {
        self.recipe.id()
    }

    /// Direct dependency ids
    pub fn dependency_ids(&self) -> impl Iterator<Item = &RecipeId> {
        self.dependencies.keys()
    }
}

/// Ordered build plan
#[derive(Debug, Clone)]
pub struct BuildPlan {
    target: RecipeId,
    nodes: Vec<PlanNode>,
}

impl BuildPlan {
    /// Target recipe id
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Nodes in build order
    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    /// Ids in build order
    pub fn ids(&self) -> Vec<&str> {
        self.nodes.iter().map(PlanNode::id).collect()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the plan is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by id
    pub fn get(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Every node that depends on `id`, directly or transitively
    pub fn dependents_of(&self, id: &str) -> BTreeSet<RecipeId> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![id.to_string()];

        while let Some(current) = frontier.pop() {
            for node in &self.nodes {
                if node.dependencies.contains_key(&current) && found.insert(node.id().to_string()) {
                    frontier.push(node.id().to_string());
                }
            }
        }
        found
    }

    /// Render the plan as a dependency tree rooted at the target
    pub fn format_tree(&self) -> String {
        let mut output = String::new();
        if let Some(root) = self.get(&self.target) {
            let _ = writeln!(output, "{}", root.recipe.identity());
            self.format_children(&mut output, root, "");
        }
        output
    }

    fn format_children(&self, output: &mut String, node: &PlanNode, prefix: &str) {
        let count = node.dependencies.len();
        for (i, (dep, phases)) in node.dependencies.iter().enumerate() {
            let is_last = i + 1 == count;
            let connector = if is_last { "└── " } else { "├── " };
            let marker = phases
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let Some(child) = self.get(dep) else {
                continue;
            };
            let _ = writeln!(
                output,
                "{prefix}{connector}{} [{marker}]",
                child.recipe.identity()
            );
            let child_prefix = if is_last {
                format!("{prefix}    ")
            } else {
                format!("{prefix}│   ")
            };
            self.format_children(output, child, &child_prefix);
        }
    }

    /// Render the plan as a DOT graph
    pub fn format_dot(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "digraph \"{}\" {{", self.target);
        output.push_str("    rankdir=TB;\n");
        output.push_str("    node [shape=box];\n\n");

        for node in &self.nodes {
            let _ = writeln!(output, "    \"{}\";", node.id());
        }
        output.push('\n');

        for node in &self.nodes {
            for (dep, phases) in &node.dependencies {
                for phase in phases {
                    let style = match phase {
                        Phase::Build => "solid",
                        Phase::Runtime => "dashed",
                        Phase::Test => "dotted",
                    };
                    let _ = writeln!(
                        output,
                        "    \"{}\" -> \"{dep}\" [style={style}, label=\"{phase}\"];",
                        node.id()
                    );
                }
            }
        }

        output.push_str("}\n");
        output
    }
}

/// Resolve the build plan for `target`
///
/// Walks declarations whose platform predicate matches `facts` and whose
/// phase is in `phases`. Fails before anything runs if a dependency is
/// missing from `universe` or the reachable graph has a cycle.
pub fn resolve(
    target: &str,
    universe: &RecipeStore,
    facts: &PlatformFacts,
    phases: &PhaseFilter,
) -> Result<BuildPlan, ResolverError> {
    if !universe.contains(target) {
        return Err(ResolverError::UnknownRecipe {
            id: target.to_string(),
        });
    }

    let mut edges: BTreeMap<RecipeId, BTreeMap<RecipeId, BTreeSet<Phase>>> = BTreeMap::new();
    let mut pending = vec![target.to_string()];

    while let Some(id) = pending.pop() {
        if edges.contains_key(&id) {
            continue;
        }
        let recipe = universe
            .get(&id)
            .ok_or_else(|| ResolverError::UnknownRecipe { id: id.clone() })?;

        let mut deps: BTreeMap<RecipeId, BTreeSet<Phase>> = BTreeMap::new();
        for decl in &recipe.dependencies {
            if !phases.includes(decl.phase) {
                continue;
            }
            if decl.platform.is_some_and(|p| !p.matches(facts)) {
                continue;
            }
            if !universe.contains(&decl.id) {
                return Err(ResolverError::MissingDependency {
                    package: id.clone(),
                    dependency: decl.id.clone(),
                });
            }
            deps.entry(decl.id.clone()).or_default().insert(decl.phase);
        }

        pending.extend(deps.keys().rev().cloned());
        edges.insert(id, deps);
    }

    let mut graph = DependencyGraph::new();
    for (id, deps) in &edges {
        graph.add_package(id, deps.keys().cloned());
    }
    let order = graph.topological_sort()?;

    let nodes = order
        .into_iter()
        .enumerate()
        .filter_map(|(position, id)| {
            let recipe = universe.get(&id)?.clone();
            let dependencies = edges.remove(&id).unwrap_or_default();
            Some(PlanNode {
                recipe,
                dependencies,
                position,
            })
        })
        .collect();

    tracing::debug!("Resolved plan for {target}");

    Ok(BuildPlan {
        target: target.to_string(),
        nodes,
    })
}
