//! Plan command implementation
//!
//! Implements `kiln plan`: resolve a target and show the result as a tree,
//! a DOT graph or JSON, without building anything.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::cli::commands::Session;
use crate::cli::RunStatus;
use crate::core::recipe::Phase;
use crate::core::resolver::BuildPlan;

/// One plan node as printed by `--json`
#[derive(Debug, Serialize)]
struct PlanEntry<'a> {
    position: usize,
    id: &'a str,
    version: &'a str,
    dependencies: BTreeMap<&'a str, Vec<Phase>>,
}

/// Execute the plan command
pub fn execute(session: &Session, target: &str, test: bool, graph: bool) -> Result<RunStatus> {
    let plan = session.resolve(target, test)?;

    if session.output.json {
        session.output.print_json(&entries(&plan))?;
    } else if graph {
        print!("{}", plan.format_dot());
    } else if !session.output.quiet {
        print!("{}", plan.format_tree());
        println!();
        for (i, node) in plan.nodes().iter().enumerate() {
            println!("{:>3}. {}", i + 1, node.recipe.identity());
        }
    }
    Ok(RunStatus::Success)
}

fn entries(plan: &BuildPlan) -> Vec<PlanEntry<'_>> {
    plan.nodes()
        .iter()
        .map(|node| PlanEntry {
            position: node.position,
            id: node.id(),
            version: node.recipe.version(),
            dependencies: node
                .dependencies
                .iter()
                .map(|(id, phases)| (id.as_str(), phases.iter().copied().collect()))
                .collect(),
        })
        .collect()
}
