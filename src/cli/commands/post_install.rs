//! Post-install command implementation
//!
//! Implements `kiln post-install`: repair an installed recipe after the host
//! changed underneath it (typically an OS upgrade). Writes the running
//! host's config files that are missing and re-creates versioned symlinks;
//! existing config files are left alone.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::commands::Session;
use crate::cli::RunStatus;
use crate::config::defaults;
use crate::infra::postinstall::{self, Configurator};

#[derive(Debug, Serialize)]
struct RepairSummary {
    recipe: String,
    config_dir: PathBuf,
    wrote_config: bool,
    symlinks: Vec<PathBuf>,
}

/// Execute the post-install command
pub fn execute(session: &Session, target: &str) -> Result<RunStatus> {
    let recipe = session.recipe(target)?;
    let tree = session.layout.install_dir(&recipe);
    if !tree.is_dir() {
        bail!(
            "{} is not installed at {}. Run 'kiln build {target}' first.",
            recipe.identity(),
            tree.display()
        );
    }

    let config_dir = postinstall::config_dir(&session.dirs.post_install_config_root(), &recipe);
    let mut wrote_config = false;
    if let Some(hook) = &recipe.post_install {
        let configurator =
            Configurator::new(session.facts.clone(), defaults::sysroot_table()).with_hook(hook);
        if configurator.applies() {
            std::fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create {}", config_dir.display()))?;
            wrote_config = configurator.ensure_config(&config_dir)?;
        }
    }

    #[cfg(unix)]
    let symlinks = postinstall::create_symlinks(&tree, &recipe)?;
    #[cfg(not(unix))]
    let symlinks: Vec<PathBuf> = Vec::new();

    let out = &session.output;
    if out.json {
        out.print_json(&RepairSummary {
            recipe: recipe.identity(),
            config_dir,
            wrote_config,
            symlinks,
        })?;
    } else if wrote_config || !symlinks.is_empty() {
        out.success(&format!(
            "Repaired {}: {} config written, {} link(s) updated",
            recipe.identity(),
            if wrote_config { "missing" } else { "no" },
            symlinks.len()
        ));
    } else {
        out.success(&format!("{} is up to date", recipe.identity()));
    }

    Ok(RunStatus::Success)
}
