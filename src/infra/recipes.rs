//! Recipe loading
//!
//! Reads `<id>.toml` recipe files from a recipes directory into a
//! [`RecipeStore`]. Subdirectories are walked so large collections can be
//! sharded (`recipes/l/llvm.toml`).

use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::core::recipe::{Recipe, RecipeStore};
use crate::error::RecipeError;

/// Load every recipe under `dir`
///
/// Each id may appear only once.
pub fn load_dir(dir: &Path) -> Result<RecipeStore, RecipeError> {
    let mut store = RecipeStore::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| RecipeError::Read {
            path: e.path().unwrap_or(dir).to_path_buf(),
            error: e.to_string(),
        })?;
        let path = entry.path();
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        if !entry.file_type().is_file() || !is_toml {
            continue;
        }

        let recipe = load_file(path)?;
        if store.contains(recipe.id()) {
            return Err(RecipeError::Duplicate {
                id: recipe.id().to_string(),
                path: path.to_path_buf(),
            });
        }
        debug!("Loaded recipe {} from {}", recipe.identity(), path.display());
        store.insert(recipe);
    }
    Ok(store)
}

/// Load and validate one recipe file
///
/// The file stem must match the declared id.
pub fn load_file(path: &Path) -> Result<Recipe, RecipeError> {
    let content = std::fs::read_to_string(path).map_err(|e| RecipeError::Read {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    let recipe = Recipe::from_toml(&content).map_err(|e| RecipeError::Parse {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if stem != recipe.id() {
        return Err(RecipeError::IdMismatch {
            path: path.to_path_buf(),
            declared: recipe.id().to_string(),
            expected: stem,
        });
    }

    recipe.validate()?;
    Ok(recipe)
}
