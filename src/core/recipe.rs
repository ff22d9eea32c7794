//! Recipe model
//!
//! A recipe describes one buildable package: identity, source, phase-scoped
//! dependencies, build and install steps, the post-install hook and the
//! self-test procedure. Recipes are immutable once loaded; the
//! [`RecipeStore`] is the universe the resolver walks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::core::platform::PlatformPredicate;
use crate::core::verify::TestProcedure;
use crate::error::RecipeError;

/// Recipe identifier (the package name)
pub type RecipeId = String;

/// Complete recipe definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipe {
    /// Recipe metadata
    pub package: RecipeMetadata,

    /// Source locator and checksum (absent for tool-only recipes)
    #[serde(default)]
    pub source: Option<SourceConfig>,

    /// Declared dependencies
    #[serde(default)]
    pub dependencies: Vec<DependencyDeclaration>,

    /// Build configuration and steps
    #[serde(default)]
    pub build: BuildConfig,

    /// Install steps
    #[serde(default)]
    pub install: InstallConfig,

    /// Post-install hook
    #[serde(default)]
    pub post_install: Option<PostInstallHook>,

    /// Self-test procedure
    #[serde(default)]
    pub test: Option<TestProcedure>,
}

/// Recipe metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeMetadata {
    /// Recipe id
    pub id: RecipeId,

    /// Package version
    pub version: String,

    /// Short description
    #[serde(default)]
    pub description: String,

    /// License expression
    #[serde(default)]
    pub license: Option<String>,

    /// Homepage URL
    #[serde(default)]
    pub homepage: Option<String>,

    /// Notes shown to the user after a successful install
    #[serde(default)]
    pub caveats: Option<String>,
}

/// Source archive location and its SHA-256
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// URL or local path of the source archive
    pub url: String,

    /// SHA256 checksum
    pub sha256: String,
}

impl SourceConfig {
    /// Local archive path, if the locator points at the filesystem
    ///
    /// Remote locators are fetched by the download layer, not by kiln.
    pub fn local_archive(&self) -> Option<PathBuf> {
        if let Some(path) = self.url.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        let path = Path::new(&self.url);
        path.is_absolute().then(|| path.to_path_buf())
    }
}

/// Dependency phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Needed only to build
    Build,
    /// Needed by the installed artifact
    #[default]
    Runtime,
    /// Needed only by the self-test
    Test,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Runtime => write!(f, "runtime"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// One declared dependency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyDeclaration {
    /// Target recipe id
    pub id: RecipeId,

    /// Phase the dependency belongs to
    #[serde(default)]
    pub phase: Phase,

    /// Platform condition; absent means every platform
    #[serde(default)]
    pub platform: Option<PlatformPredicate>,

    /// Propagate the dependency's include/lib paths into the build
    #[serde(default)]
    pub compile_visible: bool,
}

/// CMake-style definition value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DefinitionValue {
    /// `ON` / `OFF`
    Bool(bool),
    /// Integer
    Int(i64),
    /// Plain string
    Str(String),
    /// `;`-joined list
    List(Vec<String>),
}

impl DefinitionValue {
    /// Render in CMake's argument format
    pub fn render(&self) -> String {
        match self {
            Self::Bool(true) => "ON".to_string(),
            Self::Bool(false) => "OFF".to_string(),
            Self::Int(i) => i.to_string(),
            Self::Str(s) => s.clone(),
            Self::List(items) => items.join(";"),
        }
    }
}

/// Flags applied only when a platform predicate holds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalFlags {
    /// Condition
    pub platform: PlatformPredicate,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Extra definitions
    #[serde(default)]
    pub definitions: BTreeMap<String, DefinitionValue>,
}

/// Build configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// CMake-style definitions
    #[serde(default)]
    pub definitions: BTreeMap<String, DefinitionValue>,

    /// Platform-conditional flag blocks
    #[serde(default)]
    pub conditional: Vec<ConditionalFlags>,

    /// Build steps, run in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Install configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstallConfig {
    /// Install steps, run in order after the build steps
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A single external-process step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Argument vector; the first element is the program
    pub run: Vec<String>,

    /// Working directory relative to the staging directory
    #[serde(default)]
    pub cwd: Option<String>,

    /// Step-local environment overrides
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Kill the step after this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Step {
    /// Name for reports: the declared name or the program
    pub fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.run.first().cloned())
            .unwrap_or_default()
    }
}

/// Versioned symlink created inside the artifact tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymlinkRule {
    /// Link path relative to the artifact tree (templated)
    pub link: String,

    /// Link target, usually relative to the link's directory (templated)
    pub target: String,
}

/// Post-install hook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostInstallHook {
    /// Subdirectory of the kiln config dir receiving the generated files
    #[serde(default)]
    pub config_subdir: Option<String>,

    /// File name template (`{arch}`, `{system}`, `{version}`)
    #[serde(default)]
    pub file_name: Option<String>,

    /// File content template (`{sysroot}` plus the name placeholders)
    #[serde(default)]
    pub content: Option<String>,

    /// Versioned symlinks
    #[serde(default)]
    pub symlinks: Vec<SymlinkRule>,
}

impl Recipe {
    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Recipe id
    pub fn id(&self) -> &str {
        &self.package.id
    }

    /// Recipe version
    pub fn version(&self) -> &str {
        &self.package.version
    }

    /// `id@version` identity
    pub fn identity(&self) -> String {
        format!("{}@{}", self.package.id, self.package.version)
    }

    /// Major component of the version, for versioned names
    pub fn version_major(&self) -> String {
        semver::Version::parse(&self.package.version).map_or_else(
            |_| {
                self.package
                    .version
                    .split('.')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            },
            |v| v.major.to_string(),
        )
    }

    /// Build steps followed by install steps
    pub fn all_steps(&self) -> impl Iterator<Item = &Step> {
        self.build.steps.iter().chain(self.install.steps.iter())
    }

    /// Check structural requirements serde cannot express
    pub fn validate(&self) -> Result<(), RecipeError> {
        if self.package.id.trim().is_empty() {
            return Err(RecipeError::MissingField {
                recipe: "<unnamed>".to_string(),
                field: "package.id".to_string(),
            });
        }
        if self.package.version.trim().is_empty() {
            return Err(RecipeError::MissingField {
                recipe: self.package.id.clone(),
                field: "package.version".to_string(),
            });
        }
        if let Some((i, _)) = self.all_steps().enumerate().find(|(_, s)| s.run.is_empty()) {
            return Err(RecipeError::MissingField {
                recipe: self.package.id.clone(),
                field: format!("steps[{i}].run"),
            });
        }
        for (i, step) in self.all_steps().enumerate() {
            let Some(cwd) = &step.cwd else { continue };
            if Path::new(cwd)
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
            {
                return Err(RecipeError::InvalidField {
                    recipe: self.package.id.clone(),
                    field: format!("steps[{i}].cwd"),
                    reason: format!("'{cwd}' must be relative to the staging directory"),
                });
            }
        }
        Ok(())
    }
}

/// The universe of known recipes
#[derive(Debug, Clone, Default)]
pub struct RecipeStore {
    recipes: BTreeMap<RecipeId, Arc<Recipe>>,
}

impl RecipeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from already-parsed recipes
    #[cfg(test)]
    pub fn from_recipes(recipes: impl IntoIterator<Item = Recipe>) -> Self {
        let mut store = Self::new();
        for recipe in recipes {
            store.insert(recipe);
        }
        store
    }

    /// Add or replace a recipe
    pub fn insert(&mut self, recipe: Recipe) {
        self.recipes
            .insert(recipe.package.id.clone(), Arc::new(recipe));
    }

    /// Look up a recipe
    pub fn get(&self, id: &str) -> Option<&Arc<Recipe>> {
        self.recipes.get(id)
    }

    /// Whether the store knows `id`
    pub fn contains(&self, id: &str) -> bool {
        self.recipes.contains_key(id)
    }

    /// Number of recipes
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}
