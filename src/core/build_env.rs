//! Build environment setup
//!
//! Derives the immutable [`Environment`] a plan node's steps run under:
//! layout variables (PREFIX, SRCDIR, STAGING, JOBS, HOME), the search path,
//! include/lib flags propagated from compile-visible dependencies, platform
//! flags (architectures, sysroot) and the recipe's own flags and definitions.
//!
//! Building an environment is pure: it reads only its arguments, never the
//! ambient process environment, and stores everything in ordered maps so two
//! builds from the same inputs are identical.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::platform::{OsFamily, PlatformFacts, SysrootTable};
use crate::core::recipe::{DefinitionValue, Recipe, RecipeId};
use crate::core::resolver::PlanNode;
use crate::core::template::{self, Vars};

/// Where staging and install trees live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    /// Root of the installed artifact trees (`<root>/<id>/<version>`)
    pub prefix_root: PathBuf,
    /// Root of the per-node staging directories (`<root>/<id>-<version>`)
    pub staging_root: PathBuf,
}

impl StagingLayout {
    /// Create a layout
    pub fn new(prefix_root: impl Into<PathBuf>, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            prefix_root: prefix_root.into(),
            staging_root: staging_root.into(),
        }
    }

    /// Installed artifact tree of `recipe`
    pub fn install_dir(&self, recipe: &Recipe) -> PathBuf {
        self.prefix_root.join(recipe.id()).join(recipe.version())
    }

    /// Staging directory of `recipe`
    pub fn staging_dir(&self, recipe: &Recipe) -> PathBuf {
        self.staging_root
            .join(format!("{}-{}", recipe.id(), recipe.version()))
    }
}

/// A dependency's installed artifact tree, as seen by a dependent's build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTree {
    /// Dependency recipe id
    pub id: RecipeId,
    /// Root of the tree (`<prefix-root>/<id>/<version>`)
    pub root: PathBuf,
    /// Whether the dependent declared it compile-visible
    pub compile_visible: bool,
}

impl InstalledTree {
    /// Executables directory
    pub fn bin(&self) -> PathBuf {
        self.root.join("bin")
    }

    fn include(&self) -> PathBuf {
        self.root.join("include")
    }

    fn lib(&self) -> PathBuf {
        self.root.join("lib")
    }
}

/// Immutable configuration for one node's steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    /// Process environment variables
    pub vars: BTreeMap<String, String>,
    /// CMake-style definitions, already rendered to their argument values
    pub definitions: BTreeMap<String, String>,
    /// Target architectures
    pub architectures: Vec<String>,
    /// Selected sysroot, if the platform has one
    pub sysroot: Option<String>,
    /// Values for `{placeholder}` substitution in step arguments
    #[serde(skip)]
    placeholders: Vars,
}

impl Environment {
    /// Convert to environment variable map for process execution
    pub fn to_env_map(&self) -> BTreeMap<String, String> {
        self.vars.clone()
    }

    /// Look up one variable
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Definitions as `-DKEY=VALUE` arguments, in key order
    pub fn definition_args(&self) -> Vec<String> {
        self.definitions
            .iter()
            .map(|(key, value)| format!("-D{key}={value}"))
            .collect()
    }

    /// Substitute placeholders in one string
    pub fn expand(&self, text: &str) -> String {
        template::render(text, &self.placeholders)
    }

    /// Substitute placeholders in an argument vector
    ///
    /// An argument that is exactly `{definitions}` becomes every
    /// `-DKEY=VALUE` argument.
    pub fn expand_args(&self, args: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            if arg == "{definitions}" {
                out.extend(self.definition_args());
            } else {
                out.push(self.expand(arg));
            }
        }
        out
    }
}

/// Builds [`Environment`] values for plan nodes
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    layout: StagingLayout,
    jobs: usize,
    sysroot_table: SysrootTable,
}

impl EnvironmentBuilder {
    /// Create a builder
    pub fn new(layout: StagingLayout, sysroot_table: SysrootTable) -> Self {
        Self {
            layout,
            jobs: num_cpus::get(),
            sysroot_table,
        }
    }

    /// Set the number of parallel jobs steps are told to use
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// The layout this builder places trees in
    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    /// Installed trees of `node`'s direct dependencies
    pub fn dependency_trees(&self, node: &PlanNode, universe: &[&Recipe]) -> Vec<InstalledTree> {
        let visible: Vec<&str> = node
            .recipe
            .dependencies
            .iter()
            .filter(|d| d.compile_visible)
            .map(|d| d.id.as_str())
            .collect();

        universe
            .iter()
            .filter(|r| node.dependencies.contains_key(r.id()))
            .map(|r| InstalledTree {
                id: r.id().to_string(),
                root: self.layout.install_dir(r),
                compile_visible: visible.contains(&r.id()),
            })
            .collect()
    }

    /// Build the environment for `node`
    pub fn build(
        &self,
        node: &PlanNode,
        deps: &[InstalledTree],
        facts: &PlatformFacts,
    ) -> Environment {
        let recipe = &node.recipe;
        let staging = self.layout.staging_dir(recipe);
        let prefix = self.layout.install_dir(recipe);

        let mut deps: Vec<&InstalledTree> = deps.iter().collect();
        deps.sort_by(|a, b| a.id.cmp(&b.id));

        let mut vars = BTreeMap::new();
        let mut definitions = BTreeMap::new();

        vars.insert("PREFIX".to_string(), display(&prefix));
        vars.insert("SRCDIR".to_string(), display(&staging));
        vars.insert("STAGING".to_string(), display(&staging));
        vars.insert("HOME".to_string(), display(&staging));
        vars.insert("JOBS".to_string(), self.jobs.to_string());

        let mut path: Vec<String> = deps.iter().map(|d| display(&d.bin())).collect();
        if !facts.system_path().is_empty() {
            path.push(facts.system_path().to_string());
        }
        vars.insert("PATH".to_string(), path.join(":"));

        let visible: Vec<&InstalledTree> = deps.iter().copied().filter(|d| d.compile_visible).collect();
        if !visible.is_empty() {
            vars.insert(
                "CPPFLAGS".to_string(),
                joined(&visible, |d| format!("-I{}", display(&d.include())), " "),
            );
            vars.insert(
                "LDFLAGS".to_string(),
                joined(&visible, |d| format!("-L{}", display(&d.lib())), " "),
            );
            vars.insert(
                "CMAKE_PREFIX_PATH".to_string(),
                joined(&visible, |d| display(&d.root), ":"),
            );
            vars.insert(
                "PKG_CONFIG_PATH".to_string(),
                joined(&visible, |d| display(&d.lib().join("pkgconfig")), ":"),
            );
        }

        let architectures = vec![facts.arch().to_string()];
        let sysroot = match facts {
            PlatformFacts::MacOs(mac) => mac.sdk_root.as_deref().map(display).or_else(|| {
                self.sysroot_table.select(facts, Some(&mac.version))
            }),
            PlatformFacts::Linux(_) => None,
        };
        if facts.family() == OsFamily::MacOs {
            if let Some(root) = &sysroot {
                vars.insert("SDKROOT".to_string(), root.clone());
                definitions.insert("CMAKE_OSX_SYSROOT".to_string(), root.clone());
            }
            definitions.insert("CMAKE_OSX_ARCHITECTURES".to_string(), architectures.join(";"));
        }

        let mut placeholders = Vars::new();
        placeholders.insert("prefix", display(&prefix));
        placeholders.insert("source", display(&staging));
        placeholders.insert("staging", display(&staging));
        placeholders.insert("jobs", self.jobs.to_string());
        placeholders.insert("version", recipe.version().to_string());
        placeholders.insert("major", recipe.version_major());
        if let Some(root) = &sysroot {
            placeholders.insert("sysroot", root.clone());
        }

        let mut apply = |env: &BTreeMap<String, String>,
                         defs: &BTreeMap<String, DefinitionValue>| {
            for (key, value) in env {
                vars.insert(key.clone(), template::render(value, &placeholders));
            }
            for (key, value) in defs {
                definitions.insert(key.clone(), template::render(&value.render(), &placeholders));
            }
        };
        apply(&recipe.build.env, &recipe.build.definitions);
        for block in recipe
            .build
            .conditional
            .iter()
            .filter(|block| block.platform.matches(facts))
        {
            apply(&block.env, &block.definitions);
        }

        for (flags, definition) in [("CFLAGS", "CMAKE_C_FLAGS"), ("CXXFLAGS", "CMAKE_CXX_FLAGS")] {
            if let Some(value) = vars.get(flags) {
                definitions
                    .entry(definition.to_string())
                    .or_insert_with(|| value.clone());
            }
        }

        Environment {
            vars,
            definitions,
            architectures,
            sysroot,
            placeholders,
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn joined(trees: &[&InstalledTree], f: impl Fn(&InstalledTree) -> String, sep: &str) -> String {
    trees.iter().map(|d| f(d)).collect::<Vec<_>>().join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;
    use crate::core::platform::fixtures::{linux, macos};
    use crate::core::platform::PlatformPredicate;
    use crate::core::recipe::fixtures::recipe;
    use crate::core::recipe::{ConditionalFlags, DependencyDeclaration, Phase, RecipeStore};
    use crate::core::resolver::{resolve, PhaseFilter};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::new(
            StagingLayout::new("/opt/kiln/cellar", "/tmp/kiln/staging"),
            defaults::sysroot_table(),
        )
        .with_jobs(8)
    }

    fn node(recipe: Recipe) -> PlanNode {
        PlanNode {
            recipe: Arc::new(recipe),
            dependencies: BTreeMap::new(),
            position: 0,
        }
    }

    fn tree(id: &str, compile_visible: bool) -> InstalledTree {
        InstalledTree {
            id: id.to_string(),
            root: PathBuf::from(format!("/opt/kiln/cellar/{id}/1.0.0")),
            compile_visible,
        }
    }

    // ============================================
    // Unit Tests
    // ============================================

    #[test]
    fn test_layout_variables() {
        let env = builder().build(&node(recipe("llvm", &[])), &[], &linux());

        assert_eq!(env.var("PREFIX"), Some("/opt/kiln/cellar/llvm/1.0.0"));
        assert_eq!(env.var("STAGING"), Some("/tmp/kiln/staging/llvm-1.0.0"));
        assert_eq!(env.var("SRCDIR"), env.var("STAGING"));
        assert_eq!(env.var("HOME"), env.var("STAGING"));
        assert_eq!(env.var("JOBS"), Some("8"));
        assert_eq!(env.var("PATH"), Some("/usr/bin:/bin"));
    }

    #[test]
    fn test_dependency_bins_precede_system_path() {
        let env = builder().build(
            &node(recipe("llvm", &[])),
            &[tree("ninja", false), tree("cmake", false)],
            &linux(),
        );
        assert_eq!(
            env.var("PATH"),
            Some("/opt/kiln/cellar/cmake/1.0.0/bin:/opt/kiln/cellar/ninja/1.0.0/bin:/usr/bin:/bin")
        );
        assert!(env.var("CPPFLAGS").is_none());
    }

    #[test]
    fn test_compile_visible_flags_propagate() {
        let env = builder().build(
            &node(recipe("llvm", &[])),
            &[tree("zstd", true), tree("cmake", false), tree("zlib", true)],
            &linux(),
        );
        assert_eq!(
            env.var("CPPFLAGS"),
            Some("-I/opt/kiln/cellar/zlib/1.0.0/include -I/opt/kiln/cellar/zstd/1.0.0/include")
        );
        assert_eq!(
            env.var("LDFLAGS"),
            Some("-L/opt/kiln/cellar/zlib/1.0.0/lib -L/opt/kiln/cellar/zstd/1.0.0/lib")
        );
        assert_eq!(
            env.var("PKG_CONFIG_PATH"),
            Some("/opt/kiln/cellar/zlib/1.0.0/lib/pkgconfig:/opt/kiln/cellar/zstd/1.0.0/lib/pkgconfig")
        );
        assert!(env.var("CMAKE_PREFIX_PATH").is_some());
    }

    #[test]
    fn test_macos_sysroot_and_architectures() {
        let env = builder().build(&node(recipe("llvm", &[])), &[], &macos("14", 23));

        let sdk = "/Library/Developer/CommandLineTools/SDKs/MacOSX14.sdk";
        assert_eq!(env.sysroot.as_deref(), Some(sdk));
        assert_eq!(env.var("SDKROOT"), Some(sdk));
        assert_eq!(env.definitions["CMAKE_OSX_SYSROOT"], sdk);
        assert_eq!(env.definitions["CMAKE_OSX_ARCHITECTURES"], "arm64");
        assert_eq!(env.architectures, ["arm64"]);
    }

    #[test]
    fn test_explicit_sdk_root_wins() {
        let PlatformFacts::MacOs(mut mac) = macos("14", 23) else {
            unreachable!()
        };
        mac.sdk_root = Some(PathBuf::from("/Applications/Xcode.app/SDKs/MacOSX.sdk"));
        let env = builder().build(&node(recipe("llvm", &[])), &[], &PlatformFacts::MacOs(mac));
        assert_eq!(env.sysroot.as_deref(), Some("/Applications/Xcode.app/SDKs/MacOSX.sdk"));
    }

    #[test]
    fn test_linux_has_no_sysroot_keys() {
        let env = builder().build(&node(recipe("llvm", &[])), &[], &linux());
        assert!(env.sysroot.is_none());
        assert!(env.var("SDKROOT").is_none());
        assert!(!env.definitions.contains_key("CMAKE_OSX_SYSROOT"));
        assert!(!env.definitions.contains_key("CMAKE_OSX_ARCHITECTURES"));
    }

    #[test]
    fn test_recipe_flags_and_conditional_blocks() {
        let mut llvm = recipe("llvm", &[]);
        llvm.build.env.insert("CFLAGS".to_string(), "-O2".to_string());
        llvm.build.definitions.insert(
            "CMAKE_INSTALL_PREFIX".to_string(),
            DefinitionValue::Str("{prefix}".to_string()),
        );
        llvm.build.definitions.insert(
            "LLVM_ENABLE_PROJECTS".to_string(),
            DefinitionValue::List(vec!["clang".to_string(), "lld".to_string()]),
        );
        llvm.build.conditional.push(ConditionalFlags {
            platform: PlatformPredicate::Only(OsFamily::Linux),
            env: BTreeMap::new(),
            definitions: [("LLVM_ENABLE_LIBCXX".to_string(), DefinitionValue::Bool(false))]
                .into_iter()
                .collect(),
        });
        llvm.build.conditional.push(ConditionalFlags {
            platform: PlatformPredicate::Only(OsFamily::MacOs),
            env: [("MACOSX_DEPLOYMENT_TARGET".to_string(), "14".to_string())]
                .into_iter()
                .collect(),
            definitions: BTreeMap::new(),
        });

        let env = builder().build(&node(llvm), &[], &linux());

        assert_eq!(env.definitions["CMAKE_INSTALL_PREFIX"], "/opt/kiln/cellar/llvm/1.0.0");
        assert_eq!(env.definitions["LLVM_ENABLE_PROJECTS"], "clang;lld");
        assert_eq!(env.definitions["LLVM_ENABLE_LIBCXX"], "OFF");
        assert_eq!(env.definitions["CMAKE_C_FLAGS"], "-O2");
        assert!(!env.definitions.contains_key("CMAKE_CXX_FLAGS"));
        assert!(env.var("MACOSX_DEPLOYMENT_TARGET").is_none());
    }

    #[test]
    fn test_expand_args_splices_definitions() {
        let mut llvm = recipe("llvm", &[]);
        llvm.build.definitions.insert("B".to_string(), DefinitionValue::Int(2));
        llvm.build.definitions.insert("A".to_string(), DefinitionValue::Bool(true));
        let env = builder().build(&node(llvm), &[], &linux());

        let args = env.expand_args(&[
            "cmake".to_string(),
            "{source}/llvm".to_string(),
            "{definitions}".to_string(),
            "-j{jobs}".to_string(),
            "{unknown}".to_string(),
        ]);
        assert_eq!(
            args,
            [
                "cmake",
                "/tmp/kiln/staging/llvm-1.0.0/llvm",
                "-DA=ON",
                "-DB=2",
                "-j8",
                "{unknown}"
            ]
        );
    }

    #[test]
    fn test_dependency_trees_follow_plan_and_visibility() {
        let mut llvm = recipe("llvm", &[("cmake", Phase::Build)]);
        llvm.dependencies.push(DependencyDeclaration {
            id: "zstd".to_string(),
            phase: Phase::Runtime,
            platform: None,
            compile_visible: true,
        });
        let universe = RecipeStore::from_recipes([llvm, recipe("cmake", &[]), recipe("zstd", &[])]);
        let plan = resolve("llvm", &universe, &linux(), &PhaseFilter::build()).unwrap();

        let recipes: Vec<&Recipe> = plan.nodes().iter().map(|n| n.recipe.as_ref()).collect();
        let trees = builder().dependency_trees(plan.get("llvm").unwrap(), &recipes);

        assert_eq!(trees.len(), 2);
        assert!(trees.iter().any(|t| t.id == "zstd" && t.compile_visible));
        assert!(trees.iter().any(|t| t.id == "cmake" && !t.compile_visible));
    }

    // ============================================
    // Property-Based Tests
    // ============================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(defaults::MIN_PROPTEST_ITERATIONS))]

        /// Same inputs, in any order, give the same environment
        #[test]
        fn prop_build_is_pure(
            ids in proptest::collection::btree_set(crate::test_utils::generators::recipe_id(), 0..6),
            visible in proptest::collection::vec(any::<bool>(), 6),
            mac in any::<bool>(),
        ) {
            let facts = if mac { macos("13", 22) } else { linux() };
            let trees: Vec<InstalledTree> = ids
                .iter()
                .zip(&visible)
                .map(|(id, v)| tree(id, *v))
                .collect();
            let mut reversed = trees.clone();
            reversed.reverse();

            let n = node(recipe("target", &[]));
            let first = builder().build(&n, &trees, &facts);
            let second = builder().build(&n, &reversed, &facts);
            prop_assert_eq!(first, second);
        }

        /// Templated arguments without placeholders pass through unchanged
        #[test]
        fn prop_plain_args_unchanged(args in proptest::collection::vec("[a-zA-Z0-9_./=-]{0,16}", 0..8)) {
            let env = builder().build(&node(recipe("x", &[])), &[], &linux());
            prop_assert_eq!(env.expand_args(&args), args);
        }
    }
}
