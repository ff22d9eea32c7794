//! Post-install configuration
//!
//! Writes the per-target compiler config files a toolchain recipe needs so a
//! single installed tree keeps working across OS upgrades, and creates the
//! recipe's versioned symlinks. Writing is idempotent: files whose content
//! already matches are left alone, and every write goes through a temporary
//! file and a rename.

use serde::Serialize;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::defaults::{
    CONFIG_ARCHITECTURES, CONFIG_CONTENT_TEMPLATE, CONFIG_FILE_TEMPLATE, MACOS_RELEASES,
};
use crate::core::platform::{OsVersion, PlatformFacts, SysrootTable};
use crate::core::recipe::{PostInstallHook, Recipe};
use crate::core::template::{self, Vars};
use crate::error::{ConfigWriteError, FilesystemError};
use crate::infra::filesystem;

/// One (OS version, kernel version) pair config files are written for
///
/// Both `None` is the unversioned fallback entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTarget {
    /// OS release (`macosx<version>` files)
    pub os_version: Option<OsVersion>,
    /// Kernel major version (`darwin<version>` files)
    pub kernel_major: Option<u32>,
}

impl ConfigTarget {
    /// Entry for an OS release
    pub fn release(version: OsVersion) -> Self {
        Self {
            kernel_major: Some(version.darwin_kernel_major()),
            os_version: Some(version),
        }
    }

    /// Unversioned fallback entry
    pub fn unversioned() -> Self {
        Self {
            os_version: None,
            kernel_major: None,
        }
    }
}

/// A rendered config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// File name inside the target directory
    pub name: String,
    /// File content
    pub content: String,
}

/// Outcome of a config write pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteReport {
    /// Files created or rewritten
    pub written: Vec<PathBuf>,
    /// Files whose content already matched
    pub unchanged: Vec<PathBuf>,
    /// Files that could not be written
    #[serde(skip)]
    pub failed: Vec<ConfigWriteError>,
}

impl WriteReport {
    /// Whether every file was written or already correct
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Derives and writes post-install config files
#[derive(Debug, Clone)]
pub struct Configurator {
    facts: PlatformFacts,
    sysroot_table: SysrootTable,
    file_template: String,
    content_template: String,
}

impl Configurator {
    /// Configurator using the default file name and content templates
    pub fn new(facts: PlatformFacts, sysroot_table: SysrootTable) -> Self {
        Self {
            facts,
            sysroot_table,
            file_template: CONFIG_FILE_TEMPLATE.to_string(),
            content_template: CONFIG_CONTENT_TEMPLATE.to_string(),
        }
    }

    /// Apply a recipe hook's template overrides
    #[must_use]
    pub fn with_hook(mut self, hook: &PostInstallHook) -> Self {
        if let Some(name) = &hook.file_name {
            self.file_template.clone_from(name);
        }
        if let Some(content) = &hook.content {
            self.content_template.clone_from(content);
        }
        self
    }

    /// Whether config files apply to this host at all
    pub fn applies(&self) -> bool {
        matches!(self.facts, PlatformFacts::MacOs(_))
    }

    /// Architectures covered: the fixed set plus the host's
    pub fn architectures(&self) -> Vec<String> {
        let mut arches: Vec<String> = CONFIG_ARCHITECTURES.iter().map(ToString::to_string).collect();
        let host = self.facts.arch().to_string();
        if !arches.contains(&host) {
            arches.push(host);
        }
        arches
    }

    /// Every known OS release plus the unversioned fallback
    pub fn platform_matrix(&self) -> Vec<ConfigTarget> {
        MACOS_RELEASES
            .iter()
            .filter_map(|v| v.parse().ok())
            .map(ConfigTarget::release)
            .chain(std::iter::once(ConfigTarget::unversioned()))
            .collect()
    }

    /// The running host's release only
    pub fn host_matrix(&self) -> Vec<ConfigTarget> {
        match &self.facts {
            PlatformFacts::MacOs(mac) => vec![ConfigTarget {
                os_version: Some(mac.version.clone()),
                kernel_major: Some(mac.kernel_major),
            }],
            PlatformFacts::Linux(_) => Vec::new(),
        }
    }

    /// Render the files for `matrix` crossed with [`Self::architectures`]
    pub fn render(&self, matrix: &[ConfigTarget]) -> Vec<ConfigFile> {
        let arches = self.architectures();
        let mut files = Vec::new();

        for target in matrix {
            let Some(sysroot) = self
                .sysroot_table
                .select(&self.facts, target.os_version.as_ref())
            else {
                continue;
            };
            let systems = [
                ("darwin", target.kernel_major.map(|k| k.to_string())),
                ("macosx", target.os_version.as_ref().map(ToString::to_string)),
            ];

            for (system, version) in &systems {
                for arch in &arches {
                    let mut vars = Vars::new();
                    vars.insert("arch", arch.clone());
                    vars.insert("system", (*system).to_string());
                    vars.insert("version", version.clone().unwrap_or_default());
                    vars.insert("sysroot", sysroot.clone());
                    files.push(ConfigFile {
                        name: template::render(&self.file_template, &vars),
                        content: template::render(&self.content_template, &vars),
                    });
                }
            }
        }
        files
    }

    /// Write the config files for `matrix` into `target_dir`
    ///
    /// A file that fails is recorded in the report; the rest are still
    /// attempted.
    pub fn write_config(&self, target_dir: &Path, matrix: &[ConfigTarget]) -> WriteReport {
        let mut report = WriteReport::default();
        for file in self.render(matrix) {
            let path = target_dir.join(&file.name);
            if std::fs::read_to_string(&path).is_ok_and(|existing| existing == file.content) {
                debug!("{} is up to date", path.display());
                report.unchanged.push(path);
                continue;
            }
            match filesystem::write_file_atomic(&path, &file.content) {
                Ok(()) => report.written.push(path),
                Err(e) => {
                    warn!("{e}");
                    report.failed.push(ConfigWriteError {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            "Config files in {}: {} written, {} unchanged, {} failed",
            target_dir.display(),
            report.written.len(),
            report.unchanged.len(),
            report.failed.len()
        );
        report
    }

    /// Write the running host's config files if any are missing
    ///
    /// Existing files are never touched. Returns whether anything was
    /// written.
    pub fn ensure_config(&self, target_dir: &Path) -> Result<bool, ConfigWriteError> {
        let mut wrote = false;
        let mut first_error = None;

        for file in self.render(&self.host_matrix()) {
            let path = target_dir.join(&file.name);
            if path.exists() {
                continue;
            }
            match filesystem::write_file_atomic(&path, &file.content) {
                Ok(()) => {
                    info!("Wrote missing config {}", path.display());
                    wrote = true;
                }
                Err(e) => {
                    warn!("{e}");
                    first_error.get_or_insert(ConfigWriteError {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(wrote),
        }
    }
}

/// Everything the post-install hook did for one recipe
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostInstallReport {
    /// Directory config files went to, when any apply
    pub config_dir: Option<PathBuf>,
    /// Config file outcome
    pub config: WriteReport,
    /// Symlinks created or changed
    pub symlinks: Vec<PathBuf>,
    /// Rendered caveats
    pub caveats: Option<String>,
    /// Problems that did not stop the rest of the hook
    pub warnings: Vec<String>,
}

/// Run `recipe`'s post-install hook against its installed `tree`
///
/// Config files cover the full platform matrix. Nothing here fails the
/// node; problems land in [`PostInstallReport::warnings`].
pub fn run_hook(
    recipe: &Recipe,
    facts: &PlatformFacts,
    sysroot_table: &SysrootTable,
    config_root: &Path,
    tree: &Path,
) -> PostInstallReport {
    let mut report = PostInstallReport::default();
    let dir = config_dir(config_root, recipe);

    if let Some(hook) = &recipe.post_install {
        let configurator =
            Configurator::new(facts.clone(), sysroot_table.clone()).with_hook(hook);
        if configurator.applies() {
            match filesystem::create_dir_all(&dir) {
                Ok(()) => {
                    report.config = configurator.write_config(&dir, &configurator.platform_matrix());
                    report
                        .warnings
                        .extend(report.config.failed.iter().map(ToString::to_string));
                    report.config_dir = Some(dir.clone());
                }
                Err(e) => report.warnings.push(e.to_string()),
            }
        }

        #[cfg(unix)]
        {
            match create_symlinks(tree, recipe) {
                Ok(links) => report.symlinks = links,
                Err(e) => report.warnings.push(e.to_string()),
            }
        }
    }

    report.caveats = caveats(recipe, &dir, tree);
    report
}

/// Directory receiving a recipe's config files
pub fn config_dir(config_root: &Path, recipe: &Recipe) -> PathBuf {
    let subdir = recipe
        .post_install
        .as_ref()
        .and_then(|h| h.config_subdir.clone())
        .unwrap_or_else(|| recipe.id().to_string());
    config_root.join(subdir)
}

/// Create the recipe's versioned symlinks inside `tree`
///
/// Returns the links that were created or changed.
#[cfg(unix)]
pub fn create_symlinks(tree: &Path, recipe: &Recipe) -> Result<Vec<PathBuf>, FilesystemError> {
    let Some(hook) = &recipe.post_install else {
        return Ok(Vec::new());
    };

    let mut vars = Vars::new();
    vars.insert("major", recipe.version_major());
    vars.insert("version", recipe.version().to_string());

    let mut changed = Vec::new();
    for rule in &hook.symlinks {
        let link = tree.join(template::render(&rule.link, &vars));
        let target = PathBuf::from(template::render(&rule.target, &vars));
        if filesystem::ensure_symlink(&link, &target)? {
            debug!("Linked {} -> {}", link.display(), target.display());
            changed.push(link);
        }
    }
    Ok(changed)
}

/// Caveats text with `{config_dir}` and `{prefix}` filled in
pub fn caveats(recipe: &Recipe, config_dir: &Path, tree: &Path) -> Option<String> {
    let text = recipe.package.caveats.as_ref()?;
    let mut vars = Vars::new();
    vars.insert("config_dir", config_dir.display().to_string());
    vars.insert("prefix", tree.display().to_string());
    vars.insert("version", recipe.version().to_string());
    Some(template::render(text, &vars))
}
