//! Platform-specific directory management
//!
//! Provides platform-specific paths for cache, config, and data directories.
//! Follows XDG Base Directory Specification on Linux and standard locations on macOS.
//!
//! Environment variables can override default directories:
//! - `KILN_CACHE_DIR` - Override cache directory (staging trees)
//! - `KILN_CONFIG_DIR` - Override config directory (config.toml, post-install configs)
//! - `KILN_DATA_DIR` - Override data directory (installed artifact trees)

use std::env;
use std::path::PathBuf;

use crate::config::defaults::{DEFAULT_CONFIG_SUBDIR, DEFAULT_PREFIX_SUBDIR, DEFAULT_STAGING_SUBDIR};

/// Environment variable names for directory overrides
pub const ENV_CACHE_DIR: &str = "KILN_CACHE_DIR";
pub const ENV_CONFIG_DIR: &str = "KILN_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "KILN_DATA_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "kiln";

/// Platform-specific directory provider for kiln
#[derive(Debug, Clone)]
pub struct KilnDirs {
    cache_dir: PathBuf,
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl KilnDirs {
    /// Create a new `KilnDirs` instance
    ///
    /// Checks environment variables first, then falls back to platform defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_dir: resolve(ENV_CACHE_DIR, dirs::cache_dir, &[".cache"]),
            config_dir: resolve(ENV_CONFIG_DIR, dirs::config_dir, &[".config"]),
            data_dir: resolve(ENV_DATA_DIR, dirs::data_dir, &[".local", "share"]),
        }
    }

    /// Directories rooted at explicit paths
    #[cfg(test)]
    #[must_use]
    pub fn with_roots(cache_dir: PathBuf, config_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            config_dir,
            data_dir,
        }
    }

    /// Root of the installed artifact trees
    #[must_use]
    pub fn prefix_root(&self) -> PathBuf {
        self.data_dir.join(DEFAULT_PREFIX_SUBDIR)
    }

    /// Root of the per-node staging directories
    #[must_use]
    pub fn staging_root(&self) -> PathBuf {
        self.cache_dir.join(DEFAULT_STAGING_SUBDIR)
    }

    /// Root of post-install config files
    #[must_use]
    pub fn post_install_config_root(&self) -> PathBuf {
        self.config_dir.join(DEFAULT_CONFIG_SUBDIR)
    }

    /// Get the global config file path
    #[must_use]
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

impl Default for KilnDirs {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment override, else the platform directory, else a path under home
fn resolve(var: &str, platform: fn() -> Option<PathBuf>, home_fallback: &[&str]) -> PathBuf {
    if let Ok(path) = env::var(var) {
        return PathBuf::from(path);
    }

    platform().map(|p| p.join(APP_NAME)).unwrap_or_else(|| {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home_fallback
            .iter()
            .fold(base, |path, part| path.join(part))
            .join(APP_NAME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_new_creates_instance() {
        let dirs = KilnDirs::new();
        assert!(dirs.prefix_root().ends_with("cellar"));
        assert!(dirs.staging_root().ends_with("staging"));
        assert!(dirs.global_config_path().ends_with("config.toml"));
    }

    #[test]
    fn test_layout_dirs_nest_under_roots() {
        let dirs = KilnDirs::with_roots("/c".into(), "/k".into(), "/d".into());
        assert_eq!(dirs.prefix_root(), PathBuf::from("/d/cellar"));
        assert_eq!(dirs.staging_root(), PathBuf::from("/c/staging"));
        assert_eq!(dirs.post_install_config_root(), PathBuf::from("/k/etc"));
        assert_eq!(dirs.global_config_path(), PathBuf::from("/k/config.toml"));
    }

    #[test]
    fn test_home_fallback_shape() {
        fn none() -> Option<PathBuf> {
            None
        }
        let path = resolve("KILN_TEST_UNSET_DIR_VARIABLE", none, &[".local", "share"]);
        assert!(path.ends_with(".local/share/kiln"));
    }
}
