//! Default configuration values

use crate::core::platform::{OsVersion, SysrootRule, SysrootTable};

/// Default number of parallel build jobs when the CPU count is unavailable
pub const DEFAULT_BUILD_JOBS: usize = 4;

/// Default install root subdirectory under the data directory
pub const DEFAULT_PREFIX_SUBDIR: &str = "cellar";

/// Default staging subdirectory under the cache directory
pub const DEFAULT_STAGING_SUBDIR: &str = "staging";

/// Default config subdirectory for post-install outputs
pub const DEFAULT_CONFIG_SUBDIR: &str = "etc";

/// How long a timed-out step's pipes are drained after the kill
pub const PIPE_DRAIN_GRACE_MS: u64 = 500;

/// Default recipes directory name (relative to the working directory)
pub const DEFAULT_RECIPES_DIR: &str = "recipes";

/// Executable search path handed to steps on Linux hosts
pub const LINUX_SYSTEM_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

/// Executable search path handed to steps on macOS hosts
pub const MACOS_SYSTEM_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// Command Line Tools root on macOS
pub const MACOS_CLT_ROOT: &str = "/Library/Developer/CommandLineTools";

/// macOS releases the post-install config matrix covers
pub const MACOS_RELEASES: &[&str] = &[
    "10.11", "10.12", "10.13", "10.14", "10.15", "11", "12", "13", "14", "15", "26",
];

/// Architectures every post-install config matrix covers, besides the host's
pub const CONFIG_ARCHITECTURES: &[&str] = &["arm64", "x86_64", "aarch64"];

/// Default post-install config file name template
pub const CONFIG_FILE_TEMPLATE: &str = "{arch}-apple-{system}{version}.cfg";

/// Default post-install config file content template
pub const CONFIG_CONTENT_TEMPLATE: &str = "-isysroot {sysroot}\n";

/// Number of stderr lines kept when reporting a failed step
pub const STDERR_TAIL_LINES: usize = 20;

/// Minimum proptest iterations
pub const MIN_PROPTEST_ITERATIONS: u32 = 100;

/// First macOS release whose CLT ship a versioned SDK
fn first_versioned_sdk() -> OsVersion {
    OsVersion {
        major: 10,
        minor: Some(14),
        patch: None,
    }
}

/// Default sysroot table
///
/// SDKs are versioned from 10.14 on; older targets build against `/`.
pub fn sysroot_table() -> SysrootTable {
    SysrootTable {
        unversioned: "{clt}/SDKs/MacOSX.sdk".to_string(),
        rules: vec![
            SysrootRule {
                min: Some(first_versioned_sdk()),
                max: None,
                template: "{clt}/SDKs/MacOSX{version}.sdk".to_string(),
            },
            SysrootRule {
                min: None,
                max: Some(first_versioned_sdk()),
                template: "/".to_string(),
            },
        ],
    }
}
