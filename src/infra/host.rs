//! Host detection
//!
//! Probes the running machine once and captures the result as
//! [`PlatformFacts`]. Nothing else in the crate asks the host about itself.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::config::defaults::{LINUX_SYSTEM_PATH, MACOS_CLT_ROOT, MACOS_SYSTEM_PATH};
use crate::core::platform::{LinuxFacts, MacOsFacts, OsVersion, PlatformFacts};

/// Environment variable pinning the SDK used for builds on macOS
pub const ENV_SDKROOT: &str = "SDKROOT";

/// Detect the facts of the running host
pub fn detect() -> PlatformFacts {
    if cfg!(target_os = "macos") {
        detect_macos()
    } else {
        detect_linux()
    }
}

fn detect_macos() -> PlatformFacts {
    let version = command_output("sw_vers", &["-productVersion"])
        .and_then(|out| match out.parse::<OsVersion>() {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("{e}");
                None
            }
        })
        .unwrap_or_else(|| OsVersion::from_major(0));

    let kernel_major = command_output("uname", &["-r"])
        .and_then(|release| kernel_major(&release))
        .unwrap_or_else(|| version.darwin_kernel_major());

    let clt_root = PathBuf::from(MACOS_CLT_ROOT);
    let facts = MacOsFacts {
        clt_separate_headers: clt_root.join("SDKs").is_dir(),
        sdk_root: env::var_os(ENV_SDKROOT)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from),
        arch: normalize_arch(env::consts::ARCH),
        version,
        kernel_major,
        clt_root,
        system_path: MACOS_SYSTEM_PATH.to_string(),
    };
    debug!("Detected macOS host: {facts:?}");
    PlatformFacts::MacOs(facts)
}

fn detect_linux() -> PlatformFacts {
    let facts = LinuxFacts {
        arch: env::consts::ARCH.to_string(),
        kernel_release: command_output("uname", &["-r"]),
        system_path: LINUX_SYSTEM_PATH.to_string(),
    };
    debug!("Detected Linux host: {facts:?}");
    PlatformFacts::Linux(facts)
}

/// Trimmed stdout of a successful command, `None` otherwise
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        debug!("{program} exited with {}", output.status);
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Major component of a kernel release string (`23.4.0` -> 23)
fn kernel_major(release: &str) -> Option<u32> {
    release.split('.').next()?.parse().ok()
}

/// Apple tools call 64-bit ARM `arm64`
fn normalize_arch(arch: &str) -> String {
    match arch {
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

/// Whether `path` names an installed SDK
pub fn sdk_exists(path: &Path) -> bool {
    path.join("SDKSettings.json").is_file() || path.join("SDKSettings.plist").is_file()
}
