//! Platform facts
//!
//! Host facts are captured once (see [`crate::infra::host`]) into an immutable
//! [`PlatformFacts`] value. The environment builder and the post-install
//! configurator branch on its variant instead of probing the host themselves.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::template::{self, Vars};

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Apple macOS
    MacOs,
    /// Linux
    Linux,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MacOs => write!(f, "macos"),
            Self::Linux => write!(f, "linux"),
        }
    }
}

/// Dotted OS version (`14`, `10.15`, `13.2.1`)
///
/// Missing components compare as zero, so `11` == `11.0`. The textual form
/// keeps the components that were given, which is what config file names use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OsVersion {
    pub major: u32,
    pub minor: Option<u32>,
    pub patch: Option<u32>,
}

impl OsVersion {
    /// Version with only a major component
    pub fn from_major(major: u32) -> Self {
        Self {
            major,
            minor: None,
            patch: None,
        }
    }

    /// Darwin kernel major version shipped with this macOS release
    ///
    /// 10.x releases map to `x + 4`, 11 through 15 to `major + 9`, and the
    /// year-numbered releases from 26 on to `major - 1`.
    pub fn darwin_kernel_major(&self) -> u32 {
        match self.major {
            0..=10 => self.minor.unwrap_or(0) + 4,
            11..=15 => self.major + 9,
            major => major - 1,
        }
    }

    fn key(&self) -> (u32, u32, u32) {
        (
            self.major,
            self.minor.unwrap_or(0),
            self.patch.unwrap_or(0),
        )
    }
}

impl PartialEq for OsVersion {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for OsVersion {}

impl PartialOrd for OsVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OsVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl FromStr for OsVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(format!("invalid OS version '{s}'"));
        }
        let parse = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| format!("invalid OS version '{s}'"))
        };
        Ok(Self {
            major: parse(parts[0])?,
            minor: parts.get(1).map(|p| parse(p)).transpose()?,
            patch: parts.get(2).map(|p| parse(p)).transpose()?,
        })
    }
}

impl TryFrom<String> for OsVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OsVersion> for String {
    fn from(value: OsVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{minor}")?;
            if let Some(patch) = self.patch {
                write!(f, ".{patch}")?;
            }
        }
        Ok(())
    }
}

/// macOS host facts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacOsFacts {
    /// Product version (`sw_vers -productVersion`)
    pub version: OsVersion,
    /// Darwin kernel major version
    pub kernel_major: u32,
    /// CPU architecture (`arm64`, `x86_64`)
    pub arch: String,
    /// SDK selected for builds, when one is required
    pub sdk_root: Option<PathBuf>,
    /// Command Line Tools install root
    pub clt_root: PathBuf,
    /// Whether the CLT ship headers in a separate SDK package
    pub clt_separate_headers: bool,
    /// Base executable search path
    pub system_path: String,
}

/// Linux host facts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxFacts {
    /// CPU architecture (`x86_64`, `aarch64`)
    pub arch: String,
    /// Kernel release (`uname -r`)
    pub kernel_release: Option<String>,
    /// Base executable search path
    pub system_path: String,
}

/// Immutable description of the host a run targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum PlatformFacts {
    /// macOS host
    MacOs(MacOsFacts),
    /// Linux host
    Linux(LinuxFacts),
}

impl PlatformFacts {
    /// OS family of this host
    pub fn family(&self) -> OsFamily {
        match self {
            Self::MacOs(_) => OsFamily::MacOs,
            Self::Linux(_) => OsFamily::Linux,
        }
    }

    /// CPU architecture name
    pub fn arch(&self) -> &str {
        match self {
            Self::MacOs(m) => &m.arch,
            Self::Linux(l) => &l.arch,
        }
    }

    /// Base executable search path, used instead of the ambient `PATH`
    pub fn system_path(&self) -> &str {
        match self {
            Self::MacOs(m) => &m.system_path,
            Self::Linux(l) => &l.system_path,
        }
    }

}

/// Platform condition attached to a dependency or flag block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformPredicate {
    /// Applies only on the given family
    Only(OsFamily),
    /// Applies everywhere except the given family (system-provided there)
    Except(OsFamily),
}

impl PlatformPredicate {
    /// Whether the predicate holds for `facts`
    pub fn matches(&self, facts: &PlatformFacts) -> bool {
        match self {
            Self::Only(family) => facts.family() == *family,
            Self::Except(family) => facts.family() != *family,
        }
    }
}

/// One row of the sysroot table: an OS version range mapped to a path template
///
/// `min` is inclusive, `max` exclusive; a missing bound is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysrootRule {
    #[serde(default)]
    pub min: Option<OsVersion>,
    #[serde(default)]
    pub max: Option<OsVersion>,
    pub template: String,
}

impl SysrootRule {
    fn contains(&self, version: &OsVersion) -> bool {
        self.min.as_ref().map_or(true, |min| version >= min)
            && self.max.as_ref().map_or(true, |max| version < max)
    }
}

/// Table-driven sysroot selection
///
/// Templates may use `{clt}` (Command Line Tools root) and `{version}`
/// (the target OS version).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysrootTable {
    /// Used for unversioned targets, and for targets older than the host when
    /// the CLT ship a separate header package
    pub unversioned: String,
    /// Version ranges, first match wins
    pub rules: Vec<SysrootRule>,
}

impl SysrootTable {
    /// Select the sysroot for building against `target` on `facts`
    ///
    /// Returns `None` for families without a sysroot concept.
    pub fn select(&self, facts: &PlatformFacts, target: Option<&OsVersion>) -> Option<String> {
        let PlatformFacts::MacOs(mac) = facts else {
            return None;
        };

        let mut vars = Vars::new();
        vars.insert("clt", mac.clt_root.display().to_string());

        let Some(target) = target else {
            return Some(template::render(&self.unversioned, &vars));
        };
        if mac.version > *target && mac.clt_separate_headers {
            return Some(template::render(&self.unversioned, &vars));
        }

        vars.insert("version", target.to_string());
        self.rules
            .iter()
            .find(|rule| rule.contains(target))
            .map(|rule| template::render(&rule.template, &vars))
    }
}
