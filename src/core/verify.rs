//! Verification procedure and comparison semantics
//!
//! A recipe's self-test is a list of assertions, each running one command in
//! a scratch directory and comparing what it observed against an
//! [`Expectation`]. This module holds the procedure model and the pure
//! comparison logic; [`crate::infra::verifier`] does the running.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Self-test procedure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestProcedure {
    /// Files written into the scratch directory before any assertion runs
    #[serde(default)]
    pub fixtures: BTreeMap<String, String>,

    /// Assertions, evaluated in order
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

/// One assertion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assertion {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Command to run; may be empty for pure file checks
    #[serde(default)]
    pub run: Vec<String>,

    /// Extra environment for the command
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// What the command must produce
    pub expect: Expectation,
}

impl Assertion {
    /// Name for reports
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| {
            if self.run.is_empty() {
                format!("assertion {index}")
            } else {
                self.run.join(" ")
            }
        })
    }
}

/// Expected result of an assertion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// Stdout equals the text, trailing newline ignored
    Output(String),
    /// Stdout or stderr matches the regex
    Pattern(String),
    /// Process exit code equals the value
    ExitCode(i32),
    /// Linked-library membership test on a file
    Linkage(LinkageExpectation),
}

impl Expectation {
    /// Short category name
    pub fn category(&self) -> &'static str {
        match self {
            Self::Output(_) => "output",
            Self::Pattern(_) => "pattern",
            Self::ExitCode(_) => "exit-code",
            Self::Linkage(_) => "linkage",
        }
    }
}

/// Linked-library expectation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkageExpectation {
    /// Binary to inspect, relative to the scratch directory (templated)
    pub file: String,

    /// Libraries that must be linked (exact names)
    #[serde(default)]
    pub includes: Vec<String>,

    /// Regexes no linked library may match
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// What running an assertion produced
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// Exit code, `None` if the process did not exit normally or never ran
    pub exit_code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Why the process could not run, if it could not
    pub error: Option<String>,
    /// Libraries linked by the linkage target, or why they could not be read
    pub libraries: Option<Result<Vec<String>, String>>,
}

/// Result of one assertion
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AssertionOutcome {
    /// Position in the procedure
    pub index: usize,
    /// Display name
    pub name: String,
    /// Expectation category
    pub category: String,
    /// Whether it passed
    pub passed: bool,
    /// Explanation for failures (diff, missing library, ...)
    pub detail: Option<String>,
}

/// Result of a whole verification run
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerificationReport {
    /// Recipe identity
    pub recipe: String,
    /// Every assertion's outcome, in order
    pub outcomes: Vec<AssertionOutcome>,
}

impl VerificationReport {
    /// Whether every assertion passed
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    /// Failed assertions
    pub fn failures(&self) -> impl Iterator<Item = &AssertionOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }
}

/// Strip one trailing newline (`\n` or `\r\n`)
pub fn chomp(s: &str) -> &str {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .unwrap_or(s)
}

/// Compare an observation against an expectation
///
/// Returns `None` on success, or the failure detail.
pub fn evaluate(expect: &Expectation, observed: &Observation) -> Option<String> {
    if let Some(error) = &observed.error {
        return Some(error.clone());
    }

    match expect {
        Expectation::Output(expected) => {
            let expected = chomp(expected);
            let actual = chomp(&observed.stdout);
            if expected == actual {
                None
            } else {
                let patch = diffy::create_patch(expected, actual);
                Some(format!("output differs:\n{patch}"))
            }
        }
        Expectation::Pattern(pattern) => match Regex::new(pattern) {
            Ok(re) if re.is_match(&observed.stdout) || re.is_match(&observed.stderr) => None,
            Ok(_) => Some(format!("no output matched /{pattern}/")),
            Err(e) => Some(format!("invalid pattern /{pattern}/: {e}")),
        },
        Expectation::ExitCode(expected) => match observed.exit_code {
            Some(code) if code == *expected => None,
            Some(code) => Some(format!("exit code {code}, expected {expected}")),
            None => Some(format!("process did not exit normally, expected {expected}")),
        },
        Expectation::Linkage(linkage) => match &observed.libraries {
            None => Some(format!("'{}' was not inspected", linkage.file)),
            Some(Err(e)) => Some(format!("cannot read '{}': {e}", linkage.file)),
            Some(Ok(libraries)) => check_linkage(linkage, libraries),
        },
    }
}

fn check_linkage(linkage: &LinkageExpectation, libraries: &[String]) -> Option<String> {
    let mut problems = Vec::new();

    for wanted in &linkage.includes {
        if !libraries.iter().any(|lib| lib == wanted) {
            problems.push(format!("missing {wanted}"));
        }
    }

    for pattern in &linkage.excludes {
        match Regex::new(pattern) {
            Ok(re) => {
                for lib in libraries.iter().filter(|lib| re.is_match(lib)) {
                    problems.push(format!("{lib} matches excluded /{pattern}/"));
                }
            }
            Err(e) => problems.push(format!("invalid pattern /{pattern}/: {e}")),
        }
    }

    if problems.is_empty() {
        None
    } else {
        Some(format!(
            "'{}' links [{}]: {}",
            linkage.file,
            libraries.join(", "),
            problems.join("; ")
        ))
    }
}
