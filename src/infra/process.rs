//! External process execution
//!
//! Runs one step as a single child process with an explicit argument vector
//! and an explicit environment. The child never inherits the caller's
//! environment; `argv[0]` is looked up on the `PATH` the step was given.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::defaults::{PIPE_DRAIN_GRACE_MS, STDERR_TAIL_LINES};
use crate::error::ExecutionError;

/// Which part of a node a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    /// Source checksum verification
    Source,
    /// Build steps
    Build,
    /// Install steps
    Install,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Build => write!(f, "build"),
            Self::Install => write!(f, "install"),
        }
    }
}

/// Identity of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepId {
    /// Plan node (recipe id)
    pub node: String,
    /// Phase within the node
    pub phase: StepPhase,
    /// Index across all of the node's steps
    pub index: usize,
    /// Display name
    pub name: String,
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[{}] {}", self.node, self.phase, self.index, self.name)
    }
}

/// How a step ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepStatus {
    /// Process exited with a code
    Exited { code: i32 },
    /// Process was terminated by a signal
    Signaled { signal: i32 },
    /// Process exceeded its timeout and was killed
    TimedOut { seconds: u64 },
    /// Process could not be started
    SpawnFailed { error: String },
    /// A non-process check failed (checksum mismatch)
    CheckFailed { error: String },
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exit code {code}"),
            Self::Signaled { signal } => write!(f, "signal {signal}"),
            Self::TimedOut { seconds } => write!(f, "timed out after {seconds}s"),
            Self::SpawnFailed { error } => write!(f, "spawn failed: {error}"),
            Self::CheckFailed { error } => write!(f, "check failed: {error}"),
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    /// Step identity
    pub id: StepId,
    /// How it ended
    pub status: StepStatus,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Wall-clock duration
    pub duration: Duration,
}

impl StepResult {
    /// Whether the step succeeded
    pub fn success(&self) -> bool {
        matches!(self.status, StepStatus::Exited { code: 0 })
    }

    /// The failure as an error value, if the step failed
    pub fn error(&self) -> Option<ExecutionError> {
        let node = self.id.node.clone();
        let index = self.id.index;
        match &self.status {
            StepStatus::Exited { code: 0 } => None,
            StepStatus::Exited { .. } | StepStatus::Signaled { .. } => {
                Some(ExecutionError::NonZeroExit {
                    node,
                    index,
                    status: self.status.to_string(),
                    stderr_tail: tail(&self.stderr, STDERR_TAIL_LINES),
                })
            }
            StepStatus::TimedOut { seconds } => Some(ExecutionError::TimedOut {
                node,
                index,
                seconds: *seconds,
                stderr_tail: tail(&self.stderr, STDERR_TAIL_LINES),
            }),
            StepStatus::SpawnFailed { error } | StepStatus::CheckFailed { error } => {
                Some(ExecutionError::Spawn {
                    node,
                    index,
                    program: self.id.name.clone(),
                    error: error.clone(),
                })
            }
        }
    }
}

/// Everything needed to start one process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Argument vector; the first element is the program
    pub argv: Vec<String>,
    /// Working directory
    pub cwd: PathBuf,
    /// Complete child environment
    pub env: BTreeMap<String, String>,
    /// Kill the child after this long
    pub timeout: Option<Duration>,
}

/// Captured output of a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// How it ended
    pub status: StepStatus,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Wall-clock duration
    pub duration: Duration,
}

/// Locate the program for `argv[0]`
///
/// Names containing a slash are taken as paths (relative to `cwd`); bare
/// names are searched on the `PATH` from `env` only.
pub fn resolve_program(
    program: &str,
    env: &BTreeMap<String, String>,
    cwd: &Path,
) -> Result<PathBuf, String> {
    if program.contains('/') {
        let path = cwd.join(program);
        return if path.exists() {
            Ok(path)
        } else {
            Err(format!("{} does not exist", path.display()))
        };
    }

    let search = env.get("PATH").map(String::as_str).unwrap_or_default();
    which::which_in(program, Some(search), cwd)
        .map_err(|e| format!("{program} not found on PATH '{search}': {e}"))
}

/// Run one process to completion
pub async fn run(spec: &ProcessSpec) -> ProcessOutput {
    let started = Instant::now();
    let failed = |error: String| ProcessOutput {
        status: StepStatus::SpawnFailed { error },
        stdout: String::new(),
        stderr: String::new(),
        duration: started.elapsed(),
    };

    let Some(program) = spec.argv.first() else {
        return failed("empty argument vector".to_string());
    };
    let program = match resolve_program(program, &spec.env, &spec.cwd) {
        Ok(path) => path,
        Err(e) => return failed(e),
    };

    debug!("Running {:?} in {}", spec.argv, spec.cwd.display());

    let mut cmd = Command::new(&program);
    cmd.args(&spec.argv[1..])
        .current_dir(&spec.cwd)
        .env_clear()
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return failed(format!("{}: {e}", program.display())),
    };
    let (stdout, mut stdout_task) = capture(child.stdout.take());
    let (stderr, mut stderr_task) = capture(child.stderr.take());

    let status = match spec.timeout {
        Some(limit) => match timeout(limit, child.wait()).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!("{:?} timed out after {}s", spec.argv, limit.as_secs());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {e}", program.display());
                }
                None
            }
        },
        None => Some(child.wait().await),
    };

    // A killed step's pipes may be held open by its own children
    let drain = async {
        let _ = (&mut stdout_task).await;
        let _ = (&mut stderr_task).await;
    };
    if status.is_some() {
        drain.await;
    } else if timeout(Duration::from_millis(PIPE_DRAIN_GRACE_MS), drain).await.is_err() {
        stdout_task.abort();
        stderr_task.abort();
    }

    let stdout = captured(&stdout);
    let stderr = captured(&stderr);
    match status {
        Some(Ok(status)) => ProcessOutput {
            status: exit_status(status),
            stdout,
            stderr,
            duration: started.elapsed(),
        },
        Some(Err(e)) => failed(format!("failed to wait for {}: {e}", program.display())),
        None => ProcessOutput {
            status: StepStatus::TimedOut {
                seconds: spec.timeout.map_or(0, |t| t.as_secs()),
            },
            stdout,
            stderr,
            duration: started.elapsed(),
        },
    }
}

type Buffer = Arc<Mutex<Vec<u8>>>;

/// Copy a child pipe into a shared buffer as it arrives
fn capture<R>(pipe: Option<R>) -> (Buffer, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Buffer::default();
    let sink = Arc::clone(&buffer);
    let task = tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut out) = sink.lock() {
                        out.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });
    (buffer, task)
}

fn captured(buffer: &Buffer) -> String {
    buffer
        .lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(unix)]
fn exit_status(status: std::process::ExitStatus) -> StepStatus {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => StepStatus::Exited { code },
        (None, Some(signal)) => StepStatus::Signaled { signal },
        (None, None) => StepStatus::Exited { code: -1 },
    }
}

#[cfg(not(unix))]
fn exit_status(status: std::process::ExitStatus) -> StepStatus {
    StepStatus::Exited {
        code: status.code().unwrap_or(-1),
    }
}

/// Last `lines` lines of `text`
pub fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env() -> BTreeMap<String, String> {
        [("PATH".to_string(), "/usr/bin:/bin".to_string())]
            .into_iter()
            .collect()
    }

    fn spec(dir: &TempDir, script: &str) -> ProcessSpec {
        ProcessSpec {
            argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            cwd: dir.path().to_path_buf(),
            env: env(),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let out = run(&spec(&dir, "echo out; echo err >&2; exit 3")).await;
        assert_eq!(out.status, StepStatus::Exited { code: 3 });
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_environment_is_exactly_the_given_map() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("KILN_PROCESS_TEST_LEAK", "leaked");
        let mut s = spec(&dir, "echo \"[$KILN_PROCESS_TEST_LEAK][$FOO]\"");
        s.env.insert("FOO".to_string(), "bar".to_string());
        let out = run(&s).await;
        assert_eq!(out.stdout, "[][bar]\n");
    }

    #[tokio::test]
    async fn test_runs_in_given_directory() {
        let dir = TempDir::new().unwrap();
        let out = run(&spec(&dir, "pwd")).await;
        let reported = PathBuf::from(out.stdout.trim()).canonicalize().unwrap();
        assert_eq!(reported, dir.path().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let mut s = spec(&dir, "");
        s.argv = vec!["definitely-not-a-kiln-tool".to_string()];
        let out = run(&s).await;
        assert!(matches!(out.status, StepStatus::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_program_not_found_without_path() {
        let dir = TempDir::new().unwrap();
        let mut s = spec(&dir, "true");
        s.env.clear();
        let out = run(&s).await;
        assert!(matches!(out.status, StepStatus::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = TempDir::new().unwrap();
        let mut s = spec(&dir, "sleep 5");
        s.timeout = Some(Duration::from_millis(200));
        let out = run(&s).await;
        assert_eq!(out.status, StepStatus::TimedOut { seconds: 0 });
        assert!(out.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_keeps_output_so_far() {
        let dir = TempDir::new().unwrap();
        let mut s = spec(&dir, "echo configuring; echo 'waiting on lock' >&2; exec sleep 5");
        s.timeout = Some(Duration::from_millis(500));
        let out = run(&s).await;
        assert!(matches!(out.status, StepStatus::TimedOut { .. }));
        assert_eq!(out.stdout, "configuring\n");
        assert_eq!(out.stderr, "waiting on lock\n");
        assert!(out.duration < Duration::from_secs(5));
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 5), "");
    }

    #[test]
    fn test_step_result_error_mapping() {
        let result = |status| StepResult {
            id: StepId {
                node: "llvm".to_string(),
                phase: StepPhase::Build,
                index: 2,
                name: "cmake".to_string(),
            },
            status,
            stdout: String::new(),
            stderr: "line1\nfatal".to_string(),
            duration: Duration::ZERO,
        };

        assert!(result(StepStatus::Exited { code: 0 }).error().is_none());
        assert!(matches!(
            result(StepStatus::Exited { code: 1 }).error(),
            Some(ExecutionError::NonZeroExit { index: 2, .. })
        ));
        assert!(matches!(
            result(StepStatus::TimedOut { seconds: 9 }).error(),
            Some(ExecutionError::TimedOut { seconds: 9, .. })
        ));
        assert!(matches!(
            result(StepStatus::SpawnFailed { error: "x".to_string() }).error(),
            Some(ExecutionError::Spawn { .. })
        ));
    }
}
