//! Import and export actions.
//!
//! The actual data transfer between the document store and the shared
//! snapshot is done by two external scripts. This module locates and runs
//! them, captures their output and reports the exit code. A non-zero exit is
//! not an error here: callers decide how severe it is.

pub mod mock;

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default upper bound on a single script run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Exit code reported when a script is killed for exceeding its timeout.
pub const TIMED_OUT_EXIT_CODE: i32 = 124;

/// Exit code reported when a script was terminated by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Which direction of synchronization to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    /// Pull the shared snapshot into the local document store.
    Import,
    /// Push the local document store out as the new shared snapshot.
    Export,
}

impl SyncAction {
    pub fn name(&self) -> &'static str {
        match self {
            SyncAction::Import => "import",
            SyncAction::Export => "export",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one script run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncActionResult {
    /// Process exit code, 0 on success.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl SyncActionResult {
    /// A successful result with the given output.
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and error output.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`SyncError::ActionFailed`].
    pub fn check(self, action: SyncAction) -> SyncResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SyncError::ActionFailed {
                action,
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Errors raised while running a sync action.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{action} script not found: {}", path.display())]
    ScriptNotFound { action: SyncAction, path: PathBuf },

    #[error("failed to run {action} script {}: {source}", path.display())]
    Process {
        action: SyncAction,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{action} script exited with code {exit_code}")]
    ActionFailed {
        action: SyncAction,
        exit_code: i32,
        stderr: String,
    },
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Something that can carry out import and export actions.
///
/// [`ScriptRunner`] runs the real scripts; [`mock::MockRunner`] returns
/// canned results for tests.
pub trait ActionRunner: Send + Sync {
    /// Run `action` to completion.
    ///
    /// Fails only when the action could not be started at all; a non-zero
    /// exit is reported through [`SyncActionResult::exit_code`].
    fn run(&self, action: SyncAction) -> impl Future<Output = SyncResult<SyncActionResult>> + Send;
}

/// Runs the import/export scripts as child processes.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    /// Working directory for the scripts.
    root: PathBuf,
    import_script: PathBuf,
    export_script: PathBuf,
    /// Program used to launch the scripts; `None` executes them directly.
    interpreter: Option<String>,
    /// Upper bound on a run; `None` waits indefinitely.
    timeout: Option<Duration>,
}

impl ScriptRunner {
    /// Create a runner for the given scripts, launched with `node`.
    pub fn new(
        root: impl Into<PathBuf>,
        import_script: impl Into<PathBuf>,
        export_script: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            import_script: import_script.into(),
            export_script: export_script.into(),
            interpreter: Some("node".to_string()),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    pub fn with_interpreter(mut self, interpreter: Option<String>) -> Self {
        self.interpreter = interpreter.filter(|i| !i.trim().is_empty());
        self
    }

    /// Bound each run by `timeout`, or not at all with `None`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Path of the script backing `action`.
    pub fn script_path(&self, action: SyncAction) -> &Path {
        match action {
            SyncAction::Import => &self.import_script,
            SyncAction::Export => &self.export_script,
        }
    }

    fn command(&self, script: &Path) -> Command {
        let mut command = match self.interpreter.as_deref() {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(script);
                command
            }
            None => Command::new(script),
        };
        command
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl ActionRunner for ScriptRunner {
    async fn run(&self, action: SyncAction) -> SyncResult<SyncActionResult> {
        let script = self.script_path(action);
        if !script.is_file() {
            return Err(SyncError::ScriptNotFound {
                action,
                path: script.to_path_buf(),
            });
        }

        info!(%action, script = %script.display(), "running sync action");
        let started = Instant::now();

        let child = self
            .command(script)
            .spawn()
            .map_err(|source| SyncError::Process {
                action,
                path: script.to_path_buf(),
                source,
            })?;

        // Dropping the child on timeout kills it (kill_on_drop).
        let wait = child.wait_with_output();
        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| limit),
            None => Ok(wait.await),
        };

        let result = match waited {
            Ok(Ok(output)) => SyncActionResult {
                exit_code: output.status.code().unwrap_or(SIGNALLED_EXIT_CODE),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(source)) => {
                return Err(SyncError::Process {
                    action,
                    path: script.to_path_buf(),
                    source,
                })
            }
            Err(limit) => {
                warn!(%action, timeout_secs = limit.as_secs_f64(), "sync action timed out");
                SyncActionResult::failed(
                    TIMED_OUT_EXIT_CODE,
                    format!("{action} script timed out after {:?}", limit),
                )
            }
        };

        debug!(
            %action,
            exit_code = result.exit_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync action finished"
        );
        Ok(result)
    }
}
