//! Mock action runner for testing.
//!
//! Returns configured results without spawning processes and records every
//! invocation so tests can assert how often each action ran.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use super::{ActionRunner, SyncAction, SyncActionResult, SyncError, SyncResult};

/// What a mocked action should do when run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Finish with the given exit code.
    Exit(i32),
    /// Fail as if the script were missing.
    ScriptNotFound,
}

impl MockOutcome {
    fn resolve(&self, action: SyncAction) -> SyncResult<SyncActionResult> {
        match self {
            MockOutcome::Exit(0) => Ok(SyncActionResult::succeeded(format!("mock {action} done"))),
            MockOutcome::Exit(code) => Ok(SyncActionResult::failed(
                *code,
                format!("mock {action} failed"),
            )),
            MockOutcome::ScriptNotFound => Err(SyncError::ScriptNotFound {
                action,
                path: PathBuf::from(format!("{action}-db.js")),
            }),
        }
    }
}

/// Mock runner for tests.
///
/// Clones share the same invocation log.
///
/// ```
/// use stats_service::sync::mock::{MockOutcome, MockRunner};
/// use stats_service::sync::{ActionRunner, SyncAction};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let runner = MockRunner::new().with_export(MockOutcome::Exit(1));
/// let code_under_test = runner.clone();
///
/// let result = code_under_test.run(SyncAction::Export).await.unwrap();
/// assert_eq!(result.exit_code, 1);
/// assert_eq!(runner.count(SyncAction::Export), 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MockRunner {
    import: MockOutcome,
    export: MockOutcome,
    calls: Arc<Mutex<Vec<SyncAction>>>,
}

impl MockRunner {
    /// A runner where both actions succeed.
    pub fn new() -> Self {
        Self {
            import: MockOutcome::Exit(0),
            export: MockOutcome::Exit(0),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_import(mut self, outcome: MockOutcome) -> Self {
        self.import = outcome;
        self
    }

    pub fn with_export(mut self, outcome: MockOutcome) -> Self {
        self.export = outcome;
        self
    }

    /// Every action run so far, in order.
    pub fn calls(&self) -> Vec<SyncAction> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `action` has run.
    pub fn count(&self, action: SyncAction) -> usize {
        self.calls().into_iter().filter(|a| *a == action).count()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRunner for MockRunner {
    async fn run(&self, action: SyncAction) -> SyncResult<SyncActionResult> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);

        match action {
            SyncAction::Import => self.import.resolve(action),
            SyncAction::Export => self.export.resolve(action),
        }
    }
}
