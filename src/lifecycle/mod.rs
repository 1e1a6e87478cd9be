//! Startup and shutdown sequencing around snapshot synchronization.
//!
//! At startup the controller imports the shared snapshot when the local
//! record is behind. After the server stops on an interrupt it asks (once)
//! whether to export, and after a successful export advances both version
//! records to the same new version so the next start sees local as current.
//!
//! ```text
//! Starting -> Syncing -> Serving -> Interrupting -> ExportPrompt -> Exporting -> Terminated
//!                                                        \________________________/
//!                                                            declined / failed
//! ```

mod prompt;

pub use prompt::{ExportPrompt, FixedAnswer, TerminalPrompt};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::meta::{self, MetaError, MetaPaths};
use crate::sync::{ActionRunner, SyncAction, SyncError};

/// Where the process is in its start/serve/shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Starting,
    Syncing,
    Serving,
    Interrupting,
    ExportPrompt,
    Exporting,
    Terminated,
}

impl LifecyclePhase {
    pub fn name(&self) -> &'static str {
        match self {
            LifecyclePhase::Starting => "starting",
            LifecyclePhase::Syncing => "syncing",
            LifecyclePhase::Serving => "serving",
            LifecyclePhase::Interrupting => "interrupting",
            LifecyclePhase::ExportPrompt => "export-prompt",
            LifecyclePhase::Exporting => "exporting",
            LifecyclePhase::Terminated => "terminated",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the startup import decision did.
#[derive(Debug)]
pub enum ImportOutcome {
    /// Local was already at or ahead of shared.
    UpToDate,
    /// The import ran; `record_updated` is false if the local record could
    /// not be rewritten afterwards.
    Imported { record_updated: bool },
    /// The import could not run or exited non-zero.
    Failed(SyncError),
}

/// Result of [`LifecycleController::startup`].
#[derive(Debug)]
pub struct StartupReport {
    pub local_version: u64,
    pub shared_version: u64,
    pub import: ImportOutcome,
}

/// Result of [`LifecycleController::interrupt`] and
/// [`LifecycleController::terminate`].
#[derive(Debug)]
pub enum ShutdownReport {
    /// The shutdown sequence already ran in this process.
    AlreadyHandled,
    /// The operator chose not to export.
    Declined,
    /// Shutdown came from a terminate request; no export was offered.
    NotOffered,
    /// The export could not run or exited non-zero; no version changed.
    ExportFailed(SyncError),
    /// The export succeeded but the shared version is already `u64::MAX`,
    /// so neither record was advanced.
    VersionExhausted { shared_version: u64 },
    /// The export succeeded and both records were advanced to `version`.
    /// `records_written` is false if either write failed.
    Exported {
        version: u64,
        collections: Vec<String>,
        records_written: bool,
    },
}

/// Drives the sync decisions at process start and interrupt.
pub struct LifecycleController<R, P> {
    paths: MetaPaths,
    runner: R,
    prompt: Arc<P>,
    phase: watch::Sender<LifecyclePhase>,
    interrupted: AtomicBool,
}

impl<R, P> LifecycleController<R, P>
where
    R: ActionRunner,
    P: ExportPrompt + 'static,
{
    pub fn new(paths: MetaPaths, runner: R, prompt: P) -> Self {
        let (phase, _) = watch::channel(LifecyclePhase::Starting);
        Self {
            paths,
            runner,
            prompt: Arc::new(prompt),
            phase,
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    pub fn prompt(&self) -> &P {
        &self.prompt
    }

    fn transition(&self, next: LifecyclePhase) {
        let previous = self.phase.send_replace(next);
        debug!(from = %previous, to = %next, "lifecycle transition");
    }

    /// Import the shared snapshot if the local one is older.
    ///
    /// Always ends in [`LifecyclePhase::Serving`]: a failed import is logged
    /// and retried on the next start, it does not stop the service.
    pub async fn startup(&self) -> StartupReport {
        self.transition(LifecyclePhase::Syncing);

        let local_version = meta::read_version(&self.paths.local);
        let shared_version = meta::read_version(&self.paths.shared);

        let import = if local_version < shared_version {
            info!(
                local_version,
                shared_version, "local snapshot is outdated, importing shared snapshot"
            );
            self.import().await
        } else {
            info!(local_version, shared_version, "local snapshot is current");
            ImportOutcome::UpToDate
        };

        self.transition(LifecyclePhase::Serving);

        StartupReport {
            local_version,
            shared_version,
            import,
        }
    }

    async fn import(&self) -> ImportOutcome {
        let result = match self.runner.run(SyncAction::Import).await {
            Ok(result) => result,
            Err(e) => {
                log_sync_failure(&e);
                return ImportOutcome::Failed(e);
            }
        };

        let result = match result.check(SyncAction::Import) {
            Ok(result) => result,
            Err(e) => {
                log_sync_failure(&e);
                return ImportOutcome::Failed(e);
            }
        };

        info!(output = %result.stdout.trim(), "import completed");

        let record_updated = match meta::mirror(&self.paths.shared, &self.paths.local) {
            Ok(()) => true,
            Err(e) => {
                log_meta_failure(&e);
                false
            }
        };

        ImportOutcome::Imported { record_updated }
    }

    /// Run the shutdown sequence for an operator interrupt: ask about
    /// exporting, export, and advance the version records.
    ///
    /// Only the first call to this or [`terminate`](Self::terminate) in a
    /// process does anything; later calls return
    /// [`ShutdownReport::AlreadyHandled`] without prompting.
    pub async fn interrupt(&self) -> ShutdownReport {
        if !self.begin_shutdown() {
            return ShutdownReport::AlreadyHandled;
        }

        self.transition(LifecyclePhase::ExportPrompt);

        let prompt = Arc::clone(&self.prompt);
        let confirmed = match tokio::task::spawn_blocking(move || prompt.confirm_export()).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "export prompt failed, treating as no");
                false
            }
        };

        let report = if confirmed {
            self.transition(LifecyclePhase::Exporting);
            self.export().await
        } else {
            info!("export skipped, version records left unchanged");
            ShutdownReport::Declined
        };

        self.transition(LifecyclePhase::Terminated);
        report
    }

    /// Run the shutdown sequence for a terminate request (e.g. from a
    /// supervisor). The export prompt is never shown.
    pub async fn terminate(&self) -> ShutdownReport {
        if !self.begin_shutdown() {
            return ShutdownReport::AlreadyHandled;
        }

        info!("terminate requested, export not offered");
        self.transition(LifecyclePhase::Terminated);
        ShutdownReport::NotOffered
    }

    /// Claim the one-shot shutdown guard.
    fn begin_shutdown(&self) -> bool {
        if self.interrupted.swap(true, Ordering::SeqCst) {
            debug!("shutdown sequence already ran, ignoring repeated request");
            return false;
        }
        self.transition(LifecyclePhase::Interrupting);
        true
    }

    async fn export(&self) -> ShutdownReport {
        let outcome = self
            .runner
            .run(SyncAction::Export)
            .await
            .and_then(|result| result.check(SyncAction::Export));

        match outcome {
            Ok(result) => {
                info!(output = %result.stdout.trim(), "export completed");
                self.advance_versions()
            }
            Err(e) => {
                log_sync_failure(&e);
                warn!("export not recorded, version records left unchanged");
                ShutdownReport::ExportFailed(e)
            }
        }
    }

    /// Write `shared.version + 1` and the shared collections to both records.
    fn advance_versions(&self) -> ShutdownReport {
        let shared = meta::read_record(&self.paths.shared);
        let Some(version) = shared.version.checked_add(1) else {
            error!(
                shared_version = shared.version,
                path = %self.paths.shared.display(),
                "shared version cannot be advanced, version records left unchanged"
            );
            return ShutdownReport::VersionExhausted {
                shared_version: shared.version,
            };
        };
        let collections = shared.collections;

        let mut records_written = true;
        for path in [&self.paths.shared, &self.paths.local] {
            if let Err(e) = meta::write_version(path, version, Some(collections.as_slice())) {
                log_meta_failure(&e);
                records_written = false;
            }
        }

        if records_written {
            info!(version, "shared and local snapshot versions advanced");
        } else {
            error!(
                version,
                shared = %self.paths.shared.display(),
                local = %self.paths.local.display(),
                "version records may now disagree"
            );
        }

        ShutdownReport::Exported {
            version,
            collections,
            records_written,
        }
    }
}

fn log_sync_failure(err: &SyncError) {
    match err {
        SyncError::ScriptNotFound { action, path } => {
            error!(%action, path = %path.display(), "sync script not found");
        }
        SyncError::Process {
            action,
            path,
            source,
        } => {
            error!(%action, path = %path.display(), error = %source, "sync script could not be run");
        }
        SyncError::ActionFailed {
            action,
            exit_code,
            stderr,
        } => {
            error!(%action, exit_code, stderr = %stderr.trim(), "sync script failed");
        }
    }
}

fn log_meta_failure(err: &MetaError) {
    error!(path = %err.path().display(), error = %err, "failed to persist version record");
}
