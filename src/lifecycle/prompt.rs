//! The export decision asked at shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};

use inquire::{Confirm, InquireError};
use tracing::debug;

/// Asks whether to export the local data before exiting.
///
/// Implementations may block; the controller calls them from a blocking
/// worker thread.
pub trait ExportPrompt: Send + Sync {
    /// `true` to run the export.
    fn confirm_export(&self) -> bool;
}

const DEFAULT_MESSAGE: &str = "Back up the database with an export before exiting?";

/// Asks the operator on the controlling terminal.
///
/// Anything other than an explicit "yes" (no terminal, end of input, the
/// prompt being cancelled) counts as "no".
#[derive(Debug, Clone)]
pub struct TerminalPrompt {
    message: String,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self {
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportPrompt for TerminalPrompt {
    fn confirm_export(&self) -> bool {
        let answer = Confirm::new(&self.message)
            .with_default(false)
            .with_help_message("The export publishes a new shared snapshot version")
            .prompt();

        match answer {
            Ok(answer) => answer,
            Err(InquireError::NotTTY) => {
                debug!("no terminal attached, skipping export");
                false
            }
            Err(e) => {
                debug!(error = %e, "export prompt ended without an answer");
                false
            }
        }
    }
}

/// Gives the same answer every time and counts how often it was asked.
///
/// Used for `--no-prompt` and in tests.
#[derive(Debug, Default)]
pub struct FixedAnswer {
    answer: bool,
    asked: AtomicUsize,
}

impl FixedAnswer {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn yes() -> Self {
        Self::new(true)
    }

    pub fn no() -> Self {
        Self::new(false)
    }

    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl ExportPrompt for FixedAnswer {
    fn confirm_export(&self) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}
