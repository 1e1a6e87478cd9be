//! Structured logging for the stats service.
//!
//! Sync and lifecycle events go to stderr at the level picked on the command
//! line; `--log-file` adds a plain-text copy at debug level. `RUST_LOG`
//! directives override the command-line level.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

const DEFAULT_LOG_FILE: &str = "stats-service.log";

/// How much the service reports on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// `-q`: failures only
    Quiet,
    /// Startup sync, shutdown decision and HTTP lifecycle
    #[default]
    Normal,
    /// `-v`: phase transitions, script timings, request traces
    Verbose,
    /// `-vv`: everything, including driver internals
    Trace,
}

impl Verbosity {
    /// `-q` wins over any number of `-v`.
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        if quiet {
            return Verbosity::Quiet;
        }
        match verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Trace,
        }
    }

    pub fn as_level_filter(&self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::ERROR,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }
}

/// Logging options taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub verbosity: Verbosity,
    /// Extra debug-level log file.
    pub log_file: Option<String>,
}

/// Keeps the file writer alive; drop it last so buffered lines are flushed
/// before the process exits.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Directory and file name for the log appender.
fn split_log_path(log_file: &str) -> (PathBuf, String) {
    let path = Path::new(log_file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, name)
}

/// Install the global subscriber.
///
/// ```no_run
/// use stats_service::logging::{init_logging, LogConfig, Verbosity};
///
/// let _guard = init_logging(&LogConfig {
///     verbosity: Verbosity::Verbose,
///     log_file: Some("logs/stats-service.log".to_string()),
/// });
/// tracing::info!("sync starting");
/// ```
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let level = config.verbosity.as_level_filter();
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let (file_layer, file_guard) = match config.log_file.as_deref() {
        Some(log_file) => {
            let (dir, name) = split_log_path(log_file);
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_writer(std::io::stderr)
        .with_filter(level);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    LogGuard {
        _file_guard: file_guard,
    }
}
