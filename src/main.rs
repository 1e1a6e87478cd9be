use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use stats_service::config::{format_config, ServiceConfig};
use stats_service::database::DatabaseManager;
use stats_service::lifecycle::{
    ExportPrompt, FixedAnswer, ImportOutcome, LifecycleController, ShutdownReport, TerminalPrompt,
};
use stats_service::logging::{init_logging, LogConfig, Verbosity};
use stats_service::meta;
use stats_service::server::{
    self, run_until_signal, shutdown_signal, AppState, OpenApiDocument, ServerConfig,
    ShutdownTrigger, TemplateEngine,
};

#[derive(Parser)]
#[command(name = "stats-service")]
#[command(version)]
#[command(about = "Statistics HTTP service with snapshot sync for its document store")]
#[command(
    long_about = "Serves the statistics API. On start the local database is refreshed from the shared snapshot when it is older; on Ctrl+C the service offers to export the local database as a new shared snapshot."
)]
struct Cli {
    /// Service root; scripts, metadata and docs paths are relative to it
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: <root>/config/stats-service.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write debug logs to this file
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync, serve until interrupted, then offer an export (default)
    Serve {
        /// Host to bind (overrides config and HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Don't ask about exporting on shutdown
        #[arg(long)]
        no_prompt: bool,
    },
    /// Show configuration and snapshot versions
    Status,
}

/// Load the config file and apply environment overrides.
fn load_config(root: &Path, explicit: Option<&Path>) -> Result<ServiceConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            path.to_path_buf()
        }
        None => ServiceConfig::config_path(root),
    };

    let mut config = ServiceConfig::load(&path)?;
    config.apply_process_env();
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn load_openapi(path: &Path) -> Option<OpenApiDocument> {
    match OpenApiDocument::load(path) {
        Ok(Some(doc)) => {
            info!(path = %path.display(), "OpenAPI document loaded");
            Some(doc)
        }
        Ok(None) => {
            debug!(path = %path.display(), "no OpenAPI document");
            None
        }
        Err(e) => {
            warn!(error = %e, "failed to load OpenAPI document");
            None
        }
    }
}

async fn serve<P>(root: PathBuf, config: ServiceConfig, listen: ServerConfig, prompt: P) -> Result<()>
where
    P: ExportPrompt + 'static,
{
    let db = Arc::new(
        DatabaseManager::new(config.connection_target())
            .with_server_selection_timeout(config.server_selection_timeout()),
    );
    db.connect()
        .await
        .context("Failed to initialize the database connection")?;
    if config.database.verify_on_connect {
        db.ping().await.context("Database is not reachable")?;
    }

    let controller =
        LifecycleController::new(config.meta_paths(&root), config.script_runner(&root), prompt);

    let startup = controller.startup().await;
    if let ImportOutcome::Failed(ref e) = startup.import {
        warn!(error = %e, "serving with an outdated local snapshot");
    }

    let view_dir = Some(config.view_dir(&root)).filter(|dir| dir.is_dir());
    let state = Arc::new(AppState {
        db: Arc::clone(&db),
        openapi: load_openapi(&config.openapi_path(&root)),
        template_engine: TemplateEngine::new().context("Failed to load templates")?,
        view_dir,
        cors_origins: config.server.cors_origins.clone(),
    });

    let listener = server::bind(&listen).await?;
    println!("Press Ctrl+C to stop");
    let trigger = run_until_signal(listener, state, shutdown_signal()).await?;

    let report = match trigger {
        ShutdownTrigger::Interrupt => controller.interrupt().await,
        ShutdownTrigger::Terminate => controller.terminate().await,
    };

    match report {
        ShutdownReport::Exported {
            version,
            records_written: true,
            ..
        } => println!("Export completed, snapshot version is now {}", version),
        ShutdownReport::Exported { version, .. } => {
            eprintln!("Export completed but version {} was not fully recorded", version)
        }
        ShutdownReport::ExportFailed(e) => eprintln!("Export failed: {}", e),
        ShutdownReport::VersionExhausted { shared_version } => eprintln!(
            "Export completed but shared version {} cannot be advanced",
            shared_version
        ),
        ShutdownReport::Declined
        | ShutdownReport::NotOffered
        | ShutdownReport::AlreadyHandled => println!("No backup made."),
    }

    db.close().await;
    println!("Exiting.");
    Ok(())
}

fn status(root: &Path, config: &ServiceConfig) {
    let paths = config.meta_paths(root);
    let shared = meta::read_record(&paths.shared);
    let local = meta::read_record(&paths.local);

    println!("{}", format_config(config));
    println!();
    println!(
        "Shared snapshot: version {} [{}]",
        shared.version,
        shared.collections.join(", ")
    );
    println!(
        "Local snapshot:  version {} [{}]",
        local.version,
        local.collections.join(", ")
    );

    if local.version < shared.version {
        println!("Next start will import the shared snapshot.");
    } else {
        println!("Local snapshot is current.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = std::fs::canonicalize(&cli.root)
        .with_context(|| format!("Service root not found: {}", cli.root.display()))?;

    // Before logging so RUST_LOG from .env applies.
    let dotenv = dotenvy::from_path(root.join(".env"));

    let _log_guard = init_logging(&LogConfig {
        verbosity: Verbosity::from_flags(cli.verbose, cli.quiet),
        log_file: cli.log_file.clone(),
    });

    match dotenv {
        Ok(()) => debug!("loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "failed to load .env"),
    }

    let config = load_config(&root, cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
        no_prompt: false,
    }) {
        Commands::Serve {
            host,
            port,
            no_prompt,
        } => {
            let listen = ServerConfig {
                host: host.unwrap_or_else(|| config.server.host.clone()),
                port: port.unwrap_or(config.server.port),
            };

            if no_prompt {
                serve(root, config, listen, FixedAnswer::no()).await?;
            } else {
                serve(root, config, listen, TerminalPrompt::new()).await?;
            }
        }
        Commands::Status => status(&root, &config),
    }

    Ok(())
}
