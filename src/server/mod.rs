//! HTTP server for the statistics API.

pub mod openapi;
pub mod routes;
pub mod templates;

pub use openapi::{OpenApiDocument, OpenApiError};
pub use routes::{build_router, AppState, SERVICE_NAME};
pub use templates::{TemplateEngine, Templates};

use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host or address to bind to.
    pub host: String,
    /// TCP port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 8000,
        }
    }
}

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Bind the listener described by `config`.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = format!("{}:{}", config.host, config.port);
    TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serve requests on `listener` until `shutdown` resolves.
///
/// In-flight requests are allowed to finish before this returns.
pub async fn run_server<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    match listener.local_addr() {
        Ok(addr) => info!(%addr, "stats service listening"),
        Err(_) => info!("stats service listening"),
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)?;

    info!("server stopped");
    Ok(())
}

/// Serve requests until `signal` resolves and return what it resolved to.
///
/// If serving ends without a signal the trigger is reported as
/// [`ShutdownTrigger::Terminate`], which never prompts.
pub async fn run_until_signal<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    signal: F,
) -> Result<ShutdownTrigger, ServerError>
where
    F: Future<Output = ShutdownTrigger> + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    run_server(listener, state, async move {
        let _ = tx.send(signal.await);
    })
    .await?;

    Ok(rx.await.unwrap_or(ShutdownTrigger::Terminate))
}

/// Which signal ended serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Ctrl+C from the operator.
    Interrupt,
    /// SIGTERM, usually from a supervisor.
    Terminate,
}

/// Wait for the shutdown signal (Ctrl+C or SIGTERM) and report which one
/// arrived.
///
/// Installing the handlers replaces the default "terminate the process"
/// behaviour, so later signals no longer kill the process while the shutdown
/// sequence runs.
pub async fn shutdown_signal() -> ShutdownTrigger {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received interrupt");
            ShutdownTrigger::Interrupt
        }
        _ = terminate => {
            info!("received terminate signal");
            ShutdownTrigger::Terminate
        }
    }
}
