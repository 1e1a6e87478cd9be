//! Document store connection management.
//!
//! A [`DatabaseManager`] owns the single client handle for the process. It is
//! created once in `main`, shared through [`crate::server::AppState`], and
//! keeps the connect/close/get contract: `connect` and `close` are
//! idempotent, and `get` never connects implicitly.

use std::time::Duration;

use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Address used when configuration yields nothing usable.
pub const DEFAULT_URI: &str = "mongodb://127.0.0.1:27017";

/// Database name used when configuration yields an empty name.
pub const DEFAULT_DB_NAME: &str = "undersounds_stats";

const APP_NAME: &str = "stats-service";

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database not initialized: call connect() during startup")]
    NotInitialized,

    #[error("failed to create database client for {uri}: {source}")]
    Client {
        uri: String,
        #[source]
        source: mongodb::error::Error,
    },

    #[error("database {name} is unreachable: {source}")]
    Ping {
        name: String,
        #[source]
        source: mongodb::error::Error,
    },
}

/// Where to connect: a validated address plus database name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub uri: String,
    pub name: String,
}

impl ConnectionTarget {
    /// Build a target from configured values, substituting defaults for
    /// anything empty or not a MongoDB address.
    pub fn resolve(uri: Option<&str>, name: Option<&str>) -> Self {
        let uri = match uri.map(str::trim) {
            Some(candidate) if is_valid_uri(candidate) => candidate.to_string(),
            Some(candidate) if !candidate.is_empty() => {
                warn!(uri = candidate, fallback = DEFAULT_URI, "ignoring invalid database address");
                DEFAULT_URI.to_string()
            }
            _ => DEFAULT_URI.to_string(),
        };

        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_DB_NAME)
            .to_string();

        Self { uri, name }
    }
}

impl Default for ConnectionTarget {
    fn default() -> Self {
        Self::resolve(None, None)
    }
}

fn is_valid_uri(uri: &str) -> bool {
    ["mongodb://", "mongodb+srv://"]
        .iter()
        .any(|scheme| uri.len() > scheme.len() && uri.starts_with(scheme))
}

struct Connection {
    // Held so the client's background monitors live as long as the handle.
    _client: Client,
    db: Database,
}

/// Owner of the process-wide database handle.
pub struct DatabaseManager {
    target: ConnectionTarget,
    server_selection_timeout: Option<Duration>,
    conn: RwLock<Option<Connection>>,
}

impl DatabaseManager {
    pub fn new(target: ConnectionTarget) -> Self {
        Self {
            target,
            server_selection_timeout: None,
            conn: RwLock::new(None),
        }
    }

    /// Bound how long operations wait to find a reachable server.
    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    /// Create the client handle. Does nothing if already connected.
    pub async fn connect(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn.write().await;
        if conn.is_some() {
            debug!("database already connected");
            return Ok(());
        }

        let client_error = |source| DatabaseError::Client {
            uri: self.target.uri.clone(),
            source,
        };

        let mut options = ClientOptions::parse(self.target.uri.as_str())
            .await
            .map_err(client_error)?;
        options.app_name = Some(APP_NAME.to_string());
        if let Some(timeout) = self.server_selection_timeout {
            options.server_selection_timeout = Some(timeout);
        }

        let client = Client::with_options(options).map_err(client_error)?;
        let db = client.database(&self.target.name);
        *conn = Some(Connection {
            _client: client,
            db,
        });

        info!(uri = %self.target.uri, db = %self.target.name, "connected to database");
        Ok(())
    }

    /// Round-trip a `ping` to prove the server is reachable.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        let db = self.get().await?;
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| DatabaseError::Ping {
                name: self.target.name.clone(),
                source,
            })?;
        debug!(db = %self.target.name, "database ping ok");
        Ok(())
    }

    /// Release the handle. Does nothing if not connected.
    pub async fn close(&self) {
        if self.conn.write().await.take().is_some() {
            info!("closed database connection");
        }
    }

    /// Handle to the configured database.
    pub async fn get(&self) -> Result<Database, DatabaseError> {
        self.conn
            .read()
            .await
            .as_ref()
            .map(|c| c.db.clone())
            .ok_or(DatabaseError::NotInitialized)
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.read().await.is_some()
    }
}
