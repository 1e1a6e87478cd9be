//! Configuration management for stats-service
//!
//! Settings come from `<root>/config/stats-service.toml` (or an explicit
//! path), then environment variables override the connection and CORS
//! values. Every relative path is resolved against the service root.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::database::{ConnectionTarget, DEFAULT_DB_NAME, DEFAULT_URI};
use crate::meta::MetaPaths;
use crate::sync::ScriptRunner;

/// Configuration file location relative to the service root
pub const CONFIG_FILE: &str = "config/stats-service.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Origins allowed to make credentialed cross-origin requests
    pub cors_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Document store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseSection {
    pub uri: String,
    pub name: String,
    /// Ping the server after connecting and refuse to start if it fails
    pub verify_on_connect: bool,
    pub server_selection_timeout_secs: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            name: DEFAULT_DB_NAME.to_string(),
            verify_on_connect: true,
            server_selection_timeout_secs: 5,
        }
    }
}

/// Snapshot sync settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSection {
    pub shared_meta: PathBuf,
    pub local_meta: PathBuf,
    pub import_script: PathBuf,
    pub export_script: PathBuf,
    /// Program that runs the scripts; empty to execute them directly
    pub interpreter: String,
    /// Limit for one script run; 0 means no limit
    pub timeout_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            shared_meta: PathBuf::from("config/dbmeta.json"),
            local_meta: PathBuf::from("config/dbmeta_local.json"),
            import_script: PathBuf::from("import-db.js"),
            export_script: PathBuf::from("export-db.js"),
            interpreter: "node".to_string(),
            timeout_secs: 600,
        }
    }
}

/// API documentation and static view settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocsSection {
    pub openapi: PathBuf,
    pub view_dir: PathBuf,
}

impl Default for DocsSection {
    fn default() -> Self {
        Self {
            openapi: PathBuf::from("docs/openapi.yaml"),
            view_dir: PathBuf::from("view"),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub sync: SyncSection,
    pub docs: DocsSection,
}

impl ServiceConfig {
    /// Default config file path for a service root
    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }

    /// Load configuration from file
    ///
    /// Returns default config if file doesn't exist
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `MONGO_URI`, `DB_NAME`, `HOST`, `PORT` and `CORS_ORIGINS`
    ///
    /// `lookup` is normally `std::env::var(..).ok()`; empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(uri) = get("MONGO_URI") {
            self.database.uri = uri;
        }
        if let Some(name) = get("DB_NAME") {
            self.database.name = name;
        }
        if let Some(host) = get("HOST") {
            self.server.host = host.trim().to_string();
        }
        if let Some(port) = get("PORT") {
            match port.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "ignoring invalid PORT"),
            }
        }
        if let Some(origins) = get("CORS_ORIGINS") {
            self.server.cors_origins = parse_origins(&origins);
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// Validated database target
    pub fn connection_target(&self) -> ConnectionTarget {
        ConnectionTarget::resolve(Some(&self.database.uri), Some(&self.database.name))
    }

    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_secs(self.database.server_selection_timeout_secs)
    }

    /// Locations of the shared and local version records
    pub fn meta_paths(&self, root: &Path) -> MetaPaths {
        MetaPaths::new(
            root.join(&self.sync.shared_meta),
            root.join(&self.sync.local_meta),
        )
    }

    /// Runner for the configured import/export scripts
    pub fn script_runner(&self, root: &Path) -> ScriptRunner {
        ScriptRunner::new(
            root,
            root.join(&self.sync.import_script),
            root.join(&self.sync.export_script),
        )
        .with_interpreter(Some(self.sync.interpreter.clone()))
        .with_timeout(self.sync_timeout())
    }

    /// Script run limit, `None` when `timeout_secs` is 0
    pub fn sync_timeout(&self) -> Option<Duration> {
        match self.sync.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn openapi_path(&self, root: &Path) -> PathBuf {
        root.join(&self.docs.openapi)
    }

    pub fn view_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.docs.view_dir)
    }
}

/// Split a comma separated origin list, dropping blanks
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

/// Format the configuration for display
pub fn format_config(config: &ServiceConfig) -> String {
    let mut lines = Vec::new();

    lines.push("Current configuration:".to_string());
    lines.push(String::new());
    lines.push(format!(
        "  listen       = {}:{}",
        config.server.host, config.server.port
    ));
    lines.push(format!(
        "  cors_origins = {}",
        if config.server.cors_origins.is_empty() {
            "(none)".to_string()
        } else {
            config.server.cors_origins.join(", ")
        }
    ));
    lines.push(format!("  database     = {}", config.database.name));
    lines.push(format!(
        "  shared_meta  = {}",
        config.sync.shared_meta.display()
    ));
    lines.push(format!(
        "  local_meta   = {}",
        config.sync.local_meta.display()
    ));
    if config.sync.interpreter.trim().is_empty() {
        lines.push("  interpreter  = (none, scripts run directly)".to_string());
    } else {
        lines.push(format!("  interpreter  = {}", config.sync.interpreter));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.cors_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.database.uri, DEFAULT_URI);
        assert_eq!(config.database.name, DEFAULT_DB_NAME);
        assert_eq!(config.sync.interpreter, "node");
    }

    #[test]
    fn test_config_deserialize_partial() {
        let toml_str = r#"
            [server]
            port = 9100

            [sync]
            interpreter = ""
        "#;

        let config = ServiceConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.sync.interpreter, "");
        assert_eq!(config.sync.import_script, PathBuf::from("import-db.js"));
    }

    #[test]
    fn test_config_deserialize_empty() {
        let config = ServiceConfig::from_toml("").unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_config_serialize_roundtrip() {
        let mut config = ServiceConfig::default();
        config.database.name = "stats_test".to_string();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert_eq!(ServiceConfig::from_toml(&toml_str).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = TempDir::new().unwrap();
        let config = ServiceConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[server\nport = ").unwrap();

        let err = ServiceConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServiceConfig::default();
        config.apply_env(env(&[
            ("MONGO_URI", "mongodb://db:27017"),
            ("DB_NAME", "stats"),
            ("HOST", "0.0.0.0"),
            ("PORT", "8080"),
            ("CORS_ORIGINS", "http://a.test, ,http://b.test"),
        ]));

        assert_eq!(config.database.uri, "mongodb://db:27017");
        assert_eq!(config.database.name, "stats");
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.server.cors_origins,
            vec!["http://a.test", "http://b.test"]
        );
    }

    #[test]
    fn test_env_empty_and_invalid_values_ignored() {
        let mut config = ServiceConfig::default();
        config.apply_env(env(&[("MONGO_URI", ""), ("PORT", "eighty")]));

        assert_eq!(config.database.uri, DEFAULT_URI);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_connection_target_falls_back() {
        let mut config = ServiceConfig::default();
        config.database.uri = "not-a-uri".to_string();
        assert_eq!(config.connection_target().uri, DEFAULT_URI);
    }

    #[test]
    fn test_paths_resolve_against_root() {
        let config = ServiceConfig::default();
        let root = Path::new("/srv/stats");

        let paths = config.meta_paths(root);
        assert_eq!(paths.shared, PathBuf::from("/srv/stats/config/dbmeta.json"));
        assert_eq!(
            paths.local,
            PathBuf::from("/srv/stats/config/dbmeta_local.json")
        );
        assert_eq!(
            config.openapi_path(root),
            PathBuf::from("/srv/stats/docs/openapi.yaml")
        );
        assert_eq!(
            ServiceConfig::config_path(root),
            PathBuf::from("/srv/stats/config/stats-service.toml")
        );
    }

    #[test]
    fn test_sync_timeout_zero_means_unlimited() {
        let mut config = ServiceConfig::default();
        assert_eq!(config.sync_timeout(), Some(Duration::from_secs(600)));

        config.sync.timeout_secs = 0;
        assert_eq!(config.sync_timeout(), None);

        let config = ServiceConfig::from_toml("[sync]\ntimeout_secs = 0\n").unwrap();
        assert_eq!(config.sync_timeout(), None);
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(parse_origins(" a , b,, "), vec!["a", "b"]);
        assert!(parse_origins("").is_empty());
    }

    #[test]
    fn test_format_config() {
        let mut config = ServiceConfig::default();
        config.sync.interpreter = String::new();
        let output = format_config(&config);

        assert!(output.contains("listen       = 127.0.0.1:8000"));
        assert!(output.contains("http://localhost:3000"));
        assert!(output.contains("(none, scripts run directly)"));
    }
}
