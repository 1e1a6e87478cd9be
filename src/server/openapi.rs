//! OpenAPI document served alongside the API.
//!
//! The document is maintained by hand as YAML. It is read once at startup and
//! served both verbatim and converted to JSON.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading the OpenAPI document.
#[derive(Debug, Error)]
pub enum OpenApiError {
    #[error("failed to read OpenAPI document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid OpenAPI YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A loaded OpenAPI document.
#[derive(Debug, Clone)]
pub struct OpenApiDocument {
    pub path: PathBuf,
    /// The file as written.
    pub yaml: String,
    /// The same document as JSON.
    pub json: serde_json::Value,
}

impl OpenApiDocument {
    /// Load the document at `path`, `None` if there is no such file.
    pub fn load(path: &Path) -> Result<Option<Self>, OpenApiError> {
        if !path.is_file() {
            return Ok(None);
        }

        let yaml = fs::read_to_string(path).map_err(|source| OpenApiError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document = Self::from_yaml(path, yaml)?;
        Ok(Some(document))
    }

    /// Parse an already-read document.
    pub fn from_yaml(path: impl Into<PathBuf>, yaml: String) -> Result<Self, OpenApiError> {
        let path = path.into();
        let json = serde_yaml::from_str::<serde_json::Value>(&yaml).map_err(|source| {
            OpenApiError::Parse {
                path: path.clone(),
                source,
            }
        })?;
        Ok(Self { path, yaml, json })
    }

    /// Document title from `info.title`, if present.
    pub fn title(&self) -> Option<&str> {
        self.json.pointer("/info/title").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "openapi: 3.0.3\ninfo:\n  title: Statistics\n  version: 1.0.0\npaths: {}\n";

    #[test]
    fn test_load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        assert!(OpenApiDocument::load(&dir.path().join("openapi.yaml"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_load_converts_to_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("openapi.yaml");
        fs::write(&path, SAMPLE).unwrap();

        let doc = OpenApiDocument::load(&path).unwrap().unwrap();

        assert_eq!(doc.yaml, SAMPLE);
        assert_eq!(doc.json["openapi"], "3.0.3");
        assert_eq!(doc.title(), Some("Statistics"));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = OpenApiDocument::from_yaml("bad.yaml", "info: [unclosed".to_string())
            .unwrap_err();
        assert!(matches!(err, OpenApiError::Parse { .. }));
        assert!(err.to_string().contains("bad.yaml"));
    }
}
