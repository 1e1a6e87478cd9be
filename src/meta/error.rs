//! Error types for version record persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or persisting a version record.
#[derive(Debug, Error)]
pub enum MetaError {
    /// The record file could not be read.
    #[error("failed to read version record {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The record file is not a JSON object.
    #[error("version record {path} is not a JSON object: {message}")]
    Malformed { path: PathBuf, message: String },

    /// The record could not be serialized.
    #[error("failed to serialize version record for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The record could not be written to disk.
    #[error("failed to write version record {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MetaError {
    /// Create a read error.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Create a malformed record error.
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialize {
            path: path.into(),
            source,
        }
    }

    /// Create a write error.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Path of the record this error refers to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Read { path, .. }
            | Self::Malformed { path, .. }
            | Self::Serialize { path, .. }
            | Self::Write { path, .. } => path,
        }
    }
}
