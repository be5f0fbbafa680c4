//! Version store errors

use std::path::PathBuf;

/// Error type for version store operations
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("Version already exists: {0}")]
    Duplicate(String),

    #[error("Version not found: {0}")]
    NotFound(String),

    #[error("Version {version} is missing backing file {file}")]
    MissingFile { version: String, file: String },

    #[error("Invalid {kind} name: {name:?}")]
    InvalidName { kind: &'static str, name: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Lock poisoned")]
    LockPoisoned,
}

impl VersionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_version(name: impl Into<String>) -> Self {
        Self::InvalidName {
            kind: "version",
            name: name.into(),
        }
    }

    pub fn invalid_file(name: impl Into<String>) -> Self {
        Self::InvalidName {
            kind: "file",
            name: name.into(),
        }
    }
}

/// Result type for version store operations
pub type VersionResult<T> = Result<T, VersionError>;
