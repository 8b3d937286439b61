//! Error taxonomy for assetry. Every variant is returned synchronously to the
//! immediate caller; nothing here is retried or downgraded internally.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    /// Downloaded bytes hash to something other than what the caller declared.
    #[error("integrity check failed for {url}: expected sha256 {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("invalid resource path: {0}")]
    InvalidPath(String),
    #[error("configuration error in {field}: {reason}")]
    Config { field: String, reason: String },
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("failed to spawn build tool {program}: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("build failed ({status}): {stderr}")]
    BuildFailed { status: String, stderr: String },
    #[error("watcher already closed")]
    AlreadyClosed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AssetError {
    pub(crate) fn config(field: &str, reason: impl Into<String>) -> Self {
        AssetError::Config {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found_path(path: &std::path::Path) -> Self {
        AssetError::NotFound(path.display().to_string())
    }
}

pub type Result<T> = std::result::Result<T, AssetError>;
