//! Error types for asset-dl
//!
//! This module provides the error taxonomy for the library:
//! - Per-URL fetch failures ([`FetchError`]), which a batch records and survives
//! - Filesystem failures around staging, publishing and renaming ([`PublishError`]),
//!   which abort the operation and are returned to the caller
//! - Configuration errors with the offending key

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for asset-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for asset-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_workers")
        key: Option<String>,
    },

    /// Fetching a single URL failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Staging, publishing or renaming on disk failed
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for the given key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Errors raised while fetching one URL
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The URL that was requested
        url: String,
        /// The status code returned
        status: u16,
        /// Whether the status is in the configured retry set
        retryable: bool,
    },

    /// URL could not be parsed
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// Response headers did not arrive within the read timeout
    #[error("timed out after {timeout:?} waiting for a response from {url}")]
    ResponseTimeout {
        /// The URL that was requested
        url: String,
        /// The budget that was exceeded
        timeout: Duration,
    },

    /// No body data arrived within the read timeout
    #[error("read timed out after {timeout:?} while streaming {url}")]
    ReadTimeout {
        /// The URL being streamed
        url: String,
        /// The per-read budget that was exceeded
        timeout: Duration,
    },

    /// The worker running the fetch panicked or was cancelled
    #[error("fetch task aborted: {0}")]
    TaskAborted(String),
}

/// Filesystem errors around staging, publishing and rename copies
#[derive(Debug, Error)]
pub enum PublishError {
    /// Source directory does not exist
    #[error("source directory {path} does not exist")]
    SourceMissing {
        /// The directory that was expected
        path: PathBuf,
    },

    /// Path cannot be used for this operation
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Moving an existing target aside failed
    #[error("failed to back up {target} to {backup}: {reason}")]
    BackupFailed {
        /// The pre-existing target
        target: PathBuf,
        /// The backup location that was attempted
        backup: PathBuf,
        /// The reason the backup failed
        reason: String,
    },

    /// Moving a file or directory failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path of the move
        source_path: PathBuf,
        /// The destination of the move
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// File collision at destination
    #[error("file collision at {path}: {reason}")]
    FileCollision {
        /// The path where the collision occurred
        path: PathBuf,
        /// The reason for the collision
        reason: String,
    },
}
