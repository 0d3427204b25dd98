//! Error types for loam-core

use thiserror::Error;

/// Result type alias using loam-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in loam-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error (connect, timeout, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote backend answered but refused or returned an unusable payload
    #[error("Remote error: {0}")]
    Remote(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No credentials available for the configured backend
    #[error("Not authenticated: no API token configured for the sync backend")]
    NotAuthenticated,

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unparseable timestamp
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// State machine rejected a transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Sequential hierarchical upload stopped at `key`
    #[error("Upload aborted at {key}: {reason}")]
    UploadAborted { key: String, reason: String },
}

impl Error {
    /// Whether the error is raised before any I/O because the client is misconfigured.
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::NotAuthenticated)
    }
}
