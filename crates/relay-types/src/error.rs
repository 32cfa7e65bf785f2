use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by relay operations (publish, subscribe, inbox access).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    #[error("access denied for '{sender}' on '{subject}': {reason}")]
    AccessDenied {
        subject: String,
        sender: String,
        reason: String,
    },

    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Errors from the durable mailbox store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("message {id} not found in mailbox {endpoint_hash}")]
    MessageNotFound { endpoint_hash: String, id: Uuid },

    #[error("invalid endpoint hash: '{0}'")]
    InvalidEndpoint(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from index and dead letter repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors loading a configuration or rule file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
