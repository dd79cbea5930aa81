use thiserror::Error;

/// Errors raised while validating core values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),
}

/// Errors from durable session storage.
///
/// The variants follow the steps of the snapshot write protocol so callers
/// can tell a staging failure from a failed rename.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Rename failed: {0}")]
    Rename(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors a session handler or source hook may report.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Internal implementation error")]
    NotImplemented,

    #[error("Unsupported request")]
    Unsupported,

    #[error("{0}")]
    Failed(String),
}
