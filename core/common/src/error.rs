//! Common error types for the sync engine.

use thiserror::Error;

/// Failure of a Persistent Store operation.
///
/// Store errors are fatal to the operation that raised them and are never
/// retried by the store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be read or written.
    #[error("Store I/O error: {0}")]
    Io(String),

    /// The device ran out of space for the database.
    #[error("Storage quota exhausted: {0}")]
    QuotaExceeded(String),

    /// The on-disk schema is newer than this build understands.
    #[error("Schema mismatch: database is at version {found}, this build supports up to {supported}")]
    SchemaMismatch { found: i64, supported: i64 },

    /// A stored value could not be encoded or decoded.
    #[error("Stored value is malformed: {0}")]
    Serialization(String),
}

/// Top-level error type for sync engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The network was unreachable or the attempt timed out.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a failure status.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The server validated the payload and refused it.
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Local persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification of an [`Error`], carried by `Outcome::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Server,
    Rejected,
    Store,
    InvalidInput,
    Serialization,
}

impl Error {
    /// Classify a non-success HTTP status.
    ///
    /// 408 and 429 are transient and treated like an unreachable network.
    /// Other 4xx statuses mean the server looked at the payload and refused
    /// it; 5xx statuses are server failures.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 => Error::Transport(format!("HTTP {}: {}", status, message)),
            400..=499 => Error::Rejected { status, message },
            _ => Error::Server { status, message },
        }
    }

    /// Get the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) => ErrorKind::Transport,
            Error::Server { .. } => ErrorKind::Server,
            Error::Rejected { .. } => ErrorKind::Rejected,
            Error::Store(_) => ErrorKind::Store,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether the failure is recoverable locally by cache fallback or queueing.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(Error::from_status(503, "down").kind(), ErrorKind::Server);
        assert_eq!(Error::from_status(500, "boom").kind(), ErrorKind::Server);
        assert_eq!(Error::from_status(422, "bad image").kind(), ErrorKind::Rejected);
        assert_eq!(Error::from_status(400, "not an image").kind(), ErrorKind::Rejected);
        assert!(Error::from_status(429, "slow down").is_transport());
        assert!(Error::from_status(408, "timeout").is_transport());
    }

    #[test]
    fn test_store_error_converts() {
        let err: Error = StoreError::QuotaExceeded("disk full".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Store);
        assert!(err.to_string().contains("quota"));
    }
}
