//! Error types for remote storage operations

use chbackup_archive::ArchiveError;
use chbackup_core::ConfigError;
use std::io;
use thiserror::Error;

/// Boxed provider error, kept as the source of wrapped failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias using the storage error type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by storage backends and the backup destination
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object does not exist
    #[error("key '{key}' not found")]
    NotFound { key: String },

    /// Operation issued before a successful `connect`
    #[error("remote storage is not connected")]
    NotConnected,

    /// Liveness check or session setup failed
    #[error("{kind} connection failed: {source}")]
    Connection {
        kind: &'static str,
        #[source]
        source: BoxError,
    },

    /// Any other provider failure
    #[error("{kind} request failed: {source}")]
    Provider {
        kind: &'static str,
        #[source]
        source: BoxError,
    },

    /// Local IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Packing or unpacking failed
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Backend settings are unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Key or path cannot be represented by the provider
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    /// External cancellation was requested
    #[error("operation cancelled")]
    Cancelled,

    /// Walk visitor asked to stop
    #[error("walk aborted: {0}")]
    Aborted(String),
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn connection(kind: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            kind,
            source: source.into(),
        }
    }

    pub fn provider(kind: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Provider {
            kind,
            source: source.into(),
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted(message.into())
    }

    /// True for the shared "object absent" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Converts into an IO error for use inside byte streams.
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io(e) => e,
            Self::NotFound { .. } => io::Error::new(io::ErrorKind::NotFound, self),
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinguishable() {
        let err = StorageError::not_found("backup/part_1.tar");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "key 'backup/part_1.tar' not found");

        let err = StorageError::provider("S3", "throttled");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_provider_error_keeps_source() {
        let cause = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = StorageError::connection("FTP", cause);

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "reset by peer");
        assert_eq!(err.to_string(), "FTP connection failed: reset by peer");
    }
}
