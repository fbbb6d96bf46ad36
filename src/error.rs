//! Centralized error types for mailextract.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailextract library.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// A query clause cannot be rendered into a search string.
    #[error("Invalid query clause '{clause}': {reason}")]
    InvalidQuery { clause: String, reason: String },

    /// A permalink was requested for a message without a `Message-Id` header.
    #[error("Message {message_id} has no '{header}' header")]
    MissingHeader { message_id: String, header: String },

    /// A configuration value is malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A strategy needs a collaborator that was not supplied to the pipeline.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// The mailbox rejected a search or message read.
    #[error("Mailbox error: {0}")]
    Mailbox(String),

    /// The file-holding location rejected a create or read.
    #[error("File store error: {0}")]
    FileStore(String),

    /// The tabular store rejected a lookup, append or update.
    #[error("Sheet error: {0}")]
    Sheet(String),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A local message or sheet file could not be parsed.
    #[error("Parse error in '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Convenience alias for `Result<T, ExtractError>`.
pub type Result<T> = std::result::Result<T, ExtractError>;

impl ExtractError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for mistakes in how the pipeline was set up, as opposed to a
    /// collaborator rejecting an operation.
    ///
    /// Configuration errors abort a run; everything else only skips the
    /// message being processed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuery { .. }
                | Self::MissingHeader { .. }
                | Self::InvalidConfig(_)
                | Self::NotConfigured(_)
        )
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `ExtractError::io`).
impl From<std::io::Error> for ExtractError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        let err = ExtractError::MissingHeader {
            message_id: "abc".into(),
            header: "Message-Id".into(),
        };
        assert!(err.is_configuration());
        assert!(ExtractError::NotConfigured("record store".into()).is_configuration());
        assert!(!ExtractError::FileStore("quota exceeded".into()).is_configuration());
        assert!(!ExtractError::Sheet("permission denied".into()).is_configuration());
    }

    #[test]
    fn test_io_keeps_path() {
        let err = ExtractError::io(
            "/tmp/x.csv",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.to_string(), "I/O error on '/tmp/x.csv': gone");
    }
}
