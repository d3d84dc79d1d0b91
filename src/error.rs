//! WolfElect Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for WolfElect operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a coordination service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    #[error("connection to coordination service lost: {0}")]
    ConnectionLoss(String),

    #[error("session expired")]
    SessionExpired,

    #[error("no node at {0}")]
    NoNode(String),

    #[error("node already exists at {0}")]
    NodeExists(String),

    #[error("node {0} has children")]
    NotEmpty(String),

    #[error("malformed path {0}")]
    BadPath(String),
}

/// WolfElect error types
#[derive(Error, Debug)]
pub enum Error {
    // Coordination errors
    #[error("Coordination service unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("Coordination service error: {0}")]
    Coordination(CoordError),

    // Election errors
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Own node {node} missing from topology of {group}")]
    SelfNodeMissing { group: String, node: String },

    #[error("Election group {0} was deleted")]
    GroupDeleted(String),

    #[error("Malformed candidate name {name:?}: {reason}")]
    Parse { name: String, reason: String },

    #[error("Participant is not active")]
    NotActive,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoordError> for Error {
    fn from(err: CoordError) -> Self {
        match err {
            CoordError::ConnectionLoss(_) | CoordError::SessionExpired => {
                Error::CoordinationUnavailable(err.to_string())
            }
            CoordError::BadPath(path) => Error::InvalidPath(path),
            CoordError::NoNode(path) => Error::GroupDeleted(path),
            other => Error::Coordination(other),
        }
    }
}

/// Error classification carried by `Error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    CoordinationUnavailable,
    InvalidPath,
    SelfNodeMissing,
    GroupDeleted,
    ParseError,
    Service,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::CoordinationUnavailable => write!(f, "COORDINATION_UNAVAILABLE"),
            ErrorKind::InvalidPath => write!(f, "INVALID_PATH"),
            ErrorKind::SelfNodeMissing => write!(f, "SELF_NODE_MISSING"),
            ErrorKind::GroupDeleted => write!(f, "GROUP_DELETED"),
            ErrorKind::ParseError => write!(f, "PARSE_ERROR"),
            ErrorKind::Service => write!(f, "SERVICE"),
            ErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl Error {
    /// Classification used when this error is surfaced as an event
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CoordinationUnavailable(_) => ErrorKind::CoordinationUnavailable,
            Error::InvalidPath(_) => ErrorKind::InvalidPath,
            Error::SelfNodeMissing { .. } => ErrorKind::SelfNodeMissing,
            Error::GroupDeleted(_) => ErrorKind::GroupDeleted,
            Error::Parse { .. } => ErrorKind::ParseError,
            Error::Coordination(_) => ErrorKind::Service,
            Error::NotActive
            | Error::Config(_)
            | Error::ConfigParse(_)
            | Error::Io(_)
            | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CoordinationUnavailable(_))
    }

    /// Check if this error stops the topology watcher
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::SelfNodeMissing { .. } | Error::GroupDeleted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coord_error_mapping() {
        let err: Error = CoordError::ConnectionLoss("reset".into()).into();
        assert_eq!(err.kind(), ErrorKind::CoordinationUnavailable);
        assert!(err.is_retryable());
        assert!(!err.is_fatal());

        let err: Error = CoordError::SessionExpired.into();
        assert_eq!(err.kind(), ErrorKind::CoordinationUnavailable);

        let err: Error = CoordError::BadPath("a//b".into()).into();
        assert!(matches!(err, Error::InvalidPath(ref p) if p == "a//b"));

        let err: Error = CoordError::NoNode("/election".into()).into();
        assert_eq!(err.kind(), ErrorKind::GroupDeleted);
        assert!(err.is_fatal());

        let err: Error = CoordError::NotEmpty("/election".into()).into();
        assert_eq!(err.kind(), ErrorKind::Service);
    }

    #[test]
    fn test_fatal_errors() {
        let err = Error::SelfNodeMissing {
            group: "/election".into(),
            node: "-0000000001".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert!(format!("{}", err).contains("-0000000001"));

        let err = Error::Parse {
            name: "bogus".into(),
            reason: "no sequence separator".into(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }
}
