//! Error types for the access broker

use std::io;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for the access broker
pub type Result<T> = std::result::Result<T, Error>;

/// Access broker errors
///
/// Every variant maps onto a stable [`ErrorKind`] surfaced to callers.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed resource reference, bad TTL or request-layer mismatch
    #[error("{0}")]
    InvalidArgument(String),

    /// Unknown resource, view, broker or missing state record
    #[error("{0}")]
    NotFound(String),

    /// Resources span multiple realms, or a concurrent write won
    #[error("{0}")]
    Conflict(String),

    /// Identity could not be established
    #[error("{0}")]
    Unauthenticated(String),

    /// Authorization window elapsed
    #[error("{0}")]
    DeadlineExceeded(String),

    /// Policy evaluation rejected the identity
    #[error("{0}")]
    PermissionDenied(String),

    /// Service prerequisites are not configured
    #[error("{0}")]
    FailedPrecondition(String),

    /// Store, broker or adapter failure
    #[error("{0}")]
    Unavailable(String),

    /// Internally inconsistent configuration or state
    #[error("{0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Machine-readable error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// See [`Error::InvalidArgument`]
    InvalidArgument,
    /// See [`Error::NotFound`]
    NotFound,
    /// See [`Error::Conflict`]
    Conflict,
    /// See [`Error::Unauthenticated`]
    Unauthenticated,
    /// See [`Error::DeadlineExceeded`]
    DeadlineExceeded,
    /// See [`Error::PermissionDenied`]
    PermissionDenied,
    /// See [`Error::FailedPrecondition`]
    FailedPrecondition,
    /// See [`Error::Unavailable`]
    Unavailable,
    /// See [`Error::Internal`]
    Internal,
}

impl ErrorKind {
    /// HTTP status code equivalent
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidArgument => 400,
            Self::Unauthenticated => 401,
            Self::PermissionDenied => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::FailedPrecondition => 412,
            Self::Internal => 500,
            Self::Unavailable => 503,
            Self::DeadlineExceeded => 504,
        }
    }
}

impl Error {
    /// Create an `InvalidArgument` error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a `NotFound` error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an `Internal` error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an `Unavailable` error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// The stable kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            Self::Unavailable(_) | Self::Http(_) => ErrorKind::Unavailable,
            Self::Internal(_) | Self::Config(_) | Self::Io(_) | Self::Json(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Re-wrap this error as `Unavailable`, keeping the message
    ///
    /// Used where any failure of an external dependency is reported as a
    /// backend outage regardless of its original kind.
    #[must_use]
    pub fn into_unavailable(self) -> Self {
        match self {
            Self::Unavailable(_) => self,
            other => Self::Unavailable(other.to_string()),
        }
    }
}
