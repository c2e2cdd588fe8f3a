use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::request::ValidationError;

/// Failure classes recorded in the failure report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Request rejected before any network call.
    Validation,
    /// The service answered with an error document instead of data.
    Service,
    /// Connection, timeout or protocol failure.
    Transport,
    /// Local write failure after a successful fetch.
    Storage,
    /// The worker gave up on the request (panic inside processing).
    Internal,
}

impl ErrorKind {
    /// Tag written to the `error_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Service => "ServiceError",
            Self::Transport => "TransportError",
            Self::Storage => "StorageError",
            Self::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can go wrong while processing a single request.
///
/// None of these abort the batch; each becomes a failed outcome.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Service returned an error: {reason}")]
    Service { reason: String },

    #[error("{0}")]
    Transport(String),

    #[error("Failed to write {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Internal(String),
}

impl FetchError {
    pub fn service(reason: impl Into<String>) -> Self {
        Self::Service {
            reason: reason.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Service { .. } => ErrorKind::Service,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
