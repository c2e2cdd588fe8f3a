use std::process::ExitCode;

use coverage_fetch_core::ConfigError;
use coverage_fetch_lib::{BatchError, SourceError};
use coverage_fetch_wcs::WcsError;
use thiserror::Error;

/// Exit status for a batch that could not start.
pub(crate) const EXIT_FATAL: u8 = 2;
/// Exit status after Ctrl-C.
pub(crate) const EXIT_INTERRUPTED: u8 = 130;

/// Errors that can occur during CLI command execution.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Invalid configuration; nothing was fetched or written
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Polygon input could not be read
    #[error("Input error: {0}")]
    Source(#[from] SourceError),

    /// Batch setup failed
    #[error("{0}")]
    Batch(#[from] BatchError),

    /// HTTP client could not be created
    #[error("{0}")]
    Client(#[from] WcsError),

    /// Runtime creation or async error
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl CliError {
    pub(crate) fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Process exit status for this error.
    pub(crate) fn status(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Source(_) => EXIT_FATAL,
            Self::Batch(BatchError::Config(_) | BatchError::Source(_)) => EXIT_FATAL,
            Self::Batch(BatchError::Io { .. } | BatchError::Reader(_))
            | Self::Client(_)
            | Self::Runtime(_) => 1,
        }
    }

    pub(crate) fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.status())
    }
}
