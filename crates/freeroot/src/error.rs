//! Error types for freeroot.

use std::io;
use std::path::PathBuf;

use freeroot_sandbox::ExecutorError;
use thiserror::Error;

/// Main error type for freeroot operations.
///
/// A command that runs and exits non-zero is not an error; it comes back as a
/// [`CommandResult`](crate::CommandResult) with a non-zero `exit_code`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported CPU architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("insufficient space: {0}")]
    InsufficientSpace(String),

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("cleanup of {} failed: {source}", path.display())]
    CleanupFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("session has been cleaned up")]
    SessionCleaned,

    #[error("validation: {0}")]
    Validation(#[from] freeroot_sandbox::validate::ValidationError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn download(url: &str, reason: impl ToString) -> Self {
        Self::DownloadFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Classify a failed filesystem write: a full disk is reported as
    /// `InsufficientSpace`, anything else as plain `Io`.
    pub(crate) fn from_write(err: io::Error, what: impl std::fmt::Display) -> Self {
        if is_no_space(&err) {
            Self::InsufficientSpace(format!("{what}: {err}"))
        } else {
            Self::Io(err)
        }
    }
}

impl From<ExecutorError> for Error {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Validation(e) => Self::Validation(e),
            ExecutorError::Spawn { .. } | ExecutorError::Unsupported(_) => {
                Self::LaunchFailed(err.to_string())
            }
            ExecutorError::Monitor(e) | ExecutorError::Io(e) => Self::Io(e),
        }
    }
}

pub(crate) fn is_no_space(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOSPC) | Some(libc::EDQUOT))
}

/// Result type for freeroot operations.
pub type Result<T> = std::result::Result<T, Error>;
