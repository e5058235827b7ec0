//! Mapping from freeroot errors to Python exceptions.

use freeroot::Error;
use pyo3::{PyErr, exceptions::*};

pub fn into_pyerr(err: Error) -> PyErr {
    match err {
        Error::UnsupportedArchitecture(machine) => {
            PyOSError::new_err(format!("Unsupported CPU architecture: {machine}"))
        }
        Error::DownloadFailed { url, reason } => {
            PyConnectionError::new_err(format!("Download of {url} failed: {reason}"))
        }
        Error::ExtractionFailed(msg) => PyRuntimeError::new_err(format!("Extraction failed: {msg}")),
        Error::InsufficientSpace(msg) => PyOSError::new_err(format!("Insufficient space: {msg}")),
        Error::LaunchFailed(msg) => PyRuntimeError::new_err(format!("PRoot launch failed: {msg}")),
        err @ Error::CleanupFailed { .. } => PyOSError::new_err(err.to_string()),
        Error::SessionCleaned => PyRuntimeError::new_err("Session has been cleaned up"),
        Error::Validation(e) => PyValueError::new_err(format!("Invalid input: {e}")),
        Error::InvalidConfig(msg) => PyValueError::new_err(format!("Invalid configuration: {msg}")),
        Error::Io(e) => PyIOError::new_err(format!("I/O error: {e}")),
    }
}
