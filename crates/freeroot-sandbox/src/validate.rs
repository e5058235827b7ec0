//! Input validation for external invocations.
//!
//! Rejects input that `execve` cannot represent or that would make the
//! invocation ambiguous:
//!
//! - **Empty commands** - nothing to exec
//! - **Empty program name** - lookup would fail with a confusing error
//! - **Null bytes** - argv and env entries are C strings
//! - **Relative guest paths** - PRoot working directories must be absolute
//!
//! ## Example
//!
//! ```ignore
//! use freeroot_sandbox::validate::{validate_cmd, validate_guest_path};
//!
//! assert!(validate_cmd(&["tar", "-xpf", "base.tar.gz"]).is_ok());
//! assert!(validate_cmd(&[]).is_err());
//! assert!(validate_guest_path("/root").is_ok());
//! assert!(validate_guest_path("root").is_err());
//! ```

use thiserror::Error;

/// Validation error for process inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("command cannot be empty")]
    EmptyCommand,

    #[error("program name is empty")]
    EmptyProgram,

    #[error("null byte in input")]
    NullByte,

    #[error("guest path must be absolute: {0}")]
    RelativePath(String),
}

/// Validate command and arguments.
pub fn validate_cmd<S: AsRef<str>>(cmd: &[S]) -> Result<(), ValidationError> {
    let Some(program) = cmd.first() else {
        return Err(ValidationError::EmptyCommand);
    };
    if program.as_ref().is_empty() {
        return Err(ValidationError::EmptyProgram);
    }
    if cmd.iter().any(|arg| arg.as_ref().contains('\0')) {
        return Err(ValidationError::NullByte);
    }
    Ok(())
}

/// Validate environment entries.
pub fn validate_env<'a>(
    vars: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Result<(), ValidationError> {
    for (key, value) in vars {
        if key.contains('\0') || value.contains('\0') {
            return Err(ValidationError::NullByte);
        }
    }
    Ok(())
}

/// Validate a path inside the guest filesystem.
pub fn validate_guest_path(path: &str) -> Result<(), ValidationError> {
    if path.contains('\0') {
        return Err(ValidationError::NullByte);
    }
    if !path.starts_with('/') {
        return Err(ValidationError::RelativePath(path.to_string()));
    }
    Ok(())
}
