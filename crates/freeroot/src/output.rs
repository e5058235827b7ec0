//! Command result.
//!
//! What one guest command produced: the interleaved stdout/stderr text, its
//! exit status, and how it ended.

use std::time::Duration;

use serde::Serialize;

pub use freeroot_sandbox::Status;

/// Result of one guest command.
///
/// A non-zero `exit_code` is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// Combined stdout and stderr, in the order the guest wrote them.
    pub output: String,
    /// Exit code; `128 + signal` when killed.
    pub exit_code: i32,
    pub status: Status,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl From<freeroot_sandbox::Output> for CommandResult {
    fn from(output: freeroot_sandbox::Output) -> Self {
        let exit_code = output.status_code();
        Self {
            // Combined mode writes both streams to stdout.
            output: output.stdout_str(),
            exit_code,
            status: output.status,
            duration: output.duration,
        }
    }
}

impl CommandResult {
    #[inline]
    pub fn success(&self) -> bool {
        self.status == Status::Exited && self.exit_code == 0
    }

    /// Ended by deadline or cancellation rather than on its own.
    #[inline]
    pub fn interrupted(&self) -> bool {
        matches!(self.status, Status::Timeout | Status::Cancelled)
    }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_output(exit_code: Option<i32>, signal: Option<i32>, status: Status) -> freeroot_sandbox::Output {
        freeroot_sandbox::Output {
            stdout: b"out\nerr\n".to_vec(),
            stderr: vec![],
            status,
            duration: Duration::from_millis(42),
            exit_code,
            signal,
        }
    }

    #[test]
    fn result_success() {
        let result = CommandResult::from(sandbox_output(Some(0), None, Status::Exited));
        assert!(result.success());
        assert!(!result.interrupted());
        assert_eq!(result.output, "out\nerr\n");
    }

    #[test]
    fn result_failure_keeps_code() {
        let result = CommandResult::from(sandbox_output(Some(7), None, Status::Exited));
        assert!(!result.success());
        assert_eq!(result.exit_code, 7);
    }

    #[test]
    fn timeout_uses_signal_code() {
        let result = CommandResult::from(sandbox_output(None, Some(libc::SIGKILL), Status::Timeout));
        assert!(result.interrupted());
        assert_eq!(result.exit_code, 137);
    }

    #[test]
    fn serializes_for_json_output() {
        let result = CommandResult::from(sandbox_output(Some(0), None, Status::Exited));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["status"], "exited");
        assert_eq!(json["duration_ms"], 42);
        assert_eq!(json["output"], "out\nerr\n");
    }
}
