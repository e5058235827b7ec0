//! External process plan.
//!
//! A `Plan` describes everything needed to run one external program:
//! the argv, environment, working directory, stdin, how output is captured,
//! and the optional deadline and cancellation token.
//!
//! ## Example
//!
//! ```ignore
//! use freeroot_sandbox::{OutputMode, Plan};
//!
//! let plan = Plan::new(["tar", "-xpf", "base.tar.gz", "-C", "/tmp/rootfs"])
//!     .output(OutputMode::Combined)
//!     .timeout(Duration::from_secs(600));
//! ```
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `timeout` | none (wait forever) |
//! | `cancel` | none |
//! | `output` | `Capture` (separate stdout/stderr) |
//! | `clear_env` | false (inherit the caller's environment) |
//! | `cwd` | caller's working directory |

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::cancel::CancelToken;

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// stdout and stderr captured into separate buffers. Default.
    #[default]
    Capture,
    /// stdout and stderr share one pipe; everything lands in `Output::stdout`
    /// in the order the child wrote it.
    Combined,
    /// Streams (including stdin) are inherited from the caller. Used for
    /// interactive shells; nothing is captured.
    Inherit,
}

/// Complete external process plan.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub cmd: Vec<String>,
    /// Pre-resolved binary path. If set, it is executed instead of looking up `cmd[0]`.
    pub binary_path: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Start from an empty environment instead of inheriting the caller's.
    pub clear_env: bool,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
    pub output: OutputMode,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl Plan {
    pub fn new(cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Program name as it will appear in logs and errors.
    pub fn program(&self) -> String {
        match &self.binary_path {
            Some(path) => path.display().to_string(),
            None => self.cmd.first().cloned().unwrap_or_default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.cmd.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cmd.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(
        mut self,
        vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        for (key, value) in vars {
            self.env.insert(key.into(), value.into());
        }
        self
    }

    pub fn clear_env(mut self, clear: bool) -> Self {
        self.clear_env = clear;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn output(mut self, mode: OutputMode) -> Self {
        self.output = mode;
        self
    }

    /// Set pre-resolved binary path.
    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    /// Kill the child if it is still running after `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn maybe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_new() {
        let plan = Plan::new(["echo", "hello"]);
        assert_eq!(plan.cmd, vec!["echo", "hello"]);
        assert_eq!(plan.output, OutputMode::Capture);
        assert!(plan.timeout.is_none());
        assert!(!plan.clear_env);
    }

    #[test]
    fn plan_builder() {
        let plan = Plan::new(["bash"])
            .args(["-c", "true"])
            .env("HOME", "/root")
            .clear_env(true)
            .stdin(b"input".to_vec())
            .timeout(Duration::from_secs(10))
            .output(OutputMode::Combined);

        assert_eq!(plan.cmd, vec!["bash", "-c", "true"]);
        assert_eq!(plan.env.get("HOME"), Some(&"/root".into()));
        assert!(plan.clear_env);
        assert_eq!(plan.stdin, Some(b"input".to_vec()));
        assert_eq!(plan.timeout, Some(Duration::from_secs(10)));
        assert_eq!(plan.output, OutputMode::Combined);
    }

    #[test]
    fn program_prefers_binary_path() {
        let plan = Plan::new(["proot", "--version"]);
        assert_eq!(plan.program(), "proot");

        let plan = plan.binary_path("/opt/rootfs/usr/local/bin/proot");
        assert_eq!(plan.program(), "/opt/rootfs/usr/local/bin/proot");
    }
}
