//! Executors turn a [`Plan`] into an [`Output`].
//!
//! [`Executor`] is the seam between freeroot and every external program it
//! launches. [`HostExecutor`] runs plans on the host with `std::process`;
//! tests substitute their own implementation to record plans or to fake
//! `tar` and `proot`.
//!
//! ## Blocking Example
//!
//! ```ignore
//! use freeroot_sandbox::{Executor, HostExecutor, Plan};
//!
//! let output = HostExecutor.run(&Plan::new(["echo", "hello"]))?;
//! assert_eq!(output.stdout, b"hello\n");
//! ```
//!
//! ## Piped Example
//!
//! ```ignore
//! let mut process = HostExecutor.spawn(&Plan::new(["bash"]))?;
//! process.write_stdin(b"echo hi\n")?;
//! let output = process.wait()?;
//! ```

use std::io::{self, Write as _};
use std::os::fd::OwnedFd;
use std::process::{Child, Command, Stdio};

use rustix::pipe::{PipeFlags, pipe_with};
use thiserror::Error;

use crate::monitor::{Output, monitor};
use crate::plan::{OutputMode, Plan};
use crate::process::Process;
use crate::validate::{ValidationError, validate_cmd, validate_env};

/// Error during external execution.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("monitor: {0}")]
    Monitor(io::Error),

    #[error("{0} is not supported by this executor")]
    Unsupported(&'static str),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl ExecutorError {
    /// The OS error behind a failed spawn, if any.
    pub fn spawn_errno(&self) -> Option<i32> {
        match self {
            Self::Spawn { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Runs external programs described by a [`Plan`].
pub trait Executor: Send + Sync {
    /// Run the plan to completion and collect its output.
    fn run(&self, plan: &Plan) -> Result<Output, ExecutorError>;

    /// Start the plan with a piped stdin and return a handle to it.
    fn spawn(&self, plan: &Plan) -> Result<Process, ExecutorError> {
        let _ = plan;
        Err(ExecutorError::Unsupported("spawn"))
    }
}

/// Executor backed by `std::process` on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostExecutor;

impl Executor for HostExecutor {
    fn run(&self, plan: &Plan) -> Result<Output, ExecutorError> {
        let stdin = match (plan.output, &plan.stdin) {
            (OutputMode::Inherit, _) => Stdio::inherit(),
            (_, Some(_)) => Stdio::piped(),
            (_, None) => Stdio::null(),
        };
        let (mut child, stdout, stderr) = start(plan, stdin)?;
        tracing::debug!(program = %plan.program(), pid = child.id(), "spawned");

        let writer = match (child.stdin.take(), plan.stdin.clone()) {
            (Some(mut pipe), Some(data)) => Some(std::thread::spawn(move || {
                // EPIPE just means the child stopped reading early.
                let _ = pipe.write_all(&data);
            })),
            _ => None,
        };

        let output = monitor(&mut child, stdout, stderr, plan.timeout, plan.cancel.as_ref())
            .map_err(ExecutorError::Monitor)?;

        if let Some(writer) = writer {
            let _ = writer.join();
        }

        tracing::debug!(
            program = %plan.program(),
            status = ?output.status,
            exit_code = ?output.exit_code,
            elapsed_ms = output.duration.as_millis() as u64,
            "finished"
        );
        Ok(output)
    }

    fn spawn(&self, plan: &Plan) -> Result<Process, ExecutorError> {
        let (mut child, stdout, stderr) = start(plan, Stdio::piped())?;
        tracing::debug!(program = %plan.program(), pid = child.id(), "spawned piped");

        let stdin = child.stdin.take();
        Ok(Process::new(child, stdin, stdout, stderr, plan.timeout, plan.cancel.clone()))
    }
}

/// Validate, build and spawn the command, returning the parent's read ends.
fn start(
    plan: &Plan,
    stdin: Stdio,
) -> Result<(Child, Option<OwnedFd>, Option<OwnedFd>), ExecutorError> {
    validate_cmd(plan.cmd.as_slice())?;
    validate_env(&plan.env)?;

    let program = plan
        .binary_path
        .as_ref()
        .map_or_else(|| plan.cmd[0].clone().into(), |p| p.clone().into_os_string());

    let mut command = Command::new(&program);
    command.args(&plan.cmd[1..]).stdin(stdin);
    if plan.clear_env {
        command.env_clear();
    }
    command.envs(&plan.env);
    if let Some(cwd) = &plan.cwd {
        command.current_dir(cwd);
    }

    let mut combined_reader = None;
    match plan.output {
        OutputMode::Capture => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        OutputMode::Combined => {
            let (reader, writer) = pipe_with(PipeFlags::CLOEXEC).map_err(io::Error::from)?;
            let writer_dup = writer.try_clone()?;
            command
                .stdout(Stdio::from(writer))
                .stderr(Stdio::from(writer_dup));
            combined_reader = Some(reader);
        }
        OutputMode::Inherit => {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
    }

    let spawned = command.spawn();
    // The command still owns the combined pipe's write ends; EOF only arrives
    // once every write end is closed.
    drop(command);

    let mut child = spawned.map_err(|source| ExecutorError::Spawn {
        program: plan.program(),
        source,
    })?;

    let (stdout, stderr) = match plan.output {
        OutputMode::Capture => (
            child.stdout.take().map(OwnedFd::from),
            child.stderr.take().map(OwnedFd::from),
        ),
        OutputMode::Combined => (combined_reader, None),
        OutputMode::Inherit => (None, None),
    };

    Ok((child, stdout, stderr))
}
