//! Handle to a spawned child with a piped stdin.

use std::io::{self, Write as _};
use std::os::fd::OwnedFd;
use std::process::{Child, ChildStdin};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::monitor::{Output, monitor};

/// A running external process started by [`Executor::spawn`](crate::Executor::spawn).
///
/// Output accumulates in the pipe until [`wait`](Self::wait) collects it, so
/// a child that writes more than a pipe buffer before its stdin is closed
/// will block.
#[derive(Debug)]
pub struct Process {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<OwnedFd>,
    stderr: Option<OwnedFd>,
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl Process {
    pub(crate) fn new(
        child: Child,
        stdin: Option<ChildStdin>,
        stdout: Option<OwnedFd>,
        stderr: Option<OwnedFd>,
        timeout: Option<Duration>,
        cancel: Option<CancelToken>,
    ) -> Self {
        Self {
            child,
            stdin,
            stdout,
            stderr,
            timeout,
            cancel,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Write data to the child's stdin.
    pub fn write_stdin(&mut self, data: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed"))?;
        stdin.write_all(data)?;
        stdin.flush()
    }

    /// Close the child's stdin (signal EOF).
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Whether the child has not exited yet.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the child and reap it. A child that already exited is not an error.
    pub fn kill(&mut self) -> io::Result<()> {
        self.stdin = None;
        match self.child.kill() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        self.child.wait().map(|_| ())
    }

    /// Close stdin, wait for exit and collect the output.
    pub fn wait(mut self) -> io::Result<Output> {
        self.stdin = None;
        monitor(
            &mut self.child,
            self.stdout.take(),
            self.stderr.take(),
            self.timeout,
            self.cancel.as_ref(),
        )
    }
}
