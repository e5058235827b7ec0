//! Process monitoring and output collection.
//!
//! Monitors a spawned child using `pidfd` and collects its output.
//! Uses `poll()` to multiplex between:
//!
//! - **pidfd** - Signals when the child exits (no race with pid reuse)
//! - **stdout pipe** - Data from the child's stdout (or the combined stream)
//! - **stderr pipe** - Data from the child's stderr, when captured separately
//! - **deadline / cancellation** - Kills the child with SIGKILL via the pidfd
//!
//! With neither a deadline nor a cancellation token the loop blocks in
//! `poll()` indefinitely, so a hung child hangs the caller.
//!
//! ## Exit Detection
//!
//! Once the pidfd becomes readable the remaining pipe contents are drained
//! without blocking (a background grandchild may keep a pipe open) and the
//! child is reaped with `Child::wait`.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::process::Child;
use std::time::{Duration, Instant};

use rustix::process::{Pid, PidfdFlags, Signal, pidfd_open, pidfd_send_signal};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;

/// Upper bound on a single `poll()` wait when a deadline or token must be checked.
const POLL_TICK_MS: u128 = 100;

/// Output from an external execution.
#[derive(Debug, Clone)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: Status,
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl Output {
    #[inline]
    pub fn success(&self) -> bool {
        self.status == Status::Exited && self.exit_code == Some(0)
    }

    #[inline]
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    #[inline]
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Shell-style status: the exit code, or `128 + signal` when killed.
    pub fn status_code(&self) -> i32 {
        match (self.exit_code, self.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => -1,
        }
    }
}

/// How the external execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Exited,
    Signaled,
    Timeout,
    Cancelled,
}

struct Stream {
    fd: Option<OwnedFd>,
    buf: Vec<u8>,
}

impl Stream {
    fn new(fd: Option<OwnedFd>) -> io::Result<Self> {
        if let Some(fd) = &fd {
            set_nonblocking(fd.as_raw_fd())?;
        }
        Ok(Self {
            fd,
            buf: Vec::new(),
        })
    }

    fn raw(&self) -> Option<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Read whatever is available. Closes the stream on EOF or hard error.
    fn read_available(&mut self, scratch: &mut [u8]) {
        let Some(fd) = self.raw() else { return };
        loop {
            match read_nonblocking(fd, scratch) {
                Ok(0) => {
                    self.fd = None;
                    return;
                }
                Ok(n) => self.buf.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.fd = None;
                    return;
                }
            }
        }
    }
}

/// Monitor the child process and collect output.
///
/// `stdout` and `stderr` are the parent's read ends; pass `None` for streams
/// that are not captured.
pub fn monitor(
    child: &mut Child,
    stdout: Option<OwnedFd>,
    stderr: Option<OwnedFd>,
    timeout: Option<Duration>,
    cancel: Option<&CancelToken>,
) -> io::Result<Output> {
    let start = Instant::now();
    let deadline = timeout.map(|t| start + t);
    let pidfd = pidfd_open(Pid::from_child(child), PidfdFlags::empty())?;

    let mut streams = [Stream::new(stdout)?, Stream::new(stderr)?];
    let mut forced = None;
    let mut scratch = [0u8; 8192];

    loop {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            pidfd_send_signal(&pidfd, Signal::KILL).ok();
            forced = Some(Status::Cancelled);
            break;
        }

        let poll_timeout = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    pidfd_send_signal(&pidfd, Signal::KILL).ok();
                    forced = Some(Status::Timeout);
                    break;
                }
                // Cast is safe since min(100) fits in i32.
                remaining.as_millis().min(POLL_TICK_MS) as i32
            }
            None if cancel.is_some() => POLL_TICK_MS as i32,
            None => -1,
        };

        let open: Vec<usize> = (0..streams.len())
            .filter(|&i| streams[i].fd.is_some())
            .collect();
        let mut fds: Vec<libc::pollfd> = open
            .iter()
            .filter_map(|&i| streams[i].raw())
            .chain(std::iter::once(pidfd.as_raw_fd()))
            .map(|fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, poll_timeout) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        for (slot, &i) in open.iter().enumerate() {
            if fds[slot].revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                streams[i].read_available(&mut scratch);
            }
        }

        if fds[open.len()].revents & libc::POLLIN != 0 {
            break;
        }
    }

    for stream in &mut streams {
        stream.read_available(&mut scratch);
    }

    let exit = child.wait()?;
    let exit_code = exit.code();
    let signal = exit.signal();
    let status = forced.unwrap_or(if signal.is_some() {
        Status::Signaled
    } else {
        Status::Exited
    });

    let [stdout, stderr] = streams;
    Ok(Output {
        stdout: stdout.buf,
        stderr: stderr.buf,
        status,
        duration: start.elapsed(),
        exit_code,
        signal,
    })
}

#[inline]
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[inline]
fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: Option<i32>, signal: Option<i32>, status: Status) -> Output {
        Output {
            stdout: vec![],
            stderr: vec![],
            status,
            duration: Duration::from_millis(100),
            exit_code,
            signal,
        }
    }

    #[test]
    fn output_success() {
        assert!(output(Some(0), None, Status::Exited).success());
    }

    #[test]
    fn output_failure() {
        let out = output(Some(1), None, Status::Exited);
        assert!(!out.success());
        assert_eq!(out.status_code(), 1);
    }

    #[test]
    fn killed_output_uses_shell_convention() {
        let out = output(None, Some(9), Status::Timeout);
        assert!(!out.success());
        assert_eq!(out.status_code(), 137);
    }
}
