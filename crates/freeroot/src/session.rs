//! Rootfs session.
//!
//! A `Session` owns one provisioned rootfs and the PRoot binary that runs it.
//! Every mutating method takes `&mut self`, so commands on one session never
//! overlap.
//!
//! ```text
//! Uninitialized -> Provisioning -> Ready <-> Running
//!                                    |
//!                                    v
//!                                 Cleaned
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let mut session = freeroot::setup()?;
//!
//! let result = session.run_command("uname -a")?;
//! println!("{}", result.output);
//!
//! let result = session.run_command_with(
//!     "apt-get update",
//!     &RunOptions::new().timeout(Duration::from_secs(300)),
//! )?;
//!
//! session.cleanup()?;
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;

use freeroot_sandbox::{Executor, HostExecutor, Process};
use serde::Serialize;

use crate::arch::{self, Arch};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{Fetch, HttpFetcher};
use crate::git;
use crate::launcher::{Launcher, RunOptions, SessionHandle};
use crate::output::CommandResult;
use crate::provision::{self, Provisioner};

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Provisioning,
    Ready,
    /// A command or a piped shell is live.
    Running,
    /// Terminal. Every command fails with [`Error::SessionCleaned`].
    Cleaned,
}

/// Builder for [`Session`]. Unset parts fall back to the environment
/// configuration, the host architecture, HTTP and the host executor.
#[derive(Default)]
pub struct SessionBuilder {
    config: Option<Config>,
    machine: Option<String>,
    fetcher: Option<Arc<dyn Fetch>>,
    executor: Option<Arc<dyn Executor>>,
}

impl SessionBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `machine` (a `uname -m` string) instead of the host's.
    pub fn machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = Some(machine.into());
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Provision the rootfs and verify PRoot. Nothing is fetched when the
    /// architecture is unsupported.
    pub fn setup(self) -> Result<Session> {
        let config = self.config.unwrap_or_else(Config::from_env);
        config.validate()?;

        let arch = match &self.machine {
            Some(machine) => Arch::from_machine(machine)?,
            None => arch::resolve_architecture()?,
        };

        let fetcher: Arc<dyn Fetch> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new()?),
        };
        let executor: Arc<dyn Executor> = self.executor.unwrap_or_else(|| Arc::new(HostExecutor));

        let target = config.absolute_rootfs_dir()?;
        tracing::debug!(state = ?SessionState::Provisioning, target = %target.display(), "session setup");

        let rootfs = Provisioner::new(config.clone(), Arc::clone(&fetcher), Arc::clone(&executor))
            .ensure_rootfs(arch, &target)?;
        let handle = Launcher::new(config, fetcher, executor).start_session(&rootfs)?;

        tracing::info!(arch = %arch, rootfs = %target.display(), proot = %handle.proot().display(), "session ready");
        Ok(Session {
            handle,
            state: SessionState::Ready,
            shell: None,
            last_status: None,
        })
    }
}

/// An owned rootfs environment.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    state: SessionState,
    shell: Option<Process>,
    last_status: Option<i32>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Provision (if needed) and start a session with `config`.
    pub fn setup(config: Config) -> Result<Self> {
        Self::builder().config(config).setup()
    }

    /// Host path of the rootfs.
    pub fn path(&self) -> &Path {
        self.handle.rootfs().path()
    }

    pub fn arch(&self) -> Arch {
        self.handle.rootfs().arch()
    }

    pub fn proot(&self) -> &Path {
        self.handle.proot()
    }

    pub fn config(&self) -> &Config {
        self.handle.config()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Exit code of the most recent command.
    pub fn last_status(&self) -> Option<i32> {
        self.last_status
    }

    /// Run `text` with the guest shell and wait for it.
    pub fn run_command(&mut self, text: &str) -> Result<CommandResult> {
        self.run_command_with(text, &RunOptions::default())
    }

    /// Run `text` with a timeout, cancellation token, cwd or extra env.
    /// A command killed by either comes back with `Status::Timeout` or
    /// `Status::Cancelled`.
    pub fn run_command_with(&mut self, text: &str, opts: &RunOptions) -> Result<CommandResult> {
        self.ensure_live()?;

        tracing::info!(command = text, "running");
        let previous = std::mem::replace(&mut self.state, SessionState::Running);
        let output = self.handle.batch(text, opts);
        self.state = previous;

        let result = CommandResult::from(output?);
        self.last_status = Some(result.exit_code);
        tracing::debug!(
            exit_code = result.exit_code,
            status = ?result.status,
            elapsed_ms = result.duration.as_millis() as u64,
            "command finished"
        );
        Ok(result)
    }

    /// Shallow-clone `url` in the guest.
    pub fn clone_repo(
        &mut self,
        url: &str,
        target_dir: Option<&str>,
        branch: Option<&str>,
    ) -> Result<CommandResult> {
        git::clone_repo(self, url, target_dir, branch)
    }

    /// Login shell on the caller's terminal. Returns its exit code.
    pub fn shell(&mut self) -> Result<i32> {
        self.ensure_live()?;

        let previous = std::mem::replace(&mut self.state, SessionState::Running);
        let output = self.handle.interactive();
        self.state = previous;

        let code = output?.status_code();
        self.last_status = Some(code);
        Ok(code)
    }

    /// Start a shell that reads commands from [`write_stdin`](Self::write_stdin).
    /// A no-op if one is already running. A previous shell that has exited
    /// is reaped first and its exit code becomes `last_status`.
    pub fn spawn_shell(&mut self) -> Result<()> {
        self.ensure_live()?;
        if let Some(shell) = &mut self.shell {
            if shell.is_running() {
                return Ok(());
            }
        }
        if let Some(previous) = self.close_shell()? {
            tracing::debug!(
                exit_code = previous.exit_code,
                bytes = previous.output.len(),
                "reaped exited piped shell"
            );
        }

        let process = self.handle.piped()?;
        tracing::debug!(pid = process.id(), "piped shell started");
        self.shell = Some(process);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Send `data` to the piped shell.
    pub fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_live()?;
        let shell = self
            .shell
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no piped shell running"))?;
        shell.write_stdin(data)?;
        Ok(())
    }

    /// Close the piped shell's stdin and collect what it printed.
    pub fn close_shell(&mut self) -> Result<Option<CommandResult>> {
        let Some(mut shell) = self.shell.take() else {
            return Ok(None);
        };
        shell.close_stdin();
        let result = CommandResult::from(shell.wait()?);
        self.last_status = Some(result.exit_code);
        if self.state == SessionState::Running {
            self.state = SessionState::Ready;
        }
        Ok(Some(result))
    }

    /// Stop the piped shell and delete the rootfs. Safe to call twice.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.state == SessionState::Cleaned {
            return Ok(());
        }
        self.kill_shell();

        let path = self.path().to_path_buf();
        tracing::info!(path = %path.display(), "removing rootfs");
        cleanup_dir(&path)?;
        self.state = SessionState::Cleaned;
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state == SessionState::Cleaned {
            return Err(Error::SessionCleaned);
        }
        Ok(())
    }

    fn kill_shell(&mut self) {
        if let Some(mut shell) = self.shell.take() {
            if let Err(e) = shell.kill() {
                tracing::warn!(pid = shell.id(), error = %e, "failed to kill piped shell");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.kill_shell();
    }
}

/// Provision the default rootfs (`./rootfs` or `FREEROOT_DIR`) for the host.
pub fn setup() -> Result<Session> {
    Session::builder().setup()
}

/// Delete a rootfs directory. A missing directory is not an error.
pub fn cleanup_dir(path: &Path) -> Result<()> {
    match provision::remove_tree(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::CleanupFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NeverFetch(AtomicUsize);

    impl Fetch for NeverFetch {
        fn fetch(&self, url: &str, _dest: &Path) -> Result<u64> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::download(url, "offline"))
        }
    }

    #[test]
    fn unsupported_machine_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = Arc::new(NeverFetch(AtomicUsize::new(0)));
        let config = Config::builder().rootfs_dir(dir.path().join("rootfs")).build().unwrap();

        let err = Session::builder()
            .config(config)
            .machine("mips")
            .fetcher(fetch.clone())
            .setup()
            .unwrap_err();

        assert!(matches!(err, Error::UnsupportedArchitecture(m) if m == "mips"));
        assert_eq!(fetch.0.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("rootfs").exists());
    }

    #[test]
    fn invalid_config_is_rejected_before_fetch() {
        let fetch = Arc::new(NeverFetch(AtomicUsize::new(0)));
        let mut config = Config::default();
        config.release = String::new();

        let err = Session::builder()
            .config(config)
            .machine("x86_64")
            .fetcher(fetch.clone())
            .setup()
            .unwrap_err();

        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(fetch.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cleanup_dir_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        cleanup_dir(&dir.path().join("never-created")).unwrap();
    }

    #[test]
    fn cleanup_dir_removes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("rootfs");
        std::fs::create_dir_all(root.join("etc")).unwrap();
        std::fs::write(root.join("etc/hostname"), b"box\n").unwrap();

        cleanup_dir(&root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::Cleaned).unwrap();
        assert_eq!(json, "\"cleaned\"");
    }
}
