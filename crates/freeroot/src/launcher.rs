//! PRoot launcher.
//!
//! Finds (or installs) the PRoot binary and turns guest commands into
//! [`Plan`]s that run inside the rootfs:
//!
//! ```text
//! proot --rootfs=R -0 -w /root -b /dev -b /sys -b /proc \
//!       -b R/etc/resolv.conf:/etc/resolv.conf --kill-on-exit bash -c TEXT
//! ```
//!
//! Nothing here provides isolation of its own; it is all PRoot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use freeroot_sandbox::{CancelToken, Executor, Output, OutputMode, Plan, Process};

use crate::config::{Config, ENV_PROOT};
use crate::detect;
use crate::error::{Error, Result};
use crate::fetch::Fetch;
use crate::provision::{self, RootfsPath};

/// Guest `PATH` for every command.
pub const GUEST_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
pub const GUEST_HOME: &str = "/root";
pub const GUEST_LANG: &str = "C.UTF-8";

/// Host paths bound into every guest at the same location.
const SYSTEM_BINDS: &[&str] = &["/dev", "/sys", "/proc"];

/// A host path bound into the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub host: PathBuf,
    /// Guest location. Same as `host` when unset.
    pub guest: Option<String>,
}

impl Bind {
    pub fn new(host: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            guest: None,
        }
    }

    pub fn to(mut self, guest: impl Into<String>) -> Self {
        self.guest = Some(guest.into());
        self
    }

    fn arg(&self) -> String {
        match &self.guest {
            Some(guest) => format!("{}:{guest}", self.host.display()),
            None => self.host.display().to_string(),
        }
    }
}

/// Per-command knobs. The default runs with no deadline and no cancellation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
    /// Guest working directory; the configured one when unset.
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Builder for one PRoot invocation.
#[derive(Debug, Clone)]
pub struct ProotCommand {
    proot: PathBuf,
    rootfs: PathBuf,
    cwd: String,
    binds: Vec<Bind>,
    env: BTreeMap<String, String>,
    guest: Vec<String>,
}

impl ProotCommand {
    pub fn new(proot: impl Into<PathBuf>, rootfs: impl Into<PathBuf>) -> Self {
        let env = BTreeMap::from([
            ("PATH".to_string(), GUEST_PATH.to_string()),
            ("HOME".to_string(), GUEST_HOME.to_string()),
            ("TERM".to_string(), crate::config::DEFAULT_TERM.to_string()),
            ("LANG".to_string(), GUEST_LANG.to_string()),
        ]);
        Self {
            proot: proot.into(),
            rootfs: rootfs.into(),
            cwd: crate::config::DEFAULT_GUEST_CWD.to_string(),
            binds: Vec::new(),
            env,
            guest: Vec::new(),
        }
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn bind(mut self, bind: Bind) -> Self {
        self.binds.push(bind);
        self
    }

    pub fn binds(mut self, binds: impl IntoIterator<Item = Bind>) -> Self {
        self.binds.extend(binds);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Guest program and its arguments.
    pub fn guest(mut self, argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.guest = argv.into_iter().map(Into::into).collect();
        self
    }

    /// Full argument vector, `proot` first.
    pub fn argv(&self) -> Vec<String> {
        let rootfs = self.rootfs.display();
        let mut argv = vec![
            "proot".to_string(),
            format!("--rootfs={rootfs}"),
            "-0".to_string(),
            "-w".to_string(),
            self.cwd.clone(),
        ];
        for path in SYSTEM_BINDS {
            argv.push("-b".into());
            argv.push((*path).into());
        }
        argv.push("-b".into());
        argv.push(format!("{rootfs}/etc/resolv.conf:/etc/resolv.conf"));
        for bind in &self.binds {
            argv.push("-b".into());
            argv.push(bind.arg());
        }
        argv.push("--kill-on-exit".into());
        argv.extend(self.guest.iter().cloned());
        argv
    }

    pub fn into_plan(self) -> Plan {
        Plan::new(self.argv())
            .binary_path(self.proot)
            .clear_env(true)
            .envs(self.env)
    }
}

/// Locates PRoot and starts sessions in a rootfs.
pub struct Launcher {
    config: Config,
    fetcher: Arc<dyn Fetch>,
    executor: Arc<dyn Executor>,
}

impl Launcher {
    pub fn new(config: Config, fetcher: Arc<dyn Fetch>, executor: Arc<dyn Executor>) -> Self {
        Self {
            config,
            fetcher,
            executor,
        }
    }

    /// Find an existing PRoot binary.
    ///
    /// Search order:
    /// 1. `config.proot_path`
    /// 2. `FREEROOT_PROOT` (file, or directory containing `proot` / `bin/proot`)
    /// 3. `<rootfs>/usr/local/bin/proot`
    /// 4. `proot` on the host PATH
    pub fn locate_proot(&self, rootfs: &RootfsPath) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.config.proot_path {
            if !detect::is_executable(path) {
                return Err(Error::LaunchFailed(format!(
                    "configured proot {} is not an executable file",
                    path.display()
                )));
            }
            return Ok(Some(path.clone()));
        }

        let found = detect::resolve_from_env(ENV_PROOT, "proot")
            .or_else(|| {
                let bundled = rootfs.bundled_proot();
                detect::is_executable(&bundled).then_some(bundled)
            })
            .or_else(|| detect::resolve_binary("proot", &[]));
        Ok(found)
    }

    /// Find PRoot, downloading the static build into the rootfs if needed.
    pub fn ensure_proot(&self, rootfs: &RootfsPath) -> Result<PathBuf> {
        if let Some(path) = self.locate_proot(rootfs)? {
            tracing::debug!(proot = %path.display(), "using proot");
            return Ok(path);
        }

        let dest = rootfs.bundled_proot();
        let url = self.config.proot_url(rootfs.arch());
        tracing::info!(url = %url, dest = %dest.display(), "installing proot");
        install_executable(self.fetcher.as_ref(), &url, &dest)?;
        Ok(dest)
    }

    /// Resolve PRoot and check that it actually executes on this host.
    pub fn start_session(&self, rootfs: &RootfsPath) -> Result<SessionHandle> {
        let proot = self.ensure_proot(rootfs)?;

        let version_check = Plan::new(["proot", "--version"])
            .binary_path(&proot)
            .output(OutputMode::Combined);
        let output = self.executor.run(&version_check).map_err(|e| {
            let hint = match e.spawn_errno() {
                Some(libc::ENOEXEC) => " (wrong architecture or not a binary)",
                Some(libc::EACCES) => " (permission denied; is the filesystem mounted noexec?)",
                _ => "",
            };
            Error::LaunchFailed(format!("{} cannot be executed{hint}: {e}", proot.display()))
        })?;
        let version = output.stdout_str();
        if !output.success() {
            return Err(Error::LaunchFailed(format!(
                "{} --version exited with status {}: {}",
                proot.display(),
                output.status_code(),
                provision::tail(&version)
            )));
        }
        tracing::debug!(
            proot = %proot.display(),
            version = version.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim(),
            "proot version check"
        );

        Ok(SessionHandle {
            proot,
            rootfs: rootfs.clone(),
            config: self.config.clone(),
            executor: Arc::clone(&self.executor),
        })
    }
}

/// Download `url` to `dest` through a temporary file next to it, mark it
/// executable and rename it into place.
fn install_executable(fetcher: &dyn Fetch, url: &str, dest: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = dest
        .parent()
        .ok_or_else(|| Error::InvalidConfig(format!("{} has no parent", dest.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| Error::from_write(e, dir.display()))?;

    // Closed before use: exec of a file open for writing fails with ETXTBSY.
    let tmp = tempfile::Builder::new()
        .prefix(".proot-")
        .tempfile_in(dir)
        .map_err(|e| Error::from_write(e, dir.display()))?
        .into_temp_path();

    fetcher.fetch(url, &tmp)?;
    std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755))?;
    tmp.persist(dest)
        .map_err(|e| Error::from_write(e.error, dest.display()))?;
    Ok(())
}

/// A verified PRoot binary bound to a rootfs. Produces the batch,
/// interactive and piped invocations.
#[derive(Clone)]
pub struct SessionHandle {
    proot: PathBuf,
    rootfs: RootfsPath,
    config: Config,
    executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("proot", &self.proot)
            .field("rootfs", &self.rootfs)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn proot(&self) -> &Path {
        &self.proot
    }

    pub fn rootfs(&self) -> &RootfsPath {
        &self.rootfs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Base command with the configured cwd, binds, TERM and extra env.
    pub fn command(&self) -> ProotCommand {
        ProotCommand::new(&self.proot, self.rootfs.path())
            .cwd(self.config.guest_cwd.clone())
            .binds(self.config.binds.iter().cloned())
            .env("TERM", self.config.term.clone())
            .envs(self.config.env.clone())
    }

    /// Plan for `shell -c text`, combined output captured.
    pub fn batch_plan(&self, text: &str, opts: &RunOptions) -> Plan {
        let mut command = self
            .command()
            .envs(opts.env.clone())
            .guest([self.config.shell.as_str(), "-c", text]);
        if let Some(cwd) = &opts.cwd {
            command = command.cwd(cwd.clone());
        }

        let mut plan = command
            .into_plan()
            .output(OutputMode::Combined)
            .maybe_timeout(opts.timeout);
        if let Some(token) = &opts.cancel {
            plan = plan.cancel(token.clone());
        }
        plan
    }

    pub fn batch(&self, text: &str, opts: &RunOptions) -> Result<Output> {
        let plan = self.batch_plan(text, opts);
        Ok(self.executor.run(&plan)?)
    }

    /// Login shell on the caller's terminal. Blocks until it exits.
    pub fn interactive(&self) -> Result<Output> {
        let plan = self
            .command()
            .guest([self.config.shell.as_str(), "-l"])
            .into_plan()
            .output(OutputMode::Inherit);
        Ok(self.executor.run(&plan)?)
    }

    /// Shell reading commands from a piped stdin.
    pub fn piped(&self) -> Result<Process> {
        let plan = self
            .command()
            .guest([self.config.shell.as_str()])
            .into_plan()
            .output(OutputMode::Combined);
        Ok(self.executor.spawn(&plan)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use freeroot_sandbox::{ExecutorError, Status};
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptFetch {
        calls: AtomicUsize,
    }

    impl Fetch for ScriptFetch {
        fn fetch(&self, _url: &str, dest: &Path) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, b"#!/bin/sh\necho 'proot 5.1.107'\n")?;
            Ok(30)
        }
    }

    #[derive(Default)]
    struct Recorder {
        plans: Mutex<Vec<Plan>>,
    }

    impl Executor for Recorder {
        fn run(&self, plan: &Plan) -> std::result::Result<Output, ExecutorError> {
            self.plans.lock().unwrap().push(plan.clone());
            Ok(Output {
                stdout: b"proot 5.1.107\n".to_vec(),
                stderr: Vec::new(),
                status: Status::Exited,
                duration: Duration::ZERO,
                exit_code: Some(0),
                signal: None,
            })
        }
    }

    fn launcher(config: Config) -> (Launcher, Arc<ScriptFetch>, Arc<Recorder>) {
        let fetch = Arc::new(ScriptFetch {
            calls: AtomicUsize::new(0),
        });
        let exec = Arc::new(Recorder::default());
        (Launcher::new(config, fetch.clone(), exec.clone()), fetch, exec)
    }

    fn write_exec(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn argv_matches_proot_layout() {
        let argv = ProotCommand::new("/opt/proot", "/work/rootfs")
            .guest(["/bin/bash", "-c", "echo hi"])
            .argv();

        assert_eq!(
            argv,
            vec![
                "proot",
                "--rootfs=/work/rootfs",
                "-0",
                "-w",
                "/root",
                "-b",
                "/dev",
                "-b",
                "/sys",
                "-b",
                "/proc",
                "-b",
                "/work/rootfs/etc/resolv.conf:/etc/resolv.conf",
                "--kill-on-exit",
                "/bin/bash",
                "-c",
                "echo hi",
            ]
        );
    }

    #[test]
    fn extra_binds_precede_kill_on_exit() {
        let argv = ProotCommand::new("/opt/proot", "/r")
            .bind(Bind::new("/data"))
            .bind(Bind::new("/home/me/src").to("/src"))
            .argv();

        let kill = argv.iter().position(|a| a == "--kill-on-exit").unwrap();
        let data = argv.iter().position(|a| a == "/data").unwrap();
        let src = argv.iter().position(|a| a == "/home/me/src:/src").unwrap();
        assert!(data < kill && src < kill);
        assert_eq!(argv[data - 1], "-b");
    }

    #[test]
    fn plan_uses_minimal_environment() {
        let plan = ProotCommand::new("/opt/proot", "/r")
            .env("EDITOR", "vi")
            .guest(["/bin/true"])
            .into_plan();

        assert!(plan.clear_env);
        assert_eq!(plan.binary_path, Some(PathBuf::from("/opt/proot")));
        let keys: Vec<&str> = plan.env.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["EDITOR", "HOME", "LANG", "PATH", "TERM"]);
        assert_eq!(plan.env["HOME"], "/root");
    }

    #[test]
    fn configured_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("my-proot");
        write_exec(&explicit);
        write_exec(&dir.path().join("rootfs/usr/local/bin/proot"));

        let config = Config::builder().proot_path(&explicit).build().unwrap();
        let (launcher, fetch, _) = launcher(config);
        let rootfs = RootfsPath::new(dir.path().join("rootfs"), Arch::Amd64);

        assert_eq!(launcher.ensure_proot(&rootfs).unwrap(), explicit);
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn configured_path_must_be_executable() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("not-exec");
        std::fs::write(&explicit, b"data").unwrap();

        let config = Config::builder().proot_path(&explicit).build().unwrap();
        let (launcher, _, _) = launcher(config);
        let rootfs = RootfsPath::new(dir.path().join("rootfs"), Arch::Amd64);

        assert!(matches!(launcher.ensure_proot(&rootfs), Err(Error::LaunchFailed(_))));
    }

    #[test]
    fn bundled_copy_is_reused() {
        if std::env::var_os(ENV_PROOT).is_some() {
            eprintln!("Skipping: {ENV_PROOT} is set");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let rootfs = RootfsPath::new(dir.path().join("rootfs"), Arch::Arm64);
        write_exec(&rootfs.bundled_proot());

        let (launcher, fetch, _) = launcher(Config::default());
        assert_eq!(launcher.ensure_proot(&rootfs).unwrap(), rootfs.bundled_proot());
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_proot_is_downloaded_executable() {
        if std::env::var_os(ENV_PROOT).is_some() || which::which("proot").is_ok() {
            eprintln!("Skipping: proot available on host");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let rootfs = RootfsPath::new(dir.path().join("rootfs"), Arch::Amd64);

        let (launcher, fetch, _) = launcher(Config::default());
        let path = launcher.ensure_proot(&rootfs).unwrap();

        assert_eq!(path, rootfs.bundled_proot());
        assert!(detect::is_executable(&path));
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);

        // Second lookup finds the bundled copy.
        launcher.ensure_proot(&rootfs).unwrap();
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn start_session_checks_version() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("proot");
        write_exec(&explicit);

        let config = Config::builder().proot_path(&explicit).build().unwrap();
        let (launcher, _, exec) = launcher(config);
        let rootfs = RootfsPath::new(dir.path().join("rootfs"), Arch::Amd64);

        let handle = launcher.start_session(&rootfs).unwrap();
        assert_eq!(handle.proot(), explicit);

        let plans = exec.plans.lock().unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].cmd, vec!["proot", "--version"]);
    }

    struct NoExec;

    impl Executor for NoExec {
        fn run(&self, plan: &Plan) -> std::result::Result<Output, ExecutorError> {
            Err(ExecutorError::Spawn {
                program: plan.program(),
                source: std::io::Error::from_raw_os_error(libc::ENOEXEC),
            })
        }
    }

    #[test]
    fn unexecutable_proot_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("proot");
        write_exec(&explicit);

        let config = Config::builder().proot_path(&explicit).build().unwrap();
        let launcher = Launcher::new(
            config,
            Arc::new(ScriptFetch {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(NoExec),
        );
        let rootfs = RootfsPath::new(dir.path().join("rootfs"), Arch::Amd64);

        match launcher.start_session(&rootfs) {
            Err(Error::LaunchFailed(msg)) => {
                assert!(msg.contains("cannot be executed"));
                assert!(msg.contains("wrong architecture"));
            }
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
    }

    #[test]
    fn failing_version_check_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("proot");
        std::fs::write(&explicit, b"#!/bin/sh\necho 'proot: kernel too old' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&explicit, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = Config::builder().proot_path(&explicit).build().unwrap();
        let launcher = Launcher::new(
            config,
            Arc::new(ScriptFetch {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(freeroot_sandbox::HostExecutor),
        );
        let rootfs = RootfsPath::new(dir.path().join("rootfs"), Arch::Amd64);

        match launcher.start_session(&rootfs) {
            Err(Error::LaunchFailed(msg)) => {
                assert!(msg.contains("status 1"), "{msg}");
                assert!(msg.contains("kernel too old"), "{msg}");
            }
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
    }

    #[test]
    fn batch_plan_applies_options() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("proot");
        write_exec(&explicit);

        let config = Config::builder()
            .proot_path(&explicit)
            .shell("/bin/sh")
            .build()
            .unwrap();
        let (launcher, _, _) = launcher(config);
        let rootfs = RootfsPath::new(dir.path().join("rootfs"), Arch::Amd64);
        let handle = launcher.start_session(&rootfs).unwrap();

        let token = CancelToken::new();
        let opts = RunOptions::new()
            .timeout(Duration::from_secs(3))
            .cancel(token)
            .cwd("/tmp")
            .env("FOO", "bar");
        let plan = handle.batch_plan("echo $FOO", &opts);

        assert_eq!(plan.output, OutputMode::Combined);
        assert_eq!(plan.timeout, Some(Duration::from_secs(3)));
        assert!(plan.cancel.is_some());
        assert_eq!(plan.env["FOO"], "bar");
        let w = plan.cmd.iter().position(|a| a == "-w").unwrap();
        assert_eq!(plan.cmd[w + 1], "/tmp");
        assert_eq!(&plan.cmd[plan.cmd.len() - 3..], ["/bin/sh", "-c", "echo $FOO"]);
    }
}
