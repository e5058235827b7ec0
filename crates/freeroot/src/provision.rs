//! Rootfs provisioning.
//!
//! A target directory is ready when, and only when, its `.installed`
//! sentinel exists. The sentinel is written last, after the archive has been
//! fetched, extracted into a staging directory next to the target, configured
//! for DNS and renamed into place. A crash at any earlier point leaves either
//! no target or a target without a sentinel, and the next call replaces it.
//!
//! Trees built here carry an `.freeroot-rootfs` owner marker. An existing
//! target is only ever replaced when it is empty or carries that marker;
//! anything else is refused.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use freeroot_sandbox::{Executor, OutputMode, Plan};
use tempfile::TempPath;

use crate::arch::Arch;
use crate::config::Config;
use crate::detect;
use crate::error::{Error, Result};
use crate::fetch::Fetch;

/// Name of the readiness marker inside the target directory.
pub const SENTINEL: &str = ".installed";

/// Written into every staging tree before it is renamed into place.
pub const OWNER_MARKER: &str = ".freeroot-rootfs";

const NO_SPACE_MARKER: &str = "No space left on device";
const TAR_TAIL_LINES: usize = 20;

/// Where one rootfs archive comes from and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    pub url: String,
    /// Temporary archive location, next to the target. Removed after use.
    pub archive_path: PathBuf,
    pub target: PathBuf,
}

impl DownloadDescriptor {
    pub fn new(config: &Config, arch: Arch, target: &Path) -> Self {
        let archive_name = config.archive_name(arch);
        let parent = work_dir(target);
        Self {
            url: config.rootfs_url(arch),
            archive_path: parent.join(format!(".{archive_name}.part")),
            target: target.to_path_buf(),
        }
    }
}

/// A provisioned rootfs directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootfsPath {
    root: PathBuf,
    arch: Arch,
}

impl RootfsPath {
    pub fn new(root: impl Into<PathBuf>, arch: Arch) -> Self {
        Self {
            root: root.into(),
            arch,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn sentinel(&self) -> PathBuf {
        self.root.join(SENTINEL)
    }

    /// Host path of the guest's `/etc/resolv.conf`.
    pub fn resolv_conf(&self) -> PathBuf {
        self.root.join("etc/resolv.conf")
    }

    /// Host path of the PRoot copy kept inside the rootfs.
    pub fn bundled_proot(&self) -> PathBuf {
        self.root.join("usr/local/bin/proot")
    }
}

/// Whether `target` holds a completely provisioned rootfs.
pub fn is_provisioned(target: &Path) -> bool {
    target.join(SENTINEL).is_file()
}

/// Fetches, extracts and configures an Ubuntu base rootfs.
pub struct Provisioner {
    config: Config,
    fetcher: Arc<dyn Fetch>,
    executor: Arc<dyn Executor>,
}

impl Provisioner {
    pub fn new(config: Config, fetcher: Arc<dyn Fetch>, executor: Arc<dyn Executor>) -> Self {
        Self {
            config,
            fetcher,
            executor,
        }
    }

    /// Make sure `target` holds a rootfs for `arch`. A provisioned target
    /// is returned untouched without any fetch.
    pub fn ensure_rootfs(&self, arch: Arch, target: &Path) -> Result<RootfsPath> {
        let rootfs = RootfsPath::new(target, arch);
        if is_provisioned(target) {
            tracing::debug!(target = %target.display(), "rootfs already provisioned");
            return Ok(rootfs);
        }

        check_replaceable(target)?;

        let descriptor = DownloadDescriptor::new(&self.config, arch, target);
        tracing::info!(arch = %arch, url = %descriptor.url, target = %target.display(), "provisioning rootfs");
        self.provision(&descriptor)?;
        tracing::info!(target = %target.display(), "rootfs ready");
        Ok(rootfs)
    }

    fn provision(&self, descriptor: &DownloadDescriptor) -> Result<()> {
        let parent = work_dir(&descriptor.target);
        fs::create_dir_all(&parent).map_err(|e| Error::from_write(e, parent.display()))?;

        let staging = tempfile::Builder::new()
            .prefix(".freeroot-staging-")
            .tempdir_in(&parent)
            .map_err(|e| Error::from_write(e, parent.display()))?;

        let archive = TempPath::try_from_path(&descriptor.archive_path)?;
        self.fetcher.fetch(&descriptor.url, &archive)?;

        let tree = staging.path().join("rootfs");
        fs::create_dir(&tree).map_err(|e| Error::from_write(e, tree.display()))?;
        self.extract(&archive, &tree)?;
        drop(archive);

        write_resolv_conf(&tree, &self.config.dns_servers)?;
        let marker = tree.join(OWNER_MARKER);
        fs::write(&marker, b"").map_err(|e| Error::from_write(e, marker.display()))?;
        replace_target(&tree, &descriptor.target)?;
        write_sentinel(&descriptor.target, descriptor)?;
        Ok(())
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let tar = detect::resolve_tar()
            .ok_or_else(|| Error::ExtractionFailed("tar not found on host".into()))?;

        let plan = Plan::new(["tar"])
            .binary_path(tar)
            .arg("--exclude=./dev/*")
            .arg("-xpf")
            .arg(archive.display().to_string())
            .arg("-C")
            .arg(dest.display().to_string())
            .output(OutputMode::Combined);

        tracing::debug!(archive = %archive.display(), dest = %dest.display(), "extracting");
        let output = self
            .executor
            .run(&plan)
            .map_err(|e| Error::ExtractionFailed(format!("failed to run tar: {e}")))?;

        if output.success() {
            return Ok(());
        }

        let text = output.stdout_str();
        if text.contains(NO_SPACE_MARKER) {
            return Err(Error::InsufficientSpace(tail(&text)));
        }
        Err(Error::ExtractionFailed(format!(
            "tar exited with status {}: {}",
            output.status_code(),
            tail(&text)
        )))
    }
}

/// Directory that receives the staging tree and the temporary archive.
fn work_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Last lines of a tool's output, for error messages.
pub(crate) fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(TAR_TAIL_LINES);
    lines[start..].join("\n")
}

fn write_resolv_conf(tree: &Path, servers: &[String]) -> Result<()> {
    let etc = tree.join("etc");
    fs::create_dir_all(&etc).map_err(|e| Error::from_write(e, etc.display()))?;

    // The base image ships resolv.conf as a symlink into /run, which does not
    // exist under PRoot.
    let path = etc.join("resolv.conf");
    if path.symlink_metadata().is_ok() {
        fs::remove_file(&path)?;
    }

    let contents: String = servers
        .iter()
        .map(|server| format!("nameserver {server}\n"))
        .collect();
    fs::write(&path, contents).map_err(|e| Error::from_write(e, path.display()))
}

/// Refuse targets that exist but were not built by a previous provisioning
/// run. Missing and empty directories are fine.
fn check_replaceable(target: &Path) -> Result<()> {
    let Ok(meta) = target.symlink_metadata() else {
        return Ok(());
    };
    if meta.is_dir() {
        if target.join(OWNER_MARKER).is_file() {
            return Ok(());
        }
        let mut entries = fs::read_dir(target)?;
        if entries.next().is_none() {
            return Ok(());
        }
    }
    Err(Error::InvalidConfig(format!(
        "{} exists and is not a freeroot rootfs",
        target.display()
    )))
}

fn replace_target(tree: &Path, target: &Path) -> Result<()> {
    check_replaceable(target)?;
    if target.symlink_metadata().is_ok() {
        tracing::warn!(target = %target.display(), "removing incomplete rootfs");
        remove_tree(target)?;
    }
    fs::rename(tree, target).map_err(|e| Error::from_write(e, target.display()))
}

fn write_sentinel(target: &Path, descriptor: &DownloadDescriptor) -> Result<()> {
    let path = target.join(SENTINEL);
    fs::write(&path, format!("{}\n", descriptor.url))
        .map_err(|e| Error::from_write(e, path.display()))
}

/// Remove a file or directory tree. Read-only directories are made writable
/// and the removal is retried once.
pub(crate) fn remove_tree(path: &Path) -> io::Result<()> {
    let meta = path.symlink_metadata()?;
    if !meta.is_dir() {
        return fs::remove_file(path);
    }

    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            make_writable(path);
            fs::remove_dir_all(path)
        }
        other => other,
    }
}

fn make_writable(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(meta) = dir.symlink_metadata() else {
        return;
    };
    if !meta.is_dir() {
        return;
    }
    let mode = meta.permissions().mode();
    if mode & 0o700 != 0o700 {
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(mode | 0o700));
    }
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            make_writable(&entry.path());
        }
    }
}
