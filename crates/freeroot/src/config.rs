//! Session configuration.
//!
//! Everything has a default that reproduces the stock setup: Ubuntu 20.04
//! base from cdimage.ubuntu.com extracted into `./rootfs`, a static PRoot
//! build, and a `bash` login at `/root`.
//!
//! ## Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `FREEROOT_DIR` | `rootfs_dir` |
//! | `FREEROOT_MIRROR` | `mirror` |
//! | `FREEROOT_PROOT` | PRoot binary (file or directory), read by the launcher |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use freeroot_sandbox::validate::validate_guest_path;

use crate::arch::Arch;
use crate::error::{Error, Result};
use crate::launcher::Bind;

pub const DEFAULT_MIRROR: &str = "https://cdimage.ubuntu.com/ubuntu-base";
pub const DEFAULT_RELEASE: &str = "20.04";
pub const DEFAULT_POINT_RELEASE: &str = "20.04.4";
pub const DEFAULT_PROOT_BASE_URL: &str = "https://raw.githubusercontent.com/foxytouxxx/freeroot/main";
pub const DEFAULT_DNS_SERVERS: &[&str] = &["8.8.8.8", "1.1.1.1"];
pub const DEFAULT_GUEST_CWD: &str = "/root";
pub const DEFAULT_SHELL: &str = "/bin/bash";
pub const DEFAULT_TERM: &str = "xterm-256color";
pub const DEFAULT_ROOTFS_DIR: &str = "rootfs";

pub const ENV_DIR: &str = "FREEROOT_DIR";
pub const ENV_MIRROR: &str = "FREEROOT_MIRROR";
pub const ENV_PROOT: &str = "FREEROOT_PROOT";

/// Configuration for provisioning and launching a session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory that holds the extracted rootfs.
    pub rootfs_dir: PathBuf,
    /// Base URL of the ubuntu-base release tree.
    pub mirror: String,
    /// Release directory (`20.04`).
    pub release: String,
    /// Point release in the archive name (`20.04.4`).
    pub point_release: String,
    /// Base URL of the static PRoot builds (`proot-<machine>`).
    pub proot_base_url: String,
    /// Explicit PRoot binary; skips lookup and download.
    pub proot_path: Option<PathBuf>,
    /// Nameservers written to the guest's `/etc/resolv.conf`.
    pub dns_servers: Vec<String>,
    /// Guest working directory for every command.
    pub guest_cwd: String,
    /// Guest shell that interprets command text.
    pub shell: String,
    pub term: String,
    /// Extra guest environment on top of the minimal set.
    pub env: BTreeMap<String, String>,
    /// Extra host directories bound into the guest.
    pub binds: Vec<Bind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rootfs_dir: PathBuf::from(DEFAULT_ROOTFS_DIR),
            mirror: DEFAULT_MIRROR.into(),
            release: DEFAULT_RELEASE.into(),
            point_release: DEFAULT_POINT_RELEASE.into(),
            proot_base_url: DEFAULT_PROOT_BASE_URL.into(),
            proot_path: None,
            dns_servers: DEFAULT_DNS_SERVERS.iter().map(|s| s.to_string()).collect(),
            guest_cwd: DEFAULT_GUEST_CWD.into(),
            shell: DEFAULT_SHELL.into(),
            term: DEFAULT_TERM.into(),
            env: BTreeMap::new(),
            binds: Vec::new(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Defaults with `FREEROOT_DIR` / `FREEROOT_MIRROR` applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os(ENV_DIR).filter(|v| !v.is_empty()) {
            config.rootfs_dir = PathBuf::from(dir);
        }
        if let Ok(mirror) = std::env::var(ENV_MIRROR) {
            if !mirror.is_empty() {
                config.mirror = mirror;
            }
        }
        config
    }

    /// File name of the base archive for `arch`.
    pub fn archive_name(&self, arch: Arch) -> String {
        format!("ubuntu-base-{}-base-{}.tar.gz", self.point_release, arch.tag())
    }

    /// Download URL of the base archive for `arch`.
    pub fn rootfs_url(&self, arch: Arch) -> String {
        format!(
            "{}/releases/{}/release/{}",
            self.mirror.trim_end_matches('/'),
            self.release,
            self.archive_name(arch)
        )
    }

    /// Download URL of the static PRoot build for `arch`.
    pub fn proot_url(&self, arch: Arch) -> String {
        format!(
            "{}/proot-{}",
            self.proot_base_url.trim_end_matches('/'),
            arch.machine()
        )
    }

    /// `rootfs_dir`, made absolute against the current directory.
    pub fn absolute_rootfs_dir(&self) -> Result<PathBuf> {
        if self.rootfs_dir.is_absolute() {
            Ok(self.rootfs_dir.clone())
        } else {
            Ok(std::env::current_dir()?.join(&self.rootfs_dir))
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rootfs_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("rootfs_dir is empty".into()));
        }
        if is_filesystem_root(&self.rootfs_dir) {
            return Err(Error::InvalidConfig(
                "rootfs_dir must not be the filesystem root".into(),
            ));
        }
        for (name, value) in [
            ("mirror", &self.mirror),
            ("release", &self.release),
            ("point_release", &self.point_release),
            ("proot_base_url", &self.proot_base_url),
            ("shell", &self.shell),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{name} is empty")));
            }
        }
        if !self.point_release.starts_with(&self.release) {
            return Err(Error::InvalidConfig(format!(
                "point release {} does not belong to release {}",
                self.point_release, self.release
            )));
        }
        validate_guest_path(&self.guest_cwd)?;
        validate_guest_path(&self.shell)?;
        Ok(())
    }
}

fn is_filesystem_root(path: &Path) -> bool {
    path.parent().is_none() && path.has_root()
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn rootfs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.rootfs_dir = dir.into();
        self
    }

    pub fn mirror(mut self, mirror: impl Into<String>) -> Self {
        self.config.mirror = mirror.into();
        self
    }

    /// Set both the release directory and the point release.
    pub fn release(mut self, release: impl Into<String>, point_release: impl Into<String>) -> Self {
        self.config.release = release.into();
        self.config.point_release = point_release.into();
        self
    }

    pub fn proot_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.proot_base_url = url.into();
        self
    }

    pub fn proot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.proot_path = Some(path.into());
        self
    }

    pub fn dns_servers(mut self, servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.dns_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn guest_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.config.guest_cwd = cwd.into();
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.config.shell = shell.into();
        self
    }

    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.config.term = term.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    pub fn bind(mut self, bind: Bind) -> Self {
        self.config.binds.push(bind);
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_urls() {
        let config = Config::default();
        assert_eq!(
            config.rootfs_url(Arch::Amd64),
            "https://cdimage.ubuntu.com/ubuntu-base/releases/20.04/release/ubuntu-base-20.04.4-base-amd64.tar.gz"
        );
        assert_eq!(
            config.proot_url(Arch::Arm64),
            "https://raw.githubusercontent.com/foxytouxxx/freeroot/main/proot-aarch64"
        );
    }

    #[test]
    fn urls_are_deterministic_per_arch() {
        let config = Config::default();
        assert_eq!(config.rootfs_url(Arch::Arm64), config.rootfs_url(Arch::Arm64));
        assert_ne!(config.rootfs_url(Arch::Amd64), config.rootfs_url(Arch::Arm64));
    }

    #[test]
    fn mirror_trailing_slash_is_ignored() {
        let config = Config::builder()
            .mirror("http://mirror.local/ubuntu-base/")
            .release("22.04", "22.04.3")
            .build()
            .unwrap();
        assert_eq!(
            config.rootfs_url(Arch::Arm64),
            "http://mirror.local/ubuntu-base/releases/22.04/release/ubuntu-base-22.04.3-base-arm64.tar.gz"
        );
    }

    #[test]
    fn builder_sets_fields() {
        let config = Config::builder()
            .rootfs_dir("/tmp/fr")
            .dns_servers(["9.9.9.9"])
            .guest_cwd("/home")
            .env("EDITOR", "vi")
            .build()
            .unwrap();

        assert_eq!(config.rootfs_dir, PathBuf::from("/tmp/fr"));
        assert_eq!(config.dns_servers, vec!["9.9.9.9".to_string()]);
        assert_eq!(config.guest_cwd, "/home");
        assert_eq!(config.env.get("EDITOR"), Some(&"vi".to_string()));
    }

    #[test]
    fn validate_rejects_relative_guest_cwd() {
        let err = Config::builder().guest_cwd("root").build().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn validate_rejects_mismatched_point_release() {
        let err = Config::builder().release("22.04", "20.04.4").build().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn validate_rejects_root_dir() {
        let err = Config::builder().rootfs_dir("/").build().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn absolute_rootfs_dir_joins_cwd() {
        let config = Config::default();
        let dir = config.absolute_rootfs_dir().unwrap();
        assert!(dir.is_absolute());
        assert!(dir.ends_with(DEFAULT_ROOTFS_DIR));
    }
}
