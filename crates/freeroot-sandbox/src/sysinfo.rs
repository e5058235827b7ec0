//! Host information.
//!
//! Reads the kernel's view of the machine (`uname(2)`), which is what decides
//! which rootfs and PRoot builds can run here.

use std::sync::LazyLock;

pub static HOST: LazyLock<HostInfo> = LazyLock::new(HostInfo::detect);

/// Kernel-reported host identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// CPU type as reported by `uname -m` (`x86_64`, `aarch64`, ...).
    pub machine: String,
    /// Kernel release (`uname -r`).
    pub release: String,
    /// Kernel name (`uname -s`).
    pub sysname: String,
}

impl HostInfo {
    pub fn detect() -> Self {
        let uts = rustix::system::uname();
        Self {
            machine: uts.machine().to_string_lossy().into_owned(),
            release: uts.release().to_string_lossy().into_owned(),
            sysname: uts.sysname().to_string_lossy().into_owned(),
        }
    }
}

/// Host CPU type, as `uname -m` prints it.
pub fn machine() -> &'static str {
    &HOST.machine
}
