//! Host architecture resolution.
//!
//! Maps the kernel's CPU type string onto the variants Ubuntu publishes base
//! images for. Nothing here touches the network or the filesystem.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Supported download variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    /// Map a `uname -m` style string to a supported variant.
    pub fn from_machine(machine: &str) -> Result<Self> {
        match machine {
            "x86_64" | "amd64" => Ok(Self::Amd64),
            "aarch64" | "arm64" => Ok(Self::Arm64),
            other => Err(Error::UnsupportedArchitecture(other.to_string())),
        }
    }

    /// Ubuntu's name for the variant (`amd64`, `arm64`).
    pub fn tag(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }

    /// Kernel's name for the variant (`x86_64`, `aarch64`).
    pub fn machine(self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64",
            Self::Arm64 => "aarch64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_machine(s)
    }
}

/// Resolve the architecture of the running host.
pub fn resolve_architecture() -> Result<Arch> {
    let machine = freeroot_sandbox::sysinfo::machine();
    let arch = Arch::from_machine(machine)?;
    tracing::debug!(machine, arch = %arch, "resolved host architecture");
    Ok(arch)
}
