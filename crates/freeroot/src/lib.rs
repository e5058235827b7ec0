//! freeroot: an Ubuntu root filesystem under PRoot, without root.
//!
//! Downloads the Ubuntu base image for the host CPU, extracts it once into a
//! working directory, and runs shell commands inside it through PRoot. The
//! isolation is PRoot's; this crate fetches, extracts, builds the PRoot
//! command line and captures what comes back.
//!
//! ## Quick Start
//!
//! ```ignore
//! use freeroot::{RunOptions, Session};
//! use std::time::Duration;
//!
//! // ./rootfs (or $FREEROOT_DIR), provisioned on first use
//! let mut session = freeroot::setup()?;
//!
//! let result = session.run_command("cat /etc/os-release")?;
//! assert!(result.success());
//!
//! // Non-zero exit is data
//! let result = session.run_command("exit 7")?;
//! assert_eq!(result.exit_code, 7);
//!
//! // Bounded
//! let result = session.run_command_with(
//!     "apt-get update",
//!     &RunOptions::new().timeout(Duration::from_secs(120)),
//! )?;
//!
//! session.clone_repo("https://github.com/user/repo.git", None, Some("main"))?;
//! session.cleanup()?;
//! ```
//!
//! ## Layers
//!
//! | Layer | API |
//! |-------|-----|
//! | Session | `setup()`, `Session::run_command`, `clone_repo`, `shell`, `cleanup` |
//! | Components | `Provisioner`, `Launcher`, `ProotCommand`, `git::CloneBuilder` |
//! | Processes | `freeroot_sandbox::Plan`, `Executor` |
//!
//! ## Requirements
//!
//! - Linux on x86_64 or aarch64
//! - `tar` on the host
//! - Network access on first setup (or a pre-installed PRoot)

mod detect;
mod error;
mod output;
mod session;

pub mod arch;
pub mod config;
pub mod fetch;
pub mod git;
pub mod launcher;
pub mod provision;

pub use arch::{Arch, resolve_architecture};
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use fetch::{Fetch, HttpFetcher};
pub use launcher::{Bind, Launcher, ProotCommand, RunOptions, SessionHandle};
pub use output::{CommandResult, Status};
pub use provision::{DownloadDescriptor, Provisioner, RootfsPath, is_provisioned};
pub use session::{Session, SessionBuilder, SessionState, cleanup_dir, setup};

// Re-export from freeroot-sandbox for custom executors
pub use freeroot_sandbox::{
    CancelToken, Executor, ExecutorError, HostExecutor, Output, OutputMode, Plan, Process,
};
