//! freeroot-sandbox: external process plumbing
//!
//! Every external program freeroot touches (the archive extractor, PRoot, and
//! the guest shell behind it) goes through the same narrow interface:
//!
//! - **Plan** - typed invocation: argv, environment, working directory, stdin,
//!   output mode, optional timeout and cancellation
//! - **Executor** - trait that turns a `Plan` into an `Output`
//! - **HostExecutor** - the real implementation on top of `std::process`
//! - **Monitor** - pidfd + `poll()` loop that collects output and enforces
//!   deadlines
//!
//! ## Quick Start
//!
//! ```ignore
//! use freeroot_sandbox::{Executor, HostExecutor, OutputMode, Plan};
//!
//! let plan = Plan::new(["sh", "-c", "echo hello; echo oops >&2"]).output(OutputMode::Combined);
//! let output = HostExecutor.run(&plan)?;
//! assert_eq!(output.stdout_str(), "hello\noops\n");
//! ```
//!
//! ## Requirements
//!
//! - Linux kernel 5.3+ (for `pidfd_open`)

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod cancel;
pub mod executor;
pub mod monitor;
pub mod plan;
pub mod process;
pub mod sysinfo;
pub mod validate;

pub use cancel::CancelToken;
pub use executor::{Executor, ExecutorError, HostExecutor};
pub use monitor::{Output, Status};
pub use plan::{OutputMode, Plan};
pub use process::Process;
pub use sysinfo::HostInfo;
