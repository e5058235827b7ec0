//! Repository cloning inside the guest.
//!
//! Always a shallow clone (`--depth 1`), run through the session's command
//! runner so it shares the same PRoot invocation as any other command.
//!
//! ## Example
//!
//! ```ignore
//! use freeroot::git;
//!
//! let mut session = freeroot::setup()?;
//!
//! // Default branch into ./<repo>
//! let result = git::clone("https://github.com/user/repo.git").exec(&mut session)?;
//!
//! // Specific branch and directory
//! let result = git::clone("https://github.com/user/repo.git")
//!     .branch("develop")
//!     .target_dir("/opt/repo")
//!     .exec(&mut session)?;
//! assert!(result.success());
//! ```

mod builder;

pub use builder::CloneBuilder;

use crate::error::Result;
use crate::output::CommandResult;
use crate::session::Session;

/// Guest command that installs git when it is missing.
pub const ENSURE_GIT: &str =
    "command -v git >/dev/null 2>&1 || (apt-get update && apt-get install -y git)";

/// Start building a shallow clone of `url`.
pub fn clone(url: &str) -> CloneBuilder {
    CloneBuilder::new(url)
}

/// Clone `url` into the guest, optionally into `target_dir` and at `branch`.
pub fn clone_repo(
    session: &mut Session,
    url: &str,
    target_dir: Option<&str>,
    branch: Option<&str>,
) -> Result<CommandResult> {
    let mut builder = clone(url);
    if let Some(dir) = target_dir {
        builder = builder.target_dir(dir);
    }
    if let Some(branch) = branch {
        builder = builder.branch(branch);
    }
    builder.exec(session)
}

/// Quote `arg` for a POSIX shell.
pub(crate) fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:@=+,%".contains(&b));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
