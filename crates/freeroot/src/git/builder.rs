//! Clone command builder.

use crate::error::Result;
use crate::launcher::RunOptions;
use crate::output::CommandResult;
use crate::session::Session;

use super::{ENSURE_GIT, shell_quote};

/// Builder for a shallow `git clone`.
///
/// Created by [`git::clone()`](super::clone). Configure with method chaining,
/// then execute with `.exec(&mut session)`.
#[derive(Debug, Clone)]
pub struct CloneBuilder {
    url: String,
    branch: Option<String>,
    target_dir: Option<String>,
    ensure_git: bool,
    options: RunOptions,
}

impl CloneBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            branch: None,
            target_dir: None,
            ensure_git: true,
            options: RunOptions::default(),
        }
    }

    /// Check out `branch` instead of the remote's default.
    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Clone into `dir` (guest path, relative to the guest cwd).
    pub fn target_dir(mut self, dir: impl Into<String>) -> Self {
        self.target_dir = Some(dir.into());
        self
    }

    /// Install git with apt first when the guest lacks it. On by default.
    pub fn ensure_git(mut self, enabled: bool) -> Self {
        self.ensure_git = enabled;
        self
    }

    /// Timeout, cancellation and env for both steps.
    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// The guest command line.
    pub fn command(&self) -> String {
        let mut cmd = String::from("git clone --depth 1");
        if let Some(branch) = &self.branch {
            cmd.push_str(" --branch ");
            cmd.push_str(&shell_quote(branch));
        }
        // Keeps a URL starting with `-` from being read as an option.
        cmd.push_str(" -- ");
        cmd.push_str(&shell_quote(&self.url));
        if let Some(dir) = &self.target_dir {
            cmd.push(' ');
            cmd.push_str(&shell_quote(dir));
        }
        cmd
    }

    /// Run the clone. A failing git install is returned as the result.
    pub fn exec(self, session: &mut Session) -> Result<CommandResult> {
        if self.ensure_git {
            let result = session.run_command_with(ENSURE_GIT, &self.options)?;
            if !result.success() {
                tracing::warn!(exit_code = result.exit_code, "git install failed");
                return Ok(result);
            }
        }

        let command = self.command();
        tracing::info!(url = %self.url, branch = ?self.branch, dir = ?self.target_dir, "cloning");
        session.run_command_with(&command, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://github.com/user/repo.git";

    #[test]
    fn test_builder_defaults() {
        let builder = CloneBuilder::new(URL);
        assert!(builder.ensure_git);
        assert!(builder.branch.is_none());
        assert_eq!(builder.command(), format!("git clone --depth 1 -- {URL}"));
    }

    #[test]
    fn test_branch_only_when_given() {
        let cmd = CloneBuilder::new(URL).branch("develop").command();
        assert_eq!(cmd, format!("git clone --depth 1 --branch develop -- {URL}"));
    }

    #[test]
    fn test_target_dir_appended() {
        let cmd = CloneBuilder::new(URL).target_dir("my repo").command();
        assert_eq!(cmd, format!("git clone --depth 1 -- {URL} 'my repo'"));
    }

    #[test]
    fn test_all_options() {
        let cmd = CloneBuilder::new(URL)
            .branch("v1.2")
            .target_dir("/opt/src")
            .command();
        assert!(cmd.starts_with("git clone --depth 1 --branch v1.2 "));
        assert!(cmd.ends_with(" /opt/src"));
        assert_eq!(cmd.matches("--depth 1").count(), 1);
    }

    #[test]
    fn test_url_never_parsed_as_option() {
        let cmd = CloneBuilder::new("--upload-pack=touch /tmp/pwned").command();
        assert_eq!(cmd, "git clone --depth 1 -- '--upload-pack=touch /tmp/pwned'");
    }
}
