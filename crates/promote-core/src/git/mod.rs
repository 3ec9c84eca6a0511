//! Git collaborator: clone, commit, push and inspect environment repositories.
//!
//! All process execution goes through a [`CommandRunner`] so tests can swap in
//! a [`SafelistCommandRunner`].

pub mod command_runner;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use command_runner::{
    CommandOutput, CommandRunner, CommandSpec, SafelistCommandRunner, TokioCommandRunner,
};

/// Errors from git invocations.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("`{command}` returned unexpected output: {detail}")]
    UnexpectedOutput { command: String, detail: String },
}

/// Author identity used for promotion commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: "promote-bot".to_string(),
            email: "promote-bot@users.noreply.github.com".to_string(),
        }
    }
}

/// Git operations the engine needs.
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Clone `url` into `dest`, which must not exist yet.
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitError>;

    /// Branch `origin/HEAD` points at in a clone, e.g. `main`.
    async fn default_branch(&self, dir: &Path) -> Result<String, GitError>;

    /// `git status --porcelain` output; empty means a clean tree.
    async fn status_porcelain(&self, dir: &Path) -> Result<String, GitError>;

    /// Create or reset `branch` at the current HEAD and switch to it.
    async fn checkout_branch(&self, dir: &Path, branch: &str) -> Result<(), GitError>;

    /// Stage everything and commit.
    async fn commit_all(&self, dir: &Path, message: &str) -> Result<(), GitError>;

    /// Force-push `branch` to `origin`.
    async fn push(&self, dir: &Path, branch: &str) -> Result<(), GitError>;
}

/// [`GitClient`] that shells out to the `git` binary.
#[derive(Clone)]
pub struct CliGitClient {
    runner: Arc<dyn CommandRunner>,
    identity: GitIdentity,
}

impl CliGitClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            identity: GitIdentity::default(),
        }
    }

    pub fn with_identity(mut self, identity: GitIdentity) -> Self {
        self.identity = identity;
        self
    }

    async fn git(&self, spec: CommandSpec) -> Result<CommandOutput, GitError> {
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(GitError::CommandFailed {
                command: spec.display(),
                status: output.status_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl GitClient for CliGitClient {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        let dest = dest.to_string_lossy().into_owned();
        self.git(CommandSpec::git(["clone", "--quiet", url, dest.as_str()]))
            .await?;
        Ok(())
    }

    async fn default_branch(&self, dir: &Path) -> Result<String, GitError> {
        let spec = CommandSpec::git(["rev-parse", "--abbrev-ref", "origin/HEAD"]).in_dir(dir);
        let command = spec.display();
        let output = self.git(spec).await?;
        match output.stdout.trim().strip_prefix("origin/") {
            Some(branch) if !branch.is_empty() => Ok(branch.to_string()),
            _ => Err(GitError::UnexpectedOutput {
                command,
                detail: format!("not a remote branch: '{}'", output.stdout.trim()),
            }),
        }
    }

    async fn status_porcelain(&self, dir: &Path) -> Result<String, GitError> {
        let output = self
            .git(CommandSpec::git(["status", "--porcelain"]).in_dir(dir))
            .await?;
        Ok(output.stdout)
    }

    async fn checkout_branch(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        self.git(CommandSpec::git(["checkout", "-q", "-B", branch]).in_dir(dir))
            .await?;
        Ok(())
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> Result<(), GitError> {
        self.git(CommandSpec::git(["add", "-A"]).in_dir(dir)).await?;
        let name = format!("user.name={}", self.identity.name);
        let email = format!("user.email={}", self.identity.email);
        self.git(
            CommandSpec::git([
                "-c",
                name.as_str(),
                "-c",
                email.as_str(),
                "commit",
                "-q",
                "-m",
                message,
            ])
            .in_dir(dir),
        )
        .await?;
        Ok(())
    }

    async fn push(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        self.git(CommandSpec::git(["push", "-q", "--force", "origin", refspec.as_str()]).in_dir(dir))
            .await?;
        Ok(())
    }
}
