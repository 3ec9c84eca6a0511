//! Process execution seam for the git collaborator.
//!
//! [`TokioCommandRunner`] runs real processes with a timeout.
//! [`SafelistCommandRunner`] forwards only safelisted git subcommands and
//! reports success for everything else, so a promotion can run against real
//! clones without committing or pushing anything.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::GitError;

/// Default timeout for a single git invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// A command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; the current directory when `None`.
    pub dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn git<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: "git".to_string(),
            args: args.into_iter().map(Into::into).collect(),
            dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// The git subcommand, skipping leading `-c key=value` pairs and flags.
    pub fn git_subcommand(&self) -> Option<&str> {
        let mut args = self.args.iter();
        while let Some(arg) = args.next() {
            if arg == "-c" || arg == "-C" {
                args.next();
                continue;
            }
            if arg.starts_with('-') {
                continue;
            }
            return Some(arg.as_str());
        }
        None
    }

    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// Runs commands on behalf of the git client.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, GitError>;
}

/// Production runner: tokio process with a timeout; the child is killed when
/// the timeout fires.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, GitError> {
        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(dir) = &spec.dir {
            command.current_dir(dir);
        }

        debug!(command = %spec.display(), "running");
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| GitError::Timeout {
                command: spec.display(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|source| GitError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        Ok(CommandOutput {
            status_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Git subcommands that read or fetch but never publish.
pub const DEFAULT_SAFELIST: [&str; 3] = ["clone", "rev-parse", "status"];

/// Runner that really executes safelisted git subcommands and no-ops the rest.
pub struct SafelistCommandRunner {
    inner: Arc<dyn CommandRunner>,
    allowed: Vec<String>,
    invocations: Mutex<Vec<CommandSpec>>,
}

impl SafelistCommandRunner {
    pub fn new(inner: Arc<dyn CommandRunner>) -> Self {
        Self::with_safelist(inner, DEFAULT_SAFELIST)
    }

    pub fn with_safelist<I, S>(inner: Arc<dyn CommandRunner>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            allowed: allowed.into_iter().map(Into::into).collect(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CommandSpec>> {
        self.invocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every command seen, executed or not.
    pub fn invocations(&self) -> Vec<CommandSpec> {
        self.lock().clone()
    }

    fn is_allowed(&self, spec: &CommandSpec) -> bool {
        spec.program == "git"
            && spec
                .git_subcommand()
                .map(|sub| self.allowed.iter().any(|a| a == sub))
                .unwrap_or(false)
    }
}

#[async_trait]
impl CommandRunner for SafelistCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, GitError> {
        self.lock().push(spec.clone());
        if self.is_allowed(spec) {
            self.inner.run(spec).await
        } else {
            debug!(command = %spec.display(), "skipped by safelist");
            Ok(CommandOutput::default())
        }
    }
}
