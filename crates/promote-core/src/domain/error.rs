//! Error types for the promotion engine.

use thiserror::Error;

use super::outcome::FailureKind;
use crate::git::GitError;
use crate::scm::ScmError;
use promote_state::StorageError;

/// Errors produced by the promotion engine.
///
/// Run-level variants abort before any mutation; the rest are scoped to one
/// group and turned into a failed [`GroupOutcome`](super::GroupOutcome).
#[derive(Debug, Error)]
pub enum PromoteError {
    /// One or more requested environments are not declared.
    #[error("unknown environment(s): {}", names.join(", "))]
    UnknownEnvironment { names: Vec<String> },

    #[error("no environments are eligible for promotion")]
    NoEligibleTargets,

    /// Neither the environment nor the development environment has a git URL.
    #[error("environment '{environment}' has no git URL and no development repository to fall back to")]
    MissingGitUrl { environment: String },

    #[error("cannot parse git URL '{url}'")]
    InvalidGitUrl { url: String },

    #[error("could not resolve a version for application '{application}'")]
    MissingVersion { application: String },

    #[error("requirements error: {0}")]
    Requirements(String),

    #[error("repository {repo_url} has no supported layout (helmfile, kpt or Makefile)")]
    UnsupportedRepositoryLayout { repo_url: String },

    #[error("mutation failed: {reason}")]
    Mutation { reason: String },

    /// Two group members want different contents for the same file.
    #[error("conflicting changes to {path} from environments '{first}' and '{second}'")]
    ConflictingMutation {
        path: String,
        first: String,
        second: String,
    },

    #[error(transparent)]
    Scm(#[from] ScmError),

    /// The pull request metadata marker could not be encoded.
    #[error("pull request metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("timed out after {waited_secs}s waiting on {pull_request}")]
    PollTimeout {
        pull_request: String,
        waited_secs: u64,
    },

    #[error("polling of {pull_request} was cancelled; the pull request was left open")]
    Cancelled { pull_request: String },

    #[error("pull request {pull_request} was closed without merging")]
    PullRequestClosed { pull_request: String },

    #[error("downstream pipeline failed for {pull_request}")]
    PipelineFailed { pull_request: String },

    #[error("activity store error: {0}")]
    ActivityStore(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PromoteError {
    /// Discriminator recorded on a failed group outcome.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownEnvironment { .. } => FailureKind::UnknownEnvironment,
            Self::NoEligibleTargets
            | Self::MissingGitUrl { .. }
            | Self::InvalidGitUrl { .. }
            | Self::MissingVersion { .. }
            | Self::Requirements(_) => FailureKind::Configuration,
            Self::UnsupportedRepositoryLayout { .. } => FailureKind::UnsupportedLayout,
            Self::Mutation { .. } => FailureKind::Mutation,
            Self::ConflictingMutation { .. } => FailureKind::ConflictingMutation,
            Self::Scm(e) if e.is_transient() => FailureKind::ScmTransient,
            Self::Scm(_) | Self::Metadata(_) => FailureKind::Scm,
            Self::Git(_) => FailureKind::Git,
            Self::PollTimeout { .. } => FailureKind::PollTimeout,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::PullRequestClosed { .. } => FailureKind::PullRequestClosed,
            Self::PipelineFailed { .. } => FailureKind::PipelineFailed,
            Self::ActivityStore(_) => FailureKind::ActivityStore,
            Self::Io(_) => FailureKind::Io,
        }
    }

    pub(crate) fn mutation(reason: impl Into<String>) -> Self {
        Self::Mutation {
            reason: reason.into(),
        }
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, PromoteError>;
