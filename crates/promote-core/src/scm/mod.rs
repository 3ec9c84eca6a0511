//! SCM provider seam.
//!
//! The engine talks to pull requests only through [`ScmClient`], and to the
//! downstream pipeline of a merge commit through [`PipelineTracker`]. Drivers
//! are selected by [`ScmKind`].

pub mod fake;
pub mod github;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ListOptions, NewPullRequest, PullRequestRecord, PullRequestUpdate};

pub use fake::FakeScmClient;
pub use github::{GitHubClient, GitHubConfig};

/// Errors reported by SCM drivers.
#[derive(Debug, Error)]
pub enum ScmError {
    /// Worth retrying: network failure, rate limit, 5xx.
    #[error("transient SCM failure: {message}")]
    Transient { message: String },

    #[error("SCM resource not found: {resource}")]
    NotFound { resource: String },

    /// The provider rejected the request.
    #[error("SCM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("SCM authentication failed: {0}")]
    Unauthorized(String),

    #[error("unsupported SCM kind '{0}'")]
    UnsupportedKind(String),

    #[error("SCM response could not be decoded: {0}")]
    Decode(String),
}

impl ScmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ScmError::Transient { .. })
    }
}

/// Pull request operations the engine needs.
#[async_trait]
pub trait ScmClient: Send + Sync {
    /// Fetch one pull request by number. `repo` is `owner/name`.
    async fn find(&self, repo: &str, number: u64) -> Result<PullRequestRecord, ScmError>;

    async fn list(
        &self,
        repo: &str,
        options: ListOptions,
    ) -> Result<Vec<PullRequestRecord>, ScmError>;

    async fn create(
        &self,
        repo: &str,
        request: &NewPullRequest,
    ) -> Result<PullRequestRecord, ScmError>;

    async fn update(
        &self,
        repo: &str,
        number: u64,
        update: &PullRequestUpdate,
    ) -> Result<PullRequestRecord, ScmError>;
}

/// State of the downstream pipeline triggered by a merge commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed)
    }
}

/// Observes the pipeline started by a merge.
#[async_trait]
pub trait PipelineTracker: Send + Sync {
    /// `None` when no pipeline is known for the commit.
    async fn pipeline_state(
        &self,
        repo: &str,
        sha: &str,
    ) -> Result<Option<PipelineState>, ScmError>;
}

/// Driver discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScmKind {
    Fake,
    GitHub,
}

impl FromStr for ScmKind {
    type Err = ScmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fake" => Ok(ScmKind::Fake),
            "github" => Ok(ScmKind::GitHub),
            other => Err(ScmError::UnsupportedKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for ScmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScmKind::Fake => f.write_str("fake"),
            ScmKind::GitHub => f.write_str("github"),
        }
    }
}

/// A driver pair: the pull request client and, when the provider exposes one,
/// its pipeline tracker.
pub struct ScmDriver {
    pub client: Arc<dyn ScmClient>,
    pub pipelines: Option<Arc<dyn PipelineTracker>>,
}

/// Build the driver for `kind`.
pub fn build_driver(kind: ScmKind, github: GitHubConfig) -> Result<ScmDriver, ScmError> {
    match kind {
        ScmKind::Fake => {
            let fake = Arc::new(FakeScmClient::new());
            Ok(ScmDriver {
                client: fake.clone(),
                pipelines: Some(fake),
            })
        }
        ScmKind::GitHub => {
            let client = Arc::new(GitHubClient::new(github)?);
            Ok(ScmDriver {
                client: client.clone(),
                pipelines: Some(client),
            })
        }
    }
}
