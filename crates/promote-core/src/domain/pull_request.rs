//! Pull request records as exchanged with the SCM collaborator.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullRequestState {
    Open,
    Merged,
    Closed,
}

/// A pull request owned by the SCM provider and referenced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    /// `owner/name`
    pub repo_full_name: String,
    pub number: u64,
    pub link: String,
    pub title: String,
    pub body: String,
    pub state: PullRequestState,
    /// Source branch
    pub head: String,
    /// Target branch
    pub base: String,
    pub labels: Vec<String>,
    /// Merge commit, once merged
    pub merge_sha: Option<String>,
}

impl PullRequestRecord {
    pub fn is_open(&self) -> bool {
        self.state == PullRequestState::Open
    }
}

impl std::fmt::Display for PullRequestRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.repo_full_name, self.number)
    }
}

/// Input for creating a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub labels: Vec<String>,
}

/// Partial update of an existing pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Listing filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Only open pull requests
    pub open: bool,
    /// Page size
    pub size: usize,
    /// Only pull requests from this source branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
}

impl ListOptions {
    /// Open pull requests whose source branch is `branch`.
    pub fn for_head(branch: impl Into<String>) -> Self {
        Self {
            head: Some(branch.into()),
            ..Self::default()
        }
    }
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            open: true,
            size: 100,
            head: None,
        }
    }
}
