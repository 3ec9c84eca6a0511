//! Terminal outcomes of pull request groups.

use serde::{Deserialize, Serialize};

use super::pull_request::PullRequestRecord;

/// How a group succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessKind {
    /// Every member was already pinned; nothing was published.
    Unchanged,
    /// Published without polling.
    Published,
    /// Merged and no downstream pipeline was tracked.
    Merged,
    /// Merged and the downstream pipeline succeeded.
    PipelineSucceeded,
}

/// Failure discriminator recorded on failed groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownEnvironment,
    Configuration,
    UnsupportedLayout,
    ConflictingMutation,
    Mutation,
    /// A transient SCM failure that exhausted its retries.
    ScmTransient,
    Scm,
    Git,
    PollTimeout,
    Cancelled,
    PullRequestClosed,
    PipelineFailed,
    ActivityStore,
    Io,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownEnvironment => "unknown_environment",
            Self::Configuration => "configuration",
            Self::UnsupportedLayout => "unsupported_layout",
            Self::ConflictingMutation => "conflicting_mutation",
            Self::Mutation => "mutation",
            Self::ScmTransient => "scm_transient",
            Self::Scm => "scm",
            Self::Git => "git",
            Self::PollTimeout => "poll_timeout",
            Self::Cancelled => "cancelled",
            Self::PullRequestClosed => "pull_request_closed",
            Self::PipelineFailed => "pipeline_failed",
            Self::ActivityStore => "activity_store",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GroupOutcome {
    Succeeded {
        kind: SuccessKind,
        pull_request: Option<PullRequestRecord>,
    },
    Failed {
        kind: FailureKind,
        reason: String,
        /// Present when the failure happened after publication; the PR stays open.
        pull_request: Option<PullRequestRecord>,
    },
}

impl GroupOutcome {
    pub fn succeeded(kind: SuccessKind, pull_request: Option<PullRequestRecord>) -> Self {
        Self::Succeeded { kind, pull_request }
    }

    pub fn failed(
        kind: FailureKind,
        reason: impl Into<String>,
        pull_request: Option<PullRequestRecord>,
    ) -> Self {
        Self::Failed {
            kind,
            reason: reason.into(),
            pull_request,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn pull_request(&self) -> Option<&PullRequestRecord> {
        match self {
            Self::Succeeded { pull_request, .. } | Self::Failed { pull_request, .. } => {
                pull_request.as_ref()
            }
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            Self::Succeeded { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason, .. } => Some(reason),
            Self::Succeeded { .. } => None,
        }
    }
}

/// Identity of a group for reporting: its repository and member environments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub repo_url: String,
    pub environments: Vec<String>,
}
