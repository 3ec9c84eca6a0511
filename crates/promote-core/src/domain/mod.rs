//! Domain models for promotion.
//!
//! Canonical definitions for the core entities:
//! - `EnvironmentConfig`: a deployment stage and its promotion policy
//! - `PromotionRequest` / `PromotionTarget`: one invocation and its resolved targets
//! - `RepositoryMutation`: the file edits that pin a version in a repository
//! - `PullRequestRecord`: a pull request as reported by the SCM collaborator
//! - `GroupOutcome`: the terminal result of one pull request group

pub mod environment;
pub mod error;
pub mod mutation;
pub mod outcome;
pub mod pull_request;
pub mod request;

pub use environment::{EnvironmentConfig, PromotionStrategy, DEV_ENVIRONMENT_KEY};
pub use error::{PromoteError, Result};
pub use mutation::{branch_name, FileChange, RepositoryMutation};
pub use outcome::{FailureKind, GroupOutcome, GroupSummary, SuccessKind};
pub use pull_request::{
    ListOptions, NewPullRequest, PullRequestRecord, PullRequestState, PullRequestUpdate,
};
pub use request::{PromotionRequest, PromotionTarget, Selection};
