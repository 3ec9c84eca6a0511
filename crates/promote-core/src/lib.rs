//! Promote Core Library
//!
//! The promotion engine: decides which environments receive a new application
//! version, mutates their GitOps repositories, publishes the change as pull
//! requests, optionally waits for merge and downstream pipelines, and records
//! one aggregate activity per run.

pub mod activity;
pub mod confirm;
pub mod domain;
pub mod engine;
pub mod git;
pub mod grouper;
pub mod layout;
pub mod locator;
pub mod obs;
pub mod poller;
pub mod policy;
pub mod publisher;
pub mod requirements;
pub mod retry;
pub mod scm;
pub mod telemetry;
pub mod version;

pub use activity::{ActivityAggregator, PromotionReport};
pub use confirm::{AlwaysConfirm, Confirmer};
pub use domain::{
    EnvironmentConfig, FailureKind, FileChange, GroupOutcome, GroupSummary, PromoteError,
    PromotionRequest, PromotionStrategy, PromotionTarget, PullRequestRecord, PullRequestState,
    RepositoryMutation, Result, Selection, SuccessKind,
};
pub use engine::{PromoteOptions, PromotionEngine};
pub use git::{
    CliGitClient, CommandRunner, GitClient, GitError, SafelistCommandRunner, TokioCommandRunner,
};
pub use grouper::{PromotionGroup, TargetGroup};
pub use layout::{LayoutDetector, MutationContext, RepositoryLayout};
pub use locator::{RepoRef, RepositoryLocator, WorkingCopy};
pub use poller::{PollSettings, PollState, PromotionPoller};
pub use policy::resolve_targets;
pub use publisher::{PublishOutcome, PullRequestPublisher};
pub use requirements::RequirementsDocument;
pub use retry::RetryPolicy;
pub use scm::{
    build_driver, FakeScmClient, GitHubClient, GitHubConfig, PipelineState, PipelineTracker,
    ScmClient, ScmDriver, ScmError, ScmKind,
};
pub use telemetry::init_tracing;
pub use version::{resolve_version, RequirementsVersions, VersionFile, VersionResolver};

pub use promote_state::{
    ActivityRecord, ActivityStatus, ActivityStore, MemoryActivityStore, SurrealActivityStore,
};

/// Promote version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
