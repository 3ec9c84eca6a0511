//! Promotion requests and resolved targets.

use serde::{Deserialize, Serialize};

use crate::domain::environment::EnvironmentConfig;
use crate::locator::RepoRef;

/// Which environments a request asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// One environment by key, regardless of its strategy.
    SingleEnvironment(String),
    /// Every `Automatic`/`Manual` environment except the dev environment.
    AllEligible,
    /// The named environments, in the given order.
    ExplicitSet(Vec<String>),
}

/// One promotion invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub application: String,
    pub version: String,
    pub selection: Selection,
    /// Collapse environments sharing a repository into one pull request.
    pub group_pull_requests: bool,
    /// Wait for merge (and downstream pipeline) after publishing.
    pub poll: bool,
    /// Non-interactive: never ask for confirmation.
    pub batch: bool,
    /// Application source repository, used when a layout must add a new
    /// package reference.
    pub app_git_url: Option<String>,
    /// Pipeline identifier stamped on the activity record.
    pub pipeline: Option<String>,
    /// Build identifier stamped on the activity record.
    pub build: Option<String>,
    /// Namespace the activity record is written to.
    pub namespace: String,
}

impl PromotionRequest {
    pub fn new(
        application: impl Into<String>,
        version: impl Into<String>,
        selection: Selection,
    ) -> Self {
        Self {
            application: application.into(),
            version: version.into(),
            selection,
            group_pull_requests: true,
            poll: true,
            batch: false,
            app_git_url: None,
            pipeline: None,
            build: None,
            namespace: "jx".to_string(),
        }
    }

    pub fn with_grouping(mut self, group_pull_requests: bool) -> Self {
        self.group_pull_requests = group_pull_requests;
        self
    }

    pub fn with_poll(mut self, poll: bool) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_app_git_url(mut self, url: impl Into<String>) -> Self {
        self.app_git_url = Some(url.into());
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>, build: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self.build = Some(build.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Key of the activity record for this run.
    ///
    /// `myorg/myapp/master` + build `1` gives `myorg-myapp-master-1`; without a
    /// pipeline the key is derived from application and version.
    pub fn activity_key(&self) -> String {
        match (&self.pipeline, &self.build) {
            (Some(pipeline), Some(build)) if !pipeline.is_empty() => {
                sanitize_key(&format!("{pipeline}-{build}"))
            }
            (Some(pipeline), _) if !pipeline.is_empty() => sanitize_key(pipeline),
            _ => sanitize_key(&format!("{}-promote-{}", self.application, self.version)),
        }
    }
}

/// Lowercase, replace anything outside `[a-z0-9.]` with `-`, collapse runs.
pub(crate) fn sanitize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || c == '.' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// A resolved environment paired with the repository that receives its change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionTarget {
    pub environment: EnvironmentConfig,
    pub repo: RepoRef,
}

impl PromotionTarget {
    pub fn key(&self) -> &str {
        &self.environment.key
    }

    pub fn repo_url(&self) -> &str {
        &self.repo.url
    }
}
