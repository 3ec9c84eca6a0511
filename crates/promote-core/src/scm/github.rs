//! GitHub REST v3 driver.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{PipelineState, PipelineTracker, ScmClient, ScmError};
use crate::domain::{
    ListOptions, NewPullRequest, PullRequestRecord, PullRequestState, PullRequestUpdate,
};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const API_URL_ENV: &str = "GITHUB_API_URL";
pub const TOKEN_ENVS: [&str; 2] = ["GITHUB_TOKEN", "GIT_TOKEN"];

/// Connection settings for [`GitHubClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl GitHubConfig {
    /// Read `GITHUB_API_URL` and the first of `GITHUB_TOKEN` / `GIT_TOKEN`.
    pub fn from_env() -> Self {
        let api_url = std::env::var(API_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let token = TOKEN_ENVS
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()));
        Self {
            api_url,
            token,
            ..Self::default()
        }
    }
}

/// [`ScmClient`] backed by the GitHub REST API. Combined commit status is used
/// as the downstream pipeline signal.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    config: GitHubConfig,
    http_client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self, ScmError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("gitops-promote/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| ScmError::Transient {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        let builder = self
            .http_client
            .request(method, url)
            .header("Accept", "application/vnd.github+json");
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        builder: RequestBuilder,
        resource: &str,
    ) -> Result<T, ScmError> {
        let response = builder.send().await.map_err(|e| ScmError::Transient {
            message: format!("request for {resource} failed: {e}"),
        })?;

        let status = response.status();
        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "0")
            .unwrap_or(false);

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify(status, rate_limited, resource, message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ScmError::Decode(format!("{resource}: {e}")))
    }
}

/// Map a non-success HTTP status to an [`ScmError`].
pub(crate) fn classify(
    status: StatusCode,
    rate_limited: bool,
    resource: &str,
    message: String,
) -> ScmError {
    match status.as_u16() {
        429 => ScmError::Transient { message },
        403 if rate_limited => ScmError::Transient { message },
        s if (500..600).contains(&s) => ScmError::Transient { message },
        401 => ScmError::Unauthorized(message),
        404 => ScmError::NotFound {
            resource: resource.to_string(),
        },
        s => ScmError::Api { status: s, message },
    }
}

#[derive(Debug, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    number: u64,
    html_url: String,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    #[serde(default)]
    merged_at: Option<String>,
    #[serde(default)]
    merge_commit_sha: Option<String>,
    head: GhRef,
    base: GhRef,
    #[serde(default)]
    labels: Vec<GhLabel>,
}

impl GhPullRequest {
    fn into_record(self, repo: &str) -> PullRequestRecord {
        let merged = self.merged_at.is_some();
        let state = match (self.state.as_str(), merged) {
            (_, true) => PullRequestState::Merged,
            ("open", false) => PullRequestState::Open,
            _ => PullRequestState::Closed,
        };
        PullRequestRecord {
            repo_full_name: repo.to_string(),
            number: self.number,
            link: self.html_url,
            title: self.title,
            body: self.body.unwrap_or_default(),
            state,
            head: self.head.name,
            base: self.base.name,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            merge_sha: if merged { self.merge_commit_sha } else { None },
        }
    }
}

#[derive(Debug, Serialize)]
struct GhCreate<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Debug, Serialize)]
struct GhLabels<'a> {
    labels: &'a [String],
}

#[derive(Debug, Deserialize)]
struct GhCombinedStatus {
    state: String,
    total_count: u64,
}

#[async_trait]
impl ScmClient for GitHubClient {
    async fn find(&self, repo: &str, number: u64) -> Result<PullRequestRecord, ScmError> {
        let resource = format!("{repo}#{number}");
        let pr: GhPullRequest = self
            .send(
                self.request(Method::GET, &format!("/repos/{repo}/pulls/{number}")),
                &resource,
            )
            .await?;
        Ok(pr.into_record(repo))
    }

    async fn list(
        &self,
        repo: &str,
        options: ListOptions,
    ) -> Result<Vec<PullRequestRecord>, ScmError> {
        let prs: Vec<GhPullRequest> = self
            .send(
                self.request(Method::GET, &format!("/repos/{repo}/pulls"))
                    .query(&list_query(repo, &options)),
                repo,
            )
            .await?;
        Ok(prs.into_iter().map(|pr| pr.into_record(repo)).collect())
    }

    async fn create(
        &self,
        repo: &str,
        request: &NewPullRequest,
    ) -> Result<PullRequestRecord, ScmError> {
        let body = GhCreate {
            title: &request.title,
            body: &request.body,
            head: &request.head,
            base: &request.base,
        };
        let pr: GhPullRequest = self
            .send(
                self.request(Method::POST, &format!("/repos/{repo}/pulls"))
                    .json(&body),
                repo,
            )
            .await?;
        let mut record = pr.into_record(repo);

        // The pull request exists from here on; a labelling failure must not
        // make the caller create it again.
        if !request.labels.is_empty() {
            let path = format!("/repos/{repo}/issues/{}/labels", record.number);
            let labelled: Result<serde_json::Value, ScmError> = self
                .send(
                    self.request(Method::POST, &path).json(&GhLabels {
                        labels: &request.labels,
                    }),
                    &path,
                )
                .await;
            match labelled {
                Ok(_) => record.labels = request.labels.clone(),
                Err(e) => {
                    warn!(repo = %repo, number = record.number, error = %e, "failed to label pull request")
                }
            }
        }

        debug!(repo = %repo, number = record.number, "created pull request");
        Ok(record)
    }

    async fn update(
        &self,
        repo: &str,
        number: u64,
        update: &PullRequestUpdate,
    ) -> Result<PullRequestRecord, ScmError> {
        let resource = format!("{repo}#{number}");
        let pr: GhPullRequest = self
            .send(
                self.request(Method::PATCH, &format!("/repos/{repo}/pulls/{number}"))
                    .json(update),
                &resource,
            )
            .await?;
        Ok(pr.into_record(repo))
    }
}

#[async_trait]
impl PipelineTracker for GitHubClient {
    async fn pipeline_state(
        &self,
        repo: &str,
        sha: &str,
    ) -> Result<Option<PipelineState>, ScmError> {
        let path = format!("/repos/{repo}/commits/{sha}/status");
        let status: GhCombinedStatus = self.send(self.request(Method::GET, &path), &path).await?;
        Ok(combined_state(&status))
    }
}

/// Query string for listing pull requests. GitHub filters `head` by
/// `owner:branch`, where the owner is the repository's.
fn list_query(repo: &str, options: &ListOptions) -> Vec<(&'static str, String)> {
    let state = if options.open { "open" } else { "all" };
    let mut query = vec![
        ("state", state.to_string()),
        ("per_page", options.size.clamp(1, 100).to_string()),
    ];
    if let Some(head) = &options.head {
        let owner = repo.split('/').next().unwrap_or(repo);
        query.push(("head", format!("{owner}:{head}")));
    }
    query
}

fn combined_state(status: &GhCombinedStatus) -> Option<PipelineState> {
    if status.total_count == 0 {
        return None;
    }
    match status.state.as_str() {
        "success" => Some(PipelineState::Succeeded),
        "failure" | "error" => Some(PipelineState::Failed),
        _ => Some(PipelineState::Running),
    }
}
