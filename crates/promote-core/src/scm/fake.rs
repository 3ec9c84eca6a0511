//! In-memory SCM driver.
//!
//! Used by `--git-kind fake` and by tests. Pull requests are numbered from 1
//! per repository and linked as `https://github.com/<repo>/pull/<n>`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{PipelineState, PipelineTracker, ScmClient, ScmError};
use crate::domain::{
    ListOptions, NewPullRequest, PullRequestRecord, PullRequestState, PullRequestUpdate,
};

#[derive(Debug, Default)]
struct FakeState {
    repos: BTreeMap<String, Vec<PullRequestRecord>>,
    pipelines: HashMap<(String, String), PipelineState>,
    pending_failures: u32,
    lost_create_responses: u32,
    calls: u64,
}

/// In-memory [`ScmClient`] and [`PipelineTracker`].
#[derive(Debug, Default)]
pub struct FakeScmClient {
    state: Mutex<FakeState>,
}

impl FakeScmClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.lock().pending_failures = n;
    }

    /// Make the next `n` creates store the pull request and then fail with a
    /// transient error, as when the response is lost after the provider
    /// accepted the request.
    pub fn lose_create_responses(&self, n: u32) {
        self.lock().lost_create_responses = n;
    }

    /// Total calls made through the [`ScmClient`] interface.
    pub fn call_count(&self) -> u64 {
        self.lock().calls
    }

    /// Every pull request ever created on `repo`, in creation order.
    pub fn pull_requests(&self, repo: &str) -> Vec<PullRequestRecord> {
        self.lock().repos.get(repo).cloned().unwrap_or_default()
    }

    /// Pull request counts keyed by repository full name.
    pub fn pull_request_counts(&self) -> BTreeMap<String, usize> {
        self.lock()
            .repos
            .iter()
            .map(|(repo, prs)| (repo.clone(), prs.len()))
            .collect()
    }

    /// Mark a pull request merged with the given merge commit.
    pub fn merge(&self, repo: &str, number: u64, sha: &str) -> Result<(), ScmError> {
        let mut state = self.lock();
        let pr = find_mut(&mut state, repo, number)?;
        pr.state = PullRequestState::Merged;
        pr.merge_sha = Some(sha.to_string());
        Ok(())
    }

    pub fn close(&self, repo: &str, number: u64) -> Result<(), ScmError> {
        let mut state = self.lock();
        let pr = find_mut(&mut state, repo, number)?;
        pr.state = PullRequestState::Closed;
        Ok(())
    }

    pub fn set_pipeline_state(&self, repo: &str, sha: &str, pipeline: PipelineState) {
        self.lock()
            .pipelines
            .insert((repo.to_string(), sha.to_string()), pipeline);
    }

    fn enter(&self) -> Result<MutexGuard<'_, FakeState>, ScmError> {
        let mut state = self.lock();
        state.calls += 1;
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(ScmError::Transient {
                message: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

fn find_mut<'a>(
    state: &'a mut FakeState,
    repo: &str,
    number: u64,
) -> Result<&'a mut PullRequestRecord, ScmError> {
    state
        .repos
        .get_mut(repo)
        .and_then(|prs| prs.iter_mut().find(|pr| pr.number == number))
        .ok_or_else(|| ScmError::NotFound {
            resource: format!("{repo}#{number}"),
        })
}

#[async_trait]
impl ScmClient for FakeScmClient {
    async fn find(&self, repo: &str, number: u64) -> Result<PullRequestRecord, ScmError> {
        let mut state = self.enter()?;
        find_mut(&mut state, repo, number).map(|pr| pr.clone())
    }

    async fn list(
        &self,
        repo: &str,
        options: ListOptions,
    ) -> Result<Vec<PullRequestRecord>, ScmError> {
        let state = self.enter()?;
        Ok(state
            .repos
            .get(repo)
            .map(|prs| {
                prs.iter()
                    .filter(|pr| !options.open || pr.is_open())
                    .filter(|pr| options.head.as_deref().map_or(true, |head| pr.head == head))
                    .take(options.size)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(
        &self,
        repo: &str,
        request: &NewPullRequest,
    ) -> Result<PullRequestRecord, ScmError> {
        let mut state = self.enter()?;
        let prs = state.repos.entry(repo.to_string()).or_default();
        if prs.iter().any(|pr| pr.is_open() && pr.head == request.head) {
            return Err(ScmError::Api {
                status: 422,
                message: format!("a pull request already exists for {}", request.head),
            });
        }

        let number = prs.len() as u64 + 1;
        let record = PullRequestRecord {
            repo_full_name: repo.to_string(),
            number,
            link: format!("https://github.com/{repo}/pull/{number}"),
            title: request.title.clone(),
            body: request.body.clone(),
            state: PullRequestState::Open,
            head: request.head.clone(),
            base: request.base.clone(),
            labels: request.labels.clone(),
            merge_sha: None,
        };
        prs.push(record.clone());
        if state.lost_create_responses > 0 {
            state.lost_create_responses -= 1;
            return Err(ScmError::Transient {
                message: format!("connection reset after creating {repo}#{number}"),
            });
        }
        Ok(record)
    }

    async fn update(
        &self,
        repo: &str,
        number: u64,
        update: &PullRequestUpdate,
    ) -> Result<PullRequestRecord, ScmError> {
        let mut state = self.enter()?;
        let pr = find_mut(&mut state, repo, number)?;
        if let Some(title) = &update.title {
            pr.title = title.clone();
        }
        if let Some(body) = &update.body {
            pr.body = body.clone();
        }
        Ok(pr.clone())
    }
}

#[async_trait]
impl PipelineTracker for FakeScmClient {
    async fn pipeline_state(
        &self,
        repo: &str,
        sha: &str,
    ) -> Result<Option<PipelineState>, ScmError> {
        let state = self.lock();
        Ok(state
            .pipelines
            .get(&(repo.to_string(), sha.to_string()))
            .copied())
    }
}
