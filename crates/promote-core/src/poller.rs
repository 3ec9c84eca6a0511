//! Merge and pipeline polling.
//!
//! Each published group is driven through
//! `AwaitingMerge → AwaitingPipeline → Terminal`. The wait loop is bounded by
//! an interval and a timeout and stops early on the caller's cancellation
//! signal. Pull requests are never closed here: a timed out or cancelled
//! promotion leaves its pull request open.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::{
    FailureKind, GroupOutcome, PromoteError, PullRequestRecord, PullRequestState, Result,
    SuccessKind,
};
use crate::obs;
use crate::retry::{with_retry, RetryPolicy};
use crate::scm::{PipelineState, PipelineTracker, ScmClient};

/// Poll cadence and bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Poll state of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    AwaitingMerge,
    AwaitingPipeline { merge_sha: String },
    Terminal(GroupOutcome),
}

impl PollState {
    pub fn label(&self) -> &'static str {
        match self {
            PollState::AwaitingMerge => "awaiting_merge",
            PollState::AwaitingPipeline { .. } => "awaiting_pipeline",
            PollState::Terminal(outcome) if outcome.is_success() => "succeeded",
            PollState::Terminal(_) => "failed",
        }
    }
}

#[derive(Clone)]
pub struct PromotionPoller {
    scm: Arc<dyn ScmClient>,
    pipelines: Option<Arc<dyn PipelineTracker>>,
    settings: PollSettings,
    retry: RetryPolicy,
}

impl PromotionPoller {
    pub fn new(scm: Arc<dyn ScmClient>, settings: PollSettings, retry: RetryPolicy) -> Self {
        Self {
            scm,
            pipelines: None,
            settings,
            retry,
        }
    }

    pub fn with_pipeline_tracker(mut self, pipelines: Arc<dyn PipelineTracker>) -> Self {
        self.pipelines = Some(pipelines);
        self
    }

    /// Advance `state` by one observation.
    pub async fn step(&self, pr: &PullRequestRecord, state: PollState) -> Result<PollState> {
        let repo = pr.repo_full_name.as_str();
        match state {
            PollState::AwaitingMerge => {
                let current = with_retry(&self.retry, "find pull request", || {
                    self.scm.find(repo, pr.number)
                })
                .await?;
                Ok(match current.state {
                    PullRequestState::Open => PollState::AwaitingMerge,
                    PullRequestState::Closed => PollState::Terminal(GroupOutcome::failed(
                        FailureKind::PullRequestClosed,
                        PromoteError::PullRequestClosed {
                            pull_request: pr.to_string(),
                        }
                        .to_string(),
                        Some(current),
                    )),
                    PullRequestState::Merged => match current.merge_sha.clone() {
                        Some(merge_sha) if self.pipelines.is_some() => {
                            PollState::AwaitingPipeline { merge_sha }
                        }
                        _ => PollState::Terminal(GroupOutcome::succeeded(
                            SuccessKind::Merged,
                            Some(current),
                        )),
                    },
                })
            }
            PollState::AwaitingPipeline { merge_sha } => {
                let Some(pipelines) = &self.pipelines else {
                    return Ok(PollState::Terminal(GroupOutcome::succeeded(
                        SuccessKind::Merged,
                        Some(pr.clone()),
                    )));
                };
                let pipeline = with_retry(&self.retry, "pipeline state", || {
                    pipelines.pipeline_state(repo, &merge_sha)
                })
                .await?;
                Ok(match pipeline {
                    None => PollState::Terminal(GroupOutcome::succeeded(
                        SuccessKind::Merged,
                        Some(pr.clone()),
                    )),
                    Some(PipelineState::Succeeded) => PollState::Terminal(
                        GroupOutcome::succeeded(SuccessKind::PipelineSucceeded, Some(pr.clone())),
                    ),
                    Some(PipelineState::Failed) => PollState::Terminal(GroupOutcome::failed(
                        FailureKind::PipelineFailed,
                        PromoteError::PipelineFailed {
                            pull_request: pr.to_string(),
                        }
                        .to_string(),
                        Some(pr.clone()),
                    )),
                    Some(PipelineState::Pending | PipelineState::Running) => {
                        PollState::AwaitingPipeline { merge_sha }
                    }
                })
            }
            terminal @ PollState::Terminal(_) => Ok(terminal),
        }
    }

    /// Poll until terminal, timeout or cancellation.
    ///
    /// Setting the watch value to `true` cancels; a dropped sender just means
    /// no cancellation will arrive. Both the deadline and cancellation also
    /// interrupt an in-flight status call, including its retry backoff.
    pub async fn wait(
        &self,
        pr: &PullRequestRecord,
        mut cancel: watch::Receiver<bool>,
    ) -> GroupOutcome {
        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let mut state = PollState::AwaitingMerge;

        loop {
            if *cancel.borrow() {
                return cancelled(pr);
            }

            let previous = state.label();
            let stepped = tokio::select! {
                stepped = self.step(pr, state) => stepped,
                _ = tokio::time::sleep_until(deadline) => return timed_out(pr, started),
                _ = cancel_requested(&mut cancel) => return cancelled(pr),
            };
            state = match stepped {
                Ok(next) => next,
                Err(e) => return GroupOutcome::failed(e.kind(), e.to_string(), Some(pr.clone())),
            };
            if previous != state.label() {
                obs::emit_poll_transition(&pr.to_string(), previous, state.label());
            }
            if let PollState::Terminal(outcome) = state {
                return outcome;
            }

            let now = Instant::now();
            if now >= deadline {
                return timed_out(pr, started);
            }
            let wake = (now + self.settings.interval).min(deadline);
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                _ = cancel_requested(&mut cancel) => return cancelled(pr),
            }
        }
    }
}

/// Resolves once cancellation is requested. Pends forever when the sender is
/// gone without having cancelled.
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn timed_out(pr: &PullRequestRecord, started: Instant) -> GroupOutcome {
    let err = PromoteError::PollTimeout {
        pull_request: pr.to_string(),
        waited_secs: started.elapsed().as_secs(),
    };
    GroupOutcome::failed(err.kind(), err.to_string(), Some(pr.clone()))
}

fn cancelled(pr: &PullRequestRecord) -> GroupOutcome {
    let err = PromoteError::Cancelled {
        pull_request: pr.to_string(),
    };
    GroupOutcome::failed(err.kind(), err.to_string(), Some(pr.clone()))
}
