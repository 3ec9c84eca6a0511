//! Activity aggregation: one status record per promotion run.
//!
//! The aggregator is the only writer of the record. It is created `Running`
//! before any group starts, takes each group's terminal outcome once, and is
//! finalized once with `Succeeded` iff every group succeeded. Store failures
//! never undo published pull requests; they are carried on the report.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{GroupOutcome, GroupSummary, PromotionRequest, SuccessKind};
use crate::obs;
use promote_state::{
    ActivityRecord, ActivityStatus, ActivityStore, PromoteStep, StepStatus, StorageError,
};

/// Final result of a run, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionReport {
    pub activity: ActivityRecord,
    /// Group outcomes in group order.
    pub outcomes: Vec<(GroupSummary, GroupOutcome)>,
    /// First activity store failure, if any.
    pub activity_error: Option<String>,
}

impl PromotionReport {
    /// Every group succeeded.
    pub fn groups_succeeded(&self) -> bool {
        self.activity.status == ActivityStatus::Succeeded
    }

    /// Every group succeeded and the activity record was written.
    pub fn succeeded(&self) -> bool {
        self.groups_succeeded() && self.activity_error.is_none()
    }

    pub fn failed_groups(&self) -> Vec<&(GroupSummary, GroupOutcome)> {
        self.outcomes.iter().filter(|(_, o)| !o.is_success()).collect()
    }

    pub fn pull_requests(&self) -> Vec<&crate::domain::PullRequestRecord> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| o.pull_request())
            .collect()
    }
}

struct AggregatorState {
    record: ActivityRecord,
    outcomes: BTreeMap<usize, (GroupSummary, GroupOutcome)>,
    report: Option<PromotionReport>,
    store_error: Option<String>,
}

impl AggregatorState {
    fn note_error(&mut self, err: &StorageError) {
        obs::emit_activity_store_error(&self.record.key, err);
        if self.store_error.is_none() {
            self.store_error = Some(err.to_string());
        }
    }
}

/// Single writer of the activity record for one run.
pub struct ActivityAggregator {
    store: Arc<dyn ActivityStore>,
    state: Mutex<AggregatorState>,
}

impl ActivityAggregator {
    /// Get or create the record for `request` and reset it to `Running`.
    pub async fn start(store: Arc<dyn ActivityStore>, request: &PromotionRequest) -> Self {
        let mut template = ActivityRecord::running(
            request.namespace.clone(),
            request.activity_key(),
            request.application.clone(),
            request.version.clone(),
        );
        template.pipeline = request.pipeline.clone();
        template.build = request.build.clone();
        template.git_url = request.app_git_url.clone();

        let mut state = AggregatorState {
            record: template.clone(),
            outcomes: BTreeMap::new(),
            report: None,
            store_error: None,
        };

        match store.get_or_create(template.clone()).await {
            Ok(existing) if existing.status == ActivityStatus::Running && existing.steps.is_empty() => {
                state.record = existing;
            }
            Ok(_) => {
                // A previous run under the same key: start over.
                if let Err(e) = store.update(&template).await {
                    state.note_error(&e);
                }
            }
            Err(e) => state.note_error(&e),
        }
        debug!(key = %state.record.key, "activity started");

        Self {
            store,
            state: Mutex::new(state),
        }
    }

    pub async fn key(&self) -> String {
        self.state.lock().await.record.key.clone()
    }

    /// Record group `index`'s terminal outcome. Returns `false` when the group
    /// was already recorded or the run is finalized.
    pub async fn record(&self, index: usize, summary: GroupSummary, outcome: GroupOutcome) -> bool {
        let mut state = self.state.lock().await;
        if state.report.is_some() || state.outcomes.contains_key(&index) {
            return false;
        }

        obs::emit_group_finished(&summary.repo_url, outcome.is_success(), outcome.reason());
        state.outcomes.insert(index, (summary, outcome));
        state.record.steps = state
            .outcomes
            .values()
            .map(|(summary, outcome)| step_for(summary, outcome))
            .collect();

        if let Err(e) = self.store.update(&state.record).await {
            state.note_error(&e);
        }
        true
    }

    /// Set the terminal status and write it. Later calls return the same
    /// report without writing again.
    pub async fn finalize(&self) -> PromotionReport {
        let mut state = self.state.lock().await;
        if let Some(report) = &state.report {
            return report.clone();
        }

        let success = state.outcomes.values().all(|(_, o)| o.is_success());
        state.record.status = if success {
            ActivityStatus::Succeeded
        } else {
            ActivityStatus::Failed
        };
        state.record.completed_at = Some(Utc::now());

        if let Err(e) = self.store.update(&state.record).await {
            state.note_error(&e);
        }

        let report = PromotionReport {
            activity: state.record.clone(),
            outcomes: state.outcomes.values().cloned().collect(),
            activity_error: state.store_error.clone(),
        };
        state.report = Some(report.clone());
        report
    }
}

fn step_for(summary: &GroupSummary, outcome: &GroupOutcome) -> PromoteStep {
    let (status, reason) = match outcome {
        GroupOutcome::Succeeded { kind, .. } => (
            StepStatus::Succeeded,
            match kind {
                SuccessKind::Unchanged => Some("already promoted".to_string()),
                _ => None,
            },
        ),
        GroupOutcome::Failed { kind, reason, .. } => {
            (StepStatus::Failed, Some(format!("{kind}: {reason}")))
        }
    };
    PromoteStep {
        repository: summary.repo_url.clone(),
        environments: summary.environments.clone(),
        pull_request_url: outcome.pull_request().map(|pr| pr.link.clone()),
        status,
        reason,
    }
}
