//! Promotion engine: resolve → locate → partition → per group (clone,
//! mutate, combine, publish, poll) → aggregate.
//!
//! Groups run concurrently on their own clones; members of one group are
//! mutated one after another against the same working copy.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, Instrument};

use crate::activity::{ActivityAggregator, PromotionReport};
use crate::confirm::{AlwaysConfirm, Confirmer};
use crate::domain::{
    branch_name, EnvironmentConfig, FailureKind, GroupOutcome, PromoteError, PromotionRequest,
    PromotionStrategy, Result, Selection, SuccessKind,
};
use crate::git::GitClient;
use crate::grouper::{combine, partition, TargetGroup};
use crate::layout::{LayoutDetector, MutationContext};
use crate::locator::RepositoryLocator;
use crate::obs;
use crate::poller::{PollSettings, PromotionPoller};
use crate::policy::resolve_targets;
use crate::publisher::{PublishOutcome, PullRequestPublisher};
use crate::requirements::RequirementsDocument;
use crate::retry::RetryPolicy;
use crate::scm::{PipelineTracker, ScmClient};
use promote_state::ActivityStore;

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteOptions {
    /// Chart repository alias used in new helmfile releases
    pub chart_repo: String,
    /// Branch promotion pull requests target; the repository's default
    /// branch when `None`
    pub base_branch: Option<String>,
    /// Root for working copies; the system temp directory when `None`
    pub work_dir: Option<PathBuf>,
    pub poll: PollSettings,
    pub retry: RetryPolicy,
}

impl Default for PromoteOptions {
    fn default() -> Self {
        Self {
            chart_repo: "dev".to_string(),
            base_branch: None,
            work_dir: None,
            poll: PollSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct PromotionEngine {
    git: Arc<dyn GitClient>,
    scm: Arc<dyn ScmClient>,
    store: Arc<dyn ActivityStore>,
    pipelines: Option<Arc<dyn PipelineTracker>>,
    confirmer: Arc<dyn Confirmer>,
    layouts: Arc<LayoutDetector>,
    options: PromoteOptions,
}

impl PromotionEngine {
    pub fn new(
        git: Arc<dyn GitClient>,
        scm: Arc<dyn ScmClient>,
        store: Arc<dyn ActivityStore>,
    ) -> Self {
        Self {
            git,
            scm,
            store,
            pipelines: None,
            confirmer: Arc::new(AlwaysConfirm),
            layouts: Arc::new(LayoutDetector::default()),
            options: PromoteOptions::default(),
        }
    }

    pub fn with_pipeline_tracker(mut self, pipelines: Arc<dyn PipelineTracker>) -> Self {
        self.pipelines = Some(pipelines);
        self
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    pub fn with_layouts(mut self, layouts: LayoutDetector) -> Self {
        self.layouts = Arc::new(layouts);
        self
    }

    pub fn with_options(mut self, options: PromoteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &PromoteOptions {
        &self.options
    }

    /// Run one promotion.
    ///
    /// Run-level problems (unknown environment, nothing eligible, no git URL)
    /// return `Err` before anything is cloned or recorded. Everything after
    /// that is reported through the returned [`PromotionReport`].
    pub async fn run(
        &self,
        doc: &RequirementsDocument,
        request: &PromotionRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<PromotionReport> {
        let span = obs::promotion_span(&request.activity_key());
        self.run_inner(doc, request, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        doc: &RequirementsDocument,
        request: &PromotionRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<PromotionReport> {
        let started = Instant::now();
        if request.version.trim().is_empty() {
            return Err(PromoteError::MissingVersion {
                application: request.application.clone(),
            });
        }

        let environments = self
            .confirm(resolve_targets(doc, &request.selection)?, request)
            .await;
        if environments.is_empty() {
            return Err(PromoteError::NoEligibleTargets);
        }

        let mut locator = RepositoryLocator::new(self.git.clone());
        if let Some(dir) = &self.options.work_dir {
            locator = locator.with_work_root(dir.clone());
        }
        let targets = locator.locate(doc, environments)?;
        let target_count = targets.len();
        let groups = partition(targets, request.group_pull_requests);

        let aggregator = Arc::new(ActivityAggregator::start(self.store.clone(), request).await);
        obs::emit_promotion_started(
            &request.application,
            &request.version,
            target_count,
            groups.len(),
        );

        let mut publisher =
            PullRequestPublisher::new(self.git.clone(), self.scm.clone(), self.options.retry);
        if let Some(base) = &self.options.base_branch {
            publisher = publisher.with_base_branch(base.clone());
        }
        let worker = Arc::new(GroupWorker {
            locator,
            layouts: self.layouts.clone(),
            publisher,
            poller: self.poller(),
            request: request.clone(),
            chart_repo: self.options.chart_repo.clone(),
            aggregator: aggregator.clone(),
        });

        let mut join_set = JoinSet::new();
        let summaries: Vec<_> = groups.iter().map(|g| (g.index, g.summary())).collect();
        for group in groups {
            let worker = Arc::clone(&worker);
            let cancel = cancel.clone();
            join_set.spawn(async move { worker.run(group, cancel).await }.in_current_span());
        }

        let mut finished = HashSet::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(index) => {
                    finished.insert(index);
                }
                Err(e) => tracing::error!(error = %e, "group task failed"),
            }
        }
        for (index, summary) in summaries {
            if !finished.contains(&index) {
                aggregator
                    .record(
                        index,
                        summary,
                        GroupOutcome::failed(FailureKind::Io, "group task aborted", None),
                    )
                    .await;
            }
        }

        let report = aggregator.finalize().await;
        obs::emit_promotion_finished(
            &report.activity.key,
            started.elapsed().as_millis() as u64,
            report.outcomes.len(),
            report.groups_succeeded(),
        );
        Ok(report)
    }

    /// Ask about `Manual` environments picked up by `AllEligible`, unless in
    /// batch mode.
    async fn confirm(
        &self,
        environments: Vec<EnvironmentConfig>,
        request: &PromotionRequest,
    ) -> Vec<EnvironmentConfig> {
        if request.batch || request.selection != Selection::AllEligible {
            return environments;
        }
        let mut confirmed = Vec::with_capacity(environments.len());
        for env in environments {
            if env.promotion_strategy == PromotionStrategy::Manual
                && !self
                    .confirmer
                    .confirm(&env, &request.application, &request.version)
                    .await
            {
                info!(environment = %env.key, "promotion declined");
                continue;
            }
            confirmed.push(env);
        }
        confirmed
    }

    fn poller(&self) -> PromotionPoller {
        let poller = PromotionPoller::new(self.scm.clone(), self.options.poll, self.options.retry);
        match &self.pipelines {
            Some(p) => poller.with_pipeline_tracker(p.clone()),
            None => poller,
        }
    }
}

/// Everything one group needs, shared across group tasks.
struct GroupWorker {
    locator: RepositoryLocator,
    layouts: Arc<LayoutDetector>,
    publisher: PullRequestPublisher,
    poller: PromotionPoller,
    request: PromotionRequest,
    chart_repo: String,
    aggregator: Arc<ActivityAggregator>,
}

impl GroupWorker {
    /// Drive one group to a terminal outcome and record it. Returns the
    /// group index.
    async fn run(&self, group: TargetGroup, cancel: watch::Receiver<bool>) -> usize {
        let summary = group.summary();
        let outcome = match self.publish(&group).await {
            Ok(PublishOutcome::Unchanged) => {
                obs::emit_group_skipped(&summary.repo_url, &summary.environments);
                GroupOutcome::succeeded(SuccessKind::Unchanged, None)
            }
            Ok(PublishOutcome::Published(pr)) => {
                obs::emit_group_published(&summary.repo_url, &summary.environments, &pr.link);
                if self.request.poll {
                    self.poller.wait(&pr, cancel).await
                } else {
                    GroupOutcome::succeeded(SuccessKind::Published, Some(pr))
                }
            }
            Err(e) => GroupOutcome::failed(e.kind(), e.to_string(), None),
        };
        self.aggregator.record(group.index, summary, outcome).await;
        group.index
    }

    /// Clone, mutate each member in order on the same working copy, combine
    /// and publish.
    async fn publish(&self, group: &TargetGroup) -> Result<PublishOutcome> {
        let wc = self.locator.checkout(&group.repo).await?;
        let application = self.request.application.as_str();
        let version = self.request.version.as_str();

        let mut member_changes = Vec::with_capacity(group.members.len());
        for member in &group.members {
            let ctx = MutationContext {
                application,
                version,
                environment: &member.environment,
                chart_repo: &self.chart_repo,
                app_git_url: self.request.app_git_url.as_deref(),
            };
            let changes = self.layouts.mutate(&wc, &ctx)?;
            for change in &changes {
                wc.apply(change)?;
            }
            member_changes.push((member.key().to_string(), changes));
        }

        let branch = branch_name(application, version, &group.env_keys());
        let combined = combine(group.clone(), branch, member_changes)?;
        self.publisher
            .publish(&wc, &combined, application, version)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{CliGitClient, TokioCommandRunner};
    use crate::scm::FakeScmClient;
    use async_trait::async_trait;
    use promote_state::MemoryActivityStore;

    struct Decline;

    #[async_trait]
    impl Confirmer for Decline {
        async fn confirm(&self, _: &EnvironmentConfig, _: &str, _: &str) -> bool {
            false
        }
    }

    fn doc() -> RequirementsDocument {
        RequirementsDocument::new(vec![
            EnvironmentConfig::new("dev", "jx", PromotionStrategy::Never)
                .with_git_url("https://github.com/org/dev-env"),
            EnvironmentConfig::new("production", "jx-production", PromotionStrategy::Manual),
        ])
    }

    fn engine(store: Arc<MemoryActivityStore>) -> PromotionEngine {
        PromotionEngine::new(
            Arc::new(CliGitClient::new(Arc::new(TokioCommandRunner::default()))),
            Arc::new(FakeScmClient::new()),
            store,
        )
    }

    #[tokio::test]
    async fn unknown_environment_aborts_before_recording() {
        let store = Arc::new(MemoryActivityStore::new());
        let (_tx, rx) = watch::channel(false);
        let request = PromotionRequest::new(
            "myapp",
            "1.2.3",
            Selection::SingleEnvironment("qa".into()),
        );
        let err = engine(store.clone()).run(&doc(), &request, rx).await.unwrap_err();
        assert!(matches!(err, PromoteError::UnknownEnvironment { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn declined_manual_environments_leave_nothing_eligible() {
        let store = Arc::new(MemoryActivityStore::new());
        let (_tx, rx) = watch::channel(false);
        let request = PromotionRequest::new("myapp", "1.2.3", Selection::AllEligible);
        let err = engine(store.clone())
            .with_confirmer(Arc::new(Decline))
            .run(&doc(), &request, rx)
            .await
            .unwrap_err();
        assert!(matches!(err, PromoteError::NoEligibleTargets));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn empty_version_is_rejected() {
        let store = Arc::new(MemoryActivityStore::new());
        let (_tx, rx) = watch::channel(false);
        let request = PromotionRequest::new("myapp", "", Selection::AllEligible);
        let err = engine(store).run(&doc(), &request, rx).await.unwrap_err();
        assert!(matches!(err, PromoteError::MissingVersion { .. }));
    }

    #[test]
    fn default_options() {
        let options = PromoteOptions::default();
        assert_eq!(options.chart_repo, "dev");
        assert!(options.base_branch.is_none());
        assert_eq!(options.poll.interval.as_secs(), 20);
        assert_eq!(options.retry.max_retries, 3);
    }
}
