//! Pull request publication: commit, push and open (or update) one pull
//! request per group.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{
    ListOptions, NewPullRequest, PullRequestRecord, PullRequestUpdate, Result,
};
use crate::git::GitClient;
use crate::grouper::PromotionGroup;
use crate::locator::WorkingCopy;
use crate::retry::{with_retry, RetryPolicy};
use crate::scm::ScmClient;

/// Label carried by every promotion pull request.
pub const PROMOTE_LABEL: &str = "promote";

const MARKER_PREFIX: &str = "<!-- promote:";
const MARKER_SUFFIX: &str = "-->";

/// Result of publishing one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing to change; no branch, commit or pull request.
    Unchanged,
    Published(PullRequestRecord),
}

/// Machine-readable promotion metadata embedded in the pull request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionMetadata {
    pub application: String,
    pub version: String,
    pub environments: Vec<String>,
    /// [`RepositoryMutation::digest`](crate::domain::RepositoryMutation::digest)
    /// of the change last pushed to the branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl PromotionMetadata {
    pub fn new(
        application: impl Into<String>,
        version: impl Into<String>,
        environments: Vec<String>,
    ) -> Self {
        Self {
            application: application.into(),
            version: version.into(),
            environments,
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Extract the marker from a pull request body.
    pub fn parse(body: &str) -> Option<Self> {
        let start = body.find(MARKER_PREFIX)? + MARKER_PREFIX.len();
        let len = body[start..].find(MARKER_SUFFIX)?;
        serde_json::from_str(body[start..start + len].trim()).ok()
    }

    /// Add `environments` not yet listed, keeping existing order.
    pub fn merge_environments<I, S>(&mut self, environments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for env in environments {
            let env = env.into();
            if !self.environments.contains(&env) {
                self.environments.push(env);
            }
        }
    }

    /// True when this marker already describes `wanted`: same version and
    /// change, and every wanted environment listed.
    pub fn covers(&self, wanted: &PromotionMetadata) -> bool {
        self.application == wanted.application
            && self.version == wanted.version
            && wanted.digest.is_some()
            && self.digest == wanted.digest
            && wanted
                .environments
                .iter()
                .all(|env| self.environments.contains(env))
    }

    pub fn title(&self) -> String {
        format!(
            "chore: promote {} to version {}",
            self.application, self.version
        )
    }

    pub fn body(&self) -> serde_json::Result<String> {
        let mut body = format!(
            "Promote application `{}` to version `{}` in:\n\n",
            self.application, self.version
        );
        for env in &self.environments {
            body.push_str(&format!("* `{env}`\n"));
        }
        let marker = serde_json::to_string(self)?;
        body.push_str(&format!("\n{MARKER_PREFIX}{marker} {MARKER_SUFFIX}\n"));
        Ok(body)
    }

    pub fn labels(&self) -> Vec<String> {
        std::iter::once(PROMOTE_LABEL.to_string())
            .chain(self.environments.iter().map(|e| format!("env/{e}")))
            .collect()
    }
}

/// Publishes combined group mutations through git and the SCM client.
#[derive(Clone)]
pub struct PullRequestPublisher {
    git: Arc<dyn GitClient>,
    scm: Arc<dyn ScmClient>,
    retry: RetryPolicy,
    /// Target branch; the clone's default branch when `None`
    base_branch: Option<String>,
}

impl PullRequestPublisher {
    pub fn new(git: Arc<dyn GitClient>, scm: Arc<dyn ScmClient>, retry: RetryPolicy) -> Self {
        Self {
            git,
            scm,
            retry,
            base_branch: None,
        }
    }

    pub fn with_base_branch(mut self, branch: impl Into<String>) -> Self {
        self.base_branch = Some(branch.into());
        self
    }

    /// Publish `group` from `wc`, where its changes are already applied.
    ///
    /// An open pull request on the promotion branch is reused and its
    /// metadata extended; otherwise one is created. Publishing the same
    /// working copy again pushes nothing new and leaves an up to date pull
    /// request untouched.
    pub async fn publish(
        &self,
        wc: &WorkingCopy,
        group: &PromotionGroup,
        application: &str,
        version: &str,
    ) -> Result<PublishOutcome> {
        if group.mutation.is_noop() {
            debug!(repo = %group.repo, "already pinned, nothing to publish");
            return Ok(PublishOutcome::Unchanged);
        }

        let branch = group.mutation.branch_name.as_str();
        let metadata = PromotionMetadata::new(application, version, group.env_keys())
            .with_digest(group.mutation.digest());
        let base = match &self.base_branch {
            Some(base) => base.clone(),
            None => self.git.default_branch(wc.path()).await?,
        };

        if self.git.status_porcelain(wc.path()).await?.trim().is_empty() {
            debug!(repo = %group.repo, branch = %branch, "changes already committed");
        } else {
            self.git.checkout_branch(wc.path(), branch).await?;
            let message = format!(
                "{}\n\nenvironments: {}",
                metadata.title(),
                metadata.environments.join(", ")
            );
            self.git.commit_all(wc.path(), &message).await?;
        }
        self.git.push(wc.path(), branch).await?;

        let repo = group.repo.full_name.as_str();
        let record = match self.find_open(repo, branch).await? {
            Some(existing) => self.refresh(repo, existing, metadata).await?,
            None => self.create(repo, branch, &base, &metadata).await?,
        };

        Ok(PublishOutcome::Published(record))
    }

    async fn find_open(&self, repo: &str, branch: &str) -> Result<Option<PullRequestRecord>> {
        let options = ListOptions::for_head(branch);
        let open = with_retry(&self.retry, "list pull requests", || {
            self.scm.list(repo, options.clone())
        })
        .await?;
        Ok(open.into_iter().find(|pr| pr.head == branch))
    }

    /// Bring an existing pull request's title and marker up to date.
    async fn refresh(
        &self,
        repo: &str,
        existing: PullRequestRecord,
        wanted: PromotionMetadata,
    ) -> Result<PullRequestRecord> {
        let previous = PromotionMetadata::parse(&existing.body);
        if previous.as_ref().is_some_and(|p| p.covers(&wanted)) {
            info!(repo = %repo, number = existing.number, "pull request already up to date");
            return Ok(existing);
        }

        let metadata = match previous {
            Some(mut merged) => {
                merged.application = wanted.application;
                merged.version = wanted.version;
                merged.digest = wanted.digest;
                merged.merge_environments(wanted.environments);
                merged
            }
            None => wanted,
        };
        let update = PullRequestUpdate {
            title: Some(metadata.title()),
            body: Some(metadata.body()?),
        };
        let updated = with_retry(&self.retry, "update pull request", || {
            self.scm.update(repo, existing.number, &update)
        })
        .await?;
        info!(repo = %repo, number = updated.number, "updated existing pull request");
        Ok(updated)
    }

    /// Create the pull request. When creation fails but an open pull request
    /// for `branch` exists afterwards, an earlier attempt went through and
    /// that pull request is used.
    async fn create(
        &self,
        repo: &str,
        branch: &str,
        base: &str,
        metadata: &PromotionMetadata,
    ) -> Result<PullRequestRecord> {
        let request = NewPullRequest {
            title: metadata.title(),
            body: metadata.body()?,
            head: branch.to_string(),
            base: base.to_string(),
            labels: metadata.labels(),
        };
        let created = match with_retry(&self.retry, "create pull request", || {
            self.scm.create(repo, &request)
        })
        .await
        {
            Ok(created) => created,
            Err(err) => match self.find_open(repo, branch).await? {
                Some(existing) => {
                    warn!(
                        repo = %repo,
                        number = existing.number,
                        error = %err,
                        "create reported failure but the pull request exists"
                    );
                    existing
                }
                None => return Err(err.into()),
            },
        };
        info!(repo = %repo, number = created.number, link = %created.link, "created pull request");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnvironmentConfig, FileChange, PromotionStrategy, PromotionTarget};
    use crate::git::{CliGitClient, SafelistCommandRunner, TokioCommandRunner};
    use crate::grouper::{combine, partition};
    use crate::locator::{RepoRef, RepositoryLocator};
    use crate::scm::FakeScmClient;

    #[test]
    fn metadata_round_trips_through_body() {
        let meta = PromotionMetadata::new("myapp", "1.2.3", vec!["staging".into(), "production".into()])
            .with_digest("abc123");
        let body = meta.body().unwrap();
        assert!(body.contains("* `staging`"));
        assert_eq!(PromotionMetadata::parse(&body), Some(meta.clone()));
        assert_eq!(
            meta.labels(),
            vec!["promote", "env/staging", "env/production"]
        );
    }

    #[test]
    fn merge_environments_keeps_order_and_dedupes() {
        let mut meta = PromotionMetadata::new("myapp", "1.2.3", vec!["production".into()]);
        meta.merge_environments(["staging", "production"]);
        assert_eq!(meta.environments, vec!["production", "staging"]);
    }

    #[test]
    fn body_without_marker_parses_to_none() {
        assert!(PromotionMetadata::parse("hand written").is_none());
    }

    #[test]
    fn marker_without_digest_still_parses() {
        let body = "<!-- promote:{\"application\":\"myapp\",\"version\":\"1.2.3\",\"environments\":[\"staging\"]} -->";
        let meta = PromotionMetadata::parse(body).unwrap();
        assert_eq!(meta.environments, vec!["staging"]);
        assert!(meta.digest.is_none());
    }

    #[test]
    fn covers_requires_matching_digest_and_environments() {
        let wanted = PromotionMetadata::new("myapp", "1.2.3", vec!["staging".into()]).with_digest("d1");
        let mut existing =
            PromotionMetadata::new("myapp", "1.2.3", vec!["production".into(), "staging".into()])
                .with_digest("d1");
        assert!(existing.covers(&wanted));

        existing.digest = Some("d0".into());
        assert!(!existing.covers(&wanted));

        existing.digest = None;
        assert!(!existing.covers(&PromotionMetadata::new("myapp", "1.2.3", vec!["staging".into()])));

        let other_env = PromotionMetadata::new("myapp", "1.2.3", vec!["qa".into()]).with_digest("d1");
        existing.digest = Some("d1".into());
        assert!(!existing.covers(&other_env));
    }

    struct Fixture {
        _origin: tempfile::TempDir,
        wc: WorkingCopy,
        group: PromotionGroup,
        publisher: PullRequestPublisher,
        scm: Arc<FakeScmClient>,
    }

    fn origin() -> tempfile::TempDir {
        crate::git::test_support::make_git_repo(&[("helmfile.yaml", "releases: []\n")])
    }

    async fn fixture() -> Fixture {
        fixture_from(origin()).await
    }

    async fn fixture_from(origin: tempfile::TempDir) -> Fixture {
        let url = origin.path().to_string_lossy().into_owned();
        let git: Arc<dyn GitClient> = Arc::new(CliGitClient::new(Arc::new(
            SafelistCommandRunner::new(Arc::new(TokioCommandRunner::default())),
        )));
        let repo = RepoRef::parse(&url).unwrap();
        let wc = RepositoryLocator::new(git.clone())
            .checkout(&repo)
            .await
            .unwrap();

        let target = PromotionTarget {
            environment: EnvironmentConfig::new("staging", "jx-staging", PromotionStrategy::Automatic)
                .with_git_url(url.clone()),
            repo,
        };
        let change = FileChange::modify("helmfile.yaml", "releases: []\n", "releases:\n- chart: dev/myapp\n  version: 1.2.3\n  name: myapp\n");
        wc.apply(&change).unwrap();
        let group = combine(
            partition(vec![target], true).remove(0),
            "promote-myapp-1.2.3-staging".into(),
            vec![("staging".into(), vec![change])],
        )
        .unwrap();

        let scm = Arc::new(FakeScmClient::new());
        let publisher = PullRequestPublisher::new(git, scm.clone(), RetryPolicy::none());
        Fixture {
            _origin: origin,
            wc,
            group,
            publisher,
            scm,
        }
    }

    #[tokio::test]
    async fn publish_creates_then_reuses_pull_request() {
        let f = fixture().await;
        let first = f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap();
        let second = f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap();

        let (PublishOutcome::Published(a), PublishOutcome::Published(b)) = (first, second) else {
            panic!("expected both publications to produce a pull request");
        };
        assert_eq!(a.number, b.number);
        let repo = f.group.repo.full_name.clone();
        assert_eq!(f.scm.pull_requests(&repo).len(), 1);
        assert_eq!(a.title, "chore: promote myapp to version 1.2.3");
        assert!(a.labels.contains(&"env/staging".to_string()));
        assert_eq!(a.head, "promote-myapp-1.2.3-staging");
        assert_eq!(a.base, "main");
    }

    #[tokio::test]
    async fn base_branch_follows_the_remote_default() {
        let origin = origin();
        crate::git::test_support::run_git(origin.path(), &["branch", "-m", "trunk"]);
        let f = fixture_from(origin).await;
        let PublishOutcome::Published(pr) =
            f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap()
        else {
            panic!("expected a pull request");
        };
        assert_eq!(pr.base, "trunk");
    }

    #[tokio::test]
    async fn explicit_base_branch_wins() {
        let mut f = fixture().await;
        f.publisher = f.publisher.clone().with_base_branch("release");
        let PublishOutcome::Published(pr) =
            f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap()
        else {
            panic!("expected a pull request");
        };
        assert_eq!(pr.base, "release");
    }

    #[tokio::test]
    async fn unchanged_rerun_leaves_pull_request_untouched() {
        let f = fixture().await;
        f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap();
        let before = f.scm.call_count();

        f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap();
        // one list, no update
        assert_eq!(f.scm.call_count() - before, 1);
    }

    #[tokio::test]
    async fn lost_create_response_adopts_the_stored_pull_request() {
        let f = fixture().await;
        f.scm.lose_create_responses(1);
        let outcome = f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap();
        let PublishOutcome::Published(pr) = outcome else {
            panic!("expected a pull request");
        };
        let repo = f.group.repo.full_name.clone();
        assert_eq!(f.scm.pull_requests(&repo).len(), 1);
        assert_eq!(pr.number, 1);
    }

    #[tokio::test]
    async fn retried_create_rejected_as_duplicate_adopts_the_first() {
        let mut f = fixture().await;
        f.publisher.retry = RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 1,
        };
        f.scm.lose_create_responses(1);
        let outcome = f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Published(ref pr) if pr.number == 1));
        let repo = f.group.repo.full_name.clone();
        assert_eq!(f.scm.pull_requests(&repo).len(), 1);
    }

    #[tokio::test]
    async fn update_merges_existing_marker_environments() {
        let f = fixture().await;
        let repo = f.group.repo.full_name.clone();
        let existing = PromotionMetadata::new("myapp", "1.2.3", vec!["production".into()]);
        f.scm
            .create(
                &repo,
                &NewPullRequest {
                    title: existing.title(),
                    body: existing.body().unwrap(),
                    head: "promote-myapp-1.2.3-staging".into(),
                    base: "main".into(),
                    labels: existing.labels(),
                },
            )
            .await
            .unwrap();

        let outcome = f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap();
        let PublishOutcome::Published(pr) = outcome else {
            panic!("expected a pull request");
        };
        let meta = PromotionMetadata::parse(&pr.body).unwrap();
        assert_eq!(meta.environments, vec!["production", "staging"]);
        assert_eq!(meta.digest, Some(f.group.mutation.digest()));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mut f = fixture().await;
        f.publisher.retry = RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 1,
        };
        f.scm.fail_next(2);
        let outcome = f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Published(_)));
    }

    #[tokio::test]
    async fn noop_group_is_unchanged() {
        let mut f = fixture().await;
        f.group.mutation.file_changes.clear();
        let outcome = f.publisher.publish(&f.wc, &f.group, "myapp", "1.2.3").await.unwrap();
        assert_eq!(outcome, PublishOutcome::Unchanged);
        assert_eq!(f.scm.call_count(), 0);
    }
}
