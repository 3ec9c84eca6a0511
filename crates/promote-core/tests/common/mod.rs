//! Shared fixtures for engine integration tests.
//!
//! Environment repositories are real git repositories in temp directories.
//! `FixtureGitClient` maps the remote URLs in the requirements document onto
//! them, and everything else goes through the production git client.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use promote_core::git::GitError;
use promote_core::{
    CliGitClient, CommandRunner, FakeScmClient, GitClient, MemoryActivityStore, PollSettings,
    PromoteOptions, PromotionEngine, RetryPolicy, SafelistCommandRunner, TokioCommandRunner,
};

pub const DEV_URL: &str = "https://github.com/jenkins-x-labs-bdd-tests/jx3-kubernetes-jenkins";
pub const DEV_FULL_NAME: &str = "jenkins-x-labs-bdd-tests/jx3-kubernetes-jenkins";
pub const HELMFILE_URL: &str = "https://github.com/jenkins-x/default-environment-helmfile";
pub const HELMFILE_FULL_NAME: &str = "jenkins-x/default-environment-helmfile";
pub const MAKEFILE_URL: &str = "https://github.com/jstrachan/env-test-promote-makefile";
pub const MAKEFILE_FULL_NAME: &str = "jstrachan/env-test-promote-makefile";
pub const PLAIN_URL: &str = "https://github.com/myorg/plain-repo";
pub const APP_GIT_URL: &str = "https://github.com/myorg/myapp.git";

pub const DEV_ROOT_HELMFILE: &str = "helmfiles:\n- path: helmfiles/jx/helmfile.yaml\n";
pub const DEV_JX_HELMFILE: &str =
    "namespace: jx\nreleases:\n- chart: jx3/jx-verify\n  version: 0.1.0\n  name: jx-verify\n";

pub const STAGING_HELMFILE: &str = "\
namespace: jx-staging
repositories:
- name: dev
  url: https://charts.example.com
releases:
- chart: dev/myapp
  version: 1.0.0
  name: myapp
";

pub const MAKEFILE: &str = "\
FETCH_DIR := build/base

fetch: init
\tkpt pkg get https://github.com/myorg/myapp.git/charts/myapp@v1.0.0 $(FETCH_DIR)/namespaces/jx-staging

build:
\tkustomize build $(FETCH_DIR)
";

pub fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn make_git_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "-q", "-b", "main"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    for (path, content) in files {
        let full = dir.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
    run_git(dir.path(), &["add", "-A"]);
    run_git(dir.path(), &["commit", "-q", "--allow-empty", "-m", "initial"]);
    dir
}

/// Clones fixture repositories in place of their remote URLs.
pub struct FixtureGitClient {
    inner: CliGitClient,
    remotes: HashMap<String, PathBuf>,
}

#[async_trait]
impl GitClient for FixtureGitClient {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        let local = self
            .remotes
            .get(url)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string());
        self.inner.clone_repo(&local, dest).await
    }

    async fn default_branch(&self, dir: &Path) -> Result<String, GitError> {
        self.inner.default_branch(dir).await
    }

    async fn status_porcelain(&self, dir: &Path) -> Result<String, GitError> {
        self.inner.status_porcelain(dir).await
    }

    async fn checkout_branch(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        self.inner.checkout_branch(dir, branch).await
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> Result<(), GitError> {
        self.inner.commit_all(dir, message).await
    }

    async fn push(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        self.inner.push(dir, branch).await
    }
}

/// Fixture repositories plus the fakes an engine is built from.
pub struct Harness {
    pub repos: HashMap<String, tempfile::TempDir>,
    pub scm: Arc<FakeScmClient>,
    pub store: Arc<MemoryActivityStore>,
    pub runner: Arc<dyn CommandRunner>,
    pub work_dir: tempfile::TempDir,
}

impl Harness {
    /// Harness whose git commands only clone and inspect; commits and pushes
    /// are skipped.
    pub fn safelisted() -> Self {
        Self::with_runner(Arc::new(SafelistCommandRunner::new(Arc::new(
            TokioCommandRunner::default(),
        ))))
    }

    /// Harness that really commits and pushes to the fixture repositories.
    pub fn pushing() -> Self {
        Self::with_runner(Arc::new(TokioCommandRunner::default()))
    }

    fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            repos: HashMap::new(),
            scm: Arc::new(FakeScmClient::new()),
            store: Arc::new(MemoryActivityStore::new()),
            runner,
            work_dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn repo(mut self, url: &str, files: &[(&str, &str)]) -> Self {
        self.repos.insert(url.to_string(), make_git_repo(files));
        self
    }

    /// The dev repository in nested helmfile layout.
    pub fn dev_repo(self) -> Self {
        self.repo(
            DEV_URL,
            &[
                ("helmfile.yaml", DEV_ROOT_HELMFILE),
                ("helmfiles/jx/helmfile.yaml", DEV_JX_HELMFILE),
            ],
        )
    }

    pub fn path_of(&self, url: &str) -> &Path {
        self.repos[url].path()
    }

    pub fn git(&self) -> Arc<dyn GitClient> {
        Arc::new(FixtureGitClient {
            inner: CliGitClient::new(self.runner.clone()),
            remotes: self
                .repos
                .iter()
                .map(|(url, dir)| (url.clone(), dir.path().to_path_buf()))
                .collect(),
        })
    }

    pub fn options(&self) -> PromoteOptions {
        PromoteOptions {
            work_dir: Some(self.work_dir.path().to_path_buf()),
            poll: PollSettings {
                interval: Duration::from_millis(20),
                timeout: Duration::from_secs(10),
            },
            retry: RetryPolicy {
                max_retries: 3,
                backoff_base_ms: 1,
            },
            ..PromoteOptions::default()
        }
    }

    pub fn engine(&self) -> PromotionEngine {
        PromotionEngine::new(self.git(), self.scm.clone(), self.store.clone())
            .with_options(self.options())
    }

    pub fn tracking_engine(&self) -> PromotionEngine {
        self.engine().with_pipeline_tracker(self.scm.clone())
    }

    /// Merge the first pull request that shows up on `repo` with `sha`.
    pub fn merge_when_opened(
        &self,
        repo: &'static str,
        sha: &'static str,
    ) -> tokio::task::JoinHandle<()> {
        let scm = self.scm.clone();
        tokio::spawn(async move {
            loop {
                if let Some(pr) = scm.pull_requests(repo).first() {
                    scm.merge(repo, pr.number, sha).unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    }
}
