//! gitops-promote CLI
//!
//! The `promote` command pins an application version in the GitOps
//! repositories of the selected environments and opens pull requests.
//!
//! ## Selecting environments
//!
//! - `--env <key>`: one environment, whatever its promotion strategy
//! - `--all`: every `Automatic` and `Manual` environment except `dev`
//! - `--envs a,b`: the named environments, in order

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{ArgGroup, Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn, Level};

use promote_core::requirements::DEFAULT_REQUIREMENTS_FILE;
use promote_core::{
    build_driver, resolve_version, ActivityStore, CliGitClient, CommandRunner, Confirmer,
    EnvironmentConfig, GitHubConfig, GroupOutcome, MemoryActivityStore, PollSettings,
    PromoteOptions, PromotionEngine, PromotionReport, PromotionRequest, RequirementsDocument,
    RequirementsVersions, RetryPolicy, SafelistCommandRunner, ScmKind, Selection,
    SurrealActivityStore, TokioCommandRunner, VersionFile,
};

#[derive(Parser, Debug)]
#[command(name = "promote")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"), disable_version_flag = true)]
#[command(about = "Promote an application version through GitOps environments", long_about = None)]
#[command(group(ArgGroup::new("target").required(true).args(["env", "all", "envs"])))]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON report
    #[arg(long)]
    json: bool,

    /// Promote to a single environment
    #[arg(short, long)]
    env: Option<String>,

    /// Promote to every automatic and manual environment
    #[arg(long)]
    all: bool,

    /// Promote to a comma-separated list of environments
    #[arg(long, value_delimiter = ',')]
    envs: Vec<String>,

    /// Open one pull request per environment even when repositories are shared
    #[arg(long)]
    no_group_pull_request: bool,

    /// Return once pull requests are published instead of waiting for merge
    #[arg(long)]
    no_poll: bool,

    /// Never prompt for confirmation
    #[arg(short, long)]
    batch_mode: bool,

    /// Application to promote
    #[arg(short, long, env = "APP_NAME")]
    app: String,

    /// Version to promote (default: requirements `versions`, then ./VERSION)
    #[arg(long)]
    version: Option<String>,

    /// Application source repository, used when a package reference is added
    #[arg(long, env = "APP_GIT_URL")]
    app_git_url: Option<String>,

    /// Requirements document declaring the environments
    #[arg(short, long, default_value = DEFAULT_REQUIREMENTS_FILE)]
    requirements: PathBuf,

    /// SCM driver (`github` or `fake`)
    #[arg(long, env = "PROMOTE_GIT_KIND", default_value = "github")]
    git_kind: ScmKind,

    /// Activity store backend
    #[arg(long, value_enum, default_value = "surreal")]
    store: StoreKind,

    /// Namespace of the activity record
    #[arg(short, long, env = "PROMOTE_NAMESPACE", default_value = "jx")]
    namespace: String,

    /// Pipeline identifier stamped on the activity record
    #[arg(long, env = "PIPELINE_NAME")]
    pipeline: Option<String>,

    /// Build identifier stamped on the activity record
    #[arg(long, env = "BUILD_NUMBER")]
    build: Option<String>,

    /// Seconds to wait for merge and pipelines before giving up
    #[arg(long, default_value_t = 3600)]
    timeout: u64,

    /// Seconds between pull request status checks
    #[arg(long, default_value_t = 20)]
    poll_interval: u64,

    /// Chart repository alias used in new helmfile releases
    #[arg(long, default_value = "dev")]
    chart_repo: String,

    /// Branch promotion pull requests target (default: the repository's
    /// default branch)
    #[arg(long)]
    base_branch: Option<String>,

    /// Directory for working copies (default: system temp directory)
    #[arg(long)]
    work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Process-local store, discarded on exit
    Memory,
    /// SurrealDB (`PROMOTE_SURREALDB_URL`, default local surrealkv)
    Surreal,
}

impl Cli {
    fn selection(&self) -> Selection {
        if let Some(env) = &self.env {
            Selection::SingleEnvironment(env.clone())
        } else if self.all {
            Selection::AllEligible
        } else {
            Selection::ExplicitSet(self.envs.clone())
        }
    }

    fn request(&self, version: String) -> PromotionRequest {
        let mut request = PromotionRequest::new(&self.app, version, self.selection())
            .with_grouping(!self.no_group_pull_request)
            .with_poll(!self.no_poll)
            .with_batch(self.batch_mode)
            .with_namespace(&self.namespace);
        if let Some(url) = &self.app_git_url {
            request = request.with_app_git_url(url);
        }
        request.pipeline = self.pipeline.clone();
        request.build = self.build.clone();
        request
    }

    fn options(&self) -> PromoteOptions {
        PromoteOptions {
            chart_repo: self.chart_repo.clone(),
            base_branch: self.base_branch.clone(),
            work_dir: self.work_dir.clone(),
            poll: PollSettings {
                interval: Duration::from_secs(self.poll_interval.max(1)),
                timeout: Duration::from_secs(self.timeout),
            },
            retry: RetryPolicy::default(),
        }
    }
}

/// Prompts on the terminal for each `Manual` environment.
struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(
        &self,
        environment: &EnvironmentConfig,
        application: &str,
        version: &str,
    ) -> bool {
        let prompt = format!(
            "Promote {application} {version} to {}? [y/N] ",
            environment.key
        );
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{prompt}");
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;
        matches!(answer, Ok(Ok(line)) if is_yes(&line))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    promote_core::init_tracing(cli.json, level);

    let report = cmd_promote(&cli).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }

    if let Some(err) = &report.activity_error {
        anyhow::bail!("activity {} was not recorded: {}", report.activity.key, err);
    }
    if !report.succeeded() {
        anyhow::bail!(
            "promotion {} failed for {} of {} group(s)",
            report.activity.key,
            report.failed_groups().len(),
            report.outcomes.len()
        );
    }
    Ok(())
}

async fn cmd_promote(cli: &Cli) -> Result<PromotionReport> {
    let doc = RequirementsDocument::load(&cli.requirements)
        .with_context(|| format!("Failed to load {}", cli.requirements.display()))?;

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let version = resolve_version(
        cli.version.as_deref(),
        &cli.app,
        &[&RequirementsVersions::new(&doc), &VersionFile::in_dir(&cwd)],
    )?;
    let request = cli.request(version);

    let driver = build_driver(cli.git_kind, GitHubConfig::from_env())
        .with_context(|| format!("Failed to build {} SCM driver", cli.git_kind))?;
    let store = open_store(cli.store).await?;

    // With the fake driver nothing leaves the machine: git only clones and
    // inspects.
    let runner: Arc<dyn CommandRunner> = match cli.git_kind {
        ScmKind::Fake => Arc::new(SafelistCommandRunner::new(Arc::new(
            TokioCommandRunner::default(),
        ))),
        ScmKind::GitHub => Arc::new(TokioCommandRunner::default()),
    };
    let git = Arc::new(CliGitClient::new(runner));

    let mut engine = PromotionEngine::new(git, driver.client, store).with_options(cli.options());
    if let Some(pipelines) = driver.pipelines {
        engine = engine.with_pipeline_tracker(pipelines);
    }
    if !cli.batch_mode {
        engine = engine.with_confirmer(Arc::new(StdinConfirmer));
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling; open pull requests are left as they are");
            let _ = cancel_tx.send(true);
        }
    });

    info!(
        app = %request.application,
        version = %request.version,
        activity = %request.activity_key(),
        "starting promotion"
    );
    engine
        .run(&doc, &request, cancel_rx)
        .await
        .context("Promotion aborted")
}

async fn open_store(kind: StoreKind) -> Result<Arc<dyn ActivityStore>> {
    Ok(match kind {
        StoreKind::Memory => Arc::new(MemoryActivityStore::new()),
        StoreKind::Surreal => Arc::new(
            SurrealActivityStore::from_env()
                .await
                .context("Failed to connect to activity store")?,
        ),
    })
}

fn render_report(report: &PromotionReport) -> String {
    let mut out = format!(
        "activity {}/{}: {}\n",
        report.activity.namespace, report.activity.key, report.activity.status
    );
    for (summary, outcome) in &report.outcomes {
        let result = match outcome {
            GroupOutcome::Succeeded { kind, .. } => format!("{kind:?}"),
            GroupOutcome::Failed { kind, reason, .. } => format!("{kind}: {reason}"),
        };
        let link = outcome
            .pull_request()
            .map(|pr| pr.link.as_str())
            .unwrap_or("-");
        out.push_str(&format!(
            "  {:<60} {:<24} {:<60} {}\n",
            summary.repo_url,
            summary.environments.join(","),
            link,
            result
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use promote_core::{ActivityRecord, FailureKind, GroupSummary, SuccessKind};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("promote").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn single_environment_selection() {
        let cli = parse(&["--app", "myapp", "--env", "staging"]);
        assert_eq!(
            cli.selection(),
            Selection::SingleEnvironment("staging".to_string())
        );
    }

    #[test]
    fn explicit_set_keeps_order() {
        let cli = parse(&["--app", "myapp", "--envs", "production,staging"]);
        assert_eq!(
            cli.selection(),
            Selection::ExplicitSet(vec!["production".to_string(), "staging".to_string()])
        );
    }

    #[test]
    fn a_selection_flag_is_required() {
        let err = Cli::try_parse_from(["promote", "--app", "myapp"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn selection_flags_are_exclusive() {
        assert!(Cli::try_parse_from(["promote", "--app", "myapp", "--all", "--env", "staging"])
            .is_err());
    }

    #[test]
    fn flags_map_onto_the_request() {
        let cli = parse(&[
            "--app",
            "myapp",
            "--all",
            "--no-group-pull-request",
            "--no-poll",
            "--batch-mode",
            "--app-git-url",
            "https://github.com/myorg/myapp.git",
            "--pipeline",
            "myorg/myapp/master",
            "--build",
            "1",
        ]);
        let request = cli.request("1.2.3".to_string());

        assert_eq!(request.selection, Selection::AllEligible);
        assert!(!request.group_pull_requests);
        assert!(!request.poll);
        assert!(request.batch);
        assert_eq!(
            request.app_git_url.as_deref(),
            Some("https://github.com/myorg/myapp.git")
        );
        assert_eq!(request.activity_key(), "myorg-myapp-master-1");
        assert_eq!(request.namespace, "jx");
    }

    #[test]
    fn defaults_map_onto_options() {
        let cli = parse(&["--app", "myapp", "--all", "--git-kind", "fake"]);
        let options = cli.options();

        assert_eq!(cli.git_kind, ScmKind::Fake);
        assert_eq!(cli.store, StoreKind::Surreal);
        assert_eq!(cli.requirements, PathBuf::from("jx-requirements.yml"));
        assert_eq!(options.poll.interval, Duration::from_secs(20));
        assert_eq!(options.poll.timeout, Duration::from_secs(3600));
        assert_eq!(options.chart_repo, "dev");
        assert!(options.base_branch.is_none());

        let cli = parse(&["--app", "myapp", "--all", "--base-branch", "release"]);
        assert_eq!(cli.options().base_branch.as_deref(), Some("release"));
    }

    #[test]
    fn unknown_git_kind_is_rejected() {
        assert!(
            Cli::try_parse_from(["promote", "--app", "a", "--all", "--git-kind", "svn"]).is_err()
        );
    }

    #[test]
    fn confirmation_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("nope"));
    }

    #[test]
    fn report_lists_each_group() {
        let report = PromotionReport {
            activity: ActivityRecord::running("jx", "myorg-myapp-master-1", "myapp", "1.2.3"),
            outcomes: vec![
                (
                    GroupSummary {
                        repo_url: "https://github.com/org/env-a".to_string(),
                        environments: vec!["staging".to_string()],
                    },
                    GroupOutcome::succeeded(SuccessKind::Unchanged, None),
                ),
                (
                    GroupSummary {
                        repo_url: "https://github.com/org/env-b".to_string(),
                        environments: vec!["production".to_string()],
                    },
                    GroupOutcome::failed(FailureKind::UnsupportedLayout, "no layout", None),
                ),
            ],
            activity_error: None,
        };

        let rendered = render_report(&report);
        assert!(rendered.starts_with("activity jx/myorg-myapp-master-1: Running\n"));
        assert!(rendered.contains("env-a"));
        assert!(rendered.contains("Unchanged"));
        assert!(rendered.contains("unsupported_layout: no layout"));
    }
}
