//! Repository location: environment → git remote → working copy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::debug;

use crate::domain::{EnvironmentConfig, FileChange, PromoteError, PromotionTarget, Result};
use crate::git::GitClient;
use crate::requirements::RequirementsDocument;

/// A git remote and its `owner/name` on the SCM provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub url: String,
    pub full_name: String,
}

impl RepoRef {
    /// Parse https, ssh, scp-like (`git@host:owner/name`) and local path URLs.
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        let invalid = || PromoteError::InvalidGitUrl {
            url: url.to_string(),
        };
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let path = if let Some((_, rest)) = trimmed.split_once("://") {
            // scheme://[user@]host/owner/name; file:// has an empty host
            rest.split_once('/').map(|(_, p)| p).ok_or_else(invalid)?
        } else if let Some((host, rest)) = trimmed.split_once(':') {
            if host.contains('/') {
                trimmed
            } else {
                rest
            }
        } else {
            trimmed
        };

        let segments: Vec<&str> = path
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if segments.len() < 2 {
            return Err(invalid());
        }
        let full_name = segments[segments.len() - 2..].join("/");

        Ok(Self {
            url: trimmed.to_string(),
            full_name,
        })
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Resolves environments to repositories and clones working copies.
#[derive(Clone)]
pub struct RepositoryLocator {
    git: Arc<dyn GitClient>,
    work_root: Option<PathBuf>,
}

impl RepositoryLocator {
    pub fn new(git: Arc<dyn GitClient>) -> Self {
        Self {
            git,
            work_root: None,
        }
    }

    /// Clone under `root` instead of the system temp directory.
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Pair each environment with its repository.
    ///
    /// An empty `gitURL` falls back to the development environment's
    /// repository; when that is empty too the whole run is rejected.
    pub fn locate(
        &self,
        doc: &RequirementsDocument,
        environments: Vec<EnvironmentConfig>,
    ) -> Result<Vec<PromotionTarget>> {
        let dev_url = doc
            .dev_environment()
            .map(|d| d.git_url.trim())
            .filter(|u| !u.is_empty());

        environments
            .into_iter()
            .map(|environment| {
                let url = match environment.git_url.trim() {
                    "" => dev_url.ok_or_else(|| PromoteError::MissingGitUrl {
                        environment: environment.key.clone(),
                    })?,
                    url => url,
                };
                let repo = RepoRef::parse(url)?;
                debug!(environment = %environment.key, repo = %repo.url, "located");
                Ok(PromotionTarget { environment, repo })
            })
            .collect()
    }

    /// Fresh clone of `repo`, removed when the handle is dropped.
    pub async fn checkout(&self, repo: &RepoRef) -> Result<WorkingCopy> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("promote-");
        let dir = match &self.work_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let root = dir.path().join("repo");
        self.git.clone_repo(&repo.url, &root).await?;
        Ok(WorkingCopy {
            _dir: dir,
            root,
            repo: repo.clone(),
        })
    }
}

/// A cloned repository on disk.
#[derive(Debug)]
pub struct WorkingCopy {
    _dir: TempDir,
    root: PathBuf,
    repo: RepoRef,
}

impl WorkingCopy {
    /// Wrap an existing directory. The caller owns its lifetime.
    pub fn open(dir: TempDir, root: PathBuf, repo: RepoRef) -> Self {
        Self {
            _dir: dir,
            root,
            repo,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    pub fn exists(&self, rel: impl AsRef<Path>) -> bool {
        self.root.join(rel).exists()
    }

    /// File contents, or `None` when the file does not exist.
    pub fn read(&self, rel: impl AsRef<Path>) -> Result<Option<String>> {
        match std::fs::read_to_string(self.root.join(rel)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `change.new`, creating parent directories.
    pub fn apply(&self, change: &FileChange) -> Result<()> {
        let full = self.root.join(&change.path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, &change.new)?;
        Ok(())
    }

    /// Relative paths of every file named `name`, sorted, skipping `.git`.
    pub fn find_files(&self, name: &str) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    if entry.file_name() != ".git" {
                        stack.push(path);
                    }
                } else if entry.file_name() == name {
                    if let Ok(rel) = path.strip_prefix(&self.root) {
                        found.push(rel.to_path_buf());
                    }
                }
            }
        }
        found.sort();
        Ok(found)
    }
}
