//! Repository mutations: the file edits that pin an application version.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One whole-file edit, relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: PathBuf,
    /// Content before the edit; `None` when the file is created.
    pub old: Option<String>,
    pub new: String,
}

impl FileChange {
    pub fn modify(path: impl Into<PathBuf>, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            old: Some(old.into()),
            new: new.into(),
        }
    }

    pub fn create(path: impl Into<PathBuf>, new: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            old: None,
            new: new.into(),
        }
    }
}

/// The complete change one promotion makes to one repository.
///
/// Fully determined by its inputs: promoting the same application and version
/// twice yields identical mutations, and an already pinned repository yields
/// an empty `file_changes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMutation {
    pub target_repo_url: String,
    pub branch_name: String,
    pub file_changes: Vec<FileChange>,
}

impl RepositoryMutation {
    pub fn new(target_repo_url: impl Into<String>, branch_name: impl Into<String>) -> Self {
        Self {
            target_repo_url: target_repo_url.into(),
            branch_name: branch_name.into(),
            file_changes: Vec::new(),
        }
    }

    pub fn with_changes(mut self, changes: Vec<FileChange>) -> Self {
        self.file_changes = changes;
        self
    }

    pub fn is_noop(&self) -> bool {
        self.file_changes.is_empty()
    }

    /// SHA-256 over every `(path, new)` pair, in order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for change in &self.file_changes {
            hasher.update(change.path.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(change.new.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Deterministic promotion branch name.
///
/// Environment keys are sorted and deduplicated so the same promotion always
/// lands on the same branch.
pub fn branch_name<S: AsRef<str>>(application: &str, version: &str, env_keys: &[S]) -> String {
    let mut keys: Vec<&str> = env_keys.iter().map(AsRef::as_ref).collect();
    keys.sort_unstable();
    keys.dedup();

    let raw = format!("promote-{}-{}-{}", application, version, keys.join("-"));
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
        } else {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}
