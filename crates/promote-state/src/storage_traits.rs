//! Storage trait definitions for promote-state
//!
//! One promotion run is summarised by a single [`ActivityRecord`], addressed
//! by `(namespace, key)`. The engine only ever needs get-or-create and update
//! semantics, so that is all the [`ActivityStore`] trait offers.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ActivityRecord
// ---------------------------------------------------------------------------

/// Aggregate status of a promotion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityStatus {
    Running,
    Succeeded,
    Failed,
}

impl ActivityStatus {
    /// `true` once the activity reached `Succeeded` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActivityStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Running => "Running",
            ActivityStatus::Succeeded => "Succeeded",
            ActivityStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of one promote step (one pull request group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// One promote step: the outcome of a single repository group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoteStep {
    /// Environment repository URL
    pub repository: String,
    /// Environment keys promoted through this step
    pub environments: Vec<String>,
    /// Pull request link, absent when no mutation was needed
    pub pull_request_url: Option<String>,
    /// Terminal step status
    pub status: StepStatus,
    /// Failure (or skip) reason
    pub reason: Option<String>,
}

/// The single activity record written per promotion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Namespace the record lives in (e.g. the dev namespace `jx`)
    pub namespace: String,
    /// Unique key within the namespace (e.g. `myorg-myapp-master-1`)
    pub key: String,
    /// Pipeline identifier stamped by the caller
    pub pipeline: Option<String>,
    /// Build identifier stamped by the caller
    pub build: Option<String>,
    /// Application being promoted
    pub application: String,
    /// Version being promoted
    pub version: String,
    /// Application source repository
    pub git_url: Option<String>,
    /// Aggregate status
    pub status: ActivityStatus,
    /// Per-group steps in reporting order
    pub steps: Vec<PromoteStep>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActivityRecord {
    /// Create a new `Running` record with no steps.
    pub fn running(
        namespace: impl Into<String>,
        key: impl Into<String>,
        application: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            pipeline: None,
            build: None,
            application: application.into(),
            version: version.into(),
            git_url: None,
            status: ActivityStatus::Running,
            steps: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub(crate) fn validate(&self) -> StorageResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(StorageError::InvalidRecord {
                key: self.key.clone(),
                reason: "namespace must not be empty".to_string(),
            });
        }
        if self.key.trim().is_empty() {
            return Err(StorageError::InvalidRecord {
                key: self.key.clone(),
                reason: "key must not be empty".to_string(),
            });
        }
        if self.status.is_terminal() != self.completed_at.is_some() {
            return Err(StorageError::InvalidRecord {
                key: self.key.clone(),
                reason: format!(
                    "status {} inconsistent with completed_at {:?}",
                    self.status, self.completed_at
                ),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ActivityStore
// ---------------------------------------------------------------------------

/// Keyed, namespaced activity record store.
///
/// Guarantees:
/// - `get_or_create` never creates a second record for an existing
///   `(namespace, key)`; it returns the stored one instead.
/// - `update` replaces the stored record wholesale and fails with
///   `ActivityNotFound` when nothing was created first.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Return the record stored under `template`'s namespace/key, creating it
    /// from `template` when absent.
    async fn get_or_create(&self, template: ActivityRecord) -> StorageResult<ActivityRecord>;

    /// Replace an existing record.
    async fn update(&self, record: &ActivityRecord) -> StorageResult<()>;

    /// Fetch a record by namespace and key.
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<ActivityRecord>>;

    /// List every record in a namespace, ordered by key.
    async fn list(&self, namespace: &str) -> StorageResult<Vec<ActivityRecord>>;
}
