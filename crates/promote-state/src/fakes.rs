//! In-memory fakes for storage traits (tests and dry runs)
//!
//! Provides `MemoryActivityStore`, which satisfies the [`ActivityStore`]
//! contract without any external dependencies.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory activity store backed by a `BTreeMap<(namespace, key), record>`.
///
/// Update failures can be injected with [`MemoryActivityStore::set_fail_updates`]
/// to exercise the best-effort activity reporting path.
#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    records: Mutex<BTreeMap<(String, String), ActivityRecord>>,
    fail_updates: AtomicBool,
    updates: AtomicUsize,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<(String, String), ActivityRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every subsequent `update` call fail with a backend error.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `update` calls so far.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Total number of records across all namespaces.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn get_or_create(&self, template: ActivityRecord) -> StorageResult<ActivityRecord> {
        template.validate()?;
        let mut records = self.records();
        let record = records
            .entry((template.namespace.clone(), template.key.clone()))
            .or_insert(template);
        Ok(record.clone())
    }

    async fn update(&self, record: &ActivityRecord) -> StorageResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(
                "injected update failure".to_string(),
            ));
        }
        record.validate()?;
        let mut records = self.records();
        let slot = records
            .get_mut(&(record.namespace.clone(), record.key.clone()))
            .ok_or_else(|| StorageError::ActivityNotFound {
                namespace: record.namespace.clone(),
                key: record.key.clone(),
            })?;
        *slot = record.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<ActivityRecord>> {
        let records = self.records();
        Ok(records
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn list(&self, namespace: &str) -> StorageResult<Vec<ActivityRecord>> {
        let records = self.records();
        Ok(records
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, record)| record.clone())
            .collect())
    }
}
