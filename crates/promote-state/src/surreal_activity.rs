//! SurrealDB-backed ActivityStore implementation
//!
//! Uses `schema::ActivityRow` for persistence, converting to/from
//! `storage_traits` types at the boundary.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::ActivityRow;
use crate::storage_traits::{ActivityRecord, ActivityStore, StorageResult};

/// Environment variable naming the SurrealDB endpoint for activity records.
pub const SURREALDB_URL_ENV: &str = "PROMOTE_SURREALDB_URL";

/// Local persistence directory used when no endpoint is configured.
pub const DEFAULT_DB_PATH: &str = ".promote/db";

/// SurrealDB-backed implementation of [`ActivityStore`].
pub struct SurrealActivityStore {
    db: Surreal<Any>,
}

impl SurrealActivityStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `promote/main`, and runs `init_schema`.
    pub async fn in_memory() -> crate::Result<Self> {
        let store = Self::connect("mem://").await?;
        info!("SurrealActivityStore connected (in-memory)");
        Ok(store)
    }

    /// Connect to an explicit endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {url}: {e}")))?;

        db.use_ns("promote")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    /// Create from environment variables.
    ///
    /// Uses `PROMOTE_SURREALDB_URL` when set, otherwise local persistence in
    /// `.promote/db`.
    pub async fn from_env() -> crate::Result<Self> {
        if let Ok(url) = std::env::var(SURREALDB_URL_ENV) {
            let store = Self::connect(&url).await?;
            info!("SurrealActivityStore connected ({})", url);
            return Ok(store);
        }

        std::fs::create_dir_all(DEFAULT_DB_PATH).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                DEFAULT_DB_PATH, e
            ))
        })?;
        let url = format!("surrealkv://{}", DEFAULT_DB_PATH);
        info!(
            "No {} found, using local persistence: {}",
            SURREALDB_URL_ENV, url
        );
        Self::connect(&url).await
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_row(&self, namespace: &str, key: &str) -> StorageResult<Option<ActivityRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM activities WHERE namespace = $ns AND key = $key")
            .bind(("ns", namespace.to_string()))
            .bind(("key", key.to_string()))
            .await
            .and_then(|res| res.check())
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<ActivityRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ActivityStore for SurrealActivityStore {
    async fn get_or_create(&self, template: ActivityRecord) -> StorageResult<ActivityRecord> {
        template.validate()?;

        if let Some(row) = self.fetch_row(&template.namespace, &template.key).await? {
            return row.into_record();
        }

        debug!(namespace = %template.namespace, key = %template.key, "creating activity");
        let created: Result<Option<ActivityRow>, _> = self
            .db
            .create("activities")
            .content(ActivityRow::from_record(&template, None))
            .await;

        match created {
            Ok(_) => Ok(template),
            // Lost a create race against the unique index: return the winner.
            Err(e) => match self.fetch_row(&template.namespace, &template.key).await? {
                Some(row) => row.into_record(),
                None => Err(StorageError::Backend(e.to_string())),
            },
        }
    }

    async fn update(&self, record: &ActivityRecord) -> StorageResult<()> {
        record.validate()?;

        let existing = self
            .fetch_row(&record.namespace, &record.key)
            .await?
            .ok_or_else(|| StorageError::ActivityNotFound {
                namespace: record.namespace.clone(),
                key: record.key.clone(),
            })?;

        let row = ActivityRow::from_record(record, existing.id);
        self.db
            .query("UPDATE activities CONTENT $row WHERE namespace = $ns AND key = $key")
            .bind(("row", row))
            .bind(("ns", record.namespace.clone()))
            .bind(("key", record.key.clone()))
            .await
            .and_then(|res| res.check())
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<ActivityRecord>> {
        self.fetch_row(namespace, key)
            .await?
            .map(ActivityRow::into_record)
            .transpose()
    }

    async fn list(&self, namespace: &str) -> StorageResult<Vec<ActivityRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM activities WHERE namespace = $ns ORDER BY key ASC")
            .bind(("ns", namespace.to_string()))
            .await
            .and_then(|res| res.check())
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<ActivityRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(ActivityRow::into_record).collect()
    }
}
