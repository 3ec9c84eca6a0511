//! SurrealDB schema migrations and initialization

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all promote-state tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing promote-state SurrealDB schema");
    init_activities_table(db).await?;
    info!("promote-state schema initialization complete");
    Ok(())
}

/// Initialize `activities` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE activities {
///   namespace:     STRING
///   key:           STRING (unique together with namespace)
///   pipeline:      STRING?
///   build:         STRING?
///   application:   STRING
///   version:       STRING
///   git_url:       STRING?
///   status:        STRING (Running | Succeeded | Failed)
///   steps:         ARRAY<OBJECT>
///   started_at:    DATETIME
///   completed_at:  DATETIME?
/// }
/// ```
///
/// Records are never deleted; a run rewrites its own record in place.
async fn init_activities_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing activities table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS activities AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        -- One activity per (namespace, key)
        DEFINE INDEX IF NOT EXISTS idx_namespace_key ON TABLE activities COLUMNS namespace, key UNIQUE;

        -- Index namespace for listing
        DEFINE INDEX IF NOT EXISTS idx_namespace ON TABLE activities COLUMNS namespace;
    "#;

    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| crate::StateError::SchemaSetup(e.to_string()))?;
    info!("activities table initialized");
    Ok(())
}
