//! Error types for promote-state

use thiserror::Error;

/// Errors raised while connecting to or preparing a storage backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors surfaced through the [`crate::ActivityStore`] trait
#[derive(Error, Debug)]
pub enum StorageError {
    /// No activity exists under the given namespace/key
    #[error("activity not found: {namespace}/{key}")]
    ActivityNotFound { namespace: String, key: String },

    /// Record failed validation before being written
    #[error("invalid activity record {key}: {reason}")]
    InvalidRecord { key: String, reason: String },

    /// Backend-specific failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_not_found_names_namespace_and_key() {
        let err = StorageError::ActivityNotFound {
            namespace: "jx".to_string(),
            key: "myorg-myapp-master-1".to_string(),
        };
        assert_eq!(err.to_string(), "activity not found: jx/myorg-myapp-master-1");
    }
}
