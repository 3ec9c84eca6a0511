//! SurrealDB row types for promote-state
//!
//! Rows are converted to/from `storage_traits` types at the store boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{ActivityRecord, ActivityStatus, PromoteStep, StorageResult};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Activity row as stored in the `activities` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRow {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    pub namespace: String,
    pub key: String,
    pub pipeline: Option<String>,
    pub build: Option<String>,
    pub application: String,
    pub version: String,
    pub git_url: Option<String>,
    /// "Running" | "Succeeded" | "Failed"
    pub status: String,
    pub steps: Vec<PromoteStep>,
    #[serde(with = "surreal_datetime")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActivityRow {
    /// Build a row from a record, keeping the given database identity.
    pub fn from_record(record: &ActivityRecord, id: Option<surrealdb::sql::Thing>) -> Self {
        ActivityRow {
            id,
            namespace: record.namespace.clone(),
            key: record.key.clone(),
            pipeline: record.pipeline.clone(),
            build: record.build.clone(),
            application: record.application.clone(),
            version: record.version.clone(),
            git_url: record.git_url.clone(),
            status: record.status.as_str().to_string(),
            steps: record.steps.clone(),
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }

    pub fn into_record(self) -> StorageResult<ActivityRecord> {
        let status = match self.status.as_str() {
            "Running" => ActivityStatus::Running,
            "Succeeded" => ActivityStatus::Succeeded,
            "Failed" => ActivityStatus::Failed,
            other => {
                return Err(StorageError::Backend(format!(
                    "unknown activity status: {other}"
                )))
            }
        };
        Ok(ActivityRecord {
            namespace: self.namespace,
            key: self.key,
            pipeline: self.pipeline,
            build: self.build,
            application: self.application,
            version: self.version,
            git_url: self.git_url,
            status,
            steps: self.steps,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_round_trips_status() {
        let mut record = ActivityRecord::running("jx", "k", "myapp", "1.0.0");
        record.status = ActivityStatus::Failed;
        record.completed_at = Some(Utc::now());
        let row = ActivityRow::from_record(&record, None);
        assert_eq!(row.status, "Failed");
        let back = row.into_record().unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn unknown_status_is_backend_error() {
        let record = ActivityRecord::running("jx", "k", "myapp", "1.0.0");
        let mut row = ActivityRow::from_record(&record, None);
        row.status = "Pending".to_string();
        assert!(matches!(row.into_record(), Err(StorageError::Backend(_))));
    }
}
