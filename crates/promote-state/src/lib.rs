//! Promote-State: activity record persistence for gitops-promote
//!
//! A promotion run is summarised by exactly one activity record. This crate
//! owns that record's model and the store abstraction the engine writes it
//! through.
//!
//! ## Key Components
//!
//! - `ActivityStore`: keyed, namespaced get-or-create + update store
//! - `MemoryActivityStore`: in-memory fake for tests and dry runs
//! - `SurrealActivityStore`: SurrealDB-backed persistent store

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_activity;

pub use error::{StateError, StorageError};
pub use fakes::MemoryActivityStore;
pub use storage_traits::{
    ActivityRecord, ActivityStatus, ActivityStore, PromoteStep, StepStatus, StorageResult,
};
pub use surreal_activity::SurrealActivityStore;

/// Result type for promote-state backend setup operations
pub type Result<T> = std::result::Result<T, StateError>;
