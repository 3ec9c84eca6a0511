//! Confirmation seam for `Manual` environments.

use async_trait::async_trait;

use crate::domain::EnvironmentConfig;

/// Asks whether a `Manual` environment should receive the promotion.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, environment: &EnvironmentConfig, application: &str, version: &str)
        -> bool;
}

/// Accepts everything; used in batch mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

#[async_trait]
impl Confirmer for AlwaysConfirm {
    async fn confirm(&self, _: &EnvironmentConfig, _: &str, _: &str) -> bool {
        true
    }
}
