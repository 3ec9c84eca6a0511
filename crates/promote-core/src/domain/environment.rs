//! Environment definitions and promotion policy.

use serde::{Deserialize, Serialize};

/// Key of the development environment. It hosts the dev GitOps repository
/// and is never a promotion target of `AllEligible` selections.
pub const DEV_ENVIRONMENT_KEY: &str = "dev";

/// Whether an environment receives new versions through promotion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionStrategy {
    Never,
    #[default]
    #[serde(alias = "Auto")]
    Automatic,
    Manual,
}

impl PromotionStrategy {
    /// `true` for strategies that take part in `AllEligible` selections.
    pub fn is_eligible(&self) -> bool {
        !matches!(self, PromotionStrategy::Never)
    }
}

/// A named deployment stage backed by a GitOps repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    /// Unique key within a requirements document (e.g. `staging`)
    pub key: String,

    /// Kubernetes namespace the environment deploys into
    #[serde(default)]
    pub namespace: String,

    /// Environment repository; empty means "deployed through the dev repository"
    #[serde(default, rename = "gitURL", alias = "gitUrl")]
    pub git_url: String,

    #[serde(default)]
    pub promotion_strategy: PromotionStrategy,
}

impl EnvironmentConfig {
    pub fn new(
        key: impl Into<String>,
        namespace: impl Into<String>,
        promotion_strategy: PromotionStrategy,
    ) -> Self {
        Self {
            key: key.into(),
            namespace: namespace.into(),
            git_url: String::new(),
            promotion_strategy,
        }
    }

    pub fn with_git_url(mut self, git_url: impl Into<String>) -> Self {
        self.git_url = git_url.into();
        self
    }

    pub fn is_development(&self) -> bool {
        self.key == DEV_ENVIRONMENT_KEY
    }

    /// Namespace, defaulting to `jx-<key>` when the document leaves it empty.
    pub fn effective_namespace(&self) -> String {
        if self.namespace.trim().is_empty() {
            format!("jx-{}", self.key)
        } else {
            self.namespace.clone()
        }
    }
}
