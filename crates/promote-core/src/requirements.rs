//! Requirements document: the declared environments and pinned versions.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{EnvironmentConfig, PromoteError, Result, DEV_ENVIRONMENT_KEY};

/// Default file name looked up by the CLI.
pub const DEFAULT_REQUIREMENTS_FILE: &str = "jx-requirements.yml";

/// Read-only source of environment definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementsDocument {
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,

    /// Application → version, used when no version is supplied.
    #[serde(default)]
    pub versions: BTreeMap<String, String>,
}

impl RequirementsDocument {
    pub fn new(environments: Vec<EnvironmentConfig>) -> Self {
        Self {
            environments,
            versions: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PromoteError::Requirements(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let doc: Self = serde_yaml::from_str(raw)
            .map_err(|e| PromoteError::Requirements(format!("invalid YAML: {e}")))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Keys must be non-empty and unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for env in &self.environments {
            if env.key.trim().is_empty() {
                return Err(PromoteError::Requirements(
                    "environment with empty key".to_string(),
                ));
            }
            if !seen.insert(env.key.as_str()) {
                return Err(PromoteError::Requirements(format!(
                    "duplicate environment key '{}'",
                    env.key
                )));
            }
        }
        Ok(())
    }

    pub fn find(&self, key: &str) -> Option<&EnvironmentConfig> {
        self.environments.iter().find(|e| e.key == key)
    }

    pub fn dev_environment(&self) -> Option<&EnvironmentConfig> {
        self.find(DEV_ENVIRONMENT_KEY)
    }
}
