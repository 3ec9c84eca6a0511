//! Version resolution when the caller does not supply one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::{PromoteError, Result};
use crate::requirements::RequirementsDocument;

/// Default version file name.
pub const VERSION_FILE: &str = "VERSION";

/// A source of application versions.
pub trait VersionResolver: Send + Sync {
    fn resolve(&self, application: &str) -> Result<Option<String>>;
}

/// Versions pinned in the requirements document's `versions` map.
#[derive(Debug, Clone, Default)]
pub struct RequirementsVersions {
    versions: BTreeMap<String, String>,
}

impl RequirementsVersions {
    pub fn new(doc: &RequirementsDocument) -> Self {
        Self {
            versions: doc.versions.clone(),
        }
    }
}

impl VersionResolver for RequirementsVersions {
    fn resolve(&self, application: &str) -> Result<Option<String>> {
        Ok(self
            .versions
            .get(application)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }
}

/// A plain-text file holding the version, typically `VERSION`.
#[derive(Debug, Clone)]
pub struct VersionFile {
    path: PathBuf,
}

impl VersionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(VERSION_FILE))
    }
}

impl VersionResolver for VersionFile {
    fn resolve(&self, _application: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw.trim().to_string()).filter(|v| !v.is_empty())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// The explicit version if given, else the first resolver that knows one.
pub fn resolve_version(
    explicit: Option<&str>,
    application: &str,
    resolvers: &[&dyn VersionResolver],
) -> Result<String> {
    if let Some(v) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(v.to_string());
    }
    for resolver in resolvers {
        if let Some(v) = resolver.resolve(application)? {
            return Ok(v);
        }
    }
    Err(PromoteError::MissingVersion {
        application: application.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(app: &str, version: &str) -> RequirementsDocument {
        let mut doc = RequirementsDocument::default();
        doc.versions.insert(app.to_string(), version.to_string());
        doc
    }

    #[test]
    fn explicit_version_wins() {
        let reqs = RequirementsVersions::new(&doc_with("myapp", "0.9.0"));
        let v = resolve_version(Some("1.2.3"), "myapp", &[&reqs]).unwrap();
        assert_eq!(v, "1.2.3");
    }

    #[test]
    fn requirements_before_version_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(VERSION_FILE), "2.0.0\n").unwrap();
        let reqs = RequirementsVersions::new(&doc_with("myapp", "1.5.0"));
        let file = VersionFile::in_dir(dir.path());

        assert_eq!(resolve_version(None, "myapp", &[&reqs, &file]).unwrap(), "1.5.0");
        assert_eq!(resolve_version(None, "other", &[&reqs, &file]).unwrap(), "2.0.0");
    }

    #[test]
    fn unresolvable_version_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = VersionFile::in_dir(dir.path());
        let err = resolve_version(Some("  "), "myapp", &[&file]).unwrap_err();
        assert!(matches!(err, PromoteError::MissingVersion { application } if application == "myapp"));
    }
}
