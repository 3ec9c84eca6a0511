//! kpt layout: one package per application, pinned by `upstream.git.ref` in
//! its `Kptfile`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use super::{
    join_lines, replace_value, split_yaml_entry, styled_version, unquote, MutationContext,
    RepositoryLayout,
};
use crate::domain::{FileChange, Result};
use crate::locator::WorkingCopy;

const KPTFILE: &str = "Kptfile";

#[derive(Debug, Default, Deserialize)]
struct KptfileHeader {
    #[serde(default)]
    metadata: KptMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct KptMetadata {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KptLayout;

impl KptLayout {
    /// Kptfiles belonging to the application, by `metadata.name` or by the
    /// package directory name.
    fn packages(wc: &WorkingCopy, application: &str) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for path in wc.find_files(KPTFILE)? {
            let dir_matches = path
                .parent()
                .and_then(Path::file_name)
                .map(|n| n == application)
                .unwrap_or(false);
            let name_matches = match wc.read(&path)? {
                Some(raw) => match serde_yaml::from_str::<KptfileHeader>(&raw) {
                    Ok(header) => header.metadata.name == application,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable Kptfile");
                        false
                    }
                },
                None => false,
            };
            if dir_matches || name_matches {
                found.push(path);
            }
        }
        Ok(found)
    }
}

impl RepositoryLayout for KptLayout {
    fn name(&self) -> &'static str {
        "kpt"
    }

    fn detect(&self, wc: &WorkingCopy, ctx: &MutationContext<'_>) -> Result<bool> {
        Ok(!Self::packages(wc, ctx.application)?.is_empty())
    }

    fn mutate(&self, wc: &WorkingCopy, ctx: &MutationContext<'_>) -> Result<Vec<FileChange>> {
        let namespace = ctx.namespace();
        let packages = Self::packages(wc, ctx.application)?;
        let in_namespace: Vec<PathBuf> = packages
            .iter()
            .filter(|p| p.components().any(|c| c.as_os_str() == namespace.as_str()))
            .cloned()
            .collect();
        let selected = if in_namespace.is_empty() {
            packages
        } else {
            in_namespace
        };

        let mut changes = Vec::new();
        for path in selected {
            if let Some(old) = wc.read(&path)? {
                if let Some(new) = pin_ref(&old, ctx.version) {
                    changes.push(FileChange::modify(path, old, new));
                }
            }
        }
        Ok(changes)
    }
}

/// Rewrite every `ref:` entry to `version`. `None` when all already match.
fn pin_ref(content: &str, version: &str) -> Option<String> {
    let trailing = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(String::from).collect();
    let mut changed = false;

    for line in lines.iter_mut() {
        let Some((_, "ref", raw, _)) = split_yaml_entry(line) else {
            continue;
        };
        let current = unquote(raw);
        let wanted = styled_version(current, version);
        if current != wanted {
            if let Some(updated) = replace_value(line, &wanted) {
                *line = updated;
                changed = true;
            }
        }
    }

    changed.then(|| join_lines(&lines, trailing))
}
