//! Makefile layout: packages fetched with `kpt pkg get <url>@<version>` lines
//! under a `fetch:` (or `promote:`) target.

use regex::Regex;

use super::{join_lines, styled_version, MutationContext, RepositoryLayout};
use crate::domain::{FileChange, PromoteError, Result};
use crate::locator::WorkingCopy;

const MAKEFILE: &str = "Makefile";

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| PromoteError::mutation(format!("invalid pattern: {e}")))
}

/// `fetch:` or `promote:` target line; `fetch := ...` assignments excluded.
fn target_re() -> Result<Regex> {
    compile(r"^(fetch|promote)\s*:([^=]|$)")
}

fn kpt_get_re() -> Result<Regex> {
    compile(r"kpt\s+pkg\s+get\s+(\S+)@(\S+)(?:\s+(\S+))?")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MakefileLayout;

impl RepositoryLayout for MakefileLayout {
    fn name(&self) -> &'static str {
        "makefile"
    }

    fn detect(&self, wc: &WorkingCopy, _ctx: &MutationContext<'_>) -> Result<bool> {
        let target = target_re()?;
        Ok(wc
            .read(MAKEFILE)?
            .map(|m| m.lines().any(|l| target.is_match(l)))
            .unwrap_or(false))
    }

    fn mutate(&self, wc: &WorkingCopy, ctx: &MutationContext<'_>) -> Result<Vec<FileChange>> {
        let Some(old) = wc.read(MAKEFILE)? else {
            return Ok(Vec::new());
        };
        match pin_fetch(&old, ctx)? {
            Some(new) => Ok(vec![FileChange::modify(MAKEFILE, old, new)]),
            None => Ok(Vec::new()),
        }
    }
}

fn last_segment(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn dest_in_namespace(dest: Option<&str>, namespace: &str) -> bool {
    match dest {
        None => true,
        Some(d) => d
            .trim_end_matches('/')
            .split('/')
            .any(|segment| segment == namespace),
    }
}

/// Pin or add the application's fetch line. `None` when already pinned.
fn pin_fetch(content: &str, ctx: &MutationContext<'_>) -> Result<Option<String>> {
    let trailing = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(String::from).collect();
    let namespace = ctx.namespace();
    let kpt_get = kpt_get_re()?;

    let mut matched = false;
    let mut changed = false;
    for line in lines.iter_mut() {
        let edit = {
            let Some(caps) = kpt_get.captures(line.as_str()) else {
                continue;
            };
            let (Some(url), Some(version)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let dest = caps.get(3).map(|m| m.as_str());
            if last_segment(url.as_str()) != ctx.application
                || !dest_in_namespace(dest, &namespace)
            {
                continue;
            }
            matched = true;

            let wanted = styled_version(version.as_str(), ctx.version);
            (version.as_str() != wanted).then(|| (version.range(), wanted))
        };
        if let Some((range, wanted)) = edit {
            line.replace_range(range, &wanted);
            changed = true;
        }
    }

    if matched {
        return Ok(changed.then(|| join_lines(&lines, trailing)));
    }

    let app_git_url = ctx.app_git_url.ok_or_else(|| {
        PromoteError::mutation(format!(
            "Makefile has no fetch line for '{}' and no application git URL was given",
            ctx.application
        ))
    })?;

    let target_line = target_re()?;
    let target = lines
        .iter()
        .position(|l| target_line.is_match(l))
        .ok_or_else(|| PromoteError::mutation("Makefile has no fetch target"))?;
    let mut insert_at = target + 1;
    while insert_at < lines.len() && lines[insert_at].starts_with('\t') {
        insert_at += 1;
    }

    let entry = format!(
        "\tkpt pkg get {}/charts/{}@{} $(FETCH_DIR)/namespaces/{}",
        app_git_url.trim_end_matches('/'),
        ctx.application,
        styled_version("v", ctx.version),
        namespace
    );
    lines.insert(insert_at, entry);
    Ok(Some(join_lines(&lines, trailing)))
}
