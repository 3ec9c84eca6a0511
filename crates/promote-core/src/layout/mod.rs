//! Repository layout detection and version mutation.
//!
//! Each supported layout implements [`RepositoryLayout`]. The
//! [`LayoutDetector`] tries them in a fixed priority order (helmfile, kpt,
//! Makefile) and the first match produces the file changes.

pub mod helmfile;
pub mod kpt;
pub mod makefile;

use tracing::debug;

use crate::domain::{EnvironmentConfig, FileChange, PromoteError, Result};
use crate::locator::WorkingCopy;

pub use helmfile::HelmfileLayout;
pub use kpt::KptLayout;
pub use makefile::MakefileLayout;

/// Inputs to one environment's mutation.
#[derive(Debug, Clone, Copy)]
pub struct MutationContext<'a> {
    pub application: &'a str,
    pub version: &'a str,
    pub environment: &'a EnvironmentConfig,
    /// Chart repository alias used in helmfile chart references
    pub chart_repo: &'a str,
    /// Application source repository, needed to add a new package reference
    pub app_git_url: Option<&'a str>,
}

impl MutationContext<'_> {
    pub fn namespace(&self) -> String {
        self.environment.effective_namespace()
    }
}

/// One repository idiom for declaring deployed versions.
pub trait RepositoryLayout: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this layout recognizes the working copy.
    fn detect(&self, wc: &WorkingCopy, ctx: &MutationContext<'_>) -> Result<bool>;

    /// Changes pinning `ctx.version`; empty when already pinned.
    fn mutate(&self, wc: &WorkingCopy, ctx: &MutationContext<'_>) -> Result<Vec<FileChange>>;
}

/// Fixed-priority layout dispatch.
pub struct LayoutDetector {
    layouts: Vec<Box<dyn RepositoryLayout>>,
}

impl Default for LayoutDetector {
    fn default() -> Self {
        Self::new(vec![
            Box::new(HelmfileLayout),
            Box::new(KptLayout),
            Box::new(MakefileLayout),
        ])
    }
}

impl LayoutDetector {
    pub fn new(layouts: Vec<Box<dyn RepositoryLayout>>) -> Self {
        Self { layouts }
    }

    /// First layout that recognizes the working copy.
    pub fn detect(
        &self,
        wc: &WorkingCopy,
        ctx: &MutationContext<'_>,
    ) -> Result<&dyn RepositoryLayout> {
        for layout in &self.layouts {
            if layout.detect(wc, ctx)? {
                debug!(layout = layout.name(), repo = %wc.repo(), "layout detected");
                return Ok(layout.as_ref());
            }
        }
        Err(PromoteError::UnsupportedRepositoryLayout {
            repo_url: wc.repo().url.clone(),
        })
    }

    pub fn mutate(&self, wc: &WorkingCopy, ctx: &MutationContext<'_>) -> Result<Vec<FileChange>> {
        self.detect(wc, ctx)?.mutate(wc, ctx)
    }
}

/// `version` in the style of `previous`: a leading `v` is kept or dropped to
/// match.
pub(crate) fn styled_version(previous: &str, version: &str) -> String {
    let bare = version.strip_prefix('v').unwrap_or(version);
    if previous.starts_with('v') {
        format!("v{bare}")
    } else {
        bare.to_string()
    }
}

/// Split a YAML `key: value` line into (indent, key, raw value, trailing
/// comment). Returns `None` for lines that are not a simple mapping entry.
pub(crate) fn split_yaml_entry(line: &str) -> Option<(usize, &str, &str, &str)> {
    let indent = line.len() - line.trim_start().len();
    let body = line.trim_start().trim_start_matches("- ");
    let dash = line.trim_start().len() - body.len();
    let (key, rest) = body.split_once(':')?;
    if key.is_empty() || key.contains(' ') || key.starts_with('#') {
        return None;
    }
    let (value, comment) = match comment_start(rest) {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    Some((indent + dash, key, value.trim(), comment))
}

/// Byte offset of the whitespace before a ` #` comment, ignoring `#` inside
/// a quoted scalar.
fn comment_start(rest: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut prev = ' ';
    for (i, c) in rest.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') if prev.is_whitespace() => quote = Some(c),
            // `''` escapes a quote inside a single-quoted scalar
            (None, '\'') if prev == '\'' => quote = Some(c),
            (Some('"'), '"') if prev != '\\' => quote = None,
            (Some('\''), '\'') => quote = None,
            (None, '#') if prev.is_whitespace() && i > 0 => return Some(i - prev.len_utf8()),
            _ => {}
        }
        prev = c;
    }
    None
}

/// Unquoted scalar.
pub(crate) fn unquote(raw: &str) -> &str {
    raw.trim_matches(|c| c == '"' || c == '\'')
}

/// `raw` with its content replaced by `value`, keeping any quotes.
pub(crate) fn requote(raw: &str, value: &str) -> String {
    match raw.chars().next() {
        Some(q @ ('"' | '\'')) => format!("{q}{value}{q}"),
        _ => value.to_string(),
    }
}

/// Rewrite the value of a `key: value` line, keeping indentation, any list
/// dash, quotes and trailing comment.
pub(crate) fn replace_value(line: &str, value: &str) -> Option<String> {
    let (_, _, raw, comment) = split_yaml_entry(line)?;
    let colon = line.find(':')?;
    Some(format!(
        "{}: {}{}",
        &line[..colon],
        requote(raw, value),
        comment
    ))
}

/// Join lines back, restoring a trailing newline when the original had one.
pub(crate) fn join_lines(lines: &[String], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn styled_version_follows_previous_prefix() {
        assert_eq!(styled_version("v1.0.0", "1.2.3"), "v1.2.3");
        assert_eq!(styled_version("1.0.0", "v1.2.3"), "1.2.3");
        assert_eq!(styled_version("1.0.0", "1.2.3"), "1.2.3");
    }

    #[test]
    fn replace_value_keeps_quotes_and_comments() {
        assert_eq!(
            replace_value("    version: \"1.0.0\" # pinned", "1.2.3").unwrap(),
            "    version: \"1.2.3\" # pinned"
        );
        assert_eq!(
            replace_value("- version: 1.0.0", "1.2.3").unwrap(),
            "- version: 1.2.3"
        );
        assert!(replace_value("just text", "x").is_none());
    }

    #[test]
    fn hash_inside_quotes_is_not_a_comment() {
        assert_eq!(
            split_yaml_entry("  url: \"https://example.com/#/charts\" # mirror"),
            Some((2, "url", "\"https://example.com/#/charts\"", " # mirror"))
        );
        assert_eq!(
            split_yaml_entry("- name: 'it''s # fine'"),
            Some((2, "name", "'it''s # fine'", ""))
        );
        assert_eq!(
            split_yaml_entry("version: 1.0.0 #pinned"),
            Some((0, "version", "1.0.0", " #pinned"))
        );
        assert_eq!(
            replace_value("    version: \"1.0 #rc\"", "1.2.3").unwrap(),
            "    version: \"1.2.3\""
        );
    }

    #[test]
    fn unsupported_layout_is_reported() {
        let wc = working_copy(&[("README.md", "nothing here")]);
        let env = staging();
        let err = LayoutDetector::default()
            .mutate(&wc, &ctx(&env, "1.2.3"))
            .unwrap_err();
        assert!(matches!(err, PromoteError::UnsupportedRepositoryLayout { .. }));
    }

    #[test]
    fn helmfile_wins_over_makefile() {
        let wc = working_copy(&[
            ("helmfile.yaml", "releases: []\n"),
            ("Makefile", "fetch:\n\techo\n"),
        ]);
        let env = staging();
        let detector = LayoutDetector::default();
        let layout = detector
            .detect(&wc, &ctx(&env, "1.2.3"))
            .unwrap();
        assert_eq!(layout.name(), "helmfile");
    }
}
