//! Helmfile layout: releases declared in `helmfile.yaml`.
//!
//! Two shapes are recognized: a single root `helmfile.yaml`, or a
//! `helmfiles/<namespace>/helmfile.yaml` per namespace registered from the
//! root file's `helmfiles:` list. Edits are line based so the rest of the
//! file is left byte-for-byte intact.

use std::ops::Range;
use std::path::{Path, PathBuf};

use super::{
    join_lines, replace_value, split_yaml_entry, styled_version, unquote, MutationContext,
    RepositoryLayout,
};
use crate::domain::{FileChange, Result};
use crate::locator::WorkingCopy;

const ROOT_HELMFILE: &str = "helmfile.yaml";
const HELMFILES_DIR: &str = "helmfiles";

#[derive(Debug, Clone, Copy, Default)]
pub struct HelmfileLayout;

impl HelmfileLayout {
    fn nested(wc: &WorkingCopy) -> bool {
        wc.path().join(HELMFILES_DIR).is_dir()
    }

    fn target_path(wc: &WorkingCopy, namespace: &str) -> PathBuf {
        if Self::nested(wc) {
            Path::new(HELMFILES_DIR).join(namespace).join(ROOT_HELMFILE)
        } else {
            PathBuf::from(ROOT_HELMFILE)
        }
    }
}

impl RepositoryLayout for HelmfileLayout {
    fn name(&self) -> &'static str {
        "helmfile"
    }

    /// Any root `helmfile.yaml` or `helmfiles/` directory. The application
    /// need not be referenced yet: `mutate` adds its release when missing.
    fn detect(&self, wc: &WorkingCopy, _ctx: &MutationContext<'_>) -> Result<bool> {
        Ok(wc.exists(ROOT_HELMFILE) || Self::nested(wc))
    }

    fn mutate(&self, wc: &WorkingCopy, ctx: &MutationContext<'_>) -> Result<Vec<FileChange>> {
        let namespace = ctx.namespace();
        let path = Self::target_path(wc, &namespace);
        let mut changes = Vec::new();

        match wc.read(&path)? {
            Some(old) => {
                if let Some(new) = pin_release(&old, ctx) {
                    changes.push(FileChange::modify(path.clone(), old, new));
                }
            }
            None => changes.push(FileChange::create(path.clone(), new_helmfile(&namespace, ctx))),
        }

        if Self::nested(wc) {
            if let Some(root) = wc.read(ROOT_HELMFILE)? {
                let rel = path.to_string_lossy().replace('\\', "/");
                if let Some(new_root) = register_nested(&root, &rel) {
                    changes.push(FileChange::modify(ROOT_HELMFILE, root, new_root));
                }
            }
        }

        Ok(changes)
    }
}

fn new_helmfile(namespace: &str, ctx: &MutationContext<'_>) -> String {
    let mut lines = vec![format!("namespace: {namespace}"), "releases:".to_string()];
    lines.extend(release_item(0, ctx));
    join_lines(&lines, true)
}

fn release_item(indent: usize, ctx: &MutationContext<'_>) -> Vec<String> {
    let pad = " ".repeat(indent);
    vec![
        format!("{pad}- chart: {}/{}", ctx.chart_repo, ctx.application),
        format!("{pad}  version: {}", ctx.version),
        format!("{pad}  name: {}", ctx.application),
    ]
}

/// Items of a top-level YAML list starting after line `header`.
struct ListSection {
    item_indent: usize,
    items: Vec<Range<usize>>,
    /// Where a new item goes: after the last non-blank line of the section.
    insert_at: usize,
}

fn list_section(lines: &[String], header: usize) -> ListSection {
    let mut item_indent = None;
    let mut items: Vec<Range<usize>> = Vec::new();
    let mut insert_at = header + 1;

    for (i, line) in lines.iter().enumerate().skip(header + 1) {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();
        let is_item = trimmed.starts_with("- ") || trimmed == "-";
        match item_indent {
            None if is_item => item_indent = Some(indent),
            None => break,
            Some(ii) if is_item && indent == ii => {}
            Some(ii) if indent > ii => {
                if let Some(last) = items.last_mut() {
                    last.end = i + 1;
                }
                insert_at = i + 1;
                continue;
            }
            Some(_) => break,
        }
        items.push(i..i + 1);
        insert_at = i + 1;
    }

    ListSection {
        item_indent: item_indent.unwrap_or(0),
        items,
        insert_at,
    }
}

fn find_top_level(lines: &[String], key: &str) -> Option<usize> {
    let prefix = format!("{key}:");
    lines.iter().position(|l| l.starts_with(&prefix))
}

/// Normalize `key: []` to `key:` so items can follow.
fn open_flow_list(lines: &mut [String], header: usize) {
    if let Some((_, key, raw, _)) = split_yaml_entry(&lines[header]) {
        if raw == "[]" {
            lines[header] = format!("{key}:");
        }
    }
}

fn release_matches(chart: Option<&str>, name: Option<&str>, application: &str) -> bool {
    let suffix = format!("/{application}");
    chart.map_or(false, |c| c == application || c.ends_with(&suffix))
        || name.map_or(false, |n| n == application)
}

/// Pin the application's release to `ctx.version`. `None` when unchanged.
fn pin_release(content: &str, ctx: &MutationContext<'_>) -> Option<String> {
    let trailing = content.ends_with('\n') || content.is_empty();
    let mut lines: Vec<String> = content.lines().map(String::from).collect();

    let Some(header) = find_top_level(&lines, "releases") else {
        lines.push("releases:".to_string());
        lines.extend(release_item(0, ctx));
        return Some(join_lines(&lines, trailing));
    };
    open_flow_list(&mut lines, header);
    let section = list_section(&lines, header);

    for item in &section.items {
        let field_indent = split_yaml_entry(&lines[item.start])
            .map(|(indent, ..)| indent)
            .unwrap_or(section.item_indent + 2);

        let mut chart = None;
        let mut name = None;
        let mut version = None;
        for i in item.clone() {
            if let Some((indent, key, raw, _)) = split_yaml_entry(&lines[i]) {
                if indent != field_indent {
                    continue;
                }
                match key {
                    "chart" => chart = Some((i, unquote(raw).to_string())),
                    "name" => name = Some(unquote(raw).to_string()),
                    "version" => version = Some((i, unquote(raw).to_string())),
                    _ => {}
                }
            }
        }

        if !release_matches(
            chart.as_ref().map(|(_, c)| c.as_str()),
            name.as_deref(),
            ctx.application,
        ) {
            continue;
        }

        return match version {
            Some((i, current)) => {
                let wanted = styled_version(&current, ctx.version);
                if current == wanted {
                    return None;
                }
                lines[i] = replace_value(&lines[i], &wanted)?;
                Some(join_lines(&lines, trailing))
            }
            None => {
                let after = chart.map(|(i, _)| i).unwrap_or(item.start);
                lines.insert(
                    after + 1,
                    format!("{}version: {}", " ".repeat(field_indent), ctx.version),
                );
                Some(join_lines(&lines, trailing))
            }
        };
    }

    let new_item = release_item(section.item_indent, ctx);
    let at = section.insert_at;
    lines.splice(at..at, new_item);
    Some(join_lines(&lines, trailing))
}

/// Add `- path: <rel>` to the root `helmfiles:` list. `None` when present.
fn register_nested(root: &str, rel: &str) -> Option<String> {
    let trailing = root.ends_with('\n') || root.is_empty();
    let mut lines: Vec<String> = root.lines().map(String::from).collect();

    let already = lines.iter().any(|l| {
        split_yaml_entry(l)
            .map(|(_, key, raw, _)| key == "path" && unquote(raw) == rel)
            .unwrap_or(false)
    });
    if already {
        return None;
    }

    match find_top_level(&lines, "helmfiles") {
        Some(header) => {
            open_flow_list(&mut lines, header);
            let section = list_section(&lines, header);
            let entry = format!("{}- path: {rel}", " ".repeat(section.item_indent));
            lines.insert(section.insert_at, entry);
        }
        None => {
            lines.push("helmfiles:".to_string());
            lines.push(format!("- path: {rel}"));
        }
    }
    Some(join_lines(&lines, trailing))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, staging, working_copy};
    use super::*;

    const STAGING: &str = "\
namespace: jx-staging
repositories:
- name: dev
  url: https://charts.example.com
releases:
- chart: dev/other
  version: 0.0.1
  name: other
- chart: dev/myapp
  version: \"1.0.0\"
  name: myapp
  values:
  - values.yaml
";

    #[test]
    fn pins_existing_release_keeping_quotes() {
        let env = staging();
        let new = pin_release(STAGING, &ctx(&env, "1.2.3")).unwrap();
        assert!(new.contains("  version: \"1.2.3\"\n  name: myapp"));
        assert!(new.contains("  version: 0.0.1\n  name: other"));
        assert_eq!(new.lines().count(), STAGING.lines().count());
    }

    #[test]
    fn already_pinned_release_is_unchanged() {
        let env = staging();
        assert!(pin_release(STAGING, &ctx(&env, "1.0.0")).is_none());
    }

    #[test]
    fn missing_release_is_appended_to_releases() {
        let env = staging();
        let content = "releases:\n- chart: dev/other\n  version: 0.0.1\nfoo: bar\n";
        let new = pin_release(content, &ctx(&env, "1.2.3")).unwrap();
        assert_eq!(
            new,
            "releases:\n- chart: dev/other\n  version: 0.0.1\n- chart: dev/myapp\n  version: 1.2.3\n  name: myapp\nfoo: bar\n"
        );
    }

    #[test]
    fn empty_flow_list_is_opened() {
        let env = staging();
        let new = pin_release("releases: []\n", &ctx(&env, "1.2.3")).unwrap();
        assert_eq!(
            new,
            "releases:\n- chart: dev/myapp\n  version: 1.2.3\n  name: myapp\n"
        );
    }

    #[test]
    fn release_without_version_gets_one() {
        let env = staging();
        let content = "releases:\n  - name: myapp\n    chart: dev/myapp\n";
        let new = pin_release(content, &ctx(&env, "1.2.3")).unwrap();
        assert_eq!(
            new,
            "releases:\n  - name: myapp\n    chart: dev/myapp\n    version: 1.2.3\n"
        );
    }

    #[test]
    fn root_helmfile_layout() {
        let wc = working_copy(&[("helmfile.yaml", STAGING)]);
        let env = staging();
        let changes = HelmfileLayout.mutate(&wc, &ctx(&env, "1.2.3")).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, PathBuf::from("helmfile.yaml"));
        assert_eq!(changes[0].old.as_deref(), Some(STAGING));
    }

    #[test]
    fn detects_helmfile_without_the_application_and_adds_it() {
        let wc = working_copy(&[("helmfile.yaml", "releases:\n- chart: dev/other\n  version: 0.0.1\n  name: other\n")]);
        let env = staging();
        let ctx = ctx(&env, "1.2.3");
        assert!(HelmfileLayout.detect(&wc, &ctx).unwrap());
        let changes = HelmfileLayout.mutate(&wc, &ctx).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].new.contains("name: myapp"));
    }

    #[test]
    fn nested_layout_creates_namespace_helmfile_and_registers_it() {
        let wc = working_copy(&[
            ("helmfile.yaml", "helmfiles:\n- path: helmfiles/jx/helmfile.yaml\n"),
            ("helmfiles/jx/helmfile.yaml", "namespace: jx\nreleases: []\n"),
        ]);
        let env = staging();
        let changes = HelmfileLayout.mutate(&wc, &ctx(&env, "1.2.3")).unwrap();
        assert_eq!(changes.len(), 2);

        assert_eq!(
            changes[0].path,
            PathBuf::from("helmfiles/jx-staging/helmfile.yaml")
        );
        assert!(changes[0].old.is_none());
        assert!(changes[0].new.starts_with("namespace: jx-staging\nreleases:\n"));

        assert_eq!(
            changes[1].new,
            "helmfiles:\n- path: helmfiles/jx/helmfile.yaml\n- path: helmfiles/jx-staging/helmfile.yaml\n"
        );
    }

    #[test]
    fn nested_layout_is_noop_when_pinned() {
        let pinned = "namespace: jx-staging\nreleases:\n- chart: dev/myapp\n  version: 1.2.3\n  name: myapp\n";
        let wc = working_copy(&[
            ("helmfile.yaml", "helmfiles:\n- path: helmfiles/jx-staging/helmfile.yaml\n"),
            ("helmfiles/jx-staging/helmfile.yaml", pinned),
        ]);
        let env = staging();
        let changes = HelmfileLayout.mutate(&wc, &ctx(&env, "1.2.3")).unwrap();
        assert!(changes.is_empty());
    }
}
