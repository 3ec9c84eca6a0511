//! Promotion grouping: partition targets by repository and combine the
//! members' file changes into one mutation per pull request.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;

use crate::domain::{
    FileChange, GroupSummary, PromoteError, PromotionTarget, RepositoryMutation, Result,
};
use crate::locator::RepoRef;

/// Targets that will share one pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroup {
    /// Position in first-appearance order.
    pub index: usize,
    pub repo: RepoRef,
    /// Members in resolver order.
    pub members: Vec<PromotionTarget>,
}

impl TargetGroup {
    pub fn env_keys(&self) -> Vec<String> {
        self.members.iter().map(|m| m.key().to_string()).collect()
    }

    pub fn summary(&self) -> GroupSummary {
        GroupSummary {
            repo_url: self.repo.url.clone(),
            environments: self.env_keys(),
        }
    }
}

/// Partition targets by exact repository URL, in first-appearance order.
/// Every target lands in exactly one group; with `group_pull_requests` off,
/// every group is a singleton.
pub fn partition(targets: Vec<PromotionTarget>, group_pull_requests: bool) -> Vec<TargetGroup> {
    let mut groups: Vec<TargetGroup> = Vec::new();
    let mut by_url: HashMap<String, usize> = HashMap::new();

    for target in targets {
        if group_pull_requests {
            if let Some(&i) = by_url.get(target.repo_url()) {
                groups[i].members.push(target);
                continue;
            }
            by_url.insert(target.repo_url().to_string(), groups.len());
        }
        groups.push(TargetGroup {
            index: groups.len(),
            repo: target.repo.clone(),
            members: vec![target],
        });
    }
    groups
}

/// A group with its combined mutation, ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionGroup {
    pub index: usize,
    pub repo: RepoRef,
    pub members: Vec<PromotionTarget>,
    pub mutation: RepositoryMutation,
}

impl PromotionGroup {
    pub fn env_keys(&self) -> Vec<String> {
        self.members.iter().map(|m| m.key().to_string()).collect()
    }
}

/// Where one path's combined edit sits, and which lines of its current
/// content each member wrote.
struct PathEdits {
    index: usize,
    written: Vec<(Range<usize>, String)>,
}

/// Concatenate member changes in member order.
///
/// A path edited twice is kept once when both edits agree, or chained when
/// the later edit starts from the earlier edit's result (members run against
/// the same working copy) and leaves the lines earlier members wrote alone.
/// Anything else is a [`PromoteError::ConflictingMutation`].
pub fn combine(
    group: TargetGroup,
    branch_name: String,
    member_changes: Vec<(String, Vec<FileChange>)>,
) -> Result<PromotionGroup> {
    let mut combined: Vec<FileChange> = Vec::new();
    let mut edits: HashMap<PathBuf, PathEdits> = HashMap::new();

    for (env_key, changes) in member_changes {
        for change in changes {
            let entry = match edits.entry(change.path.clone()) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => {
                    let written = match &change.old {
                        Some(old) => changed_lines(old, &change.new).1,
                        None => 0..lines(&change.new).len(),
                    };
                    slot.insert(PathEdits {
                        index: combined.len(),
                        written: vec![(written, env_key.clone())],
                    });
                    combined.push(change);
                    continue;
                }
            };

            let previous = &mut combined[entry.index];
            if previous.new == change.new {
                continue;
            }
            let conflict = |owner: &str| PromoteError::ConflictingMutation {
                path: change.path.display().to_string(),
                first: owner.to_string(),
                second: env_key.clone(),
            };
            if change.old.as_deref() != Some(previous.new.as_str()) {
                let first = entry.written.first().map(|(_, o)| o.as_str()).unwrap_or_default();
                return Err(conflict(first));
            }

            let (before, after) = changed_lines(&previous.new, &change.new);
            if let Some((_, owner)) = entry
                .written
                .iter()
                .find(|(span, owner)| *owner != env_key && overlaps(span, &before))
            {
                return Err(conflict(owner));
            }
            for (span, _) in &mut entry.written {
                if span.start >= before.end {
                    *span = shift(span, &before, &after);
                }
            }
            entry.written.push((after, env_key.clone()));
            previous.new = change.new;
        }
    }

    let mutation = RepositoryMutation::new(group.repo.url.clone(), branch_name)
        .with_changes(combined);
    Ok(PromotionGroup {
        index: group.index,
        repo: group.repo,
        members: group.members,
        mutation,
    })
}

fn lines(content: &str) -> Vec<&str> {
    content.split_inclusive('\n').collect()
}

/// Line ranges that differ between `old` and `new`, after trimming the
/// longest common prefix and then the longest common suffix.
fn changed_lines(old: &str, new: &str) -> (Range<usize>, Range<usize>) {
    let old = lines(old);
    let new = lines(new);
    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    (prefix..old.len() - suffix, prefix..new.len() - suffix)
}

/// An insertion (empty `changed`) only overlaps a span it lands strictly
/// inside; inserting right before or after another member's lines is fine.
fn overlaps(span: &Range<usize>, changed: &Range<usize>) -> bool {
    if changed.is_empty() {
        span.start < changed.start && changed.start < span.end
    } else {
        span.start < changed.end && changed.start < span.end
    }
}

/// Move a span starting at or after `before.end` to where it sits once
/// `before` is replaced by `after`.
fn shift(span: &Range<usize>, before: &Range<usize>, after: &Range<usize>) -> Range<usize> {
    let moved = |line: usize| line + after.len() - before.len();
    moved(span.start)..moved(span.end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnvironmentConfig, PromotionStrategy};

    fn target(key: &str, url: &str) -> PromotionTarget {
        PromotionTarget {
            environment: EnvironmentConfig::new(key, format!("jx-{key}"), PromotionStrategy::Automatic)
                .with_git_url(url),
            repo: RepoRef::parse(url).unwrap(),
        }
    }

    fn targets() -> Vec<PromotionTarget> {
        vec![
            target("staging", "https://github.com/org/dev-env"),
            target("perf", "https://github.com/org/perf-env"),
            target("production", "https://github.com/org/dev-env"),
        ]
    }

    #[test]
    fn grouped_partition_buckets_by_url_in_first_seen_order() {
        let groups = partition(targets(), true);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].env_keys(), vec!["staging", "production"]);
        assert_eq!(groups[1].env_keys(), vec!["perf"]);
        assert_eq!(groups[1].index, 1);
    }

    #[test]
    fn ungrouped_partition_is_singletons() {
        let groups = partition(targets(), false);
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.members.len() == 1));
        let indexes: Vec<usize> = groups.iter().map(|g| g.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn partition_is_exact() {
        for grouped in [true, false] {
            let input = targets();
            let groups = partition(input.clone(), grouped);
            let mut seen: Vec<String> = groups.iter().flat_map(|g| g.env_keys()).collect();
            seen.sort();
            let mut expected: Vec<String> = input.iter().map(|t| t.key().to_string()).collect();
            expected.sort();
            assert_eq!(seen, expected);
            for g in &groups {
                assert!(g.members.iter().all(|m| m.repo_url() == g.repo.url));
            }
        }
    }

    fn single_group() -> TargetGroup {
        partition(targets(), true).remove(0)
    }

    #[test]
    fn combine_dedupes_identical_and_chains_sequential_edits() {
        let root = "helmfiles:\n";
        let root_s = "helmfiles:\n- path: helmfiles/jx-staging/helmfile.yaml\n";
        let root_sp = "helmfiles:\n- path: helmfiles/jx-staging/helmfile.yaml\n- path: helmfiles/jx-production/helmfile.yaml\n";
        let changes = vec![
            (
                "staging".to_string(),
                vec![
                    FileChange::create("helmfiles/jx-staging/helmfile.yaml", "s"),
                    FileChange::modify("helmfile.yaml", root, root_s),
                ],
            ),
            (
                "production".to_string(),
                vec![
                    FileChange::create("helmfiles/jx-production/helmfile.yaml", "p"),
                    FileChange::modify("helmfile.yaml", root_s, root_sp),
                    FileChange::create("helmfiles/jx-staging/helmfile.yaml", "s"),
                ],
            ),
        ];
        let group = combine(single_group(), "b".into(), changes).unwrap();
        let files = &group.mutation.file_changes;
        assert_eq!(files.len(), 3);
        assert_eq!(files[1].old.as_deref(), Some(root));
        assert_eq!(files[1].new, root_sp);
    }

    #[test]
    fn chained_edit_of_another_members_lines_conflicts() {
        let base = "image: app\nenvironment: none\nreplicas: 1\n";
        let staging = "image: app\nenvironment: staging\nreplicas: 1\n";
        let production = "image: app\nenvironment: production\nreplicas: 1\n";
        let changes = vec![
            ("staging".to_string(), vec![FileChange::modify("settings.yaml", base, staging)]),
            ("production".to_string(), vec![FileChange::modify("settings.yaml", staging, production)]),
        ];
        let err = combine(single_group(), "b".into(), changes).unwrap_err();
        assert!(matches!(
            err,
            PromoteError::ConflictingMutation { ref first, ref second, .. }
                if first == "staging" && second == "production"
        ));
    }

    #[test]
    fn chained_edits_on_separate_lines_combine() {
        let base = "a: 0\nkeep: x\nb: 0\n";
        let first = "a: 1\nkeep: x\nb: 0\n";
        let second = "a: 1\nkeep: x\nb: 2\nc: 3\n";
        let third = "a: 1\nextra: y\nkeep: x\nb: 2\nc: 3\n";
        let changes = vec![
            ("staging".to_string(), vec![FileChange::modify("v.yaml", base, first)]),
            ("production".to_string(), vec![FileChange::modify("v.yaml", first, second)]),
            ("perf".to_string(), vec![FileChange::modify("v.yaml", second, third)]),
        ];
        let group = combine(single_group(), "b".into(), changes).unwrap();
        assert_eq!(group.mutation.file_changes[0].new, third);

        // perf's inserted line moved production's lines down by one
        let fourth = "a: 1\nextra: y\nkeep: x\nb: 9\nc: 3\n";
        let changes = vec![
            ("staging".to_string(), vec![FileChange::modify("v.yaml", base, first)]),
            ("production".to_string(), vec![FileChange::modify("v.yaml", first, second)]),
            ("perf".to_string(), vec![FileChange::modify("v.yaml", second, third)]),
            ("qa".to_string(), vec![FileChange::modify("v.yaml", third, fourth)]),
        ];
        let err = combine(single_group(), "b".into(), changes).unwrap_err();
        assert!(matches!(
            err,
            PromoteError::ConflictingMutation { ref first, .. } if first == "production"
        ));
    }

    #[test]
    fn changed_lines_trims_common_prefix_and_suffix() {
        assert_eq!(changed_lines("a\nb\nc\n", "a\nx\nc\n"), (1..2, 1..2));
        assert_eq!(changed_lines("a\nc\n", "a\nb\nc\n"), (1..1, 1..2));
        assert_eq!(changed_lines("a\n", "a\nb\n"), (1..1, 1..2));
        assert_eq!(changed_lines("same\n", "same\n"), (1..1, 1..1));
    }

    #[test]
    fn combine_rejects_conflicting_edits() {
        let changes = vec![
            ("staging".to_string(), vec![FileChange::modify("a.yaml", "v0", "v1")]),
            ("production".to_string(), vec![FileChange::modify("a.yaml", "v0", "v2")]),
        ];
        let err = combine(single_group(), "b".into(), changes).unwrap_err();
        match err {
            PromoteError::ConflictingMutation { path, first, second } => {
                assert_eq!(path, "a.yaml");
                assert_eq!(first, "staging");
                assert_eq!(second, "production");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn combine_of_no_changes_is_noop() {
        let group = combine(
            single_group(),
            "b".into(),
            vec![("staging".to_string(), vec![]), ("production".to_string(), vec![])],
        )
        .unwrap();
        assert!(group.mutation.is_noop());
    }
}
