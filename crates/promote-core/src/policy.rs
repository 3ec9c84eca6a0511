//! Policy resolution: which environments a request targets.

use crate::domain::{EnvironmentConfig, PromoteError, Result, Selection};
use crate::requirements::RequirementsDocument;

/// Resolve `selection` against the declared environments.
///
/// The returned order is the reporting order and the grouping tie-break:
/// document order for `AllEligible`, request order for `ExplicitSet`.
pub fn resolve_targets(
    doc: &RequirementsDocument,
    selection: &Selection,
) -> Result<Vec<EnvironmentConfig>> {
    match selection {
        Selection::AllEligible => Ok(doc
            .environments
            .iter()
            .filter(|e| e.promotion_strategy.is_eligible() && !e.is_development())
            .cloned()
            .collect()),
        Selection::SingleEnvironment(name) => doc
            .find(name)
            .cloned()
            .map(|env| vec![env])
            .ok_or_else(|| PromoteError::UnknownEnvironment {
                names: vec![name.clone()],
            }),
        Selection::ExplicitSet(names) => {
            let mut unknown = Vec::new();
            let mut targets: Vec<EnvironmentConfig> = Vec::with_capacity(names.len());
            for name in names {
                match doc.find(name) {
                    Some(env) if !targets.iter().any(|t| t.key == env.key) => {
                        targets.push(env.clone())
                    }
                    Some(_) => {}
                    None => unknown.push(name.clone()),
                }
            }
            if unknown.is_empty() {
                Ok(targets)
            } else {
                Err(PromoteError::UnknownEnvironment { names: unknown })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PromotionStrategy;

    fn doc() -> RequirementsDocument {
        RequirementsDocument::new(vec![
            EnvironmentConfig::new("dev", "jx", PromotionStrategy::Automatic),
            EnvironmentConfig::new("staging", "jx-staging", PromotionStrategy::Automatic),
            EnvironmentConfig::new("perf", "jx-perf", PromotionStrategy::Never),
            EnvironmentConfig::new("production", "jx-production", PromotionStrategy::Manual),
        ])
    }

    fn keys(envs: &[EnvironmentConfig]) -> Vec<&str> {
        envs.iter().map(|e| e.key.as_str()).collect()
    }

    #[test]
    fn all_eligible_excludes_never_and_dev() {
        let targets = resolve_targets(&doc(), &Selection::AllEligible).unwrap();
        assert_eq!(keys(&targets), vec!["staging", "production"]);
        assert!(targets
            .iter()
            .all(|t| t.promotion_strategy != PromotionStrategy::Never));
    }

    #[test]
    fn single_environment_ignores_strategy() {
        let targets =
            resolve_targets(&doc(), &Selection::SingleEnvironment("perf".into())).unwrap();
        assert_eq!(keys(&targets), vec!["perf"]);
    }

    #[test]
    fn single_unknown_environment_fails() {
        let err =
            resolve_targets(&doc(), &Selection::SingleEnvironment("qa".into())).unwrap_err();
        assert!(matches!(err, PromoteError::UnknownEnvironment { names } if names == vec!["qa"]));
    }

    #[test]
    fn explicit_set_keeps_request_order() {
        let sel = Selection::ExplicitSet(vec!["production".into(), "staging".into()]);
        let targets = resolve_targets(&doc(), &sel).unwrap();
        assert_eq!(keys(&targets), vec!["production", "staging"]);
    }

    #[test]
    fn explicit_set_lists_every_unknown_name() {
        let sel = Selection::ExplicitSet(vec!["qa".into(), "staging".into(), "uat".into()]);
        let err = resolve_targets(&doc(), &sel).unwrap_err();
        match err {
            PromoteError::UnknownEnvironment { names } => assert_eq!(names, vec!["qa", "uat"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn explicit_set_drops_repeated_names() {
        let sel = Selection::ExplicitSet(vec!["staging".into(), "staging".into()]);
        let targets = resolve_targets(&doc(), &sel).unwrap();
        assert_eq!(keys(&targets), vec!["staging"]);
    }
}
