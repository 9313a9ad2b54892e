//! Heuristic authority classification from ambient permissions and group
//! names. Best-effort by design: this is not an org chart, and the result
//! only gates capacity visibility and assignment actions.

use std::collections::BTreeSet;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{GroupRef, HierarchyLevel};

/// Any-of permission requirement for one level.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LevelRequirement {
    pub level: HierarchyLevel,
    pub any_of: Vec<String>,
}

/// Permission sets per level, tested from highest authority down. A user
/// matching none of them classifies as `Individual`.
#[must_use]
pub fn default_level_requirements() -> Vec<LevelRequirement> {
    vec![
        LevelRequirement {
            level: HierarchyLevel::EnterpriseAdmin,
            any_of: vec!["ADMINISTER".to_string(), "SYSTEM_ADMIN".to_string()],
        },
        LevelRequirement {
            level: HierarchyLevel::DivisionManager,
            any_of: vec!["ADMINISTER_PROJECTS".to_string()],
        },
        LevelRequirement {
            level: HierarchyLevel::DepartmentManager,
            any_of: vec!["PROJECT_ADMIN".to_string(), "MANAGE_PROJECTS".to_string()],
        },
        LevelRequirement {
            level: HierarchyLevel::TeamLead,
            any_of: vec!["MANAGE_SPRINTS_PERMISSION".to_string(), "ASSIGN_ISSUES".to_string()],
        },
        LevelRequirement { level: HierarchyLevel::Individual, any_of: vec![] },
    ]
}

/// Pluggable group-name heuristic: an ordered list of `(pattern, level)`
/// pairs matched case-insensitively against group names. Organizations can
/// supply their own mapping without touching the classification core.
#[derive(Debug, Clone)]
pub struct GroupNameClassifier {
    patterns: Vec<(Regex, HierarchyLevel)>,
}

impl GroupNameClassifier {
    /// # Errors
    /// Returns the first pattern that fails to compile.
    pub fn new(patterns: &[(&str, HierarchyLevel)]) -> Result<Self, regex_lite::Error> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for (pattern, level) in patterns {
            compiled.push((Regex::new(&format!("(?i){pattern}"))?, *level));
        }
        Ok(Self { patterns: compiled })
    }

    /// Highest-authority level indicated by any group name, if any.
    #[must_use]
    pub fn classify_groups(&self, groups: &[GroupRef]) -> Option<HierarchyLevel> {
        let mut best: Option<HierarchyLevel> = None;
        for group in groups {
            for (pattern, level) in &self.patterns {
                if pattern.is_match(&group.name) {
                    best = Some(match best {
                        Some(current) if current.at_least(*level) => current,
                        _ => *level,
                    });
                }
            }
        }
        best
    }

    /// Extension point for organizations whose teams span departments.
    /// Intentionally answers `false` until a concrete policy exists.
    #[must_use]
    pub fn cross_functional_visibility(&self, _groups: &[GroupRef]) -> bool {
        false
    }
}

impl Default for GroupNameClassifier {
    fn default() -> Self {
        let built_in: &[(&str, HierarchyLevel)] = &[
            ("site-?admin|org-?admin|administrators", HierarchyLevel::EnterpriseAdmin),
            ("director|division", HierarchyLevel::DivisionManager),
            ("department|managers?\\b", HierarchyLevel::DepartmentManager),
            ("\\blead(s|er)?\\b|team-?lead", HierarchyLevel::TeamLead),
        ];
        match Self::new(built_in) {
            Ok(classifier) => classifier,
            // Empty table if a built-in pattern ever fails to compile.
            Err(_) => Self { patterns: Vec::new() },
        }
    }
}

/// Resolve the highest-authority level supported by the permission set,
/// then let a higher-authority group match override it.
#[must_use]
pub fn classify(
    permissions: &BTreeSet<String>,
    groups: &[GroupRef],
    requirements: &[LevelRequirement],
    group_classifier: &GroupNameClassifier,
) -> HierarchyLevel {
    let mut resolved = HierarchyLevel::Individual;
    for requirement in requirements {
        if requirement.any_of.is_empty() {
            continue;
        }
        let satisfied = requirement.any_of.iter().any(|name| permissions.contains(name));
        if satisfied && requirement.level.at_least(resolved) {
            resolved = requirement.level;
        }
    }

    if let Some(group_level) = group_classifier.classify_groups(groups) {
        if group_level.at_least(resolved) {
            resolved = group_level;
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permissions(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    fn groups(names: &[&str]) -> Vec<GroupRef> {
        names.iter().map(|name| GroupRef::named(*name)).collect()
    }

    fn classify_default(perms: &[&str], group_names: &[&str]) -> HierarchyLevel {
        classify(
            &permissions(perms),
            &groups(group_names),
            &default_level_requirements(),
            &GroupNameClassifier::default(),
        )
    }

    #[test]
    fn browse_only_classifies_as_individual() {
        // Scenario F.
        assert_eq!(classify_default(&["BROWSE_PROJECTS"], &[]), HierarchyLevel::Individual);
    }

    #[test]
    fn any_required_permission_is_enough() {
        assert_eq!(classify_default(&["SYSTEM_ADMIN"], &[]), HierarchyLevel::EnterpriseAdmin);
        assert_eq!(
            classify_default(&["MANAGE_PROJECTS", "BROWSE_PROJECTS"], &[]),
            HierarchyLevel::DepartmentManager
        );
        assert_eq!(classify_default(&["ASSIGN_ISSUES"], &[]), HierarchyLevel::TeamLead);
    }

    #[test]
    fn highest_authority_permission_wins() {
        assert_eq!(
            classify_default(&["ASSIGN_ISSUES", "ADMINISTER_PROJECTS"], &[]),
            HierarchyLevel::DivisionManager
        );
    }

    #[test]
    fn group_match_overrides_weaker_permission_result() {
        assert_eq!(
            classify_default(&["ASSIGN_ISSUES"], &["Engineering Directors"]),
            HierarchyLevel::DivisionManager
        );
    }

    #[test]
    fn group_match_never_demotes() {
        assert_eq!(
            classify_default(&["ADMINISTER"], &["backend-team-leads"]),
            HierarchyLevel::EnterpriseAdmin
        );
    }

    #[test]
    fn group_patterns_are_case_insensitive() {
        assert_eq!(classify_default(&[], &["SITE-ADMINS"]), HierarchyLevel::EnterpriseAdmin);
        assert_eq!(classify_default(&[], &["Team Leads"]), HierarchyLevel::TeamLead);
    }

    #[test]
    fn unmatched_groups_fall_through_to_individual() {
        assert_eq!(classify_default(&[], &["coffee-club", "book-readers"]), HierarchyLevel::Individual);
    }

    #[test]
    fn custom_pattern_table_replaces_the_built_ins() {
        let classifier = match GroupNameClassifier::new(&[("guild", HierarchyLevel::TeamLead)]) {
            Ok(classifier) => classifier,
            Err(err) => panic!("pattern should compile: {err}"),
        };
        assert_eq!(
            classifier.classify_groups(&groups(&["rust-guild"])),
            Some(HierarchyLevel::TeamLead)
        );
        assert_eq!(classifier.classify_groups(&groups(&["directors"])), None);
    }

    #[test]
    fn cross_functional_visibility_defaults_to_false() {
        let classifier = GroupNameClassifier::default();
        assert!(!classifier.cross_functional_visibility(&groups(&["site-admins"])));
    }

    #[test]
    fn built_in_patterns_compile() {
        let classifier = GroupNameClassifier::default();
        assert_eq!(
            classifier.classify_groups(&groups(&["administrators"])),
            Some(HierarchyLevel::EnterpriseAdmin)
        );
    }
}
