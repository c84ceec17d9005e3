//! Dependency rules and skip decisions
//!
//! Rules are declarative: "skip `dependent` when `prerequisite` failed".
//! Strict rules block under every profile; non-strict rules block only
//! under the `strict` profile. A failed prerequisite never cascades by
//! itself: each skip is decided per-rule at dispatch time, and a skipped
//! task is not a failure.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use preflight_core::{ExecutionProfile, RuleConfig};

/// Rule graphs past this size are rejected instead of traversed
pub const MAX_RULE_NODES: usize = 4096;

/// One declarative dependency rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRule {
    /// Check that gets skipped
    pub dependent: String,

    /// Check whose failure triggers the skip
    pub prerequisite: String,

    /// Human-readable reason surfaced in the report
    pub reason: String,

    /// Whether the rule blocks under every profile
    pub strict: bool,
}

impl From<RuleConfig> for DependencyRule {
    fn from(config: RuleConfig) -> Self {
        Self {
            dependent: config.dependent,
            prerequisite: config.prerequisite,
            reason: config.reason,
            strict: config.strict,
        }
    }
}

/// A violation found while validating a rule set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    /// Rule names a dependent that no task defines
    #[error("rule references unknown dependent '{0}'")]
    UnknownDependent(String),

    /// Rule names a prerequisite that no task defines
    #[error("rule for '{dependent}' references unknown prerequisite '{prerequisite}'")]
    UnknownPrerequisite {
        dependent: String,
        prerequisite: String,
    },

    /// A check cannot be its own prerequisite
    #[error("'{0}' cannot be its own prerequisite")]
    SelfDependency(String),

    /// The rule graph contains a cycle
    #[error("dependency rule cycle: {0}")]
    Cycle(String),

    /// The rule graph is implausibly large
    #[error("rule graph has {0} nodes, more than the {MAX_RULE_NODES} supported")]
    TooLarge(usize),
}

/// Ordered set of dependency rules.
///
/// Construction dedupes rules covering the same (dependent, prerequisite)
/// pair: the first occurrence keeps its position and reason, and the pair
/// is strict if any duplicate was (fail-closed).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<DependencyRule>,
}

impl RuleSet {
    /// Build a rule set, applying stricter-wins dedupe
    pub fn new(rules: impl IntoIterator<Item = DependencyRule>) -> Self {
        let mut deduped: Vec<DependencyRule> = Vec::new();
        for rule in rules {
            if let Some(existing) = deduped
                .iter_mut()
                .find(|r| r.dependent == rule.dependent && r.prerequisite == rule.prerequisite)
            {
                existing.strict = existing.strict || rule.strict;
            } else {
                deduped.push(rule);
            }
        }
        Self { rules: deduped }
    }

    /// The rules in declaration order
    pub fn rules(&self) -> &[DependencyRule] {
        &self.rules
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Decide whether `task_id` must be skipped.
    ///
    /// Returns the first rule (declaration order) whose prerequisite is
    /// in the failed set and which blocks under the profile, or `None`.
    pub fn decide_skip(
        &self,
        task_id: &str,
        failed: &HashSet<String>,
        profile: ExecutionProfile,
    ) -> Option<&DependencyRule> {
        self.rules.iter().find(|rule| {
            rule.dependent == task_id
                && failed.contains(&rule.prerequisite)
                && (profile.is_strict() || rule.strict)
        })
    }

    /// Partition tasks into ordered parallel groups by prerequisite set.
    ///
    /// Tasks with no prerequisites (among `tasks`) form level 0 in input
    /// order; tasks sharing an identical prerequisite set share a later
    /// level, groups appearing in first-encounter order.
    pub fn execution_levels(&self, tasks: &[String]) -> Vec<Vec<String>> {
        let known: HashSet<&str> = tasks.iter().map(String::as_str).collect();
        let mut independent: Vec<String> = Vec::new();
        let mut groups: Vec<(Vec<String>, Vec<String>)> = Vec::new();

        for id in tasks {
            let prereqs: BTreeSet<String> = self
                .rules
                .iter()
                .filter(|rule| &rule.dependent == id && known.contains(rule.prerequisite.as_str()))
                .map(|rule| rule.prerequisite.clone())
                .collect();

            if prereqs.is_empty() {
                independent.push(id.clone());
                continue;
            }
            let key: Vec<String> = prereqs.into_iter().collect();
            if let Some((_, members)) = groups.iter_mut().find(|(k, _)| *k == key) {
                members.push(id.clone());
            } else {
                groups.push((key, vec![id.clone()]));
            }
        }

        let mut levels = Vec::new();
        if !independent.is_empty() {
            levels.push(independent);
        }
        levels.extend(groups.into_iter().map(|(_, members)| members));
        levels
    }

    /// Validate the rule set against the known check ids.
    ///
    /// Every violation is collected in one pass: unknown dependents,
    /// unknown prerequisites, self-dependencies, and cycles. Cycle
    /// detection is an iterative depth-first search with an explicit
    /// stack, guarded by [`MAX_RULE_NODES`].
    pub fn validate(&self, known: &BTreeSet<String>) -> Vec<RuleViolation> {
        let mut violations = Vec::new();

        for rule in &self.rules {
            if !known.contains(&rule.dependent) {
                violations.push(RuleViolation::UnknownDependent(rule.dependent.clone()));
            }
            if !known.contains(&rule.prerequisite) {
                violations.push(RuleViolation::UnknownPrerequisite {
                    dependent: rule.dependent.clone(),
                    prerequisite: rule.prerequisite.clone(),
                });
            }
            if rule.dependent == rule.prerequisite {
                violations.push(RuleViolation::SelfDependency(rule.dependent.clone()));
            }
        }

        violations.extend(self.find_cycles());
        violations
    }

    /// Adjacency map: dependent -> prerequisites, keys sorted
    fn adjacency(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for rule in &self.rules {
            if rule.dependent == rule.prerequisite {
                // Self-dependencies are reported separately.
                continue;
            }
            edges
                .entry(rule.dependent.as_str())
                .or_default()
                .insert(rule.prerequisite.as_str());
            edges.entry(rule.prerequisite.as_str()).or_default();
        }
        edges
    }

    fn find_cycles(&self) -> Vec<RuleViolation> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let edges = self.adjacency();
        if edges.len() > MAX_RULE_NODES {
            return vec![RuleViolation::TooLarge(edges.len())];
        }

        let mut violations = Vec::new();
        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

        for &start in edges.keys() {
            if marks.contains_key(start) {
                continue;
            }

            // Explicit DFS stack: (node, index of the next neighbor to try).
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::InProgress);

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let next = frame.1;
                frame.1 += 1;

                match edges[node].iter().nth(next) {
                    Some(&neighbor) => match marks.get(neighbor) {
                        Some(Mark::InProgress) => {
                            let members = cycle_members(&stack, neighbor);
                            violations.push(RuleViolation::Cycle(members));
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(neighbor, Mark::InProgress);
                            stack.push((neighbor, 0));
                        }
                    },
                    None => {
                        marks.insert(node, Mark::Done);
                        stack.pop();
                    }
                }
            }
        }

        violations
    }
}

/// Render the cycle path from the DFS stack, closing the loop
fn cycle_members(stack: &[(&str, usize)], reentry: &str) -> String {
    let start = stack
        .iter()
        .position(|(node, _)| *node == reentry)
        .unwrap_or(0);
    let mut path: Vec<&str> = stack[start..].iter().map(|(node, _)| *node).collect();
    path.push(reentry);
    path.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(dependent: &str, prerequisite: &str, strict: bool) -> DependencyRule {
        DependencyRule {
            dependent: dependent.to_string(),
            prerequisite: prerequisite.to_string(),
            reason: format!("{dependent} needs {prerequisite}"),
            strict,
        }
    }

    fn failed(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn known(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_strict_rule_blocks_under_any_profile() {
        let rules = RuleSet::new([rule("typecheck", "lint", true)]);
        for profile in [
            ExecutionProfile::Fast,
            ExecutionProfile::Dev,
            ExecutionProfile::Full,
            ExecutionProfile::Strict,
        ] {
            assert!(
                rules.decide_skip("typecheck", &failed(&["lint"]), profile).is_some(),
                "strict rule should block under {profile}"
            );
        }
    }

    #[test]
    fn test_non_strict_rule_blocks_only_in_strict_profile() {
        let rules = RuleSet::new([rule("test", "lint", false)]);
        assert!(rules
            .decide_skip("test", &failed(&["lint"]), ExecutionProfile::Dev)
            .is_none());
        assert!(rules
            .decide_skip("test", &failed(&["lint"]), ExecutionProfile::Full)
            .is_none());
        assert!(rules
            .decide_skip("test", &failed(&["lint"]), ExecutionProfile::Strict)
            .is_some());
    }

    #[test]
    fn test_no_skip_when_prerequisite_passed() {
        let rules = RuleSet::new([rule("test", "lint", true)]);
        assert!(rules
            .decide_skip("test", &failed(&[]), ExecutionProfile::Strict)
            .is_none());
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = RuleSet::new([rule("test", "lint", true), rule("test", "sanity", true)]);
        let decision = rules
            .decide_skip("test", &failed(&["lint", "sanity"]), ExecutionProfile::Dev)
            .unwrap();
        assert_eq!(decision.prerequisite, "lint");
    }

    #[test]
    fn test_duplicate_pair_takes_stricter_side() {
        let rules = RuleSet::new([rule("test", "lint", false), rule("test", "lint", true)]);
        assert_eq!(rules.len(), 1);
        assert!(rules.rules()[0].strict);
        // Blocks even outside the strict profile now.
        assert!(rules
            .decide_skip("test", &failed(&["lint"]), ExecutionProfile::Dev)
            .is_some());
    }

    #[test]
    fn test_skip_does_not_cascade() {
        // "test" depends on "typecheck"; "typecheck" was skipped (not
        // failed), so "test" still runs.
        let rules = RuleSet::new([
            rule("typecheck", "lint", true),
            rule("test", "typecheck", true),
        ]);
        assert!(rules
            .decide_skip("test", &failed(&["lint"]), ExecutionProfile::Dev)
            .is_none());
    }

    #[test]
    fn test_execution_levels_default_chain() {
        let rules = RuleSet::new([
            rule("slow", "fast1", false),
            rule("slow", "fast2", false),
        ]);
        let tasks: Vec<String> = ["fast1", "fast2", "slow"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            rules.execution_levels(&tasks),
            vec![vec!["fast1".to_string(), "fast2".to_string()], vec!["slow".to_string()]]
        );
    }

    #[test]
    fn test_execution_levels_groups_by_prerequisite_set() {
        let rules = RuleSet::new([
            rule("b", "a", false),
            rule("c", "a", false),
            rule("d", "b", false),
        ]);
        let tasks: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let levels = rules.execution_levels(&tasks);
        assert_eq!(
            levels,
            vec![
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );
    }

    #[test]
    fn test_execution_levels_ignore_unknown_prerequisites() {
        let rules = RuleSet::new([rule("b", "zz", false)]);
        let tasks: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            rules.execution_levels(&tasks),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
    }

    #[test]
    fn test_validate_collects_all_violations() {
        let rules = RuleSet::new([
            rule("ghost", "lint", false),
            rule("test", "phantom", false),
            rule("lint", "lint", false),
        ]);
        let violations = rules.validate(&known(&["lint", "test"]));

        assert!(violations.contains(&RuleViolation::UnknownDependent("ghost".to_string())));
        assert!(violations.contains(&RuleViolation::UnknownPrerequisite {
            dependent: "test".to_string(),
            prerequisite: "phantom".to_string(),
        }));
        assert!(violations.contains(&RuleViolation::SelfDependency("lint".to_string())));
    }

    #[test]
    fn test_validate_detects_cycle() {
        let rules = RuleSet::new([
            rule("a", "b", false),
            rule("b", "c", false),
            rule("c", "a", false),
        ]);
        let violations = rules.validate(&known(&["a", "b", "c"]));
        let cycles: Vec<_> = violations
            .iter()
            .filter(|v| matches!(v, RuleViolation::Cycle(_)))
            .collect();
        assert_eq!(cycles.len(), 1);
        if let RuleViolation::Cycle(members) = cycles[0] {
            assert!(members.contains("a") && members.contains("b") && members.contains("c"));
        }
    }

    #[test]
    fn test_validate_deep_chain_without_recursion() {
        // A long linear chain must validate cleanly with the explicit
        // stack, no matter its depth.
        let mut chain = Vec::new();
        let mut ids = BTreeSet::new();
        for i in 0..2000 {
            chain.push(rule(&format!("t{}", i + 1), &format!("t{i}"), false));
            ids.insert(format!("t{i}"));
        }
        ids.insert("t2000".to_string());

        let rules = RuleSet::new(chain);
        assert!(rules.validate(&ids).is_empty());
    }

    #[test]
    fn test_validate_clean_rules_pass() {
        let rules = RuleSet::new([rule("typecheck", "lint", true), rule("test", "lint", false)]);
        assert!(rules.validate(&known(&["lint", "typecheck", "test"])).is_empty());
    }
}
