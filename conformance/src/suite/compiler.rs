//! Fold test outcomes into per-profile reports
//!
//! Outcomes are visited sorted by short name, so the same results always
//! produce the same report regardless of execution order.

use super::outcome::{TestOutcome, TestResultKind};
use common::report::{ExtendedStatus, ProfileReport, Status};
use common::{FeatureSet, ProfileName, ProfileRegistry, Tier};
use std::collections::{BTreeMap, BTreeSet};

/// Per-profile extended feature support, decided at suite construction
pub type ExtendedSupport = BTreeMap<ProfileName, FeatureSet>;

#[derive(Debug, Default)]
struct Tally {
    core: Status,
    extended: Status,
}

impl Tally {
    fn tier_mut(&mut self, tier: Tier) -> &mut Status {
        match tier {
            Tier::Core => &mut self.core,
            Tier::Extended => &mut self.extended,
        }
    }
}

fn record(status: &mut Status, outcome: &TestOutcome) {
    let stats = &mut status.statistics;
    match outcome.result {
        TestResultKind::Succeeded => stats.passed += 1,
        TestResultKind::Failed => {
            stats.failed += 1;
            status.failed_tests.push(outcome.short_name.clone());
        }
        TestResultKind::Skipped => {
            stats.skipped += 1;
            status.skipped_tests.push(outcome.short_name.clone());
        }
        TestResultKind::NotSupported => stats.not_supported += 1,
        TestResultKind::ProvisionalSkipped => {}
    }
}

fn finish(mut status: Status) -> Status {
    status.result = status.statistics.result();
    status.failed_tests.sort();
    status.skipped_tests.sort();
    status
}

fn sorted_names(set: Option<&FeatureSet>) -> Vec<String> {
    set.map(|s| s.iter().map(|f| f.to_string()).collect())
        .unwrap_or_default()
}

/// Compiled report body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledReport {
    pub profiles: Vec<ProfileReport>,
    pub succeeded_provisional_tests: Vec<String>,
}

/// Build one report per requested profile
///
/// ProvisionalSkipped outcomes are ignored. A provisional test only counts
/// toward its tier when it succeeded, and is then also listed as a
/// succeeded provisional test.
pub fn compile(
    outcomes: &[TestOutcome],
    registry: &ProfileRegistry,
    requested: &BTreeSet<ProfileName>,
    extended_supported: &ExtendedSupport,
    extended_unsupported: &ExtendedSupport,
) -> CompiledReport {
    let mut sorted: Vec<&TestOutcome> = outcomes.iter().collect();
    sorted.sort_by(|a, b| a.short_name.cmp(&b.short_name));

    let mut tallies: BTreeMap<ProfileName, Tally> = requested
        .iter()
        .filter(|name| registry.get(name.as_str()).is_ok())
        .map(|name| (name.clone(), Tally::default()))
        .collect();
    let mut succeeded_provisional_tests = Vec::new();

    for outcome in sorted {
        if outcome.result == TestResultKind::ProvisionalSkipped {
            continue;
        }
        if outcome.provisional {
            if outcome.result != TestResultKind::Succeeded {
                continue;
            }
            succeeded_provisional_tests.push(outcome.short_name.clone());
        }

        for profile in registry.profiles_for_test(&outcome.features, requested) {
            let tier = profile.classify(&outcome.features);
            if let Some(tally) = tallies.get_mut(&profile.name) {
                record(tally.tier_mut(tier), outcome);
            }
        }
    }

    let profiles = tallies
        .into_iter()
        .filter_map(|(name, tally)| {
            let profile = registry.get(name.as_str()).ok()?;
            let extended = profile.has_extended().then(|| ExtendedStatus {
                status: finish(tally.extended),
                supported_features: sorted_names(extended_supported.get(&name)),
                unsupported_features: sorted_names(extended_unsupported.get(&name)),
            });
            let mut report = ProfileReport {
                name: name.to_string(),
                summary: String::new(),
                core: finish(tally.core),
                extended,
            };
            report.summary = report.build_summary();
            Some(report)
        })
        .collect();

    CompiledReport {
        profiles,
        succeeded_provisional_tests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::features::feature_set;
    use common::report::{ResultKind, Statistics};
    use common::{ConformanceProfile, FeatureName};

    const PROFILE: &str = "testProfile";

    fn registry() -> ProfileRegistry {
        let mut registry = ProfileRegistry::new();
        registry
            .register(
                ConformanceProfile::new(PROFILE, feature_set(["coreFeature"]), feature_set(["extendedFeature"]))
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    fn outcome(name: &str, feature: &str, provisional: bool, result: TestResultKind) -> TestOutcome {
        TestOutcome {
            short_name: name.to_string(),
            features: vec![FeatureName::from(feature)],
            provisional,
            result,
            message: None,
            duration: None,
        }
    }

    fn compile_default(outcomes: &[TestOutcome]) -> CompiledReport {
        let requested: BTreeSet<ProfileName> = [ProfileName::from(PROFILE)].into();
        let supported: ExtendedSupport =
            [(ProfileName::from(PROFILE), feature_set(["extendedFeature"]))].into();
        compile(outcomes, &registry(), &requested, &supported, &ExtendedSupport::new())
    }

    #[test]
    fn test_all_succeeded_counts_provisional_successes() {
        use TestResultKind::*;
        let report = compile_default(&[
            outcome("coreTest", "coreFeature", false, Succeeded),
            outcome("extendedTest", "extendedFeature", false, Succeeded),
            outcome("coreProvisionalTest", "coreFeature", true, Succeeded),
            outcome("extendedProvisionalTest", "extendedFeature", true, Succeeded),
        ]);

        let profile = &report.profiles[0];
        assert_eq!(profile.summary, "Core tests succeeded. Extended tests succeeded.");
        assert_eq!(profile.core.statistics.passed, 2);
        let extended = profile.extended.as_ref().unwrap();
        assert_eq!(extended.status.statistics.passed, 2);
        assert_eq!(extended.supported_features, vec!["extendedFeature"]);
        assert_eq!(
            report.succeeded_provisional_tests,
            vec!["coreProvisionalTest", "extendedProvisionalTest"]
        );
    }

    #[test]
    fn test_mixed_results() {
        use TestResultKind::*;
        let report = compile_default(&[
            outcome("coreTest", "coreFeature", false, Failed),
            outcome("extendedTest", "extendedFeature", false, Skipped),
            outcome("coreProvisionalTest", "coreFeature", true, Succeeded),
            outcome("extendedProvisionalTest", "extendedFeature", true, ProvisionalSkipped),
        ]);

        let profile = &report.profiles[0];
        assert_eq!(
            profile.summary,
            "Core tests failed with 1 test failures. Extended tests partially succeeded with 1 test skips."
        );
        assert_eq!(profile.core.result, ResultKind::Failure);
        assert_eq!(profile.core.statistics.passed, 1);
        assert_eq!(profile.core.failed_tests, vec!["coreTest"]);

        let extended = &profile.extended.as_ref().unwrap().status;
        assert_eq!(extended.result, ResultKind::Partial);
        assert_eq!(extended.skipped_tests, vec!["extendedTest"]);
        assert_eq!(report.succeeded_provisional_tests, vec!["coreProvisionalTest"]);
    }

    #[test]
    fn test_failed_provisional_test_does_not_count() {
        use TestResultKind::*;
        let report = compile_default(&[
            outcome("coreTest", "coreFeature", false, Succeeded),
            outcome("coreProvisionalTest", "coreFeature", true, Failed),
        ]);

        let core = &report.profiles[0].core;
        assert_eq!(core.result, ResultKind::Success);
        assert_eq!(core.statistics.failed, 0);
        assert!(report.succeeded_provisional_tests.is_empty());
    }

    #[test]
    fn test_output_is_independent_of_execution_order() {
        use TestResultKind::*;
        let mut outcomes = vec![
            outcome("b", "coreFeature", false, Failed),
            outcome("a", "coreFeature", false, Failed),
            outcome("c", "extendedFeature", false, Skipped),
        ];
        let first = compile_default(&outcomes);
        outcomes.reverse();
        let second = compile_default(&outcomes);

        assert_eq!(first, second);
        assert_eq!(first.profiles[0].core.failed_tests, vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_feature_matches_no_profile() {
        let report = compile_default(&[outcome("odd", "unknownFeature", false, TestResultKind::Succeeded)]);

        let profile = &report.profiles[0];
        assert_eq!(profile.core.statistics, Statistics::default());
        assert_eq!(profile.core.result, ResultKind::Failure);
    }
}
