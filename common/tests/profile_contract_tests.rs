// Profile Contract Tests
//
// Goal: pin down how tests are assigned to profiles and tiers.
// The report compiler relies on these two rules:
// - a test belongs to a profile iff all of its features are in Core ∪ Extended
// - within a profile, a test is Extended iff ANY of its features is Extended

use common::features::{feature_set, names};
use common::{ConformanceProfile, FeatureName, FeatureRegistry, ProfileRegistry, Tier};

fn registry_with(profiles: Vec<ConformanceProfile>) -> ProfileRegistry {
    let mut registry = ProfileRegistry::new();
    for profile in profiles {
        registry.register(profile).expect("Should register");
    }
    registry
}

fn features(names: &[&str]) -> Vec<FeatureName> {
    names.iter().map(|&n| n.into()).collect()
}

/// Contract: a test with zero features matches every candidate profile
#[test]
fn test_featureless_test_matches_all_profiles() {
    let registry = registry_with(vec![
        ConformanceProfile::new("P1", feature_set(["A"]), feature_set(["B"])).unwrap(),
        ConformanceProfile::new("P2", feature_set(["C"]), feature_set([] as [&str; 0])).unwrap(),
    ]);
    let candidates = registry.names().cloned().collect();

    let matched = registry.profiles_for_test(&[], &candidates);

    assert_eq!(matched.len(), 2);
}

/// Contract: one feature outside every profile excludes the test everywhere
#[test]
fn test_unknown_feature_matches_no_profile() {
    let registry = registry_with(vec![
        ConformanceProfile::new("P1", feature_set(["A"]), feature_set(["B"])).unwrap(),
        ConformanceProfile::new("P2", feature_set(["A"]), feature_set([] as [&str; 0])).unwrap(),
    ]);
    let candidates = registry.names().cloned().collect();

    let matched = registry.profiles_for_test(&features(&["A", "Z"]), &candidates);

    assert!(matched.is_empty());
}

/// Contract: only requested candidates are considered
#[test]
fn test_profiles_for_test_respects_candidates() {
    let registry = registry_with(vec![
        ConformanceProfile::new("P1", feature_set(["A"]), feature_set([] as [&str; 0])).unwrap(),
        ConformanceProfile::new("P2", feature_set(["A"]), feature_set([] as [&str; 0])).unwrap(),
    ]);
    let candidates = ["P2".into(), "MISSING".into()].into_iter().collect();

    let matched = registry.profiles_for_test(&features(&["A"]), &candidates);

    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].name.as_str(), "P2");
}

/// Contract: a test straddling Core and Extended is Extended
#[test]
fn test_tier_classification_is_any_extended() {
    let profile = ConformanceProfile::new("P", feature_set(["A"]), feature_set(["B"])).unwrap();

    let test_cases = vec![
        (features(&["A"]), Tier::Core),
        (features(&["B"]), Tier::Extended),
        (features(&["A", "B"]), Tier::Extended),
        (features(&[]), Tier::Core),
    ];

    for (test_features, expected) in test_cases {
        assert_eq!(
            profile.classify(&test_features),
            expected,
            "features: {:?}",
            test_features
        );
    }
}

/// Contract: the built-in HTTP profile accepts a method matching test as Extended
#[test]
fn test_standard_profiles_classify_http_tests() {
    let catalog = FeatureRegistry::standard();
    let registry = ProfileRegistry::standard(&catalog);
    let candidates = registry.names().cloned().collect();

    let test_features = features(&[names::GATEWAY, names::HTTP_ROUTE, names::HTTP_ROUTE_METHOD_MATCHING]);
    let matched = registry.profiles_for_test(&test_features, &candidates);

    let matched_names: Vec<&str> = matched.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(matched_names, vec!["GATEWAY-HTTP"]);
    assert_eq!(matched[0].classify(&test_features), Tier::Extended);
}

/// Contract: no mesh feature is ever part of a Gateway profile
#[test]
fn test_gateway_profiles_exclude_mesh_features() {
    let catalog = FeatureRegistry::standard();
    let registry = ProfileRegistry::standard(&catalog);

    for name in ["GATEWAY-HTTP", "GATEWAY-TLS", "GATEWAY-GRPC"] {
        let profile = registry.get(name).expect("built-in profile");
        let mesh: Vec<_> = profile
            .core_features
            .iter()
            .chain(profile.extended_features.iter())
            .filter(|f| catalog.is_mesh(f.as_str()))
            .collect();
        assert!(mesh.is_empty(), "{} contains mesh features {:?}", name, mesh);
    }
}
