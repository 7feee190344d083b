//! Conformance profiles
//!
//! A profile bundles features under a name and splits them into Core
//! (mandatory for a conformance claim) and Extended (optional, reported
//! separately). Tests are assigned to profiles by their declared features.

use crate::features::{
    names, FeatureName, FeatureRegistry, FeatureResource, FeatureSet, SupportLevel,
};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

pub const GATEWAY_HTTP: &str = "GATEWAY-HTTP";
pub const GATEWAY_TLS: &str = "GATEWAY-TLS";
pub const GATEWAY_GRPC: &str = "GATEWAY-GRPC";
pub const MESH_HTTP: &str = "MESH-HTTP";
pub const MESH_GRPC: &str = "MESH-GRPC";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileName(String);

impl ProfileName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Borrow<str> for ProfileName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Support tier a test is counted under within a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Core,
    Extended,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Core => f.write_str("Core"),
            Tier::Extended => f.write_str("Extended"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("ConformanceProfile named {0:?} is already registered")]
    AlreadyRegistered(ProfileName),

    #[error("{0} is not a valid conformance profile")]
    NotFound(String),

    #[error("feature {feature} is both Core and Extended in profile {profile}")]
    OverlappingFeature {
        profile: ProfileName,
        feature: FeatureName,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceProfile {
    pub name: ProfileName,
    pub core_features: FeatureSet,
    pub extended_features: FeatureSet,
}

impl ConformanceProfile {
    /// Build a profile, rejecting features that appear in both tiers
    pub fn new(
        name: impl Into<ProfileName>,
        core_features: FeatureSet,
        extended_features: FeatureSet,
    ) -> Result<Self, ProfileError> {
        let name = name.into();
        if let Some(feature) = core_features.intersection(&extended_features).next() {
            return Err(ProfileError::OverlappingFeature {
                profile: name,
                feature: feature.clone(),
            });
        }
        Ok(Self {
            name,
            core_features,
            extended_features,
        })
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.core_features.contains(feature) || self.extended_features.contains(feature)
    }

    /// A test belongs to this profile iff every feature it needs is in Core ∪ Extended.
    /// Tests without features belong to every profile.
    pub fn covers(&self, features: &[FeatureName]) -> bool {
        features.iter().all(|f| self.has_feature(f.as_str()))
    }

    /// Extended if ANY of the test's features is Extended for this profile
    pub fn classify(&self, features: &[FeatureName]) -> Tier {
        if features
            .iter()
            .any(|f| self.extended_features.contains(f.as_str()))
        {
            Tier::Extended
        } else {
            Tier::Core
        }
    }

    pub fn has_extended(&self) -> bool {
        !self.extended_features.is_empty()
    }
}

/// Registry of profiles keyed by name. Registration is write-once.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<ProfileName, ConformanceProfile>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in Gateway and Mesh profiles, derived from the feature catalog
    pub fn standard(features: &FeatureRegistry) -> Self {
        let gateway_extended = features.names_for(FeatureResource::Gateway, SupportLevel::Extended);
        let http_extended = features.names_for(FeatureResource::HTTPRoute, SupportLevel::Extended);
        let tls_extended = features.names_for(FeatureResource::TLSRoute, SupportLevel::Extended);
        let mesh_extended = features.names_for(FeatureResource::Mesh, SupportLevel::Extended);

        let union = |a: &FeatureSet, b: &FeatureSet| -> FeatureSet { a.union(b).cloned().collect() };
        let core = |names: &[&str]| -> FeatureSet { names.iter().map(|&n| n.into()).collect() };

        let builtins = [
            (
                GATEWAY_HTTP,
                core(&[names::GATEWAY, names::REFERENCE_GRANT, names::HTTP_ROUTE]),
                union(&gateway_extended, &http_extended),
            ),
            (
                GATEWAY_TLS,
                core(&[names::GATEWAY, names::REFERENCE_GRANT, names::TLS_ROUTE]),
                union(&gateway_extended, &tls_extended),
            ),
            (
                GATEWAY_GRPC,
                core(&[names::GATEWAY, names::REFERENCE_GRANT, names::GRPC_ROUTE]),
                gateway_extended.clone(),
            ),
            (
                MESH_HTTP,
                core(&[names::MESH, names::HTTP_ROUTE]),
                mesh_extended.clone(),
            ),
            (
                MESH_GRPC,
                core(&[names::MESH, names::GRPC_ROUTE]),
                mesh_extended,
            ),
        ];

        let profiles = builtins
            .into_iter()
            .map(|(name, core_features, extended_features)| {
                let profile = ConformanceProfile {
                    name: name.into(),
                    core_features,
                    extended_features,
                };
                (profile.name.clone(), profile)
            })
            .collect();

        Self { profiles }
    }

    /// Register a profile. Re-registering a name is a configuration error.
    pub fn register(&mut self, profile: ConformanceProfile) -> Result<(), ProfileError> {
        if self.profiles.contains_key(&profile.name) {
            return Err(ProfileError::AlreadyRegistered(profile.name));
        }
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ConformanceProfile, ProfileError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    /// Profiles among `candidates` that cover every feature of a test, in name order.
    /// Candidates that are not registered are ignored.
    pub fn profiles_for_test<'a>(
        &'a self,
        features: &[FeatureName],
        candidates: &BTreeSet<ProfileName>,
    ) -> Vec<&'a ConformanceProfile> {
        candidates
            .iter()
            .filter_map(|name| self.profiles.get(name))
            .filter(|profile| profile.covers(features))
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &ProfileName> {
        self.profiles.keys()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::feature_set;

    fn test_profile() -> ConformanceProfile {
        ConformanceProfile::new("P", feature_set(["A"]), feature_set(["B"])).expect("valid profile")
    }

    #[test]
    fn test_overlapping_tiers_rejected() {
        let err = ConformanceProfile::new("P", feature_set(["A", "B"]), feature_set(["B"]))
            .unwrap_err();
        assert_eq!(
            err,
            ProfileError::OverlappingFeature {
                profile: "P".into(),
                feature: "B".into(),
            }
        );
    }

    #[test]
    fn test_classify_straddling_test_is_extended() {
        let profile = test_profile();

        assert_eq!(profile.classify(&["A".into()]), Tier::Core);
        assert_eq!(profile.classify(&["A".into(), "B".into()]), Tier::Extended);
        assert_eq!(profile.classify(&[]), Tier::Core);
    }

    #[test]
    fn test_covers_requires_every_feature() {
        let profile = test_profile();

        assert!(profile.covers(&[]));
        assert!(profile.covers(&["A".into(), "B".into()]));
        assert!(!profile.covers(&["A".into(), "C".into()]));
    }

    #[test]
    fn test_register_is_write_once() {
        let mut registry = ProfileRegistry::new();
        registry.register(test_profile()).expect("first registration");

        let replacement =
            ConformanceProfile::new("P", feature_set(["X"]), FeatureSet::new()).expect("valid");
        let err = registry.register(replacement).unwrap_err();

        assert_eq!(err, ProfileError::AlreadyRegistered("P".into()));
        // Original definition is untouched
        let kept = registry.get("P").expect("still registered");
        assert_eq!(kept.core_features, feature_set(["A"]));
    }

    #[test]
    fn test_get_unknown_profile() {
        let registry = ProfileRegistry::new();
        let err = registry.get("NOPE").unwrap_err();
        assert_eq!(err.to_string(), "NOPE is not a valid conformance profile");
    }

    #[test]
    fn test_standard_profiles_are_disjoint() {
        let features = FeatureRegistry::standard();
        let registry = ProfileRegistry::standard(&features);

        assert_eq!(registry.len(), 5);
        for name in registry.names() {
            let profile = registry.get(name.as_str()).expect("registered");
            assert!(
                profile
                    .core_features
                    .is_disjoint(&profile.extended_features),
                "Profile {} has overlapping tiers",
                name
            );
        }
    }

    #[test]
    fn test_standard_http_profile_contents() {
        let features = FeatureRegistry::standard();
        let registry = ProfileRegistry::standard(&features);
        let http = registry.get(GATEWAY_HTTP).expect("GATEWAY-HTTP");

        assert!(http.core_features.contains(names::HTTP_ROUTE));
        assert!(http.extended_features.contains(names::GATEWAY_PORT_8080));
        assert!(http.extended_features.contains(names::HTTP_ROUTE_METHOD_MATCHING));
        assert!(!http.has_feature(names::MESH));
    }
}
