//! Conformance test registry
//!
//! Tests are plain values registered into a [`TestRegistry`] owned by the
//! caller. Registration order is the default run order; reports key on the
//! short name only.

use crate::client::ObjectClient;
use crate::config::TimeoutConfig;
use crate::error::TestResult;
use crate::manifests::{Applier, ManifestSource};
use crate::roundtripper::RoundTripper;
use common::{FeatureName, FeatureSet};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Body of a conformance test
pub type TestFn = Arc<dyn for<'a> Fn(&'a TestContext) -> BoxFuture<'a, TestResult> + Send + Sync>;

#[derive(Clone)]
pub struct ConformanceTest {
    /// Unique name, used as the report key
    pub short_name: String,
    pub description: String,
    pub features: Vec<FeatureName>,
    /// Fixtures applied before the body runs
    pub manifests: Vec<String>,
    /// Tracked for promotion; does not gate conformance unless it passes
    pub provisional: bool,
    pub slow: bool,
    pub test: TestFn,
}

impl ConformanceTest {
    pub fn new<F>(short_name: &str, description: &str, test: F) -> Self
    where
        F: for<'a> Fn(&'a TestContext) -> BoxFuture<'a, TestResult> + Send + Sync + 'static,
    {
        Self {
            short_name: short_name.to_string(),
            description: description.to_string(),
            features: Vec::new(),
            manifests: Vec::new(),
            provisional: false,
            slow: false,
            test: Arc::new(test),
        }
    }

    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.features = features.iter().map(|&f| f.into()).collect();
        self
    }

    pub fn with_manifests(mut self, manifests: &[&str]) -> Self {
        self.manifests = manifests.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn provisional(mut self) -> Self {
        self.provisional = true;
        self
    }

    pub fn slow(mut self) -> Self {
        self.slow = true;
        self
    }

    /// Whether `supported` contains every feature this test needs
    pub fn is_supported_by(&self, supported: &FeatureSet) -> bool {
        self.features.iter().all(|f| supported.contains(f))
    }
}

impl fmt::Debug for ConformanceTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConformanceTest")
            .field("short_name", &self.short_name)
            .field("features", &self.features)
            .field("manifests", &self.manifests)
            .field("provisional", &self.provisional)
            .field("slow", &self.slow)
            .finish_non_exhaustive()
    }
}

/// Ordered list of tests
#[derive(Debug, Clone, Default)]
pub struct TestRegistry {
    tests: Vec<ConformanceTest>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a test. Duplicate short names are only detected at run time.
    pub fn register(&mut self, test: ConformanceTest) {
        self.tests.push(test);
    }

    /// Every registered test in registration order; may be iterated repeatedly
    pub fn all(&self) -> impl Iterator<Item = &ConformanceTest> + Clone {
        self.tests.iter()
    }

    /// First test registered under `short_name`
    pub fn get(&self, short_name: &str) -> Option<&ConformanceTest> {
        self.tests.iter().find(|t| t.short_name == short_name)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// Everything a test body can reach
pub struct TestContext {
    pub test_name: String,
    pub client: Arc<dyn ObjectClient>,
    pub round_tripper: Arc<dyn RoundTripper>,
    pub manifests: Arc<dyn ManifestSource>,
    pub timeouts: TimeoutConfig,
    pub supported_features: FeatureSet,
    pub gateway_class_name: String,
    pub controller_name: Option<String>,
    /// Tracks fixtures applied by this test; cleaned up by the suite
    pub applier: Applier,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::features::feature_set;
    use futures::FutureExt;

    fn noop(name: &str) -> ConformanceTest {
        ConformanceTest::new(name, "does nothing", |_ctx| async { Ok(()) }.boxed())
    }

    #[test]
    fn test_register_keeps_order_and_duplicates() {
        let mut registry = TestRegistry::new();
        registry.register(noop("B"));
        registry.register(noop("A"));
        registry.register(noop("B"));

        let names: Vec<_> = registry.all().map(|t| t.short_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A", "B"]);
    }

    #[test]
    fn test_get_returns_first_registration() {
        let mut registry = TestRegistry::new();
        registry.register(noop("A").provisional());
        registry.register(noop("A"));

        assert!(registry.get("A").expect("registered").provisional);
        assert!(registry.get("Missing").is_none());
    }

    #[test]
    fn test_all_is_restartable() {
        let mut registry = TestRegistry::new();
        registry.register(noop("A"));
        registry.register(noop("B"));

        let all = registry.all();
        assert_eq!(all.clone().count(), 2);
        assert_eq!(all.count(), 2);
    }

    #[test]
    fn test_is_supported_by() {
        let test = noop("T").with_features(&["Gateway", "HTTPRoute"]);

        assert!(test.is_supported_by(&feature_set(["Gateway", "HTTPRoute", "GRPCRoute"])));
        assert!(!test.is_supported_by(&feature_set(["Gateway"])));
        assert!(noop("Bare").is_supported_by(&FeatureSet::new()));
    }
}
