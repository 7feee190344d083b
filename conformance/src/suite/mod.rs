//! Conformance suite
//!
//! A [`ConformanceSuite`] is built once per target implementation. Building it
//! settles which features are supported and which profiles are claimed; after
//! [`ConformanceSuite::setup`] it runs registered tests one at a time and
//! compiles the outcomes into a [`ConformanceReport`].

pub mod compiler;
pub mod features;
pub mod outcome;
pub mod version;

pub use self::compiler::{compile, CompiledReport, ExtendedSupport};
pub use self::features::{FeatureSelection, FeatureSource};
pub use self::outcome::{TestOutcome, TestResultKind};
pub use self::version::ApiVersionInfo;

use crate::client::ObjectClient;
use crate::config::{SuiteConfig, TimeoutConfig};
use crate::error::{SuiteError, TestError, TestResult};
use crate::manifests::{safe_lock, Applier, ManifestSource};
use crate::metrics::record_test_outcome;
use crate::polling::{gateway_class_must_be_accepted, namespaces_must_be_ready};
use crate::registry::{ConformanceTest, TestContext, TestRegistry};
use crate::roundtripper::RoundTripper;
use chrono::SecondsFormat;
use common::report::{ConformanceReport, Implementation, REPORT_API_VERSION, REPORT_KIND};
use common::{FeatureName, FeatureRegistry, FeatureSet, ProfileName, ProfileRegistry};
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Fixture applied during setup unless overridden
pub const DEFAULT_BASE_MANIFESTS: &str = "base/manifests.yaml";

/// Namespaces created by the base manifests
pub const BASE_NAMESPACES: [&str; 3] = [
    "gateway-conformance-infra",
    "gateway-conformance-app-backend",
    "gateway-conformance-web-backend",
];

pub struct SuiteOptions {
    pub client: Arc<dyn ObjectClient>,
    pub round_tripper: Arc<dyn RoundTripper>,
    pub manifests: Arc<dyn ManifestSource>,
    pub gateway_class_name: String,
    pub supported_features: FeatureSet,
    pub exempt_features: FeatureSet,
    pub enable_all_supported_features: bool,
    pub conformance_profiles: BTreeSet<ProfileName>,
    pub skip_tests: BTreeSet<String>,
    pub run_test: Option<String>,
    pub skip_provisional_tests: bool,
    pub allow_crds_mismatch: bool,
    pub cleanup_base_resources: bool,
    pub base_manifests: Vec<String>,
    pub namespace_labels: BTreeMap<String, String>,
    pub namespace_annotations: BTreeMap<String, String>,
    pub implementation: Implementation,
    pub mode: String,
    pub timeout_config: TimeoutConfig,
    pub features: FeatureRegistry,
    pub profiles: ProfileRegistry,
}

impl SuiteOptions {
    /// Options with the standard registries and every setting at its default
    pub fn new(
        client: Arc<dyn ObjectClient>,
        round_tripper: Arc<dyn RoundTripper>,
        manifests: Arc<dyn ManifestSource>,
    ) -> Self {
        Self::from_config(&SuiteConfig::default(), client, round_tripper, manifests)
    }

    pub fn from_config(
        config: &SuiteConfig,
        client: Arc<dyn ObjectClient>,
        round_tripper: Arc<dyn RoundTripper>,
        manifests: Arc<dyn ManifestSource>,
    ) -> Self {
        let features = FeatureRegistry::standard();
        let profiles = ProfileRegistry::standard(&features);
        let names = |list: &[String]| -> FeatureSet {
            list.iter().map(|f| FeatureName::from(f.as_str())).collect()
        };

        Self {
            client,
            round_tripper,
            manifests,
            gateway_class_name: config.gateway_class_name.clone(),
            supported_features: names(&config.supported_features),
            exempt_features: names(&config.exempt_features),
            enable_all_supported_features: config.enable_all_supported_features,
            conformance_profiles: config
                .conformance_profiles
                .iter()
                .map(|p| ProfileName::new(p.as_str()))
                .collect(),
            skip_tests: config.skip_tests.iter().cloned().collect(),
            run_test: config.run_test.clone(),
            skip_provisional_tests: config.skip_provisional_tests,
            allow_crds_mismatch: config.allow_crds_mismatch,
            cleanup_base_resources: config.cleanup_base_resources,
            base_manifests: vec![DEFAULT_BASE_MANIFESTS.to_string()],
            namespace_labels: config.namespace_labels.clone(),
            namespace_annotations: config.namespace_annotations.clone(),
            implementation: config.implementation.clone(),
            mode: config.mode.clone(),
            timeout_config: config.timeouts.clone(),
            features,
            profiles,
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    outcomes: Option<Vec<TestOutcome>>,
}

/// Clears the running flag however a run ends
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        safe_lock(self.state).running = false;
    }
}

pub struct ConformanceSuite {
    client: Arc<dyn ObjectClient>,
    round_tripper: Arc<dyn RoundTripper>,
    manifests: Arc<dyn ManifestSource>,
    gateway_class_name: String,
    supported_features: FeatureSet,
    feature_source: FeatureSource,
    conformance_profiles: BTreeSet<ProfileName>,
    profiles: ProfileRegistry,
    extended_supported: ExtendedSupport,
    extended_unsupported: ExtendedSupport,
    skip_tests: BTreeSet<String>,
    run_test: Option<String>,
    skip_provisional_tests: bool,
    cleanup_base_resources: bool,
    base_manifests: Vec<String>,
    namespace_labels: BTreeMap<String, String>,
    namespace_annotations: BTreeMap<String, String>,
    implementation: Implementation,
    mode: String,
    timeouts: TimeoutConfig,
    api_version: ApiVersionInfo,
    controller_name: Mutex<Option<String>>,
    base_applier: Mutex<Option<Arc<Applier>>>,
    state: Mutex<RunState>,
}

impl ConformanceSuite {
    /// Resolve features and profiles; any error here means no test may run
    pub async fn new(options: SuiteOptions) -> Result<Self, SuiteError> {
        let selection = FeatureSelection {
            enable_all: options.enable_all_supported_features,
            supported: &options.supported_features,
            exempt: &options.exempt_features,
            run_test: options.run_test.as_deref(),
        };
        let (mut supported_features, feature_source) = features::resolve_supported_features(
            selection,
            &options.features,
            options.client.as_ref(),
            &options.gateway_class_name,
        )
        .await?;

        let mut extended_supported = ExtendedSupport::new();
        let mut extended_unsupported = ExtendedSupport::new();
        for name in &options.conformance_profiles {
            let profile = options.profiles.get(name.as_str())?;

            // Claiming a profile implies its core features
            if feature_source == FeatureSource::Manual {
                supported_features.extend(profile.core_features.iter().cloned());
            }

            let (supported, unsupported): (FeatureSet, FeatureSet) = profile
                .extended_features
                .iter()
                .cloned()
                .partition(|f| supported_features.contains(f));
            extended_supported.insert(name.clone(), supported);
            extended_unsupported.insert(name.clone(), unsupported);
        }

        if !options.conformance_profiles.is_empty() {
            options.implementation.validate()?;
        }

        let api_version =
            version::detect_api_version(options.client.as_ref(), options.allow_crds_mismatch).await?;

        info!(
            gateway_class = %options.gateway_class_name,
            source = ?feature_source,
            features = supported_features.len(),
            profiles = ?options.conformance_profiles,
            "Conformance suite ready"
        );

        Ok(Self {
            client: options.client,
            round_tripper: options.round_tripper,
            manifests: options.manifests,
            gateway_class_name: options.gateway_class_name,
            supported_features,
            feature_source,
            conformance_profiles: options.conformance_profiles,
            profiles: options.profiles,
            extended_supported,
            extended_unsupported,
            skip_tests: options.skip_tests,
            run_test: options.run_test,
            skip_provisional_tests: options.skip_provisional_tests,
            cleanup_base_resources: options.cleanup_base_resources,
            base_manifests: options.base_manifests,
            namespace_labels: options.namespace_labels,
            namespace_annotations: options.namespace_annotations,
            implementation: options.implementation,
            mode: options.mode,
            timeouts: options.timeout_config,
            api_version,
            controller_name: Mutex::new(None),
            base_applier: Mutex::new(None),
            state: Mutex::new(RunState::default()),
        })
    }

    pub fn supported_features(&self) -> &FeatureSet {
        &self.supported_features
    }

    pub fn feature_source(&self) -> FeatureSource {
        self.feature_source
    }

    pub fn extended_supported_features(&self) -> &ExtendedSupport {
        &self.extended_supported
    }

    pub fn extended_unsupported_features(&self) -> &ExtendedSupport {
        &self.extended_unsupported
    }

    pub fn api_version(&self) -> &ApiVersionInfo {
        &self.api_version
    }

    /// Controller name of the GatewayClass, known after setup
    pub fn controller_name(&self) -> Option<String> {
        safe_lock(&self.controller_name).clone()
    }

    fn applier(&self, controller_name: Option<String>) -> Applier {
        Applier::new(
            self.client.clone(),
            self.manifests.clone(),
            &self.gateway_class_name,
        )
        .with_controller_name(controller_name)
        .with_namespace_metadata(
            self.namespace_labels.clone(),
            self.namespace_annotations.clone(),
        )
        .with_timeouts(&self.timeouts)
    }

    /// Wait for the GatewayClass, apply base manifests and wait for them
    pub async fn setup(&self) -> Result<(), SuiteError> {
        info!("Test setup: ensuring GatewayClass has been accepted");
        let controller = gateway_class_must_be_accepted(
            self.client.as_ref(),
            &self.timeouts,
            &self.gateway_class_name,
        )
        .await?;
        *safe_lock(&self.controller_name) = Some(controller.clone());

        info!("Test setup: applying base manifests");
        let applier = Arc::new(self.applier(Some(controller)));
        *safe_lock(&self.base_applier) = Some(applier.clone());
        for manifest in &self.base_manifests {
            applier.apply_manifest(manifest).await?;
        }

        info!("Test setup: ensuring Gateways and Pods from base manifests are ready");
        let namespaces: Vec<String> = BASE_NAMESPACES.iter().map(|ns| ns.to_string()).collect();
        namespaces_must_be_ready(self.client.as_ref(), &self.timeouts, &namespaces).await?;
        Ok(())
    }

    /// Remove base resources applied by [`setup`](Self::setup), when cleanup is enabled
    pub async fn teardown(&self) -> Result<(), SuiteError> {
        if !self.cleanup_base_resources {
            debug!("Base resource cleanup disabled");
            return Ok(());
        }
        let applier = safe_lock(&self.base_applier).take();
        if let Some(applier) = applier {
            info!("Cleaning up base resources");
            applier.cleanup().await?;
        }
        Ok(())
    }

    /// Setup, run and teardown; teardown happens even when setup or the run fails
    ///
    /// The first error wins: a setup or run failure is returned in preference
    /// to a cleanup failure.
    pub async fn run_to_completion(&self, registry: &TestRegistry) -> Result<(), SuiteError> {
        let result = match self.setup().await {
            Ok(()) => self.run(registry).await,
            Err(e) => {
                error!(error = %e, "Test setup failed");
                Err(e)
            }
        };
        let cleanup = self.teardown().await;
        if let Err(e) = &cleanup {
            warn!(error = %e, "Failed to clean up base resources");
        }
        result.and(cleanup)
    }

    /// Reject registries the report could not key unambiguously
    fn preflight(&self, registry: &TestRegistry) -> Result<(), SuiteError> {
        let mut seen = BTreeSet::new();
        for test in registry.all() {
            if !seen.insert(test.short_name.as_str()) {
                return Err(SuiteError::DuplicateTest(test.short_name.clone()));
            }
        }
        if let Some(run_test) = &self.run_test {
            if registry.get(run_test).is_none() {
                return Err(SuiteError::TestNotFound(run_test.clone()));
            }
        }
        Ok(())
    }

    /// Outcome decided without running the body, if any; first match wins
    fn result_without_running(&self, test: &ConformanceTest) -> Option<TestResultKind> {
        if self
            .run_test
            .as_ref()
            .is_some_and(|run_test| *run_test != test.short_name)
        {
            return Some(TestResultKind::Skipped);
        }
        if self.skip_tests.contains(&test.short_name) {
            return Some(TestResultKind::Skipped);
        }
        if self.skip_provisional_tests && test.provisional {
            return Some(TestResultKind::ProvisionalSkipped);
        }
        if !test.is_supported_by(&self.supported_features) {
            return Some(TestResultKind::NotSupported);
        }
        None
    }

    /// Run every registered test in order
    ///
    /// Fails without side effects when another run is in flight. Individual
    /// test failures only affect that test's outcome.
    pub async fn run(&self, registry: &TestRegistry) -> Result<(), SuiteError> {
        {
            let mut state = safe_lock(&self.state);
            if state.running {
                return Err(SuiteError::AlreadyRunning);
            }
            self.preflight(registry)?;
            state.running = true;
            state.outcomes = None;
        }
        let guard = RunGuard { state: &self.state };

        let mut outcomes = Vec::with_capacity(registry.len());
        let mut executed_any = false;

        for test in registry.all() {
            let outcome = match self.result_without_running(test) {
                Some(result) => TestOutcome::new(test, result),
                None => {
                    if executed_any {
                        debug!(delay = ?self.timeouts.test_isolation(), "Test isolation cooldown");
                        tokio::time::sleep(self.timeouts.test_isolation()).await;
                    }
                    executed_any = true;
                    self.execute(test).await
                }
            };

            record_test_outcome(
                &outcome.short_name,
                &outcome.result.to_string(),
                outcome.duration.map(|d| d.as_secs_f64()),
            );
            outcomes.push(outcome);
        }

        let summary = outcomes.iter().fold(BTreeMap::new(), |mut acc, o| {
            *acc.entry(o.result.to_string()).or_insert(0usize) += 1;
            acc
        });
        info!(results = ?summary, "Conformance run finished");

        safe_lock(&self.state).outcomes = Some(outcomes);
        drop(guard);
        Ok(())
    }

    fn context(&self, test: &ConformanceTest) -> TestContext {
        let controller_name = self.controller_name();
        TestContext {
            test_name: test.short_name.clone(),
            client: self.client.clone(),
            round_tripper: self.round_tripper.clone(),
            manifests: self.manifests.clone(),
            timeouts: self.timeouts.clone(),
            supported_features: self.supported_features.clone(),
            gateway_class_name: self.gateway_class_name.clone(),
            controller_name: controller_name.clone(),
            applier: self.applier(controller_name),
        }
    }

    async fn execute(&self, test: &ConformanceTest) -> TestOutcome {
        info!(test = %test.short_name, slow = test.slow, "Running test: {}", test.description);
        let ctx = self.context(test);
        let start = Instant::now();

        let body = AssertUnwindSafe(run_body(test, &ctx)).catch_unwind();
        let caught = match self.timeouts.test_limit() {
            Some(limit) => tokio::time::timeout(limit, body)
                .await
                .map_err(|_| TestError::Timeout(limit)),
            None => Ok(body.await),
        };
        let result = match caught {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(TestError::Panic(panic_message(panic))),
            Err(e) => Err(e),
        };

        if self.cleanup_base_resources {
            if let Err(e) = ctx.applier.cleanup().await {
                warn!(test = %test.short_name, error = %e, "Failed to clean up test resources");
            }
        }

        let mut outcome = TestOutcome::new(
            test,
            if result.is_ok() {
                TestResultKind::Succeeded
            } else {
                TestResultKind::Failed
            },
        );
        outcome.duration = Some(start.elapsed());
        match result {
            Ok(()) => info!(test = %test.short_name, duration = ?outcome.duration, "Test succeeded"),
            Err(e) => {
                error!(test = %test.short_name, error = %e, "Test failed");
                outcome.message = Some(e.to_string());
            }
        }
        outcome
    }

    /// Outcomes of the last completed run, in execution order
    pub fn outcomes(&self) -> Option<Vec<TestOutcome>> {
        safe_lock(&self.state).outcomes.clone()
    }

    /// Compile the last completed run into a report
    pub fn report(&self) -> Result<ConformanceReport, SuiteError> {
        let state = safe_lock(&self.state);
        if state.running {
            return Err(SuiteError::ReportWhileRunning);
        }
        let outcomes = state.outcomes.as_ref().ok_or(SuiteError::NoResults)?;

        let compiled = compile(
            outcomes,
            &self.profiles,
            &self.conformance_profiles,
            &self.extended_supported,
            &self.extended_unsupported,
        );

        Ok(ConformanceReport {
            api_version: REPORT_API_VERSION.to_string(),
            kind: REPORT_KIND.to_string(),
            date: chrono::Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            implementation: self.implementation.clone(),
            gateway_api_version: self.api_version.version.clone(),
            gateway_api_channel: self.api_version.channel.clone(),
            mode: self.mode.clone(),
            profiles: compiled.profiles,
            succeeded_provisional_tests: compiled.succeeded_provisional_tests,
        })
    }
}

async fn run_body(test: &ConformanceTest, ctx: &TestContext) -> TestResult {
    for manifest in &test.manifests {
        ctx.applier.apply_manifest(manifest).await?;
    }
    (test.test)(ctx).await
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
