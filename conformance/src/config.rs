//! Configuration for the conformance harness
//!
//! `SuiteConfig` is read from a TOML file and then overridden by
//! `GATEWAY_CONFORMANCE_*` environment variables.

use common::Implementation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "GATEWAY_CONFORMANCE_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{var} must be true or false, got {value:?}")]
    InvalidBool { var: String, value: String },
}

/// Timeouts for every wait the harness performs
///
/// Values are in seconds unless the field says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Applying a single object (default: 60s)
    #[serde(default = "default_create_timeout")]
    pub create_secs: u64,

    /// Deleting a single object during cleanup (default: 10s)
    #[serde(default = "default_delete_timeout")]
    pub delete_secs: u64,

    #[serde(default = "default_long_wait")]
    pub gateway_must_have_address_secs: u64,

    #[serde(default = "default_long_wait")]
    pub gateway_must_have_condition_secs: u64,

    #[serde(default = "default_long_wait")]
    pub gwc_must_be_accepted_secs: u64,

    #[serde(default = "default_short_wait")]
    pub route_must_have_parents_secs: u64,

    #[serde(default = "default_short_wait")]
    pub latest_observed_generation_set_secs: u64,

    /// Every Gateway Programmed and every Pod Ready (default: 300s)
    #[serde(default = "default_namespaces_must_be_ready")]
    pub namespaces_must_be_ready_secs: u64,

    /// Probe requests sent through the data plane (default: 10s)
    #[serde(default = "default_request_timeout")]
    pub request_secs: u64,

    /// How long a route may take to serve traffic consistently (default: 30s)
    #[serde(default = "default_max_time_to_consistency")]
    pub max_time_to_consistency_secs: u64,

    /// Optional upper bound on a single test body (default: none)
    ///
    /// Unset, a test is bounded only by the waits it performs.
    #[serde(default)]
    pub default_test_secs: Option<u64>,

    /// Cooldown between two executed tests (default: 3s)
    #[serde(default = "default_test_isolation")]
    pub test_isolation_secs: u64,

    /// Interval between fetches in polling loops (default: 1000ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive successful probes required before traffic counts as consistent
    #[serde(default = "default_required_consecutive_successes")]
    pub required_consecutive_successes: u32,
}

fn default_create_timeout() -> u64 {
    60
}

fn default_delete_timeout() -> u64 {
    10
}

fn default_long_wait() -> u64 {
    180
}

fn default_short_wait() -> u64 {
    60
}

fn default_namespaces_must_be_ready() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_time_to_consistency() -> u64 {
    30
}

fn default_test_isolation() -> u64 {
    3
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_required_consecutive_successes() -> u32 {
    3
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            create_secs: default_create_timeout(),
            delete_secs: default_delete_timeout(),
            gateway_must_have_address_secs: default_long_wait(),
            gateway_must_have_condition_secs: default_long_wait(),
            gwc_must_be_accepted_secs: default_long_wait(),
            route_must_have_parents_secs: default_short_wait(),
            latest_observed_generation_set_secs: default_short_wait(),
            namespaces_must_be_ready_secs: default_namespaces_must_be_ready(),
            request_secs: default_request_timeout(),
            max_time_to_consistency_secs: default_max_time_to_consistency(),
            default_test_secs: None,
            test_isolation_secs: default_test_isolation(),
            poll_interval_ms: default_poll_interval_ms(),
            required_consecutive_successes: default_required_consecutive_successes(),
        }
    }
}

impl TimeoutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn test_isolation(&self) -> Duration {
        Duration::from_secs(self.test_isolation_secs)
    }

    pub fn test_limit(&self) -> Option<Duration> {
        self.default_test_secs.map(Duration::from_secs)
    }
}

/// Everything needed to build and run a suite
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuiteConfig {
    #[serde(default = "default_gateway_class_name")]
    pub gateway_class_name: String,

    #[serde(default)]
    pub supported_features: Vec<String>,

    #[serde(default)]
    pub exempt_features: Vec<String>,

    #[serde(default)]
    pub enable_all_supported_features: bool,

    #[serde(default)]
    pub conformance_profiles: Vec<String>,

    #[serde(default)]
    pub skip_tests: Vec<String>,

    /// Run only this test (by short name)
    pub run_test: Option<String>,

    #[serde(default)]
    pub skip_provisional_tests: bool,

    /// Report UNDEFINED instead of failing when installed CRDs disagree
    #[serde(default)]
    pub allow_crds_mismatch: bool,

    #[serde(default = "default_true")]
    pub cleanup_base_resources: bool,

    /// Directory holding `base/` and `tests/` fixtures (default: bundled manifests)
    pub manifests_dir: Option<PathBuf>,

    /// Where to write the YAML report; no report file when unset
    pub report_output: Option<PathBuf>,

    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default)]
    pub implementation: Implementation,

    #[serde(default)]
    pub namespace_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub namespace_annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_gateway_class_name() -> String {
    "gateway-conformance".to_string()
}

fn default_true() -> bool {
    true
}

fn default_mode() -> String {
    "default".to_string()
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            gateway_class_name: default_gateway_class_name(),
            supported_features: Vec::new(),
            exempt_features: Vec::new(),
            enable_all_supported_features: false,
            conformance_profiles: Vec::new(),
            skip_tests: Vec::new(),
            run_test: None,
            skip_provisional_tests: false,
            allow_crds_mismatch: false,
            cleanup_base_resources: default_true(),
            manifests_dir: None,
            report_output: None,
            mode: default_mode(),
            implementation: Implementation::default(),
            namespace_labels: BTreeMap::new(),
            namespace_annotations: BTreeMap::new(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Split a comma-separated list, dropping blanks
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    value
        .trim()
        .parse::<bool>()
        .map_err(|_| ConfigError::InvalidBool {
            var: var.to_string(),
            value: value.to_string(),
        })
}

impl SuiteConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `GATEWAY_CONFORMANCE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{}{}", ENV_PREFIX, suffix);
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, val)) = var("GATEWAY_CLASS") {
            self.gateway_class_name = val;
        }
        if let Some((_, val)) = var("SUPPORTED_FEATURES") {
            self.supported_features = parse_list(&val);
        }
        if let Some((_, val)) = var("EXEMPT_FEATURES") {
            self.exempt_features = parse_list(&val);
        }
        if let Some((name, val)) = var("ALL_FEATURES") {
            self.enable_all_supported_features = parse_bool(&name, &val)?;
        }
        if let Some((_, val)) = var("PROFILES") {
            self.conformance_profiles = parse_list(&val);
        }
        if let Some((_, val)) = var("SKIP_TESTS") {
            self.skip_tests = parse_list(&val);
        }
        if let Some((_, val)) = var("RUN_TEST") {
            self.run_test = Some(val).filter(|v| !v.trim().is_empty());
        }
        if let Some((name, val)) = var("SKIP_PROVISIONAL_TESTS") {
            self.skip_provisional_tests = parse_bool(&name, &val)?;
        }
        if let Some((name, val)) = var("ALLOW_CRDS_MISMATCH") {
            self.allow_crds_mismatch = parse_bool(&name, &val)?;
        }
        if let Some((name, val)) = var("CLEANUP_BASE_RESOURCES") {
            self.cleanup_base_resources = parse_bool(&name, &val)?;
        }
        if let Some((_, val)) = var("MANIFESTS_DIR") {
            self.manifests_dir = Some(PathBuf::from(val));
        }
        if let Some((_, val)) = var("REPORT_OUTPUT") {
            self.report_output = Some(PathBuf::from(val));
        }
        if let Some((_, val)) = var("MODE") {
            self.mode = val;
        }

        // Implementation metadata
        if let Some((_, val)) = var("ORGANIZATION") {
            self.implementation.organization = val;
        }
        if let Some((_, val)) = var("PROJECT") {
            self.implementation.project = val;
        }
        if let Some((_, val)) = var("URL") {
            self.implementation.url = val;
        }
        if let Some((_, val)) = var("VERSION") {
            self.implementation.version = val;
        }
        if let Some((_, val)) = var("CONTACT") {
            self.implementation.contact = parse_list(&val);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_timeout_defaults() {
        let timeouts = TimeoutConfig::default();

        assert_eq!(timeouts.gwc_must_be_accepted_secs, 180);
        assert_eq!(timeouts.namespaces_must_be_ready_secs, 300);
        assert_eq!(timeouts.route_must_have_parents_secs, 60);
        assert_eq!(timeouts.required_consecutive_successes, 3);
        assert_eq!(timeouts.test_limit(), None);
        assert_eq!(
            timeouts.test_isolation(),
            Duration::from_secs(3),
            "Tests should cool down for 3s between runs"
        );
    }

    #[test]
    fn test_default_suite_config() {
        let config = SuiteConfig::default();
        assert_eq!(config.gateway_class_name, "gateway-conformance");
        assert_eq!(config.mode, "default");
        assert!(config.cleanup_base_resources);
        assert!(config.run_test.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SuiteConfig::from_toml_str(
            r#"
            gateway_class_name = "edge"
            conformance_profiles = ["GATEWAY-HTTP"]

            [timeouts]
            test_isolation_secs = 0
            default_test_secs = 900
            "#,
        )
        .expect("Should parse");

        assert_eq!(config.gateway_class_name, "edge");
        assert_eq!(config.conformance_profiles, vec!["GATEWAY-HTTP"]);
        assert_eq!(config.timeouts.test_isolation_secs, 0);
        assert_eq!(config.timeouts.gwc_must_be_accepted_secs, 180);
        assert_eq!(config.timeouts.test_limit(), Some(Duration::from_secs(900)));
        assert!(config.cleanup_base_resources);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GATEWAY_CONFORMANCE_SUPPORTED_FEATURES", "Gateway, HTTPRoute,,"),
            ("GATEWAY_CONFORMANCE_SKIP_PROVISIONAL_TESTS", "true"),
            ("GATEWAY_CONFORMANCE_RUN_TEST", "HTTPRouteSimpleSameNamespace"),
            ("GATEWAY_CONFORMANCE_CONTACT", "@a,@b"),
        ]
        .into_iter()
        .collect();

        let mut config = SuiteConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .expect("Should apply");

        assert_eq!(config.supported_features, vec!["Gateway", "HTTPRoute"]);
        assert!(config.skip_provisional_tests);
        assert_eq!(config.run_test.as_deref(), Some("HTTPRouteSimpleSameNamespace"));
        assert_eq!(config.implementation.contact, vec!["@a", "@b"]);
    }

    #[test]
    fn test_invalid_bool_override() {
        let mut config = SuiteConfig::default();
        let err = config
            .apply_overrides(|name| {
                (name == "GATEWAY_CONFORMANCE_ALL_FEATURES").then(|| "yes".to_string())
            })
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidBool { .. }));
    }
}
