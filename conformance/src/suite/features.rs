//! Supported feature resolution

use crate::client::{ObjectClient, ObjectKey};
use crate::error::SuiteError;
use common::{FeatureName, FeatureRegistry, FeatureSet};
use serde_json::Value;
use tracing::{info, warn};

/// Where the supported feature set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource {
    All,
    Manual,
    Inferred,
}

/// Inputs to [`resolve_supported_features`]
#[derive(Debug, Clone, Copy)]
pub struct FeatureSelection<'a> {
    pub enable_all: bool,
    pub supported: &'a FeatureSet,
    pub exempt: &'a FeatureSet,
    pub run_test: Option<&'a str>,
}

impl FeatureSelection<'_> {
    /// Manual selection wins over inference whenever the caller said anything
    fn is_manual(&self) -> bool {
        !self.supported.is_empty() || !self.exempt.is_empty() || self.run_test.is_some()
    }
}

/// Decide the supported feature set: all, then manual, then inferred
pub async fn resolve_supported_features(
    selection: FeatureSelection<'_>,
    registry: &FeatureRegistry,
    client: &dyn ObjectClient,
    gateway_class_name: &str,
) -> Result<(FeatureSet, FeatureSource), SuiteError> {
    if selection.enable_all {
        info!(features = registry.len(), "Enabling all known features");
        return Ok((registry.all_names(), FeatureSource::All));
    }

    if selection.is_manual() {
        let features: FeatureSet = selection
            .supported
            .difference(selection.exempt)
            .cloned()
            .collect();
        info!(features = ?features, "Using manually supplied features");
        return Ok((features, FeatureSource::Manual));
    }

    let key = ObjectKey::gateway_class(gateway_class_name);
    let gateway_class = client
        .get(&key)
        .await
        .map_err(|source| SuiteError::GatewayClassFetch {
            name: gateway_class_name.to_string(),
            source,
        })?;

    let features = features_from_status(&gateway_class);
    validate_inferred(&features, registry)?;
    info!(gateway_class = %gateway_class_name, features = ?features, "Inferred supported features");
    Ok((features, FeatureSource::Inferred))
}

/// Read `status.supportedFeatures`, accepting both `{name: X}` entries and bare strings
pub fn features_from_status(gateway_class: &Value) -> FeatureSet {
    gateway_class["status"]["supportedFeatures"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry["name"].as_str().or_else(|| entry.as_str()))
                .filter(|name| !name.is_empty())
                .map(FeatureName::from)
                .collect()
        })
        .unwrap_or_default()
}

fn validate_inferred(features: &FeatureSet, registry: &FeatureRegistry) -> Result<(), SuiteError> {
    if features.is_empty() {
        return Err(SuiteError::NoSupportedFeatures);
    }
    let mesh: Vec<&str> = features
        .iter()
        .map(FeatureName::as_str)
        .filter(|name| registry.is_mesh(name))
        .collect();
    if !mesh.is_empty() {
        warn!(features = ?mesh, "GatewayClass advertises mesh features");
        return Err(SuiteError::MeshFeaturesInGatewayClass);
    }
    Ok(())
}
