//! Gateway API version and channel detection from installed CRDs

use crate::client::{ObjectClient, ResourceType};
use crate::error::SuiteError;
use std::collections::BTreeSet;
use tracing::{info, warn};

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
pub const BUNDLE_VERSION_ANNOTATION: &str = "gateway.networking.k8s.io/bundle-version";
pub const CHANNEL_ANNOTATION: &str = "gateway.networking.k8s.io/channel";
/// Reported when detection is waived
pub const UNDEFINED: &str = "UNDEFINED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiVersionInfo {
    pub version: String,
    pub channel: String,
}

impl ApiVersionInfo {
    pub fn undefined() -> Self {
        Self {
            version: UNDEFINED.to_string(),
            channel: UNDEFINED.to_string(),
        }
    }
}

/// Read bundle version and channel from every Gateway API CRD
///
/// All CRDs must agree on both. With `allow_mismatch` any disagreement (or
/// missing CRDs) yields [`ApiVersionInfo::undefined`] instead of an error.
pub async fn detect_api_version(
    client: &dyn ObjectClient,
    allow_mismatch: bool,
) -> Result<ApiVersionInfo, SuiteError> {
    match inspect_crds(client).await {
        Ok(info) => {
            info!(version = %info.version, channel = %info.channel, "Detected Gateway API CRDs");
            Ok(info)
        }
        Err(SuiteError::Crds(reason)) if allow_mismatch => {
            warn!(reason = %reason, "Ignoring Gateway API CRD mismatch");
            Ok(ApiVersionInfo::undefined())
        }
        Err(e) => Err(e),
    }
}

async fn inspect_crds(client: &dyn ObjectClient) -> Result<ApiVersionInfo, SuiteError> {
    let crds = client
        .list(&ResourceType::custom_resource_definition(), None)
        .await?;

    let mut versions = BTreeSet::new();
    let mut channels = BTreeSet::new();
    let mut found = 0usize;

    for crd in crds
        .iter()
        .filter(|crd| crd["spec"]["group"].as_str() == Some(GATEWAY_API_GROUP))
    {
        found += 1;
        let name = crd["metadata"]["name"].as_str().unwrap_or_default();
        let annotations = &crd["metadata"]["annotations"];
        let version = annotations[BUNDLE_VERSION_ANNOTATION].as_str();
        let channel = annotations[CHANNEL_ANNOTATION].as_str();

        match (version, channel) {
            (Some(version), Some(channel)) => {
                versions.insert(version.to_string());
                channels.insert(channel.to_string());
            }
            _ => {
                return Err(SuiteError::Crds(format!(
                    "CRD {} is missing the bundle version or channel annotation",
                    name
                )))
            }
        }
    }

    if found == 0 {
        return Err(SuiteError::Crds("no Gateway API CRDs found".to_string()));
    }
    if versions.len() > 1 {
        return Err(SuiteError::Crds(format!(
            "multiple Gateway API versions installed: {:?}",
            versions
        )));
    }
    if channels.len() > 1 {
        return Err(SuiteError::Crds(format!(
            "multiple Gateway API channels installed: {:?}",
            channels
        )));
    }

    // Both sets hold exactly one entry here
    let version = versions.into_iter().next().unwrap_or_default();
    let channel = channels.into_iter().next().unwrap_or_default();
    Ok(ApiVersionInfo { version, channel })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryObjectClient;
    use serde_json::{json, Value};

    fn crd(name: &str, version: Option<&str>, channel: &str) -> Value {
        let mut annotations = json!({});
        annotations[CHANNEL_ANNOTATION] = json!(channel);
        if let Some(version) = version {
            annotations[BUNDLE_VERSION_ANNOTATION] = json!(version);
        }
        json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": name, "annotations": annotations},
            "spec": {"group": GATEWAY_API_GROUP}
        })
    }

    #[tokio::test]
    async fn test_consistent_crds() {
        let client = MemoryObjectClient::new();
        client.insert(crd("gateways.gateway.networking.k8s.io", Some("v1.3.0"), "standard")).unwrap();
        client.insert(crd("httproutes.gateway.networking.k8s.io", Some("v1.3.0"), "standard")).unwrap();

        let info = detect_api_version(&client, false).await.unwrap();
        assert_eq!(info.version, "v1.3.0");
        assert_eq!(info.channel, "standard");
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let client = MemoryObjectClient::new();
        client.insert(crd("gateways.gateway.networking.k8s.io", Some("v1.3.0"), "standard")).unwrap();
        client.insert(crd("httproutes.gateway.networking.k8s.io", Some("v1.2.0"), "standard")).unwrap();

        let err = detect_api_version(&client, false).await.unwrap_err();
        assert!(err.to_string().contains("multiple Gateway API versions"), "{}", err);

        let info = detect_api_version(&client, true).await.unwrap();
        assert_eq!(info, ApiVersionInfo::undefined());
    }

    #[tokio::test]
    async fn test_channel_mismatch() {
        let client = MemoryObjectClient::new();
        client.insert(crd("gateways.gateway.networking.k8s.io", Some("v1.3.0"), "standard")).unwrap();
        client.insert(crd("httproutes.gateway.networking.k8s.io", Some("v1.3.0"), "experimental")).unwrap();

        let err = detect_api_version(&client, false).await.unwrap_err();
        assert!(err.to_string().contains("multiple Gateway API channels"), "{}", err);

        let info = detect_api_version(&client, true).await.unwrap();
        assert_eq!(info, ApiVersionInfo::undefined());
    }

    #[tokio::test]
    async fn test_missing_annotation() {
        let client = MemoryObjectClient::new();
        client.insert(crd("gateways.gateway.networking.k8s.io", None, "experimental")).unwrap();

        let err = detect_api_version(&client, false).await.unwrap_err();
        assert!(matches!(err, SuiteError::Crds(_)));
    }

    #[tokio::test]
    async fn test_no_crds() {
        let client = MemoryObjectClient::new();
        let err = detect_api_version(&client, false).await.unwrap_err();
        assert!(err.to_string().contains("no Gateway API CRDs"));
    }
}
