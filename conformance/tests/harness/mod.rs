//! Fakes shared by the suite tests
//!
//! A [`MemoryObjectClient`] stands in for the API server, [`FakeController`]
//! plays the implementation under test by writing status, and
//! [`EchoRoundTripper`] answers probes like a healthy data plane.

#![allow(dead_code)]

use async_trait::async_trait;
use common::report::Implementation;
use conformance::client::{MemoryObjectClient, ObjectClient, ObjectKey, ResourceType};
use conformance::config::TimeoutConfig;
use conformance::manifests::{ManifestError, ManifestSource};
use conformance::roundtripper::{
    CapturedRequest, CapturedResponse, Request, RoundTripError, RoundTripper,
};
use conformance::SuiteOptions;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const GATEWAY_CLASS: &str = "conformance-test";
pub const CONTROLLER: &str = "example.com/gateway-controller";

pub fn gateway_class(features: &[&str]) -> Value {
    json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "GatewayClass",
        "metadata": {"name": GATEWAY_CLASS, "generation": 1},
        "spec": {"controllerName": CONTROLLER},
        "status": {
            "conditions": [{
                "type": "Accepted",
                "status": "True",
                "reason": "Accepted",
                "observedGeneration": 1
            }],
            "supportedFeatures": features.iter().map(|f| json!({"name": f})).collect::<Vec<_>>()
        }
    })
}

pub fn gateway_api_crd(name: &str) -> Value {
    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {
            "name": name,
            "annotations": {
                "gateway.networking.k8s.io/bundle-version": "v1.3.0",
                "gateway.networking.k8s.io/channel": "experimental"
            }
        },
        "spec": {"group": "gateway.networking.k8s.io"}
    })
}

/// Cluster with an accepted GatewayClass and consistent CRDs
pub fn cluster(features: &[&str]) -> Arc<MemoryObjectClient> {
    let client = Arc::new(MemoryObjectClient::new());
    client.insert(gateway_class(features)).expect("insert GatewayClass");
    client
        .insert(gateway_api_crd("gateways.gateway.networking.k8s.io"))
        .expect("insert CRD");
    client
        .insert(gateway_api_crd("httproutes.gateway.networking.k8s.io"))
        .expect("insert CRD");
    client
}

pub fn implementation() -> Implementation {
    Implementation {
        organization: "example".to_string(),
        project: "gateway".to_string(),
        url: "https://example.com/gateway".to_string(),
        version: "v0.1.0".to_string(),
        contact: vec!["@example/maintainers".to_string()],
    }
}

pub fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        poll_interval_ms: 10,
        gwc_must_be_accepted_secs: 5,
        gateway_must_have_condition_secs: 5,
        gateway_must_have_address_secs: 5,
        route_must_have_parents_secs: 5,
        latest_observed_generation_set_secs: 5,
        namespaces_must_be_ready_secs: 5,
        max_time_to_consistency_secs: 5,
        default_test_secs: Some(20),
        test_isolation_secs: 0,
        ..Default::default()
    }
}

/// Fixtures held in memory, keyed by relative path
#[derive(Debug, Default, Clone)]
pub struct StaticManifests {
    files: BTreeMap<String, String>,
}

impl StaticManifests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_string(), contents.to_string());
        self
    }
}

impl ManifestSource for StaticManifests {
    fn read(&self, path: &str) -> Result<String, ManifestError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ManifestError::NotFound(path.to_string()))
    }
}

pub const BASE_MANIFESTS: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: gateway-conformance-infra
---
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: same-namespace
  namespace: gateway-conformance-infra
spec:
  gatewayClassName: placeholder
  listeners:
  - name: http
    port: 80
    protocol: HTTP
"#;

/// Answers every probe with a 200 echo from `infra-backend-v1`
pub struct EchoRoundTripper;

#[async_trait]
impl RoundTripper for EchoRoundTripper {
    async fn capture_round_trip(
        &self,
        request: &Request,
    ) -> Result<(Option<CapturedRequest>, CapturedResponse), RoundTripError> {
        let echo = CapturedRequest {
            path: request.path.clone(),
            host: request.host.clone(),
            method: request.method.clone(),
            namespace: "gateway-conformance-infra".to_string(),
            pod: "infra-backend-v1-5b8c7f".to_string(),
            ..Default::default()
        };
        Ok((
            Some(echo),
            CapturedResponse {
                status: 200,
                ..Default::default()
            },
        ))
    }
}

pub fn options(client: Arc<MemoryObjectClient>, manifests: StaticManifests) -> SuiteOptions {
    let mut options = SuiteOptions::new(client, Arc::new(EchoRoundTripper), Arc::new(manifests));
    options.gateway_class_name = GATEWAY_CLASS.to_string();
    options.implementation = implementation();
    options.timeout_config = fast_timeouts();
    options.base_manifests = vec!["base/manifests.yaml".to_string()];
    options
}

fn accepted(generation: i64, types: &[&str]) -> Value {
    let conditions: Vec<Value> = types
        .iter()
        .map(|t| {
            json!({
                "type": t,
                "status": "True",
                "reason": t,
                "observedGeneration": generation
            })
        })
        .collect();
    json!(conditions)
}

/// Writes status the way a conforming controller would
pub struct FakeController {
    handle: JoinHandle<()>,
}

impl FakeController {
    pub fn start(client: Arc<MemoryObjectClient>) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                reconcile(&client).await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        Self { handle }
    }
}

impl Drop for FakeController {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn reconcile(client: &MemoryObjectClient) {
    let generation = |o: &Value| o["metadata"]["generation"].as_i64().unwrap_or(1);

    for class in client
        .list(&ResourceType::gateway_class(), None)
        .await
        .unwrap_or_default()
    {
        let Ok(key) = ObjectKey::from_object(&class) else { continue };
        let mut status = class["status"].clone();
        status["conditions"] = accepted(generation(&class), &["Accepted"]);
        let _ = client.set_status(&key, status);
    }

    for gateway in client
        .list(&ResourceType::gateway(), None)
        .await
        .unwrap_or_default()
    {
        let Ok(key) = ObjectKey::from_object(&gateway) else { continue };
        let status = json!({
            "addresses": [{"type": "IPAddress", "value": "10.0.0.10"}],
            "conditions": accepted(generation(&gateway), &["Accepted", "Programmed"])
        });
        let _ = client.set_status(&key, status);
    }

    for route in client
        .list(&ResourceType::http_route(), None)
        .await
        .unwrap_or_default()
    {
        let Ok(key) = ObjectKey::from_object(&route) else { continue };
        let parents: Vec<Value> = route["spec"]["parentRefs"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|parent| {
                json!({
                    "parentRef": parent,
                    "controllerName": CONTROLLER,
                    "conditions": accepted(generation(&route), &["Accepted", "ResolvedRefs"])
                })
            })
            .collect();
        let _ = client.set_status(&key, json!({"parents": parents}));
    }
}
