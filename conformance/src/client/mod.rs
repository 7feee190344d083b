//! Generic object client
//!
//! The harness reads and writes Kubernetes objects as plain JSON so that it
//! can handle any Gateway API version without compiled-in types.

mod kubernetes;
mod memory;

pub use self::kubernetes::{KubeObjectClient, FIELD_MANAGER};
pub use self::memory::MemoryObjectClient;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const GATEWAY_API_V1: &str = "gateway.networking.k8s.io/v1";
pub const GATEWAY_API_V1ALPHA3: &str = "gateway.networking.k8s.io/v1alpha3";
pub const GATEWAY_API_X_V1ALPHA1: &str = "gateway.networking.x-k8s.io/v1alpha1";
pub const APIEXTENSIONS_V1: &str = "apiextensions.k8s.io/v1";

/// Group, version and kind of a resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceType {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceType {
    /// Build from an `apiVersion` string ("v1" or "group/version") and a kind
    pub fn new(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn gateway_class() -> Self {
        Self::new(GATEWAY_API_V1, "GatewayClass")
    }

    pub fn gateway() -> Self {
        Self::new(GATEWAY_API_V1, "Gateway")
    }

    pub fn http_route() -> Self {
        Self::new(GATEWAY_API_V1, "HTTPRoute")
    }

    pub fn grpc_route() -> Self {
        Self::new(GATEWAY_API_V1, "GRPCRoute")
    }

    pub fn backend_tls_policy() -> Self {
        Self::new(GATEWAY_API_V1ALPHA3, "BackendTLSPolicy")
    }

    pub fn listener_set() -> Self {
        Self::new(GATEWAY_API_X_V1ALPHA1, "XListenerSet")
    }

    pub fn namespace() -> Self {
        Self::new("v1", "Namespace")
    }

    pub fn pod() -> Self {
        Self::new("v1", "Pod")
    }

    pub fn custom_resource_definition() -> Self {
        Self::new(APIEXTENSIONS_V1, "CustomResourceDefinition")
    }
}

/// Address of a single object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub resource: ResourceType,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(resource: ResourceType, namespace: &str, name: &str) -> Self {
        Self {
            resource,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(resource: ResourceType, name: &str) -> Self {
        Self {
            resource,
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn gateway_class(name: &str) -> Self {
        Self::cluster(ResourceType::gateway_class(), name)
    }

    pub fn gateway(namespace: &str, name: &str) -> Self {
        Self::namespaced(ResourceType::gateway(), namespace, name)
    }

    pub fn http_route(namespace: &str, name: &str) -> Self {
        Self::namespaced(ResourceType::http_route(), namespace, name)
    }

    pub fn namespace(name: &str) -> Self {
        Self::cluster(ResourceType::namespace(), name)
    }

    /// Derive the key from an object's `apiVersion`, `kind` and metadata
    pub fn from_object(object: &Value) -> Result<Self, ClientError> {
        let api_version = object["apiVersion"]
            .as_str()
            .ok_or_else(|| ClientError::Invalid("object has no apiVersion".to_string()))?;
        let kind = object["kind"]
            .as_str()
            .ok_or_else(|| ClientError::Invalid("object has no kind".to_string()))?;
        let name = object["metadata"]["name"].as_str().ok_or_else(|| {
            ClientError::Invalid(format!("{} object has no metadata.name", kind))
        })?;

        Ok(Self {
            resource: ResourceType::new(api_version, kind),
            namespace: object["metadata"]["namespace"].as_str().map(str::to_string),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.resource.kind, ns, self.name),
            None => write!(f, "{} {}", self.resource.kind, self.name),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("{0} not found")]
    NotFound(ObjectKey),

    #[error("API error: {0}")]
    Api(String),

    #[error("invalid object: {0}")]
    Invalid(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// CRUD against a Kubernetes-shaped API
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Value, ClientError>;

    /// List objects of a type, across all namespaces when `namespace` is `None`
    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, ClientError>;

    /// Create or update an object (server-side apply semantics)
    async fn apply(&self, object: &Value) -> Result<Value, ClientError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_type_from_api_version() {
        let core = ResourceType::new("v1", "Namespace");
        assert_eq!(core.group, "");
        assert_eq!(core.api_version(), "v1");

        let route = ResourceType::new("gateway.networking.k8s.io/v1", "HTTPRoute");
        assert_eq!(route.group, "gateway.networking.k8s.io");
        assert_eq!(route.version, "v1");
        assert_eq!(route.api_version(), "gateway.networking.k8s.io/v1");
    }

    #[test]
    fn test_object_key_from_object() {
        let object = json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "Gateway",
            "metadata": {"name": "same-namespace", "namespace": "gateway-conformance-infra"}
        });

        let key = ObjectKey::from_object(&object).expect("Should parse key");
        assert_eq!(key, ObjectKey::gateway("gateway-conformance-infra", "same-namespace"));
        assert_eq!(key.to_string(), "Gateway gateway-conformance-infra/same-namespace");
    }

    #[test]
    fn test_object_key_requires_name() {
        let object = json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {}});
        let err = ObjectKey::from_object(&object).unwrap_err();
        assert!(matches!(err, ClientError::Invalid(_)));
    }
}
