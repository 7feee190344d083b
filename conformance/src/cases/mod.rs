//! Built-in conformance tests

mod gateway_class;
mod http_route;

use crate::registry::TestRegistry;
use serde_json::Value;

pub use self::gateway_class::gateway_class_observed_generation_bump;
pub use self::http_route::{http_route_observed_generation_bump, http_route_simple_same_namespace};

/// Namespace holding shared infrastructure from the base manifests
pub const INFRA_NAMESPACE: &str = "gateway-conformance-infra";
/// Gateway from the base manifests that accepts routes from its own namespace
pub const SAME_NAMESPACE_GATEWAY: &str = "same-namespace";

/// Register every built-in test
pub fn register_all(registry: &mut TestRegistry) {
    registry.register(gateway_class_observed_generation_bump());
    registry.register(http_route_simple_same_namespace());
    registry.register(http_route_observed_generation_bump());
}

/// Drop server-populated fields so a fetched object can be applied again
pub(crate) fn for_reapply(mut object: Value) -> Value {
    if let Some(metadata) = object["metadata"].as_object_mut() {
        for field in ["resourceVersion", "managedFields", "uid", "creationTimestamp", "generation"] {
            metadata.remove(field);
        }
    }
    if let Some(fields) = object.as_object_mut() {
        fields.remove("status");
    }
    object
}
