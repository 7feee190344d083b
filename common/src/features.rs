//! Gateway API feature catalog
//!
//! A feature is the unit an implementation opts into when it claims
//! conformance. Every feature belongs to the resource it exercises, ships in
//! a release channel, and is either Core or Extended for that resource.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Name of a feature, as advertised in `GatewayClass.status.supportedFeatures`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureName(String);

impl FeatureName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FeatureName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for FeatureName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Ordered set of feature names (ordering keeps reports reproducible)
pub type FeatureSet = BTreeSet<FeatureName>;

/// Build a [`FeatureSet`] from anything yielding string-like names
pub fn feature_set<I, S>(names: I) -> FeatureSet
where
    I: IntoIterator<Item = S>,
    S: Into<FeatureName>,
{
    names.into_iter().map(Into::into).collect()
}

/// Release channel a feature ships in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureChannel {
    Standard,
    Experimental,
}

/// Support level of a feature for its owning resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupportLevel {
    Core,
    Extended,
}

/// Resource a feature is associated with
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureResource {
    Gateway,
    ReferenceGrant,
    HTTPRoute,
    GRPCRoute,
    TLSRoute,
    TCPRoute,
    UDPRoute,
    BackendTLSPolicy,
    ListenerSet,
    Mesh,
}

/// A single registered feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub name: FeatureName,
    pub channel: FeatureChannel,
    pub resource: FeatureResource,
    pub support: SupportLevel,
}

impl Feature {
    pub fn new(
        name: impl Into<FeatureName>,
        resource: FeatureResource,
        support: SupportLevel,
        channel: FeatureChannel,
    ) -> Self {
        Self {
            name: name.into(),
            channel,
            resource,
            support,
        }
    }

    /// Mesh support is advertised through the mesh resource, never GatewayClass
    pub fn is_mesh(&self) -> bool {
        self.resource == FeatureResource::Mesh
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("feature {0} is already registered")]
    DuplicateFeature(FeatureName),
}

/// Well-known feature names
pub mod names {
    pub const GATEWAY: &str = "Gateway";
    pub const GATEWAY_PORT_8080: &str = "GatewayPort8080";
    pub const GATEWAY_STATIC_ADDRESSES: &str = "GatewayStaticAddresses";
    pub const GATEWAY_HTTP_LISTENER_ISOLATION: &str = "GatewayHTTPListenerIsolation";
    pub const GATEWAY_INFRASTRUCTURE_PROPAGATION: &str = "GatewayInfrastructurePropagation";
    pub const GATEWAY_ADDRESS_EMPTY: &str = "GatewayAddressEmpty";

    pub const REFERENCE_GRANT: &str = "ReferenceGrant";

    pub const HTTP_ROUTE: &str = "HTTPRoute";
    pub const HTTP_ROUTE_BACKEND_REQUEST_HEADER_MODIFICATION: &str =
        "HTTPRouteBackendRequestHeaderModification";
    pub const HTTP_ROUTE_QUERY_PARAM_MATCHING: &str = "HTTPRouteQueryParamMatching";
    pub const HTTP_ROUTE_METHOD_MATCHING: &str = "HTTPRouteMethodMatching";
    pub const HTTP_ROUTE_RESPONSE_HEADER_MODIFICATION: &str = "HTTPRouteResponseHeaderModification";
    pub const HTTP_ROUTE_PORT_REDIRECT: &str = "HTTPRoutePortRedirect";
    pub const HTTP_ROUTE_SCHEME_REDIRECT: &str = "HTTPRouteSchemeRedirect";
    pub const HTTP_ROUTE_PATH_REDIRECT: &str = "HTTPRoutePathRedirect";
    pub const HTTP_ROUTE_HOST_REWRITE: &str = "HTTPRouteHostRewrite";
    pub const HTTP_ROUTE_PATH_REWRITE: &str = "HTTPRoutePathRewrite";
    pub const HTTP_ROUTE_REQUEST_MIRROR: &str = "HTTPRouteRequestMirror";
    pub const HTTP_ROUTE_REQUEST_MULTIPLE_MIRRORS: &str = "HTTPRouteRequestMultipleMirrors";
    pub const HTTP_ROUTE_REQUEST_PERCENTAGE_MIRROR: &str = "HTTPRouteRequestPercentageMirror";
    pub const HTTP_ROUTE_REQUEST_TIMEOUT: &str = "HTTPRouteRequestTimeout";
    pub const HTTP_ROUTE_BACKEND_TIMEOUT: &str = "HTTPRouteBackendTimeout";
    pub const HTTP_ROUTE_PARENT_REF_PORT: &str = "HTTPRouteParentRefPort";
    pub const HTTP_ROUTE_BACKEND_PROTOCOL_H2C: &str = "HTTPRouteBackendProtocolH2C";
    pub const HTTP_ROUTE_BACKEND_PROTOCOL_WEBSOCKET: &str = "HTTPRouteBackendProtocolWebSocket";
    pub const HTTP_ROUTE_DESTINATION_PORT_MATCHING: &str = "HTTPRouteDestinationPortMatching";

    pub const GRPC_ROUTE: &str = "GRPCRoute";

    pub const TLS_ROUTE: &str = "TLSRoute";
    pub const TLS_ROUTE_MODE_TERMINATE: &str = "TLSRouteModeTerminate";

    pub const TCP_ROUTE: &str = "TCPRoute";
    pub const UDP_ROUTE: &str = "UDPRoute";

    pub const BACKEND_TLS_POLICY: &str = "BackendTLSPolicy";
    pub const BACKEND_TLS_POLICY_SAN_VALIDATION: &str = "BackendTLSPolicySANValidation";

    pub const LISTENER_SET: &str = "ListenerSet";

    pub const MESH: &str = "Mesh";
    pub const MESH_CLUSTER_IP_MATCHING: &str = "MeshClusterIPMatching";
    pub const MESH_CONSUMER_ROUTE: &str = "MeshConsumerRoute";
    pub const MESH_HTTP_ROUTE_SCHEME_REDIRECT: &str = "MeshHTTPRouteSchemeRedirect";
    pub const MESH_HTTP_ROUTE_REDIRECT_PORT: &str = "MeshHTTPRouteRedirectPort";
    pub const MESH_HTTP_ROUTE_REDIRECT_PATH: &str = "MeshHTTPRouteRedirectPath";
    pub const MESH_HTTP_ROUTE_REWRITE_PATH: &str = "MeshHTTPRouteRewritePath";
    pub const MESH_HTTP_ROUTE_QUERY_PARAM_MATCHING: &str = "MeshHTTPRouteQueryParamMatching";
    pub const MESH_HTTP_ROUTE_BACKEND_REQUEST_HEADER_MODIFICATION: &str =
        "MeshHTTPRouteBackendRequestHeaderModification";
}

use FeatureChannel::{Experimental, Standard};
use FeatureResource as R;
use SupportLevel::{Core, Extended};

/// Built-in catalog: (name, resource, support level, channel)
const BUILTIN_FEATURES: &[(&str, FeatureResource, SupportLevel, FeatureChannel)] = &[
    (names::GATEWAY, R::Gateway, Core, Standard),
    (names::GATEWAY_PORT_8080, R::Gateway, Extended, Standard),
    (names::GATEWAY_STATIC_ADDRESSES, R::Gateway, Extended, Standard),
    (names::GATEWAY_HTTP_LISTENER_ISOLATION, R::Gateway, Extended, Standard),
    (names::GATEWAY_INFRASTRUCTURE_PROPAGATION, R::Gateway, Extended, Standard),
    (names::GATEWAY_ADDRESS_EMPTY, R::Gateway, Extended, Standard),
    (names::REFERENCE_GRANT, R::ReferenceGrant, Core, Standard),
    (names::HTTP_ROUTE, R::HTTPRoute, Core, Standard),
    (names::HTTP_ROUTE_BACKEND_REQUEST_HEADER_MODIFICATION, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_QUERY_PARAM_MATCHING, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_METHOD_MATCHING, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_RESPONSE_HEADER_MODIFICATION, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_PORT_REDIRECT, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_SCHEME_REDIRECT, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_PATH_REDIRECT, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_HOST_REWRITE, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_PATH_REWRITE, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_REQUEST_MIRROR, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_REQUEST_MULTIPLE_MIRRORS, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_REQUEST_PERCENTAGE_MIRROR, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_REQUEST_TIMEOUT, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_BACKEND_TIMEOUT, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_PARENT_REF_PORT, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_BACKEND_PROTOCOL_H2C, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_BACKEND_PROTOCOL_WEBSOCKET, R::HTTPRoute, Extended, Standard),
    (names::HTTP_ROUTE_DESTINATION_PORT_MATCHING, R::HTTPRoute, Extended, Experimental),
    (names::GRPC_ROUTE, R::GRPCRoute, Core, Standard),
    (names::TLS_ROUTE, R::TLSRoute, Core, Experimental),
    (names::TLS_ROUTE_MODE_TERMINATE, R::TLSRoute, Extended, Experimental),
    (names::TCP_ROUTE, R::TCPRoute, Core, Experimental),
    (names::UDP_ROUTE, R::UDPRoute, Core, Experimental),
    (names::BACKEND_TLS_POLICY, R::BackendTLSPolicy, Core, Standard),
    (names::BACKEND_TLS_POLICY_SAN_VALIDATION, R::BackendTLSPolicy, Extended, Experimental),
    (names::LISTENER_SET, R::ListenerSet, Core, Experimental),
    (names::MESH, R::Mesh, Core, Standard),
    (names::MESH_CLUSTER_IP_MATCHING, R::Mesh, Extended, Standard),
    (names::MESH_CONSUMER_ROUTE, R::Mesh, Extended, Standard),
    (names::MESH_HTTP_ROUTE_SCHEME_REDIRECT, R::Mesh, Extended, Standard),
    (names::MESH_HTTP_ROUTE_REDIRECT_PORT, R::Mesh, Extended, Standard),
    (names::MESH_HTTP_ROUTE_REDIRECT_PATH, R::Mesh, Extended, Standard),
    (names::MESH_HTTP_ROUTE_REWRITE_PATH, R::Mesh, Extended, Standard),
    (names::MESH_HTTP_ROUTE_QUERY_PARAM_MATCHING, R::Mesh, Extended, Standard),
    (names::MESH_HTTP_ROUTE_BACKEND_REQUEST_HEADER_MODIFICATION, R::Mesh, Extended, Standard),
];

/// Catalog of known features
///
/// Owned by the caller and passed into the suite, so independent suites never
/// share registration state.
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    features: BTreeMap<FeatureName, Feature>,
}

impl FeatureRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every Gateway API feature this harness knows
    pub fn standard() -> Self {
        let features = BUILTIN_FEATURES
            .iter()
            .map(|&(name, resource, support, channel)| {
                let feature = Feature::new(name, resource, support, channel);
                (feature.name.clone(), feature)
            })
            .collect();
        Self { features }
    }

    /// Add a feature. Names are unique across the catalog.
    pub fn register(&mut self, feature: Feature) -> Result<(), FeatureError> {
        if self.features.contains_key(&feature.name) {
            return Err(FeatureError::DuplicateFeature(feature.name));
        }
        self.features.insert(feature.name.clone(), feature);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    /// The full known feature universe
    pub fn all_names(&self) -> FeatureSet {
        self.features.keys().cloned().collect()
    }

    /// Names of every feature owned by `resource` at the given support level
    pub fn names_for(&self, resource: FeatureResource, support: SupportLevel) -> FeatureSet {
        self.features
            .values()
            .filter(|f| f.resource == resource && f.support == support)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Whether `name` is a mesh feature.
    ///
    /// Unregistered names are judged by the `Mesh` prefix so that a
    /// misconfigured GatewayClass cannot sneak an unknown mesh feature past
    /// the check.
    pub fn is_mesh(&self, name: &str) -> bool {
        match self.features.get(name) {
            Some(feature) => feature.is_mesh(),
            None => name.starts_with(names::MESH),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.values()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
