use super::{for_reapply, INFRA_NAMESPACE, SAME_NAMESPACE_GATEWAY};
use crate::client::ObjectKey;
use crate::conditions::{ConditionMatcher, CONDITION_ACCEPTED, STATUS_TRUE};
use crate::ensure;
use crate::error::TestResult;
use crate::polling::{
    gateway_must_have_address, must_have_latest_observed_generation,
    route_must_have_parent_condition,
};
use crate::registry::{ConformanceTest, TestContext};
use crate::roundtripper::{expect_eventually_consistent_response, ExpectedResponse, Request};
use common::features::names;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

pub fn http_route_simple_same_namespace() -> ConformanceTest {
    ConformanceTest::new(
        "HTTPRouteSimpleSameNamespace",
        "A single HTTPRoute in the gateway-conformance-infra namespace attaches to a Gateway in the same namespace",
        simple_same_namespace,
    )
    .with_features(&[names::GATEWAY, names::HTTP_ROUTE])
    .with_manifests(&["tests/httproute-simple-same-namespace.yaml"])
}

fn simple_same_namespace(ctx: &TestContext) -> BoxFuture<'_, TestResult> {
    async move {
        let client = ctx.client.as_ref();
        let route = ObjectKey::http_route(INFRA_NAMESPACE, "gateway-conformance-infra-test");
        let gateway = ObjectKey::gateway(INFRA_NAMESPACE, SAME_NAMESPACE_GATEWAY);

        for matcher in [ConditionMatcher::accepted(), ConditionMatcher::resolved_refs()] {
            route_must_have_parent_condition(client, &ctx.timeouts, &route, SAME_NAMESPACE_GATEWAY, &matcher)
                .await?;
        }
        let address = gateway_must_have_address(client, &ctx.timeouts, &gateway).await?;

        expect_eventually_consistent_response(
            ctx.round_tripper.as_ref(),
            &ctx.timeouts,
            &Request::http(&address, "/"),
            &ExpectedResponse::ok("infra-backend-v1", INFRA_NAMESPACE),
        )
        .await?;
        Ok(())
    }
    .boxed()
}

pub fn http_route_observed_generation_bump() -> ConformanceTest {
    ConformanceTest::new(
        "HTTPRouteObservedGenerationBump",
        "An HTTPRoute should update the observedGeneration in all of its status conditions after an update to the spec",
        observed_generation_bump,
    )
    .with_features(&[names::GATEWAY, names::HTTP_ROUTE])
    .with_manifests(&["tests/httproute-observed-generation-bump.yaml"])
}

fn observed_generation_bump(ctx: &TestContext) -> BoxFuture<'_, TestResult> {
    async move {
        let client = ctx.client.as_ref();
        let route = ObjectKey::http_route(INFRA_NAMESPACE, "observed-generation-bump");
        // Any reason
        let accepted = ConditionMatcher::new(CONDITION_ACCEPTED, STATUS_TRUE);

        route_must_have_parent_condition(client, &ctx.timeouts, &route, SAME_NAMESPACE_GATEWAY, &accepted)
            .await?;
        let original = must_have_latest_observed_generation(client, &ctx.timeouts, &route).await?;

        let mut existing = for_reapply(client.get(&route).await?);
        ensure!(
            existing["spec"]["rules"][0]["backendRefs"][0].is_object(),
            "HTTPRoute {} has no backendRef to modify",
            route
        );
        existing["spec"]["rules"][0]["backendRefs"][0]["name"] = Value::from("infra-backend-v2");
        ctx.applier.apply_objects(vec![existing]).await?;

        route_must_have_parent_condition(client, &ctx.timeouts, &route, SAME_NAMESPACE_GATEWAY, &accepted)
            .await?;
        let updated = must_have_latest_observed_generation(client, &ctx.timeouts, &route).await?;

        ensure!(
            updated > original,
            "expected generation to change because of spec change, remained at {}",
            updated
        );
        Ok(())
    }
    .boxed()
}
