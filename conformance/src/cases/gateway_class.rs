use super::for_reapply;
use crate::client::ObjectKey;
use crate::ensure;
use crate::error::TestResult;
use crate::polling::{gateway_class_must_be_accepted, must_have_latest_observed_generation};
use crate::registry::{ConformanceTest, TestContext};
use common::features::names;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::info;

const GATEWAY_CLASS_NAME: &str = "gatewayclass-observed-generation-bump";

pub fn gateway_class_observed_generation_bump() -> ConformanceTest {
    ConformanceTest::new(
        "GatewayClassObservedGenerationBump",
        "A GatewayClass should update the observedGeneration in all of its status conditions after an update to the spec",
        observed_generation_bump,
    )
    .with_features(&[names::GATEWAY])
    .with_manifests(&["tests/gatewayclass-observed-generation-bump.yaml"])
}

fn observed_generation_bump(ctx: &TestContext) -> BoxFuture<'_, TestResult> {
    async move {
        let key = ObjectKey::gateway_class(GATEWAY_CLASS_NAME);
        let client = ctx.client.as_ref();

        gateway_class_must_be_accepted(client, &ctx.timeouts, GATEWAY_CLASS_NAME).await?;
        let original = must_have_latest_observed_generation(client, &ctx.timeouts, &key).await?;

        let mut existing = for_reapply(client.get(&key).await?);
        existing["spec"]["description"] = Value::from("new");
        ctx.applier.apply_objects(vec![existing]).await?;

        gateway_class_must_be_accepted(client, &ctx.timeouts, GATEWAY_CLASS_NAME).await?;
        let updated = must_have_latest_observed_generation(client, &ctx.timeouts, &key).await?;

        info!(original, updated, "GatewayClass generation observed");
        ensure!(
            updated > original,
            "expected generation to change because of spec change, remained at {}",
            updated
        );
        Ok(())
    }
    .boxed()
}
