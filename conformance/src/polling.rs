//! Eventual-consistency polling
//!
//! Every assertion against cluster state goes through [`poll_object`] (one
//! object) or [`wait_for`] (anything else): re-fetch at an interval until a
//! check passes or the timeout elapses. Fetch errors are retried; only the
//! final timeout is reported, with the last state that was observed.

use crate::client::{ClientError, ObjectClient, ObjectKey, ResourceType};
use crate::conditions::{ConditionMatcher, ConditionSubject, CONDITION_ACCEPTED, STATUS_TRUE};
use crate::config::TimeoutConfig;
use crate::metrics::record_poll_wait;
use k8s_openapi::api::core::v1::Pod;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone)]
pub enum PollError {
    /// The object existed at some point but never satisfied the check
    #[error("timed out after {waited:?} waiting for {key}; last observed: {last_observed}")]
    Timeout {
        key: ObjectKey,
        waited: Duration,
        last_observed: String,
    },

    /// The object was not found on any fetch
    #[error("{key} was never found within {waited:?}")]
    NeverFound { key: ObjectKey, waited: Duration },

    #[error("timed out after {waited:?} waiting for {description}; last state: {last_state}")]
    Unsatisfied {
        description: String,
        waited: Duration,
        last_state: String,
    },
}

/// Result of one check inside [`wait_for`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check<T> {
    Ready(T),
    /// Not there yet; the string describes what is missing
    Pending(String),
}

fn describe(object: &Value) -> String {
    let generation = object["metadata"]["generation"].as_i64().unwrap_or(0);
    let status = object
        .get("status")
        .map(Value::to_string)
        .unwrap_or_else(|| "<no status>".to_string());
    format!("generation={} status={}", generation, status)
}

/// Poll one object until `check` returns a value
///
/// `check` always sees a freshly fetched object. NotFound is retried like any
/// other error, but if no fetch ever returned the object the result is
/// [`PollError::NeverFound`] rather than a timeout.
pub async fn poll_object<T, F>(
    client: &dyn ObjectClient,
    key: &ObjectKey,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<T, PollError>
where
    F: FnMut(&Value) -> Option<T>,
{
    let start = Instant::now();
    let mut last_observed: Option<Value> = None;
    let mut last_error: Option<ClientError> = None;

    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        match tokio::time::timeout(remaining, client.get(key)).await {
            Ok(Ok(object)) => {
                if let Some(value) = check(&object) {
                    record_poll_wait(&key.resource.kind, "ready");
                    return Ok(value);
                }
                last_observed = Some(object);
            }
            Ok(Err(e)) => {
                debug!(object = %key, error = %e, "Fetch failed, retrying");
                last_error = Some(e);
            }
            Err(_) => {
                debug!(object = %key, "Fetch did not complete before the deadline");
            }
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(interval.min(remaining)).await;
    }

    let waited = start.elapsed();
    record_poll_wait(&key.resource.kind, "timeout");
    warn!(object = %key, waited = ?waited, "Gave up waiting");

    match (last_observed, last_error) {
        (Some(object), _) => Err(PollError::Timeout {
            key: key.clone(),
            waited,
            last_observed: describe(&object),
        }),
        (None, Some(e)) if !e.is_not_found() => Err(PollError::Timeout {
            key: key.clone(),
            waited,
            last_observed: format!("no successful fetch, last error: {}", e),
        }),
        (None, _) => Err(PollError::NeverFound {
            key: key.clone(),
            waited,
        }),
    }
}

/// Poll an arbitrary async check until it is ready
///
/// `Err` from `poll_fn` is a transient failure and is retried.
pub async fn wait_for<T, E, F, Fut>(
    description: &str,
    interval: Duration,
    timeout: Duration,
    mut poll_fn: F,
) -> Result<T, PollError>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Check<T>, E>>,
{
    let start = Instant::now();
    let mut last_state = "<never checked>".to_string();

    loop {
        match poll_fn().await {
            Ok(Check::Ready(value)) => return Ok(value),
            Ok(Check::Pending(state)) => last_state = state,
            Err(e) => {
                warn!(error = %e, "Poll error for {}, retrying...", description);
                last_state = format!("error: {}", e);
            }
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(interval.min(remaining)).await;
    }

    Err(PollError::Unsatisfied {
        description: description.to_string(),
        waited: start.elapsed(),
        last_state,
    })
}

fn subject(object: &Value) -> Option<ConditionSubject> {
    ConditionSubject::from_object(object)
        .map_err(|e| debug!(error = %e, "Ignoring unparseable status"))
        .ok()
}

/// Wait for a GatewayClass to be accepted; returns its controller name
pub async fn gateway_class_must_be_accepted(
    client: &dyn ObjectClient,
    timeouts: &TimeoutConfig,
    name: &str,
) -> Result<String, PollError> {
    let key = ObjectKey::gateway_class(name);
    let matcher = ConditionMatcher::new(CONDITION_ACCEPTED, STATUS_TRUE);
    info!(gateway_class = %name, "Waiting for GatewayClass to be accepted");

    let controller = poll_object(
        client,
        &key,
        timeouts.poll_interval(),
        Duration::from_secs(timeouts.gwc_must_be_accepted_secs),
        |object| {
            let accepted = subject(object)?.has_condition(&matcher);
            let controller = object["spec"]["controllerName"].as_str()?;
            accepted.then(|| controller.to_string())
        },
    )
    .await?;

    info!(gateway_class = %name, controller = %controller, "GatewayClass accepted");
    Ok(controller)
}

pub async fn gateway_must_have_condition(
    client: &dyn ObjectClient,
    timeouts: &TimeoutConfig,
    key: &ObjectKey,
    matcher: &ConditionMatcher,
) -> Result<(), PollError> {
    info!(gateway = %key, condition = %matcher, "Waiting for Gateway condition");
    poll_object(
        client,
        key,
        timeouts.poll_interval(),
        Duration::from_secs(timeouts.gateway_must_have_condition_secs),
        |object| subject(object)?.has_condition(matcher).then_some(()),
    )
    .await
}

/// Wait for a route to report `matcher` for the named parent
pub async fn route_must_have_parent_condition(
    client: &dyn ObjectClient,
    timeouts: &TimeoutConfig,
    key: &ObjectKey,
    parent_name: &str,
    matcher: &ConditionMatcher,
) -> Result<(), PollError> {
    info!(route = %key, parent = %parent_name, condition = %matcher, "Waiting for route parent condition");
    poll_object(
        client,
        key,
        timeouts.poll_interval(),
        Duration::from_secs(timeouts.route_must_have_parents_secs),
        |object| {
            subject(object)?
                .parent_conditions(parent_name)
                .into_iter()
                .any(|c| matcher.matches(c))
                .then_some(())
        },
    )
    .await
}

pub async fn listener_set_must_have_condition(
    client: &dyn ObjectClient,
    timeouts: &TimeoutConfig,
    key: &ObjectKey,
    matcher: &ConditionMatcher,
) -> Result<(), PollError> {
    info!(listener_set = %key, condition = %matcher, "Waiting for ListenerSet condition");
    poll_object(
        client,
        key,
        timeouts.poll_interval(),
        Duration::from_secs(timeouts.gateway_must_have_condition_secs),
        |object| subject(object)?.has_condition(matcher).then_some(()),
    )
    .await
}

/// Wait for a BackendTLSPolicy to report `matcher` for the named ancestor
pub async fn backend_tls_policy_must_have_condition(
    client: &dyn ObjectClient,
    timeouts: &TimeoutConfig,
    key: &ObjectKey,
    ancestor_name: &str,
    matcher: &ConditionMatcher,
) -> Result<(), PollError> {
    info!(policy = %key, ancestor = %ancestor_name, condition = %matcher, "Waiting for BackendTLSPolicy condition");
    poll_object(
        client,
        key,
        timeouts.poll_interval(),
        Duration::from_secs(timeouts.gateway_must_have_condition_secs),
        |object| {
            subject(object)?
                .parent_conditions(ancestor_name)
                .into_iter()
                .any(|c| matcher.matches(c))
                .then_some(())
        },
    )
    .await
}

/// Wait until every condition on the object reflects its current generation
pub async fn must_have_latest_observed_generation(
    client: &dyn ObjectClient,
    timeouts: &TimeoutConfig,
    key: &ObjectKey,
) -> Result<i64, PollError> {
    poll_object(
        client,
        key,
        timeouts.poll_interval(),
        Duration::from_secs(timeouts.latest_observed_generation_set_secs),
        |object| {
            let subject = subject(object)?;
            subject
                .conditions_have_latest_observed_generation()
                .then(|| subject.meta().generation)
        },
    )
    .await
}

/// Wait for a Gateway to be Programmed with an address; returns `host:port`
/// for its first listener
pub async fn gateway_must_have_address(
    client: &dyn ObjectClient,
    timeouts: &TimeoutConfig,
    key: &ObjectKey,
) -> Result<String, PollError> {
    let programmed = ConditionMatcher::programmed();
    info!(gateway = %key, "Waiting for Gateway address");

    poll_object(
        client,
        key,
        timeouts.poll_interval(),
        Duration::from_secs(timeouts.gateway_must_have_address_secs),
        |object| {
            if !subject(object)?.has_condition(&programmed) {
                return None;
            }
            let address = object["status"]["addresses"]
                .as_array()?
                .iter()
                .find_map(|a| a["value"].as_str().filter(|v| !v.is_empty()))?;
            let port = object["spec"]["listeners"][0]["port"].as_u64().unwrap_or(80);
            Some(join_host_port(address, port))
        },
    )
    .await
}

fn join_host_port(host: &str, port: u64) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn pod_is_ready(object: &Value) -> bool {
    let Ok(pod) = serde_json::from_value::<Pod>(object.clone()) else {
        return false;
    };
    pod.status
        .and_then(|status| status.conditions)
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

/// Wait until every Gateway in the namespaces is Programmed and every Pod is Ready
pub async fn namespaces_must_be_ready(
    client: &dyn ObjectClient,
    timeouts: &TimeoutConfig,
    namespaces: &[String],
) -> Result<(), PollError> {
    let programmed = &ConditionMatcher::programmed();
    info!(namespaces = ?namespaces, "Waiting for namespaces to be ready");

    wait_for(
        "namespaces to be ready",
        timeouts.poll_interval(),
        Duration::from_secs(timeouts.namespaces_must_be_ready_secs),
        move || async move {
            let mut pending = Vec::new();
            for ns in namespaces {
                for gateway in client.list(&ResourceType::gateway(), Some(ns)).await? {
                    let ready = subject(&gateway).is_some_and(|s| s.has_condition(programmed));
                    if !ready {
                        pending.push(format!(
                            "Gateway {}/{} not Programmed",
                            ns,
                            gateway["metadata"]["name"].as_str().unwrap_or_default()
                        ));
                    }
                }
                for pod in client.list(&ResourceType::pod(), Some(ns)).await? {
                    if !pod_is_ready(&pod) {
                        pending.push(format!(
                            "Pod {}/{} not Ready",
                            ns,
                            pod["metadata"]["name"].as_str().unwrap_or_default()
                        ));
                    }
                }
            }

            let check = if pending.is_empty() {
                Check::Ready(())
            } else {
                Check::Pending(pending.join(", "))
            };
            Ok::<_, ClientError>(check)
        },
    )
    .await
}
