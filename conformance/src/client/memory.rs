//! In-process object store
//!
//! Behaves enough like an API server for the harness to run against it:
//! objects are keyed by type/namespace/name, `metadata.generation` starts at 1
//! and is bumped whenever `spec` changes, and labels/annotations are merged
//! on apply. Nothing reconciles status; callers play the controller through
//! [`MemoryObjectClient::set_status`].

use super::{ClientError, ObjectClient, ObjectKey, ResourceType};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

#[inline]
fn safe_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during read, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

#[inline]
fn safe_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during write, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

#[derive(Debug, Default)]
pub struct MemoryObjectClient {
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    failing_gets: AtomicUsize,
    get_calls: AtomicUsize,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object exactly as given, status included
    pub fn insert(&self, object: Value) -> Result<ObjectKey, ClientError> {
        let key = ObjectKey::from_object(&object)?;
        safe_write(&self.objects).insert(key.clone(), object);
        Ok(key)
    }

    /// Replace the status of a stored object
    pub fn set_status(&self, key: &ObjectKey, status: Value) -> Result<(), ClientError> {
        let mut objects = safe_write(&self.objects);
        let object = objects
            .get_mut(key)
            .ok_or_else(|| ClientError::NotFound(key.clone()))?;
        object["status"] = status;
        Ok(())
    }

    /// Make the next `count` calls to `get` fail with a transient API error
    pub fn fail_next_gets(&self, count: usize) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Number of `get` calls served so far, failed ones included
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        safe_read(&self.objects).contains_key(key)
    }

    pub fn len(&self) -> usize {
        safe_read(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        safe_read(&self.objects).is_empty()
    }
}

fn merge_string_map(existing: &Value, incoming: &Value) -> Option<Value> {
    let mut merged: Map<String, Value> = existing.as_object().cloned().unwrap_or_default();
    if let Some(incoming) = incoming.as_object() {
        for (k, v) in incoming {
            merged.insert(k.clone(), v.clone());
        }
    }
    if merged.is_empty() {
        None
    } else {
        Some(Value::Object(merged))
    }
}

/// Merge an applied object onto the stored one
fn merge_applied(existing: Option<&Value>, mut incoming: Value) -> Value {
    let Some(existing) = existing else {
        if incoming["metadata"]["generation"].is_null() {
            incoming["metadata"]["generation"] = Value::from(1);
        }
        return incoming;
    };

    let generation = existing["metadata"]["generation"].as_i64().unwrap_or(1);
    let generation = if existing["spec"] != incoming["spec"] {
        generation + 1
    } else {
        generation
    };

    for field in ["labels", "annotations"] {
        if let Some(merged) =
            merge_string_map(&existing["metadata"][field], &incoming["metadata"][field])
        {
            incoming["metadata"][field] = merged;
        }
    }
    incoming["metadata"]["generation"] = Value::from(generation);

    if incoming.get("status").is_none() {
        if let Some(status) = existing.get("status") {
            incoming["status"] = status.clone();
        }
    }
    incoming
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn get(&self, key: &ObjectKey) -> Result<Value, ClientError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ClientError::Api(format!("injected failure fetching {}", key)));
        }

        safe_read(&self.objects)
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(key.clone()))
    }

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, ClientError> {
        let objects = safe_read(&self.objects);
        Ok(objects
            .iter()
            .filter(|(key, _)| {
                key.resource == *resource
                    && namespace.map_or(true, |ns| key.namespace.as_deref() == Some(ns))
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn apply(&self, object: &Value) -> Result<Value, ClientError> {
        let key = ObjectKey::from_object(object)?;
        let mut objects = safe_write(&self.objects);
        let merged = merge_applied(objects.get(&key), object.clone());
        objects.insert(key, merged.clone());
        Ok(merged)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError> {
        safe_write(&self.objects)
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn route(spec: Value) -> Value {
        json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "HTTPRoute",
            "metadata": {"name": "r", "namespace": "ns", "labels": {"a": "1"}},
            "spec": spec,
        })
    }

    #[tokio::test]
    async fn test_apply_sets_initial_generation() {
        let client = MemoryObjectClient::new();
        let stored = client.apply(&route(json!({"hostnames": ["a"]}))).await.unwrap();
        assert_eq!(stored["metadata"]["generation"], 1);
    }

    #[tokio::test]
    async fn test_apply_bumps_generation_on_spec_change_only() {
        let client = MemoryObjectClient::new();
        client.apply(&route(json!({"hostnames": ["a"]}))).await.unwrap();

        let same = client.apply(&route(json!({"hostnames": ["a"]}))).await.unwrap();
        assert_eq!(same["metadata"]["generation"], 1);

        let changed = client.apply(&route(json!({"hostnames": ["b"]}))).await.unwrap();
        assert_eq!(changed["metadata"]["generation"], 2);
    }

    #[tokio::test]
    async fn test_apply_keeps_status_and_merges_labels() {
        let client = MemoryObjectClient::new();
        let key = ObjectKey::http_route("ns", "r");
        client.apply(&route(json!({}))).await.unwrap();
        client.set_status(&key, json!({"parents": []})).unwrap();

        let mut update = route(json!({}));
        update["metadata"]["labels"] = json!({"b": "2"});
        let stored = client.apply(&update).await.unwrap();

        assert_eq!(stored["status"], json!({"parents": []}));
        assert_eq!(stored["metadata"]["labels"], json!({"a": "1", "b": "2"}));
    }

    #[tokio::test]
    async fn test_injected_get_failures() {
        let client = MemoryObjectClient::new();
        let key = client.insert(route(json!({}))).unwrap();
        client.fail_next_gets(2);

        assert!(matches!(client.get(&key).await, Err(ClientError::Api(_))));
        assert!(matches!(client.get(&key).await, Err(ClientError::Api(_))));
        assert!(client.get(&key).await.is_ok());
        assert_eq!(client.get_calls(), 3);
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace() {
        let client = MemoryObjectClient::new();
        client.insert(route(json!({}))).unwrap();
        let mut other = route(json!({}));
        other["metadata"]["namespace"] = json!("other");
        client.insert(other).unwrap();

        let all = client.list(&ResourceType::http_route(), None).await.unwrap();
        let in_ns = client.list(&ResourceType::http_route(), Some("ns")).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(in_ns.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let client = MemoryObjectClient::new();
        let err = client.delete(&ObjectKey::http_route("ns", "r")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
