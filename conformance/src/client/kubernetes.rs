//! Object client backed by a live cluster

use super::{ClientError, ObjectClient, ObjectKey, ResourceType};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta};
use kube::Client;
use serde_json::Value;
use tracing::debug;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "gateway-conformance";

pub struct KubeObjectClient {
    client: Client,
}

impl KubeObjectClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ResourceType, namespace: Option<&str>) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let api_resource = ApiResource::from_gvk(&gvk);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => Api::all_with(self.client.clone(), &api_resource),
        }
    }
}

fn map_error(key: &ObjectKey, error: kube::Error) -> ClientError {
    match error {
        kube::Error::Api(response) if response.code == 404 => ClientError::NotFound(key.clone()),
        other => ClientError::Api(other.to_string()),
    }
}

fn to_value(object: DynamicObject) -> Result<Value, ClientError> {
    serde_json::to_value(object).map_err(|e| ClientError::Invalid(e.to_string()))
}

#[async_trait]
impl ObjectClient for KubeObjectClient {
    async fn get(&self, key: &ObjectKey) -> Result<Value, ClientError> {
        let api = self.api(&key.resource, key.namespace.as_deref());
        let mut object = api.get(&key.name).await.map_err(|e| map_error(key, e))?;
        object.types.get_or_insert_with(|| TypeMeta {
            api_version: key.resource.api_version(),
            kind: key.resource.kind.clone(),
        });
        to_value(object)
    }

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, ClientError> {
        let api = self.api(resource, namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ClientError::Api(e.to_string()))?;

        // List items come back without apiVersion/kind
        list.items
            .into_iter()
            .map(|mut object| {
                object.types.get_or_insert_with(|| TypeMeta {
                    api_version: resource.api_version(),
                    kind: resource.kind.clone(),
                });
                to_value(object)
            })
            .collect()
    }

    async fn apply(&self, object: &Value) -> Result<Value, ClientError> {
        let key = ObjectKey::from_object(object)?;
        let api = self.api(&key.resource, key.namespace.as_deref());

        debug!(object = %key, "Applying object");
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let applied = api
            .patch(&key.name, &params, &Patch::Apply(object))
            .await
            .map_err(|e| map_error(&key, e))?;
        to_value(applied)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError> {
        let api = self.api(&key.resource, key.namespace.as_deref());
        debug!(object = %key, "Deleting object");
        api.delete(&key.name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(key, e))?;
        Ok(())
    }
}
