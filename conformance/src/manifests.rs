//! Fixture loading and application
//!
//! Fixtures are multi-document YAML files addressed by a path relative to a
//! [`ManifestSource`]. The [`Applier`] rewrites them for the implementation
//! under test before applying, and remembers what it applied so a test can
//! clean up after itself.

use crate::client::{ClientError, ObjectClient, ObjectKey};
use crate::config::TimeoutConfig;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest {0} not found")]
    NotFound(String),

    #[error("manifest path {0} escapes the manifest root")]
    InvalidPath(String),

    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {message}")]
    Parse { path: String, message: String },

    #[error("timed out after {waited:?} applying {key}")]
    Timeout { key: ObjectKey, waited: Duration },

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Read-only tree of fixture files
pub trait ManifestSource: Send + Sync {
    fn read(&self, path: &str) -> Result<String, ManifestError>;
}

/// Manifests on disk under a root directory
#[derive(Debug, Clone)]
pub struct DirManifestSource {
    root: PathBuf,
}

impl DirManifestSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The fixtures shipped with this crate
    pub fn bundled() -> Self {
        Self::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("manifests"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ManifestSource for DirManifestSource {
    fn read(&self, path: &str) -> Result<String, ManifestError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ManifestError::InvalidPath(path.to_string()));
        }

        fs::read_to_string(self.root.join(relative)).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ManifestError::NotFound(path.to_string())
            } else {
                ManifestError::Io {
                    path: path.to_string(),
                    source,
                }
            }
        })
    }
}

/// Parse every non-empty document of a YAML stream
pub fn parse_documents(path: &str, contents: &str) -> Result<Vec<Value>, ManifestError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(contents) {
        let value = Value::deserialize(document).map_err(|e| ManifestError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        let empty = match &value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if !empty {
            objects.push(value);
        }
    }
    Ok(objects)
}

#[inline]
pub(crate) fn safe_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!("Mutex poisoned, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Applies fixtures on behalf of the suite or of a single test
pub struct Applier {
    client: Arc<dyn ObjectClient>,
    source: Arc<dyn ManifestSource>,
    gateway_class: String,
    controller_name: Option<String>,
    namespace_labels: BTreeMap<String, String>,
    namespace_annotations: BTreeMap<String, String>,
    create_timeout: Duration,
    delete_timeout: Duration,
    applied: Mutex<Vec<ObjectKey>>,
}

impl Applier {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        source: Arc<dyn ManifestSource>,
        gateway_class: &str,
    ) -> Self {
        let timeouts = TimeoutConfig::default();
        Self {
            client,
            source,
            gateway_class: gateway_class.to_string(),
            controller_name: None,
            namespace_labels: BTreeMap::new(),
            namespace_annotations: BTreeMap::new(),
            create_timeout: Duration::from_secs(timeouts.create_secs),
            delete_timeout: Duration::from_secs(timeouts.delete_secs),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Rewrite `spec.controllerName` of GatewayClass fixtures
    pub fn with_controller_name(mut self, controller_name: Option<String>) -> Self {
        self.controller_name = controller_name;
        self
    }

    pub fn with_namespace_metadata(
        mut self,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        self.namespace_labels = labels;
        self.namespace_annotations = annotations;
        self
    }

    pub fn with_timeouts(mut self, timeouts: &TimeoutConfig) -> Self {
        self.create_timeout = Duration::from_secs(timeouts.create_secs);
        self.delete_timeout = Duration::from_secs(timeouts.delete_secs);
        self
    }

    /// Rewrite an object for the implementation under test
    pub fn prepare(&self, mut object: Value) -> Value {
        let kind = object["kind"].as_str().unwrap_or_default().to_string();
        let core_group = !object["apiVersion"].as_str().unwrap_or_default().contains('/');

        match kind.as_str() {
            "Gateway" => {
                object["spec"]["gatewayClassName"] = Value::from(self.gateway_class.clone());
            }
            "GatewayClass" => {
                if let Some(controller) = &self.controller_name {
                    object["spec"]["controllerName"] = Value::from(controller.clone());
                }
            }
            "Namespace" if core_group => {
                stamp(&mut object["metadata"]["labels"], &self.namespace_labels);
                stamp(&mut object["metadata"]["annotations"], &self.namespace_annotations);
            }
            _ => {}
        }
        object
    }

    /// Apply every object in a fixture file, recording each for cleanup
    pub async fn apply_manifest(&self, path: &str) -> Result<Vec<ObjectKey>, ManifestError> {
        let contents = self.source.read(path)?;
        let objects = parse_documents(path, &contents)?;
        info!(manifest = %path, objects = objects.len(), "Applying manifest");
        self.apply_objects(objects).await
    }

    pub async fn apply_objects(&self, objects: Vec<Value>) -> Result<Vec<ObjectKey>, ManifestError> {
        let mut keys = Vec::with_capacity(objects.len());
        for object in objects {
            let object = self.prepare(object);
            let key = ObjectKey::from_object(&object)?;

            debug!(object = %key, "Applying");
            tokio::time::timeout(self.create_timeout, self.client.apply(&object))
                .await
                .map_err(|_| ManifestError::Timeout {
                    key: key.clone(),
                    waited: self.create_timeout,
                })??;

            {
                let mut applied = safe_lock(&self.applied);
                if !applied.contains(&key) {
                    applied.push(key.clone());
                }
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Objects applied so far, in application order
    pub fn applied(&self) -> Vec<ObjectKey> {
        safe_lock(&self.applied).clone()
    }

    /// Delete everything this applier created, newest first
    ///
    /// Objects that are already gone are skipped. Every object is attempted;
    /// the first failure is returned.
    pub async fn cleanup(&self) -> Result<(), ManifestError> {
        let keys: Vec<ObjectKey> = std::mem::take(&mut *safe_lock(&self.applied));
        let mut first_error = None;

        for key in keys.into_iter().rev() {
            debug!(object = %key, "Deleting");
            let result = tokio::time::timeout(self.delete_timeout, self.client.delete(&key)).await;
            let error = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) if e.is_not_found() => None,
                Ok(Err(e)) => Some(ManifestError::Client(e)),
                Err(_) => Some(ManifestError::Timeout {
                    key: key.clone(),
                    waited: self.delete_timeout,
                }),
            };
            if let Some(error) = error {
                warn!(object = %key, error = %error, "Cleanup failed");
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn stamp(target: &mut Value, entries: &BTreeMap<String, String>) {
    if entries.is_empty() {
        return;
    }
    for (k, v) in entries {
        target[k] = Value::from(v.clone());
    }
}
