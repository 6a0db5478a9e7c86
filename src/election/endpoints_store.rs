//! Lock store backed by a core/v1 Endpoints object.
//!
//! The lock record lives in the [`LEADER_ANNOTATION_KEY`] annotation. Updates
//! are JSON merge patches that carry `metadata.resourceVersion`, so the API
//! server rejects writes based on a stale read with 409 Conflict.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use super::record::LEADER_ANNOTATION_KEY;
use super::store::{LockObject, LockStore, StoreError};

/// Field manager recorded on lock writes.
pub const FIELD_MANAGER: &str = "ingress-core";

/// Kubernetes-backed lock store.
#[derive(Clone)]
pub struct EndpointsLockStore {
    client: Client,
}

impl EndpointsLockStore {
    /// Create a store using the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Endpoints> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Convert an Endpoints object into the store's view of it.
fn to_lock_object(endpoints: &Endpoints, name: &str, namespace: &str) -> LockObject {
    LockObject {
        name: name.to_string(),
        namespace: namespace.to_string(),
        resource_version: endpoints.resource_version().unwrap_or_default(),
        record: endpoints.annotations().get(LEADER_ANNOTATION_KEY).cloned(),
    }
}

/// Map API status codes onto the store's error taxonomy.
fn map_kube_error(err: kube::Error, name: &str, namespace: &str) -> StoreError {
    match err {
        kube::Error::Api(ref ae) if ae.code == 409 => StoreError::Conflict {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(ref ae) if ae.code == 404 => StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        other => StoreError::Kube(other),
    }
}

/// Merge patch that writes the record only if the version still matches.
fn conditional_patch(record: &str, expected_version: &str) -> serde_json::Value {
    json!({
        "metadata": {
            "resourceVersion": expected_version,
            "annotations": {
                LEADER_ANNOTATION_KEY: record
            }
        }
    })
}

#[async_trait]
impl LockStore for EndpointsLockStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<LockObject>, StoreError> {
        let endpoints = self
            .api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, name, namespace))?;
        Ok(endpoints.map(|ep| to_lock_object(&ep, name, namespace)))
    }

    async fn create(
        &self,
        name: &str,
        namespace: &str,
        record: Option<String>,
    ) -> Result<LockObject, StoreError> {
        let annotations = record.map(|r| {
            std::iter::once((LEADER_ANNOTATION_KEY.to_string(), r)).collect()
        });
        let endpoints = Endpoints {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations,
                ..Default::default()
            },
            ..Default::default()
        };

        let created = self
            .api(namespace)
            .create(
                &PostParams {
                    field_manager: Some(FIELD_MANAGER.to_string()),
                    ..Default::default()
                },
                &endpoints,
            )
            .await
            .map_err(|e| map_kube_error(e, name, namespace))?;

        debug!(name = %name, namespace = %namespace, "Created lock resource");
        Ok(to_lock_object(&created, name, namespace))
    }

    async fn update(
        &self,
        name: &str,
        namespace: &str,
        record: String,
        expected_version: &str,
    ) -> Result<LockObject, StoreError> {
        let patch = conditional_patch(&record, expected_version);
        let patched = self
            .api(namespace)
            .patch(
                name,
                &PatchParams {
                    field_manager: Some(FIELD_MANAGER.to_string()),
                    ..Default::default()
                },
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| map_kube_error(e, name, namespace))?;
        Ok(to_lock_object(&patched, name, namespace))
    }
}
