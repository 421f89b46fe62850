// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes API adapter.
//!
//! Reconcilers never talk to `kube::Api` directly. They go through [`KubeClient`],
//! which works on [`DynamicObject`]s so one object-safe trait covers every kind the
//! operator owns, including Istio objects that have no Rust type. Typed access is
//! layered on top by [`to_dynamic`] / [`from_dynamic`] and the helpers in
//! `reconcilers::resources`.
//!
//! [`KubeApiClient`] is the production implementation. Every call races the shared
//! [`CancellationToken`] and returns [`Error::Cancelled`] once it fires.

use crate::errors::{Error, Result};
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Object-level access to the Kubernetes API.
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch an object. `None` if it does not exist.
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// List objects, optionally filtered by an equality label selector (`k=v,k2=v2`).
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// Create an object.
    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object. The object's `resourceVersion` guards against lost updates.
    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Delete an object. Returns `false` if it did not exist.
    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str)
        -> Result<bool>;

    /// `true` if the API group is served by the cluster.
    async fn api_group_available(&self, group: &str) -> Result<bool>;

    /// Write the status subresource, guarded by `resource_version`.
    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: serde_json::Value,
    ) -> Result<()>;
}

/// Convert a typed object into a [`DynamicObject`].
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the object cannot be represented as JSON.
pub fn to_dynamic<K>(object: &K) -> Result<DynamicObject>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut value = serde_json::to_value(object)?;
    if let Some(map) = value.as_object_mut() {
        map.insert(
            "apiVersion".to_string(),
            serde_json::Value::String(K::api_version(&()).to_string()),
        );
        map.insert(
            "kind".to_string(),
            serde_json::Value::String(K::kind(&()).to_string()),
        );
    }
    Ok(serde_json::from_value(value)?)
}

/// Convert a [`DynamicObject`] into a typed object.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the object does not match `K`.
pub fn from_dynamic<K>(object: DynamicObject) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let mut value = serde_json::to_value(object)?;
    // List items come back without type meta; the typed deserializers accept that.
    if let Some(map) = value.as_object_mut() {
        map.remove("apiVersion");
        map.remove("kind");
    }
    Ok(serde_json::from_value(value)?)
}

/// [`ApiResource`] of a typed resource.
#[must_use]
pub fn api_resource<K>() -> ApiResource
where
    K: Resource<DynamicType = ()>,
{
    ApiResource::erase::<K>(&())
}

/// [`KubeClient`] backed by a real `kube::Client`.
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
    cancel: CancellationToken,
}

impl KubeApiClient {
    /// Wrap a client; calls abort once `cancel` fires.
    #[must_use]
    pub fn new(client: Client, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    async fn cancellable<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, kube::Error>> + Send,
    ) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            result = call => result.map_err(Error::from),
        }
    }
}

fn is_not_found(error: &Error) -> bool {
    matches!(error, Error::Kube(kube::Error::Api(resp)) if resp.code == 404)
}

#[async_trait]
impl KubeClient for KubeApiClient {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = self.api(resource, namespace);
        self.cancellable(api.get_opt(name)).await
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.api(resource, namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self.cancellable(api.list(&params)).await?;
        Ok(list.items)
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let api = self.api(resource, object.metadata.namespace.as_deref());
        debug!(kind = %resource.kind, name = ?object.metadata.name, "Creating resource");
        self.cancellable(api.create(&PostParams::default(), object))
            .await
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let api = self.api(resource, object.metadata.namespace.as_deref());
        let name = object.metadata.name.clone().unwrap_or_default();
        debug!(kind = %resource.kind, name = %name, "Replacing resource");
        self.cancellable(api.replace(&name, &PostParams::default(), object))
            .await
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        let api = self.api(resource, namespace);
        debug!(kind = %resource.kind, name = %name, "Deleting resource");
        match self.cancellable(api.delete(name, &DeleteParams::default())).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn api_group_available(&self, group: &str) -> Result<bool> {
        let groups = self.cancellable(self.client.list_api_groups()).await?;
        Ok(groups.groups.iter().any(|g| g.name == group))
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: serde_json::Value,
    ) -> Result<()> {
        let api = self.api(resource, Some(namespace));
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        match self
            .cancellable(api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => Err(Error::Conflict {
                kind: resource.kind.clone(),
                name: name.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}
