// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic create/update/delete helpers for objects owned by a `DynaKube`.
//!
//! Every write goes through [`apply_dynamic`]:
//!
//! 1. hash the desired object (canonical JSON, hash annotation excluded)
//! 2. read the current object
//! 3. create it if absent; replace it with the current `resourceVersion` if the
//!    stored hash differs; otherwise do nothing
//!
//! A second pass with unchanged input therefore issues no writes. Deletions read
//! first, so deleting something that is already gone is not a write either.
//!
//! # Example
//!
//! ```rust,no_run
//! use dynakube_operator::context::Context;
//! use dynakube_operator::crd::DynaKube;
//! use dynakube_operator::reconcilers::resources::{apply, object_meta};
//! use k8s_openapi::api::core::v1::ConfigMap;
//!
//! async fn example(ctx: &Context, dk: &DynaKube) -> dynakube_operator::errors::Result<()> {
//!     let cm = ConfigMap {
//!         metadata: object_meta(dk, "x-deployment-metadata", Default::default()),
//!         ..Default::default()
//!     };
//!     apply(ctx, &cm).await?;
//!     Ok(())
//! }
//! ```

use crate::context::Context;
use crate::crd::DynaKube;
use crate::errors::Result;
use crate::kubeclient::{api_resource, from_dynamic, to_dynamic};
use crate::labels::ANNOTATION_HASH;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::core::{ApiResource, DynamicObject};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Outcome of [`apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The object did not exist and was created
    Created,
    /// The stored hash differed and the object was replaced
    Updated,
    /// The stored hash matched; nothing was written
    Unchanged,
}

impl Applied {
    /// `true` unless nothing was written.
    #[must_use]
    pub fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Owner reference pointing at the `DynaKube`, marking it as controller.
#[must_use]
pub fn owner_reference(dk: &DynaKube) -> OwnerReference {
    OwnerReference {
        api_version: DynaKube::api_version(&()).to_string(),
        kind: DynaKube::kind(&()).to_string(),
        name: dk.name_any(),
        uid: dk.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata for an object owned by `dk` in its namespace.
#[must_use]
pub fn object_meta(dk: &DynaKube, name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: dk.namespace(),
        labels: (!labels.is_empty()).then_some(labels),
        owner_references: Some(vec![owner_reference(dk)]),
        ..Default::default()
    }
}

/// SHA-256 of the canonical JSON of an object, ignoring the hash annotation.
///
/// `serde_json` maps are ordered, so the JSON text is canonical.
///
/// # Errors
///
/// Returns an error if the object cannot be serialized.
pub fn hash_dynamic(object: &DynamicObject) -> Result<String> {
    let mut value = serde_json::to_value(object)?;
    if let Some(annotations) = value
        .pointer_mut("/metadata/annotations")
        .and_then(serde_json::Value::as_object_mut)
    {
        annotations.remove(ANNOTATION_HASH);
        if annotations.is_empty() {
            if let Some(metadata) = value
                .pointer_mut("/metadata")
                .and_then(serde_json::Value::as_object_mut)
            {
                metadata.remove("annotations");
            }
        }
    }
    let json = serde_json::to_string(&value)?;
    Ok(format!("{:x}", Sha256::digest(json.as_bytes())))
}

/// Hash stored on an object, if any.
#[must_use]
pub fn stored_hash(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_HASH))
        .map(String::as_str)
}

/// Read a typed object. `None` if it does not exist.
///
/// # Errors
///
/// Returns an error if the API call or the conversion fails.
pub async fn get<K>(ctx: &Context, namespace: Option<&str>, name: &str) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    ctx.kube
        .get(&api_resource::<K>(), namespace, name)
        .await?
        .map(from_dynamic)
        .transpose()
}

/// List typed objects, optionally filtered by an equality label selector.
///
/// # Errors
///
/// Returns an error if the API call or the conversion fails.
pub async fn list<K>(
    ctx: &Context,
    namespace: Option<&str>,
    label_selector: Option<&str>,
) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    ctx.kube
        .list(&api_resource::<K>(), namespace, label_selector)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

/// Hash-guarded create-or-replace of a typed object.
///
/// # Errors
///
/// Returns an error if the object has no name or an API call fails.
pub async fn apply<K>(ctx: &Context, object: &K) -> Result<Applied>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    apply_dynamic(ctx, &api_resource::<K>(), to_dynamic(object)?).await
}

/// Hash-guarded create-or-replace of a dynamic object.
///
/// # Errors
///
/// Returns an error if the object has no name or an API call fails.
pub async fn apply_dynamic(
    ctx: &Context,
    resource: &ApiResource,
    mut desired: DynamicObject,
) -> Result<Applied> {
    let name = desired.name_any();
    let namespace = desired.metadata.namespace.clone();
    let hash = hash_dynamic(&desired)?;
    desired
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ANNOTATION_HASH.to_string(), hash.clone());

    let Some(current) = ctx.kube.get(resource, namespace.as_deref(), &name).await? else {
        ctx.kube.create(resource, &desired).await?;
        ctx.metrics.record_resource_write(&resource.kind, "create");
        info!(kind = %resource.kind, name = %name, "Created resource");
        return Ok(Applied::Created);
    };

    if stored_hash(&current.metadata) == Some(hash.as_str()) {
        debug!(kind = %resource.kind, name = %name, "Resource unchanged");
        return Ok(Applied::Unchanged);
    }

    desired.metadata.resource_version = current.metadata.resource_version;
    ctx.kube.replace(resource, &desired).await?;
    ctx.metrics.record_resource_write(&resource.kind, "update");
    info!(kind = %resource.kind, name = %name, "Updated resource");
    Ok(Applied::Updated)
}

/// UTF-8 value of `key` in a secret's `data` (or `stringData`).
#[must_use]
pub fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
        .or_else(|| secret.string_data.as_ref().and_then(|data| data.get(key).cloned()))
}

/// Secret data map from string values.
#[must_use]
pub fn secret_data(entries: BTreeMap<String, String>) -> BTreeMap<String, ByteString> {
    entries
        .into_iter()
        .map(|(k, v)| (k, ByteString(v.into_bytes())))
        .collect()
}

/// Create `object` unless an object with its name exists. Returns `true` if created.
///
/// # Errors
///
/// Returns an error if an API call fails.
pub async fn create_if_absent<K>(ctx: &Context, object: &K) -> Result<bool>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let resource = api_resource::<K>();
    let desired = to_dynamic(object)?;
    let name = desired.name_any();
    if ctx
        .kube
        .get(&resource, desired.metadata.namespace.as_deref(), &name)
        .await?
        .is_some()
    {
        return Ok(false);
    }
    ctx.kube.create(&resource, &desired).await?;
    ctx.metrics.record_resource_write(&resource.kind, "create");
    info!(kind = %resource.kind, name = %name, "Created resource");
    Ok(true)
}

/// Replace a typed object read earlier, keeping its `resourceVersion`.
///
/// # Errors
///
/// Returns an error if an API call fails, including a conflict.
pub async fn replace<K>(ctx: &Context, object: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let resource = api_resource::<K>();
    ctx.kube.replace(&resource, &to_dynamic(object)?).await?;
    ctx.metrics.record_resource_write(&resource.kind, "update");
    Ok(())
}

/// Delete a typed object if it exists. Returns `true` if it was deleted.
///
/// # Errors
///
/// Returns an error if an API call fails.
pub async fn delete_if_exists<K>(ctx: &Context, namespace: Option<&str>, name: &str) -> Result<bool>
where
    K: Resource<DynamicType = ()>,
{
    delete_dynamic_if_exists(ctx, &api_resource::<K>(), namespace, name).await
}

/// Delete a dynamic object if it exists. Returns `true` if it was deleted.
///
/// # Errors
///
/// Returns an error if an API call fails.
pub async fn delete_dynamic_if_exists(
    ctx: &Context,
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
) -> Result<bool> {
    if ctx.kube.get(resource, namespace, name).await?.is_none() {
        return Ok(false);
    }
    let deleted = ctx.kube.delete(resource, namespace, name).await?;
    if deleted {
        ctx.metrics.record_resource_write(&resource.kind, "delete");
        info!(kind = %resource.kind, name = %name, "Deleted resource");
    }
    Ok(deleted)
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
