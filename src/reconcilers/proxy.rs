// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Proxy secret `{dk}-internal-proxy` consumed by the workloads.

use crate::constants::{PROXY_KEY, PROXY_SECRET_SUFFIX};
use crate::crd::DynaKube;
use crate::errors::Result;
use crate::reconcilers::resources::{apply, delete_if_exists, object_meta, secret_data};
use crate::reconcilers::token::resolve_proxy;
use crate::reconcilers::PassContext;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Mirror the proxy of `dk` into the internal proxy secret, or delete it.
///
/// # Errors
///
/// Returns `ConfigurationInvalid` if the referenced proxy secret is missing, or a
/// Kubernetes error.
pub async fn reconcile(pass: &PassContext<'_>, dk: &DynaKube) -> Result<()> {
    let name = dk.name_with_suffix(PROXY_SECRET_SUFFIX);
    let Some(proxy) = resolve_proxy(pass.ctx, dk).await? else {
        delete_if_exists::<Secret>(pass.ctx, dk.namespace().as_deref(), &name).await?;
        return Ok(());
    };
    let secret = Secret {
        metadata: object_meta(dk, &name, BTreeMap::new()),
        data: Some(secret_data(BTreeMap::from([(PROXY_KEY.to_string(), proxy)]))),
        ..Default::default()
    };
    apply(pass.ctx, &secret).await?;
    Ok(())
}
