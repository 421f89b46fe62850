// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! ActiveGate reconciliation.
//!
//! With at least one capability configured the reconciler, in order:
//!
//! 1. validates the capability list
//! 2. refreshes the ActiveGate connection info and its config map
//! 3. resolves the ActiveGate and synthetic images
//! 4. writes the pull secret, the Istio egress objects and the custom properties
//! 5. ensures the auth token secret
//! 6. creates the StatefulSet of every enabled unit and deletes the others
//!
//! Unit failures are recorded on the `ActiveGateStatefulSet` condition and joined,
//! except [`crate::errors::Error::Unreachable`] which is returned at once. When the last capability
//! is removed everything the reconciler created is deleted again.

pub mod apimonitoring;
pub mod authtoken;
pub mod capability;
pub mod statefulset;

use crate::constants::{
    ACTIVEGATE_AUTH_TOKEN_SECRET_SUFFIX, ACTIVEGATE_CONNECTION_INFO_SUFFIX,
    ACTIVEGATE_CUSTOM_PROPERTIES_SUFFIX, ACTIVEGATE_TENANT_SECRET_SUFFIX,
    CUSTOM_PROPERTIES_KEY,
};
use crate::crd::{validate_capabilities, DynaKube};
use crate::errors::{join, Result};
use crate::reconcilers::connectioninfo::{self, connection_info_config_map};
use crate::reconcilers::resources::{apply, delete_if_exists, get, object_meta, secret_data};
use crate::reconcilers::status::{remove_condition, set_condition};
use crate::reconcilers::version::{self, Component};
use crate::reconcilers::{istio, pullsecret, PassContext};
use crate::status_reasons::{
    istio_condition_type, CONDITION_TYPE_ACTIVEGATE_STATEFULSET, REASON_STATEFULSET_CREATED,
    REASON_STATEFULSET_GENERATION_FAILED, STATUS_FALSE, STATUS_TRUE,
};
use capability::Unit;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::ResourceExt;
use statefulset::{build_service, build_statefulset, selector_changed};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Reconcile the ActiveGate of `dk`.
///
/// # Errors
///
/// Returns `ConfigurationInvalid` for an invalid capability list,
/// `Unreachable` as soon as the tenant throttles, or the joined errors of
/// the failed steps.
pub async fn reconcile(pass: &PassContext<'_>, dk: &mut DynaKube) -> Result<()> {
    if !dk.active_gate_enabled() {
        return cleanup(pass, dk).await;
    }

    validate_capabilities(dk.capabilities())?;

    connectioninfo::reconcile_activegate(pass, dk).await?;
    let info = dk
        .status
        .as_ref()
        .map(|s| s.active_gate.connection_info.clone())
        .unwrap_or_default();
    apply(
        pass.ctx,
        &connection_info_config_map(dk, ACTIVEGATE_CONNECTION_INFO_SUFFIX, &info),
    )
    .await?;

    version::reconcile(pass, dk, Component::ActiveGate).await?;
    version::reconcile(pass, dk, Component::Synthetic).await?;
    pullsecret::reconcile(pass, dk).await?;
    if dk.spec.enable_istio {
        istio::reconcile_activegate_hosts(pass, dk).await?;
    }
    reconcile_custom_properties(pass, dk).await?;
    let config_hash = authtoken::reconcile(pass, dk).await?;

    let mut errors = Vec::new();
    for unit in Unit::ALL {
        let result = if unit.enabled(dk) {
            materialize(pass, dk, unit, &config_hash).await
        } else {
            remove_unit(pass, dk, unit).await.map(|_| ())
        };
        match result {
            Err(e) if e.is_unreachable() => return Err(e),
            Err(e) => {
                warn!(name = %dk.name_any(), unit = unit.short_name(), error = %e, "Failed to reconcile ActiveGate StatefulSet");
                errors.push(e.context(format!("ActiveGate {}", unit.short_name())));
            }
            Ok(()) => {}
        }
    }

    let status = dk.status.get_or_insert_with(Default::default);
    if errors.is_empty() {
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_ACTIVEGATE_STATEFULSET,
            STATUS_TRUE,
            REASON_STATEFULSET_CREATED,
            "ActiveGate StatefulSets are up to date",
            pass.now,
        );
    } else {
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_ACTIVEGATE_STATEFULSET,
            STATUS_FALSE,
            REASON_STATEFULSET_GENERATION_FAILED,
            &message,
            pass.now,
        );
        return join(errors);
    }

    if let Err(e) = apimonitoring::reconcile(pass, dk).await {
        warn!(name = %dk.name_any(), error = %e, "Automatic Kubernetes API monitoring failed");
    }
    Ok(())
}

async fn materialize(pass: &PassContext<'_>, dk: &DynaKube, unit: Unit, config_hash: &str) -> Result<()> {
    let namespace = dk.namespace().unwrap_or_default();
    let image = version::deployed_image(dk, unit.component())?;
    let desired = build_statefulset(dk, unit, &image, config_hash);

    let current: Option<StatefulSet> = get(pass.ctx, Some(&namespace), &unit.object_name(dk)).await?;
    if current.is_some_and(|c| selector_changed(&c, &desired)) {
        info!(namespace = %namespace, name = %unit.object_name(dk), "Selector changed, recreating StatefulSet");
        delete_if_exists::<StatefulSet>(pass.ctx, Some(&namespace), &unit.object_name(dk)).await?;
    }
    apply(pass.ctx, &desired).await?;

    if unit.should_create_service(dk) {
        apply(pass.ctx, &build_service(dk, unit)).await?;
    } else {
        delete_if_exists::<Service>(pass.ctx, Some(&namespace), &unit.object_name(dk)).await?;
    }
    Ok(())
}

/// Delete the StatefulSet and service of `unit`. Returns `true` if anything was deleted.
async fn remove_unit(pass: &PassContext<'_>, dk: &DynaKube, unit: Unit) -> Result<bool> {
    let namespace = dk.namespace().unwrap_or_default();
    let name = unit.object_name(dk);
    let sts = delete_if_exists::<StatefulSet>(pass.ctx, Some(&namespace), &name).await?;
    let service = delete_if_exists::<Service>(pass.ctx, Some(&namespace), &name).await?;
    Ok(sts || service)
}

/// Write inline custom properties into `{dk}-activegate-custom-properties`.
async fn reconcile_custom_properties(pass: &PassContext<'_>, dk: &DynaKube) -> Result<()> {
    let name = dk.name_with_suffix(ACTIVEGATE_CUSTOM_PROPERTIES_SUFFIX);
    let inline = dk
        .spec
        .active_gate
        .as_ref()
        .and_then(|ag| ag.custom_properties.as_ref())
        .filter(|p| p.value_from.as_deref().is_none_or(str::is_empty))
        .and_then(|p| p.value.clone())
        .filter(|v| !v.is_empty());

    match inline {
        Some(value) => {
            let secret = Secret {
                metadata: object_meta(dk, &name, BTreeMap::new()),
                data: Some(secret_data(BTreeMap::from([(
                    CUSTOM_PROPERTIES_KEY.to_string(),
                    value,
                )]))),
                ..Default::default()
            };
            apply(pass.ctx, &secret).await?;
        }
        None => {
            delete_if_exists::<Secret>(pass.ctx, dk.namespace().as_deref(), &name).await?;
        }
    }
    Ok(())
}

/// Delete everything created for the ActiveGate and forget its status.
///
/// Runs on every pass without capabilities; objects that are already gone cost
/// one read each.
async fn cleanup(pass: &PassContext<'_>, dk: &mut DynaKube) -> Result<()> {
    let namespace = dk.namespace();
    let namespace = namespace.as_deref();

    let mut removed = false;
    for unit in Unit::ALL {
        removed |= remove_unit(pass, dk, unit).await?;
    }
    for suffix in [
        ACTIVEGATE_AUTH_TOKEN_SECRET_SUFFIX,
        ACTIVEGATE_TENANT_SECRET_SUFFIX,
        ACTIVEGATE_CUSTOM_PROPERTIES_SUFFIX,
    ] {
        removed |= delete_if_exists::<Secret>(pass.ctx, namespace, &dk.name_with_suffix(suffix)).await?;
    }
    removed |= delete_if_exists::<ConfigMap>(
        pass.ctx,
        namespace,
        &dk.name_with_suffix(ACTIVEGATE_CONNECTION_INFO_SUFFIX),
    )
    .await?;
    if dk.spec.enable_istio {
        removed |= istio::reconcile_hosts(pass.ctx, dk, istio::COMPONENT_ACTIVEGATE, &[]).await?;
    }
    if removed {
        info!(name = %dk.name_any(), "ActiveGate disabled, removed its objects");
    }

    if dk.status.is_none() {
        return Ok(());
    }
    version::reconcile(pass, dk, Component::ActiveGate).await?;
    version::reconcile(pass, dk, Component::Synthetic).await?;
    if let Some(status) = dk.status.as_mut() {
        status.active_gate = Default::default();
        remove_condition(&mut status.conditions, CONDITION_TYPE_ACTIVEGATE_STATEFULSET);
        remove_condition(&mut status.conditions, &istio_condition_type("ActiveGate"));
    }
    Ok(())
}

/// Readiness of the ActiveGate workloads, used to derive the phase.
///
/// # Errors
///
/// Returns a Kubernetes error.
pub async fn is_ready(pass: &PassContext<'_>, dk: &DynaKube) -> Result<bool> {
    let namespace = dk.namespace().unwrap_or_default();
    for unit in Unit::ALL.into_iter().filter(|u| u.enabled(dk)) {
        let Some(sts) = get::<StatefulSet>(pass.ctx, Some(&namespace), &unit.object_name(dk)).await? else {
            return Ok(false);
        };
        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
        if ready < desired {
            return Ok(false);
        }
    }
    Ok(true)
}
