// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! OneAgent reconciliation.
//!
//! The host modes (`classicFullStack`, `hostMonitoring`, `cloudNativeFullStack`)
//! run one OneAgent pod per node through the DaemonSet `{dk}-oneagent`. Before the
//! DaemonSet is written the connection info must be clear, i.e. the tenant knows
//! at least one communication host or a routing ActiveGate is configured;
//! otherwise [`crate::errors::Error::NoOneAgentCommunicationHosts`] asks the root
//! reconciler for a fast requeue.
//!
//! After each successful upsert the legacy DaemonSet `{dk}-classic` is removed.
//! When the mode stops being a host mode, everything written here is deleted again.

pub mod daemonset;
pub mod instances;

use crate::constants::{
    LEGACY_ONEAGENT_NAME, ONEAGENT_CONNECTION_INFO_SUFFIX, ONEAGENT_NAME,
    ONEAGENT_TENANT_SECRET_SUFFIX,
};
use crate::crd::DynaKube;
use crate::errors::Result;
use crate::reconcilers::connectioninfo::{self, connection_info_config_map};
use crate::reconcilers::resources::{apply, delete_if_exists, get};
use crate::reconcilers::status::{remove_condition, set_condition};
use crate::reconcilers::version::{self, Component};
use crate::reconcilers::{istio, pullsecret, PassContext};
use crate::status_reasons::{
    istio_condition_type, CONDITION_TYPE_ONEAGENT_DAEMONSET, REASON_DAEMONSET_CREATED,
    REASON_DAEMONSET_GENERATION_FAILED, STATUS_FALSE, STATUS_TRUE,
};
use daemonset::{build_daemonset, selector_changed};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use tracing::{info, warn};

/// Reconcile the OneAgent of `dk`.
///
/// # Errors
///
/// Returns [`crate::errors::Error::NoOneAgentCommunicationHosts`] while the
/// connection info is not clear, the tenant error, or the DaemonSet error after
/// recording it on the `OneAgentDaemonSet` condition.
pub async fn reconcile(pass: &PassContext<'_>, dk: &mut DynaKube) -> Result<()> {
    if !dk.host_mode_enabled() {
        cleanup(pass, dk).await?;
        if dk.status.is_some() {
            version::reconcile(pass, dk, Component::OneAgent).await?;
        }
        return Ok(());
    }

    connectioninfo::reconcile_oneagent(pass, dk).await?;
    version::reconcile(pass, dk, Component::OneAgent).await?;
    pullsecret::reconcile(pass, dk).await?;

    let info = dk
        .status
        .as_ref()
        .map(|s| s.one_agent.connection_info.clone())
        .unwrap_or_default();
    apply(
        pass.ctx,
        &connection_info_config_map(dk, ONEAGENT_CONNECTION_INFO_SUFFIX, &info),
    )
    .await?;
    if dk.spec.enable_istio {
        istio::reconcile_oneagent_hosts(pass, dk).await?;
    }

    let result = upsert_daemonset(pass, dk).await;
    let name = dk.name_any();
    let status = dk.status.get_or_insert_with(Default::default);
    match result {
        Ok(()) => {
            set_condition(
                &mut status.conditions,
                CONDITION_TYPE_ONEAGENT_DAEMONSET,
                STATUS_TRUE,
                REASON_DAEMONSET_CREATED,
                "OneAgent DaemonSet is up to date",
                pass.now,
            );
        }
        Err(e) => {
            warn!(name = %name, error = %e, "Failed to reconcile OneAgent DaemonSet");
            set_condition(
                &mut status.conditions,
                CONDITION_TYPE_ONEAGENT_DAEMONSET,
                STATUS_FALSE,
                REASON_DAEMONSET_GENERATION_FAILED,
                &e.to_string(),
                pass.now,
            );
            return Err(e.context("OneAgent DaemonSet"));
        }
    }

    delete_if_exists::<DaemonSet>(
        pass.ctx,
        dk.namespace().as_deref(),
        &dk.name_with_suffix(LEGACY_ONEAGENT_NAME),
    )
    .await?;

    instances::refresh(pass, dk).await;
    Ok(())
}

async fn upsert_daemonset(pass: &PassContext<'_>, dk: &DynaKube) -> Result<()> {
    let namespace = dk.namespace().unwrap_or_default();
    let name = dk.name_with_suffix(ONEAGENT_NAME);
    let image = version::deployed_image(dk, Component::OneAgent)?;
    let desired = build_daemonset(dk, &image);

    let current: Option<DaemonSet> = get(pass.ctx, Some(&namespace), &name).await?;
    if current.is_some_and(|c| selector_changed(&c, &desired)) {
        info!(namespace = %namespace, name = %name, "Selector changed, recreating DaemonSet");
        delete_if_exists::<DaemonSet>(pass.ctx, Some(&namespace), &name).await?;
    }
    apply(pass.ctx, &desired).await?;
    Ok(())
}

/// Delete the host agent objects and forget their status.
///
/// Runs on every pass outside the host modes. Connection info and the tenant
/// secret stay while code modules still use them.
async fn cleanup(pass: &PassContext<'_>, dk: &mut DynaKube) -> Result<()> {
    let namespace = dk.namespace();
    let namespace = namespace.as_deref();

    let mut removed = false;
    for suffix in [ONEAGENT_NAME, LEGACY_ONEAGENT_NAME] {
        removed |= delete_if_exists::<DaemonSet>(pass.ctx, namespace, &dk.name_with_suffix(suffix)).await?;
    }
    removed |= delete_if_exists::<ConfigMap>(
        pass.ctx,
        namespace,
        &dk.name_with_suffix(ONEAGENT_CONNECTION_INFO_SUFFIX),
    )
    .await?;

    let code_modules = dk.code_modules_enabled();
    if !code_modules {
        removed |= delete_if_exists::<Secret>(
            pass.ctx,
            namespace,
            &dk.name_with_suffix(ONEAGENT_TENANT_SECRET_SUFFIX),
        )
        .await?;
        if dk.spec.enable_istio {
            removed |= istio::reconcile_hosts(pass.ctx, dk, istio::COMPONENT_ONEAGENT, &[]).await?;
        }
    }
    if removed {
        info!(name = %dk.name_any(), "OneAgent host mode disabled, removed its objects");
    }
    pass.ctx.instance_probes.forget(&instances::probe_key(dk)).await;

    if let Some(status) = dk.status.as_mut() {
        remove_condition(&mut status.conditions, CONDITION_TYPE_ONEAGENT_DAEMONSET);
        status.one_agent.instances.clear();
        status.one_agent.last_instance_status_update = None;
        if !code_modules {
            status.one_agent.connection_info = Default::default();
            remove_condition(&mut status.conditions, &istio_condition_type("OneAgent"));
        }
    }
    Ok(())
}

/// Readiness of the OneAgent DaemonSet, used to derive the phase.
///
/// # Errors
///
/// Returns a Kubernetes error.
pub async fn is_ready(pass: &PassContext<'_>, dk: &DynaKube) -> Result<bool> {
    if !dk.host_mode_enabled() {
        return Ok(true);
    }
    let Some(ds) = get::<DaemonSet>(
        pass.ctx,
        dk.namespace().as_deref(),
        &dk.name_with_suffix(ONEAGENT_NAME),
    )
    .await?
    else {
        return Ok(false);
    };
    let (scheduled, ready) = ds
        .status
        .as_ref()
        .map_or((0, 0), |s| (s.current_number_scheduled, s.number_ready));
    Ok(scheduled - ready <= 0)
}
