// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Istio egress for tenant endpoints.
//!
//! With `enableIstio` set, every component that talks to the tenant gets mesh
//! objects that let its pods leave the mesh:
//!
//! - `{dk}-ip-{component}`: `ServiceEntry` for endpoints given as IP literals
//! - `{dk}-fqdn-{component}`: `ServiceEntry` and `VirtualService` for DNS endpoints
//!
//! Components are `operator` (the API URL host), `oneagent` and `activegate`. An
//! object is deleted once its host set becomes empty. All writes are hash-guarded
//! through [`apply_dynamic`].

pub mod builder;

use crate::constants::ISTIO_GROUP;
use crate::context::Context;
use crate::crd::DynaKube;
use crate::dtclient::communication_host::{parse, parse_list};
use crate::dtclient::CommunicationHost;
use crate::errors::{Error, Result};
use crate::feature_flags::FeatureFlags;
use crate::reconcilers::resources::{apply_dynamic, delete_dynamic_if_exists};
use crate::reconcilers::status::{find_condition, parse_timestamp, set_condition};
use crate::reconcilers::PassContext;
use crate::status_reasons::{
    istio_condition_type, istio_reason, REASON_ISTIO_CHANGED_SUFFIX, REASON_ISTIO_FAILED_SUFFIX,
    STATUS_FALSE, STATUS_TRUE,
};
use builder::{
    build_fqdn_service_entry, build_ip_service_entry, build_virtual_service, fqdn_entry_name,
    ip_entry_name, service_entry_resource, split_hosts, virtual_service_resource,
};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Object-name component of the API URL host
pub const COMPONENT_OPERATOR: &str = "operator";

/// Object-name component of the OneAgent endpoints
pub const COMPONENT_ONEAGENT: &str = "oneagent";

/// Object-name component of the ActiveGate endpoints
pub const COMPONENT_ACTIVEGATE: &str = "activegate";

/// Condition name of the OneAgent endpoints
const CONDITION_COMPONENT_ONEAGENT: &str = "OneAgent";

/// Condition name of the ActiveGate endpoints
const CONDITION_COMPONENT_ACTIVEGATE: &str = "ActiveGate";

/// Fail unless the Istio networking API group is served by the cluster.
///
/// # Errors
///
/// Returns [`Error::ConfigurationInvalid`] if Istio is not installed.
pub async fn verify_installed(ctx: &Context) -> Result<()> {
    if ctx.kube.api_group_available(ISTIO_GROUP).await? {
        return Ok(());
    }
    Err(Error::invalid(format!(
        "enableIstio is set but the {ISTIO_GROUP} API group is not installed in the cluster"
    )))
}

/// Upsert or delete the mesh objects of one component for `hosts`.
///
/// Returns `true` if anything was written.
///
/// # Errors
///
/// Returns the first Kubernetes error.
pub async fn reconcile_hosts(
    ctx: &Context,
    dk: &DynaKube,
    component: &str,
    hosts: &[CommunicationHost],
) -> Result<bool> {
    let namespace = dk.namespace();
    let namespace = namespace.as_deref();
    let dk_name = dk.name_any();
    let (ip_hosts, fqdn_hosts) = split_hosts(hosts);
    let mut changed = false;

    let ip_name = ip_entry_name(&dk_name, component);
    if ip_hosts.is_empty() {
        changed |= delete_dynamic_if_exists(ctx, &service_entry_resource(), namespace, &ip_name).await?;
    } else {
        let entry = build_ip_service_entry(dk, component, &ip_hosts);
        changed |= apply_dynamic(ctx, &service_entry_resource(), entry).await?.changed();
    }

    let fqdn_name = fqdn_entry_name(&dk_name, component);
    if fqdn_hosts.is_empty() {
        changed |= delete_dynamic_if_exists(ctx, &service_entry_resource(), namespace, &fqdn_name).await?;
        changed |=
            delete_dynamic_if_exists(ctx, &virtual_service_resource(), namespace, &fqdn_name).await?;
    } else {
        let entry = build_fqdn_service_entry(dk, component, &fqdn_hosts);
        changed |= apply_dynamic(ctx, &service_entry_resource(), entry).await?.changed();
        let virtual_service = build_virtual_service(dk, component, &fqdn_hosts);
        changed |= apply_dynamic(ctx, &virtual_service_resource(), virtual_service)
            .await?
            .changed();
    }

    if changed {
        info!(name = %dk_name, component, "Updated Istio egress objects");
    }
    Ok(changed)
}

/// Mesh objects for the API URL host.
///
/// # Errors
///
/// Returns [`Error::ConfigurationInvalid`] for an unparseable API URL, or a
/// Kubernetes error.
pub async fn reconcile_api_url(ctx: &Context, dk: &DynaKube) -> Result<()> {
    let host = parse(&dk.spec.api_url)?;
    reconcile_hosts(ctx, dk, COMPONENT_OPERATOR, &[host]).await?;
    Ok(())
}

fn record_outcome(
    dk: &mut DynaKube,
    condition_component: &str,
    result: &Result<bool>,
    now: DateTime<Utc>,
) {
    let status = dk.status.get_or_insert_with(Default::default);
    let condition_type = istio_condition_type(condition_component);
    match result {
        Ok(_) => {
            set_condition(
                &mut status.conditions,
                &condition_type,
                STATUS_TRUE,
                &istio_reason(condition_component, REASON_ISTIO_CHANGED_SUFFIX),
                &format!("Istio service configuration for {condition_component} reconciled"),
                now,
            );
        }
        Err(e) => {
            set_condition(
                &mut status.conditions,
                &condition_type,
                STATUS_FALSE,
                &istio_reason(condition_component, REASON_ISTIO_FAILED_SUFFIX),
                &e.to_string(),
                now,
            );
        }
    }
}

/// Mesh objects for the OneAgent communication hosts cached in status.
///
/// # Errors
///
/// Returns the Kubernetes error after recording it on the condition.
pub async fn reconcile_oneagent_hosts(pass: &PassContext<'_>, dk: &mut DynaKube) -> Result<()> {
    let hosts: Vec<CommunicationHost> = dk
        .status
        .as_ref()
        .map(|s| {
            s.one_agent
                .connection_info
                .communication_hosts
                .iter()
                .map(CommunicationHost::from)
                .collect()
        })
        .unwrap_or_default();

    let result = reconcile_hosts(pass.ctx, dk, COMPONENT_ONEAGENT, &hosts).await;
    record_outcome(dk, CONDITION_COMPONENT_ONEAGENT, &result, pass.now);
    result.map(|_| ())
}

/// Mesh objects for the ActiveGate endpoints cached in status.
///
/// Skipped while the last successful reconcile is younger than the API request
/// threshold.
///
/// # Errors
///
/// Returns an error for unparseable endpoints or a Kubernetes error, after
/// recording it on the condition.
pub async fn reconcile_activegate_hosts(pass: &PassContext<'_>, dk: &mut DynaKube) -> Result<()> {
    let threshold = FeatureFlags::new(dk).api_request_threshold();
    let condition_type = istio_condition_type(CONDITION_COMPONENT_ACTIVEGATE);
    let recent = dk
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, &condition_type))
        .filter(|c| c.status == STATUS_TRUE)
        .and_then(|c| parse_timestamp(c.last_transition_time.as_deref()))
        .is_some_and(|last| pass.now - last < threshold);
    if recent {
        debug!(name = %dk.name_any(), "ActiveGate Istio configuration is recent, skipping");
        return Ok(());
    }

    let endpoints = dk
        .status
        .as_ref()
        .and_then(|s| s.active_gate.connection_info.endpoints.clone())
        .unwrap_or_default();
    let result = match parse_list(&endpoints) {
        Ok(hosts) => reconcile_hosts(pass.ctx, dk, COMPONENT_ACTIVEGATE, &hosts).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        warn!(name = %dk.name_any(), error = %e, "Failed to configure Istio for ActiveGate");
    }
    record_outcome(dk, CONDITION_COMPONENT_ACTIVEGATE, &result, pass.now);
    result.map(|_| ())
}
