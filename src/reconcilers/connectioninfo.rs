// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tenant connection info of ActiveGate and OneAgent.
//!
//! Connection info is fetched from the tenant and cached in status together with
//! the time of the request. It is fetched again only when the tenant secret is
//! missing or the cached value is older than the API request threshold. Each fetch
//! writes the tenant token into a `{dk}-{component}-tenant-secret`.
//!
//! The connection-info config maps read by the workloads are built from the cached
//! status with [`connection_info_config_map`].

use crate::constants::{
    ACTIVEGATE_TENANT_SECRET_SUFFIX, COMMUNICATION_ENDPOINTS_KEY, ONEAGENT_TENANT_SECRET_SUFFIX,
    TENANT_TOKEN_KEY, TENANT_UUID_KEY,
};
use crate::crd::{CapabilityDisplayName, CommunicationHostStatus, ConnectionInfoStatus, DynaKube};
use crate::errors::{Error, Result};
use crate::feature_flags::FeatureFlags;
use crate::reconcilers::resources::{self, apply, object_meta, secret_data};
use crate::reconcilers::status::is_outdated;
use crate::reconcilers::PassContext;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// `true` if the tenant secret exists and the cached connection info is fresh.
async fn is_fresh(
    pass: &PassContext<'_>,
    dk: &DynaKube,
    secret_suffix: &str,
    last_request: Option<&str>,
) -> Result<bool> {
    let namespace = dk.namespace().unwrap_or_default();
    let secret: Option<Secret> =
        resources::get(pass.ctx, Some(&namespace), &dk.name_with_suffix(secret_suffix)).await?;
    let threshold = FeatureFlags::new(dk).api_request_threshold();
    Ok(secret.is_some() && !is_outdated(last_request, pass.now, threshold))
}

async fn write_tenant_secret(
    pass: &PassContext<'_>,
    dk: &DynaKube,
    secret_suffix: &str,
    tenant_token: &str,
) -> Result<()> {
    let secret = Secret {
        metadata: object_meta(dk, &dk.name_with_suffix(secret_suffix), BTreeMap::new()),
        data: Some(secret_data(BTreeMap::from([(
            TENANT_TOKEN_KEY.to_string(),
            tenant_token.to_string(),
        )]))),
        ..Default::default()
    };
    apply(pass.ctx, &secret).await?;
    Ok(())
}

/// Refresh the ActiveGate connection info if it is stale.
///
/// # Errors
///
/// Returns the tenant error (including [`Error::Unreachable`]) or a Kubernetes error.
pub async fn reconcile_activegate(pass: &PassContext<'_>, dk: &mut DynaKube) -> Result<()> {
    let last_request = dk
        .status
        .as_ref()
        .and_then(|s| s.active_gate.connection_info.last_request.clone());
    if is_fresh(pass, dk, ACTIVEGATE_TENANT_SECRET_SUFFIX, last_request.as_deref()).await? {
        debug!(name = %dk.name_any(), "ActiveGate connection info is fresh, skipping");
        return Ok(());
    }

    let info = pass.client().get_activegate_connection_info().await?;
    write_tenant_secret(pass, dk, ACTIVEGATE_TENANT_SECRET_SUFFIX, &info.tenant_token).await?;

    let status = dk.status.get_or_insert_with(Default::default);
    status.active_gate.connection_info = ConnectionInfoStatus {
        tenant_uuid: Some(info.tenant_uuid),
        endpoints: Some(info.endpoints),
        communication_hosts: Vec::new(),
        last_request: Some(pass.now.to_rfc3339()),
    };
    info!(name = %dk.name_any(), "Fetched ActiveGate connection info");
    Ok(())
}

/// Refresh the OneAgent connection info if it is stale.
///
/// The status is updated with whatever the tenant returned. When there are no
/// communication hosts and no routing ActiveGate, the request time is not recorded
/// so the next pass asks again.
///
/// # Errors
///
/// Returns [`Error::NoOneAgentCommunicationHosts`] in the case above, the tenant
/// error, or a Kubernetes error.
pub async fn reconcile_oneagent(pass: &PassContext<'_>, dk: &mut DynaKube) -> Result<()> {
    let last_request = dk
        .status
        .as_ref()
        .and_then(|s| s.one_agent.connection_info.last_request.clone());
    if is_fresh(pass, dk, ONEAGENT_TENANT_SECRET_SUFFIX, last_request.as_deref()).await? {
        debug!(name = %dk.name_any(), "OneAgent connection info is fresh, skipping");
        return Ok(());
    }

    let info = pass.client().get_oneagent_connection_info().await?;
    write_tenant_secret(pass, dk, ONEAGENT_TENANT_SECRET_SUFFIX, &info.tenant_token).await?;

    let clear = !info.communication_hosts.is_empty()
        || dk.has_capability(CapabilityDisplayName::Routing);
    let status = dk.status.get_or_insert_with(Default::default);
    status.one_agent.connection_info = ConnectionInfoStatus {
        tenant_uuid: Some(info.tenant_uuid),
        endpoints: Some(info.endpoints),
        communication_hosts: info
            .communication_hosts
            .iter()
            .map(CommunicationHostStatus::from)
            .collect(),
        last_request: clear.then(|| pass.now.to_rfc3339()),
    };

    if !clear {
        warn!(
            name = %dk.name_any(),
            "Tenant returned no OneAgent communication hosts and no routing ActiveGate is configured"
        );
        return Err(Error::NoOneAgentCommunicationHosts);
    }
    info!(name = %dk.name_any(), "Fetched OneAgent connection info");
    Ok(())
}

/// Connection-info config map `{dk}-{suffix}` built from cached status.
#[must_use]
pub fn connection_info_config_map(
    dk: &DynaKube,
    suffix: &str,
    info: &ConnectionInfoStatus,
) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(dk, &dk.name_with_suffix(suffix), BTreeMap::new()),
        data: Some(BTreeMap::from([
            (
                TENANT_UUID_KEY.to_string(),
                info.tenant_uuid.clone().unwrap_or_default(),
            ),
            (
                COMMUNICATION_ENDPOINTS_KEY.to_string(),
                info.endpoints.clone().unwrap_or_default(),
            ),
        ])),
        ..Default::default()
    }
}

#[cfg(test)]
#[path = "connectioninfo_tests.rs"]
mod connectioninfo_tests;
