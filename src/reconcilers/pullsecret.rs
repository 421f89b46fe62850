// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Image pull secret for the tenant registry.

use crate::constants::{DOCKER_CONFIG_JSON_KEY, PULL_SECRET_SUFFIX};
use crate::crd::DynaKube;
use crate::errors::{Error, Result};
use crate::reconcilers::resources::{apply, object_meta, secret_data};
use crate::reconcilers::PassContext;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;

/// Type of a docker config JSON secret
const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Name of the pull secret the workloads reference.
#[must_use]
pub fn pull_secret_name(dk: &DynaKube) -> String {
    dk.spec
        .custom_pull_secret
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| dk.name_with_suffix(PULL_SECRET_SUFFIX))
}

fn tenant_uuid(dk: &DynaKube) -> Option<String> {
    let status = dk.status.as_ref()?;
    status
        .one_agent
        .connection_info
        .tenant_uuid
        .clone()
        .or_else(|| status.active_gate.connection_info.tenant_uuid.clone())
        .filter(|uuid| !uuid.is_empty())
}

/// Docker config JSON granting access to `registry` as the tenant.
#[must_use]
pub fn docker_config_json(registry: &str, tenant_uuid: &str, token: &str) -> String {
    let auth = STANDARD.encode(format!("{tenant_uuid}:{token}"));
    serde_json::json!({
        "auths": {
            registry: {
                "username": tenant_uuid,
                "password": token,
                "auth": auth,
            }
        }
    })
    .to_string()
}

/// Upsert `{dk}-pull-secret` unless a custom pull secret is configured.
///
/// # Errors
///
/// Returns [`Error::Transient`] while no connection info has been fetched yet, or
/// a Kubernetes error.
pub async fn reconcile(pass: &PassContext<'_>, dk: &DynaKube) -> Result<()> {
    if dk
        .spec
        .custom_pull_secret
        .as_deref()
        .is_some_and(|s| !s.is_empty())
    {
        return Ok(());
    }
    let tenant_uuid = tenant_uuid(dk)
        .ok_or_else(|| Error::Transient("tenant UUID is not known yet".to_string()))?;
    let registry = dk.api_url_host()?;

    let secret = Secret {
        metadata: object_meta(dk, &pull_secret_name(dk), BTreeMap::new()),
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        data: Some(secret_data(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            docker_config_json(&registry, &tenant_uuid, pass.tokens.installer_token()),
        )]))),
        ..Default::default()
    };
    apply(pass.ctx, &secret).await?;
    Ok(())
}
