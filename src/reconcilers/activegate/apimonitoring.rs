// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Automatic Kubernetes API monitoring.
//!
//! Once a Kubernetes monitoring ActiveGate runs, the cluster is registered on the
//! tenant by creating its connection settings object, and optionally opted into the
//! Kubernetes app. Failures are logged by the caller and never block the pass.

use crate::constants::{APP_TRANSITION_SCHEMA_ID, KUBERNETES_SETTINGS_SCHEMA_ID};
use crate::crd::DynaKube;
use crate::dtclient::newest_entity;
use crate::errors::Result;
use crate::feature_flags::FeatureFlags;
use crate::reconcilers::PassContext;
use crate::reconcilers::status::find_condition;
use crate::status_reasons::{
    CONDITION_TYPE_API_TOKEN_SETTINGS_READ, CONDITION_TYPE_API_TOKEN_SETTINGS_WRITE, STATUS_FALSE,
};
use kube::ResourceExt;
use tracing::{debug, info};

/// Entity ID the tenant assigns to a cluster that has not reported yet.
///
/// `KUBERNETES_CLUSTER-` followed by the little-endian FNV-1 64 hash of the
/// kube-system UUID in upper-case hex.
#[must_use]
pub fn cluster_entity_id(kube_system_uuid: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in kube_system_uuid.bytes() {
        hash = hash.wrapping_mul(FNV_PRIME);
        hash ^= u64::from(byte);
    }
    let hex: String = hash
        .to_le_bytes()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect();
    format!("KUBERNETES_CLUSTER-{hex}")
}

fn settings_scopes_missing(dk: &DynaKube) -> bool {
    let Some(status) = dk.status.as_ref() else {
        return false;
    };
    [
        CONDITION_TYPE_API_TOKEN_SETTINGS_READ,
        CONDITION_TYPE_API_TOKEN_SETTINGS_WRITE,
    ]
    .iter()
    .any(|t| find_condition(&status.conditions, t).is_some_and(|c| c.status == STATUS_FALSE))
}

/// Register the cluster on the tenant if it is not known yet.
///
/// Without a monitored entity the settings object is scoped to [`cluster_entity_id`].
///
/// # Errors
///
/// Returns the tenant error of the first failing call.
pub async fn reconcile(pass: &PassContext<'_>, dk: &DynaKube) -> Result<()> {
    let flags = FeatureFlags::new(dk);
    if !dk.kube_mon_enabled() || !flags.automatic_kubernetes_api_monitoring() {
        return Ok(());
    }
    let Some(uuid) = dk
        .status
        .as_ref()
        .and_then(|s| s.kube_system_uuid.clone())
        .filter(|u| !u.is_empty())
    else {
        debug!(name = %dk.name_any(), "kube-system UUID unknown, skipping API monitoring");
        return Ok(());
    };
    if settings_scopes_missing(dk) {
        debug!(name = %dk.name_any(), "Token lacks settings scopes, skipping API monitoring");
        return Ok(());
    }

    let client = pass.client();
    let cluster_label = flags.automatic_kubernetes_api_monitoring_cluster_name();
    let entities = client.get_monitored_entities_for_kube_system_uuid(&uuid).await?;

    let Some(newest) = newest_entity(&entities).cloned() else {
        let entity_id = cluster_entity_id(&uuid);
        let object_id = client
            .create_or_update_kubernetes_setting(&cluster_label, &uuid, &entity_id)
            .await?;
        info!(name = %dk.name_any(), cluster_label = %cluster_label, entity = %entity_id, object_id = %object_id, "Registered cluster for Kubernetes API monitoring");
        return Ok(());
    };

    let settings = client
        .get_settings_for_monitored_entity(Some(newest.clone()), KUBERNETES_SETTINGS_SCHEMA_ID)
        .await?;
    if settings.total_count == 0 {
        let object_id = client
            .create_or_update_kubernetes_setting(&cluster_label, &uuid, &newest.entity_id)
            .await?;
        info!(name = %dk.name_any(), entity = %newest.entity_id, object_id = %object_id, "Registered cluster for Kubernetes API monitoring");
    }

    if !flags.k8s_app_enabled() {
        return Ok(());
    }
    let app_settings = client
        .get_settings_for_monitored_entity(Some(newest.clone()), APP_TRANSITION_SCHEMA_ID)
        .await?;
    if app_settings.total_count == 0 {
        let object_id = client
            .create_or_update_kubernetes_app_setting(&newest.entity_id)
            .await?;
        info!(name = %dk.name_any(), entity = %newest.entity_id, object_id = %object_id, "Enabled Kubernetes app");
    }
    Ok(())
}

#[cfg(test)]
#[path = "apimonitoring_tests.rs"]
mod apimonitoring_tests;
