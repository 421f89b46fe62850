// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deployment metadata config map.
//!
//! `{dk}-deployment-metadata` carries one entry per enabled agent family, read by
//! the workloads through `configMapKeyRef` env vars:
//!
//! ```text
//! oneagent:   orchestration_tech=Operator-cloud_native_fullstack;script_version=1.0.0;orchestrator_id=<uuid>
//! activegate: orchestration_tech=Operator-activegate;script_version=1.0.0;orchestrator_id=<uuid>
//! operator:   1.0.0
//! ```

use crate::constants::{DEPLOYMENT_METADATA_SUFFIX, OPERATOR_VERSION};
use crate::crd::DynaKube;
use crate::errors::Result;
use crate::reconcilers::resources::{apply, delete_if_exists, object_meta};
use crate::reconcilers::PassContext;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Key of the OneAgent entry
pub const ONEAGENT_KEY: &str = "oneagent";

/// Key of the ActiveGate entry
pub const ACTIVEGATE_KEY: &str = "activegate";

/// Key of the operator version entry
pub const OPERATOR_KEY: &str = "operator";

/// `orchestration_tech=...;script_version=...;orchestrator_id=...`
#[must_use]
pub fn metadata_string(orchestration_tech: &str, cluster_id: &str) -> String {
    format!(
        "orchestration_tech={orchestration_tech};script_version={OPERATOR_VERSION};orchestrator_id={cluster_id}"
    )
}

/// Entries for the enabled families of `dk`. Empty if none is enabled.
#[must_use]
pub fn build_data(dk: &DynaKube) -> BTreeMap<String, String> {
    let cluster_id = dk
        .status
        .as_ref()
        .and_then(|s| s.kube_system_uuid.clone())
        .unwrap_or_default();
    let mut data = BTreeMap::new();
    if let Some(mode) = dk.one_agent_mode() {
        data.insert(
            ONEAGENT_KEY.to_string(),
            metadata_string(&format!("Operator-{}", mode.metadata_name()), &cluster_id),
        );
    }
    if dk.active_gate_enabled() {
        data.insert(
            ACTIVEGATE_KEY.to_string(),
            metadata_string("Operator-activegate", &cluster_id),
        );
    }
    if !data.is_empty() {
        data.insert(OPERATOR_KEY.to_string(), OPERATOR_VERSION.to_string());
    }
    data
}

/// Upsert or delete `{dk}-deployment-metadata`.
///
/// # Errors
///
/// Returns a Kubernetes error.
pub async fn reconcile(pass: &PassContext<'_>, dk: &DynaKube) -> Result<()> {
    let name = dk.name_with_suffix(DEPLOYMENT_METADATA_SUFFIX);
    let data = build_data(dk);
    if data.is_empty() {
        delete_if_exists::<ConfigMap>(pass.ctx, dk.namespace().as_deref(), &name).await?;
        return Ok(());
    }
    let config_map = ConfigMap {
        metadata: object_meta(dk, &name, BTreeMap::new()),
        data: Some(data),
        ..Default::default()
    };
    apply(pass.ctx, &config_map).await?;
    Ok(())
}
