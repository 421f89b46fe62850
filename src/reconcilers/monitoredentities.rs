// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Monitored entity id of this cluster.
//!
//! Metadata enrichment tags pods with the Kubernetes cluster entity of the tenant.
//! The newest entity tagged with the `kube-system` UUID is stored in
//! `status.monitoredEntityID`; without entities the field is cleared.

use crate::crd::DynaKube;
use crate::dtclient::newest_entity;
use crate::errors::Result;
use crate::reconcilers::PassContext;
use kube::ResourceExt;
use tracing::{debug, info};

/// Resolve `status.monitoredEntityID` when metadata enrichment is enabled.
///
/// # Errors
///
/// Returns the tenant error.
pub async fn reconcile(pass: &PassContext<'_>, dk: &mut DynaKube) -> Result<()> {
    if !dk.metadata_enrichment_enabled() {
        return Ok(());
    }
    let Some(uuid) = dk
        .status
        .as_ref()
        .and_then(|s| s.kube_system_uuid.clone())
        .filter(|u| !u.is_empty())
    else {
        debug!(name = %dk.name_any(), "kube-system UUID unknown, skipping monitored entity lookup");
        return Ok(());
    };

    let entities = pass
        .client()
        .get_monitored_entities_for_kube_system_uuid(&uuid)
        .await?;
    let entity_id = newest_entity(&entities).map(|e| e.entity_id.clone());

    let name = dk.name_any();
    let status = dk.status.get_or_insert_with(Default::default);
    if status.monitored_entity_id != entity_id {
        info!(name = %name, entity = ?entity_id, "Monitored entity changed");
        status.monitored_entity_id = entity_id;
    }
    Ok(())
}
