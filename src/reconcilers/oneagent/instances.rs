// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! OneAgent instance status: which OneAgent pod runs on which node.

use super::daemonset::selector_labels;
use crate::crd::{DynaKube, OneAgentInstance};
use crate::labels::to_selector_string;
use crate::reconcilers::resources::list;
use crate::reconcilers::status::parse_timestamp;
use crate::reconcilers::PassContext;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// `nodeName -> {podName, hostIP}` for the scheduled pods.
#[must_use]
pub fn instances_from_pods(pods: &[Pod]) -> BTreeMap<String, OneAgentInstance> {
    pods.iter()
        .filter_map(|pod| {
            let node = pod.spec.as_ref()?.node_name.clone()?;
            let host_ip = pod
                .status
                .as_ref()
                .and_then(|s| s.host_ip.clone())
                .unwrap_or_default();
            Some((
                node,
                OneAgentInstance {
                    pod_name: pod.name_any(),
                    host_ip,
                },
            ))
        })
        .collect()
}

/// Key of `dk` in [`crate::context::InstanceProbes`].
#[must_use]
pub fn probe_key(dk: &DynaKube) -> String {
    format!("{}/{}", dk.namespace().unwrap_or_default(), dk.name_any())
}

/// Refresh `status.oneAgent.instances` once the update interval has passed.
///
/// The interval is measured from the last pod list, falling back to
/// `lastInstanceStatusUpdate` after a restart. The instance map and
/// `lastInstanceStatusUpdate` are only touched when the map changed. A failed
/// pod list is logged and retried on the next pass.
pub async fn refresh(pass: &PassContext<'_>, dk: &mut DynaKube) {
    let interval = chrono::Duration::from_std(pass.ctx.config.oneagent_update_interval())
        .unwrap_or(chrono::Duration::MAX);
    let key = probe_key(dk);
    let last_probe = match pass.ctx.instance_probes.last(&key).await {
        Some(at) => Some(at),
        None => parse_timestamp(
            dk.status
                .as_ref()
                .and_then(|s| s.one_agent.last_instance_status_update.as_deref()),
        ),
    };
    if last_probe.is_some_and(|at| pass.now - at < interval) {
        debug!(name = %dk.name_any(), "OneAgent instances are fresh, skipping");
        return;
    }

    let selector = to_selector_string(&selector_labels(dk));
    let pods = match list::<Pod>(pass.ctx, dk.namespace().as_deref(), Some(&selector)).await {
        Ok(pods) => pods,
        Err(e) => {
            warn!(name = %dk.name_any(), error = %e, "Failed to list OneAgent pods");
            return;
        }
    };
    pass.ctx.instance_probes.record(&key, pass.now).await;

    let instances = instances_from_pods(&pods);
    let name = dk.name_any();
    let status = dk.status.get_or_insert_with(Default::default);
    if status.one_agent.instances != instances {
        info!(name = %name, count = instances.len(), "OneAgent instances changed");
        status.one_agent.instances = instances;
        status.one_agent.last_instance_status_update = Some(pass.now.to_rfc3339());
    }
}
