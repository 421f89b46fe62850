// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Phase of a `DynaKube` after a successful pass.

use crate::crd::{DynaKube, DynaKubePhase};
use crate::reconcilers::{activegate, oneagent, PassContext};
use kube::ResourceExt;
use tracing::{debug, warn};

/// `Deploying` while any configured workload is missing or not ready, else `Running`.
///
/// A workload that cannot be read counts as not ready.
pub async fn determine_phase(pass: &PassContext<'_>, dk: &DynaKube) -> DynaKubePhase {
    if dk.active_gate_enabled() {
        match activegate::is_ready(pass, dk).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(name = %dk.name_any(), "ActiveGate not ready");
                return DynaKubePhase::Deploying;
            }
            Err(e) => {
                warn!(name = %dk.name_any(), error = %e, "Failed to read ActiveGate readiness");
                return DynaKubePhase::Deploying;
            }
        }
    }

    if dk.host_mode_enabled() {
        match oneagent::is_ready(pass, dk).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(name = %dk.name_any(), "OneAgent not ready");
                return DynaKubePhase::Deploying;
            }
            Err(e) => {
                warn!(name = %dk.name_any(), error = %e, "Failed to read OneAgent readiness");
                return DynaKubePhase::Deploying;
            }
        }
    }

    DynaKubePhase::Running
}
