// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Root `DynaKube` reconciler.
//!
//! One pass fetches the `DynaKube`, runs the component reconcilers against an
//! in-memory copy and writes the status once at the end, and only if its
//! structural hash changed.
//!
//! # Outcome
//!
//! | Pass result | Phase | Status written | Requeue |
//! |---|---|---|---|
//! | ok, everything ready | `Running` | if changed | 30 min (5 min if changed) |
//! | ok, something not ready | `Deploying` | if changed | 1 min |
//! | Dynatrace API unreachable | unchanged | no | 1 min |
//! | cancelled | unchanged | no | error policy |
//! | any other error | `Error` | if changed | error policy |

pub mod phase;

use crate::constants::{
    CHANGES_UPDATE_INTERVAL, DEFAULT_UPDATE_INTERVAL, ERROR_POLICY_REQUEUE, FAST_UPDATE_INTERVAL,
};
use crate::context::Context;
use crate::crd::{DynaKube, DynaKubePhase};
use crate::errors::{join, Error, Result};
use crate::reconcilers::resources::get;
use crate::reconcilers::status::{
    migrate_deprecated_conditions, persist_status, set_condition, status_hash,
};
use crate::reconcilers::token::{client_config, read_tokens, verify_scopes};
use crate::reconcilers::{
    activegate, deploymentmetadata, extension, injection, istio, monitoredentities, oneagent,
    proxy, PassContext,
};
use crate::status_reasons::{
    CONDITION_TYPE_TOKENS, REASON_TOKEN_ERROR, REASON_TOKEN_READY, STATUS_FALSE, STATUS_TRUE,
};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use phase::determine_phase;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Namespace whose uid identifies the cluster
const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// What a successful component pipeline leaves for the phase and requeue decision.
struct Pipeline<'a> {
    pass: PassContext<'a>,
    oneagent_waiting: bool,
}

/// Reconcile one `DynaKube`.
///
/// # Errors
///
/// Returns the error of the pass, except for an unreachable Dynatrace API which
/// only shortens the requeue.
#[instrument(skip(dk, ctx), fields(namespace = ?dk.namespace(), name = %dk.name_any()))]
pub async fn reconcile_dynakube(dk: Arc<DynaKube>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let result = reconcile_once(&ctx, &dk).await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.metric_label(),
    };
    ctx.metrics.record_reconciliation(outcome, start.elapsed());
    result.map(Action::requeue)
}

/// Requeue policy for a failed reconciliation.
pub fn error_policy(dk: Arc<DynaKube>, err: &Error, ctx: Arc<Context>) -> Action {
    if err.is_cancelled() {
        debug!(name = %dk.name_any(), "Reconciliation cancelled");
        return Action::await_change();
    }
    error!(name = %dk.name_any(), error = %err, "Reconciliation failed");
    ctx.metrics.record_requeue("error");
    Action::requeue(ERROR_POLICY_REQUEUE)
}

fn ensure_not_cancelled(ctx: &Context) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

async fn reconcile_once(ctx: &Context, dk_ref: &DynaKube) -> Result<Duration> {
    ensure_not_cancelled(ctx)?;
    let namespace = dk_ref.namespace().unwrap_or_default();
    let name = dk_ref.name_any();

    let Some(mut dk) = get::<DynaKube>(ctx, Some(&namespace), &name).await? else {
        info!(namespace = %namespace, name = %name, "DynaKube is gone, unmapping namespaces");
        injection::unmap_namespaces(ctx, &name).await?;
        ctx.instance_probes
            .forget(&oneagent::instances::probe_key(dk_ref))
            .await;
        return Ok(DEFAULT_UPDATE_INTERVAL);
    };

    let now = ctx.clock.now();
    let old_hash = status_hash(&dk.status.clone().unwrap_or_default())?;
    migrate_deprecated_conditions(&mut dk.status.get_or_insert_with(Default::default).conditions);

    let mut requeue = DEFAULT_UPDATE_INTERVAL;
    let result = match run_pipeline(ctx, &mut dk, now).await {
        Ok(pipeline) => {
            let phase = determine_phase(&pipeline.pass, &dk).await;
            if phase != DynaKubePhase::Running {
                ctx.metrics.record_requeue("not_ready");
                requeue = FAST_UPDATE_INTERVAL;
            }
            if pipeline.oneagent_waiting {
                ctx.metrics.record_requeue("no_communication_hosts");
                requeue = FAST_UPDATE_INTERVAL;
            }
            dk.status.get_or_insert_with(Default::default).phase = Some(phase);
            Ok(())
        }
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) if e.is_unreachable() => {
            warn!(namespace = %namespace, name = %name, error = %e, "Dynatrace API unreachable, retrying soon");
            ctx.metrics.record_requeue("unreachable");
            return Ok(FAST_UPDATE_INTERVAL);
        }
        Err(e) => {
            dk.status.get_or_insert_with(Default::default).phase = Some(DynaKubePhase::Error);
            requeue = FAST_UPDATE_INTERVAL;
            Err(e)
        }
    };

    let new_hash = status_hash(&dk.status.clone().unwrap_or_default())?;
    if new_hash != old_hash {
        match persist_status(ctx, &dk).await {
            Ok(()) => requeue = requeue.min(CHANGES_UPDATE_INTERVAL),
            Err(e) if result.is_ok() => return Err(e),
            Err(e) => warn!(namespace = %namespace, name = %name, error = %e, "Failed to write status"),
        }
    }

    result.map(|()| requeue)
}

async fn run_pipeline<'a>(
    ctx: &'a Context,
    dk: &mut DynaKube,
    now: DateTime<Utc>,
) -> Result<Pipeline<'a>> {
    dk.validate()?;

    if dk.spec.enable_istio {
        istio::verify_installed(ctx).await?;
        istio::reconcile_api_url(ctx, dk).await?;
    }

    let pass = authenticate(ctx, dk, now).await?;
    reconcile_kube_system_uuid(ctx, dk).await?;
    deploymentmetadata::reconcile(&pass, dk).await?;
    ensure_not_cancelled(ctx)?;

    let name = dk.name_any();
    let mut errors = Vec::new();
    let mut collect = |result: Result<()>, component: &str| {
        if let Err(e) = result {
            warn!(name = %name, component, error = %e, "Component reconcile failed");
            errors.push(e.context(component.to_string()));
        }
    };
    collect(activegate::reconcile(&pass, dk).await, "ActiveGate");
    collect(extension::reconcile(&pass, dk).await, "extensions");
    collect(proxy::reconcile(&pass, dk).await, "proxy");
    collect(monitoredentities::reconcile(&pass, dk).await, "monitored entities");

    let mut oneagent_waiting = false;
    match injection::reconcile(&pass, dk).await {
        Err(Error::NoOneAgentCommunicationHosts) => oneagent_waiting = true,
        result => collect(result, "injection"),
    }
    if !oneagent_waiting {
        match oneagent::reconcile(&pass, dk).await {
            Err(Error::NoOneAgentCommunicationHosts) => oneagent_waiting = true,
            result => collect(result, "OneAgent"),
        }
    }
    if oneagent_waiting {
        info!(name = %name, "Waiting for OneAgent communication hosts");
    }

    join(errors)?;
    Ok(Pipeline {
        pass,
        oneagent_waiting,
    })
}

/// Read the tokens, build the Dynatrace client and verify the token scopes.
///
/// The `Tokens` condition records the outcome, except when the tenant was
/// unreachable: then nothing is known about the tokens and the condition is kept.
async fn authenticate<'a>(
    ctx: &'a Context,
    dk: &mut DynaKube,
    now: DateTime<Utc>,
) -> Result<PassContext<'a>> {
    let result = connect(ctx, dk, now).await;

    let conditions = &mut dk.status.get_or_insert_with(Default::default).conditions;
    match &result {
        Ok(_) => {
            set_condition(
                conditions,
                CONDITION_TYPE_TOKENS,
                STATUS_TRUE,
                REASON_TOKEN_READY,
                "Tokens are valid",
                now,
            );
        }
        Err(e) if e.is_unreachable() || e.is_cancelled() => {}
        Err(e) => {
            set_condition(
                conditions,
                CONDITION_TYPE_TOKENS,
                STATUS_FALSE,
                REASON_TOKEN_ERROR,
                &e.to_string(),
                now,
            );
        }
    }
    result
}

async fn connect<'a>(
    ctx: &'a Context,
    dk: &mut DynaKube,
    now: DateTime<Utc>,
) -> Result<PassContext<'a>> {
    let tokens = read_tokens(ctx, dk).await?;
    let config = client_config(ctx, dk, &tokens).await?;
    let dynatrace = ctx.dynatrace.build(&config)?;
    verify_scopes(dynatrace.as_ref(), dk, &tokens, now).await?;
    Ok(PassContext {
        ctx,
        dynatrace,
        tokens,
        now,
    })
}

/// Store the uid of `kube-system` once; it never changes afterwards.
async fn reconcile_kube_system_uuid(ctx: &Context, dk: &mut DynaKube) -> Result<()> {
    let known = dk
        .status
        .as_ref()
        .and_then(|s| s.kube_system_uuid.as_deref())
        .is_some_and(|u| !u.is_empty());
    if known {
        return Ok(());
    }

    let uid = get::<Namespace>(ctx, None, KUBE_SYSTEM_NAMESPACE)
        .await?
        .and_then(|ns| ns.metadata.uid)
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| Error::Transient("kube-system namespace has no uid".to_string()))?;
    info!(name = %dk.name_any(), kube_system_uuid = %uid, "Recorded kube-system UUID");
    dk.status.get_or_insert_with(Default::default).kube_system_uuid = Some(uid);
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
