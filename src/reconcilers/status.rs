// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for `DynaKube` resources.
//!
//! Conditions are an update-in-place list keyed by `type`:
//! - `type`: the area of the reconciler being reported (e.g. `Tokens`)
//! - `status`: `True` or `False`
//! - `reason`: a programmatic identifier (CamelCase)
//! - `message`: a human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp of the last semantic change
//!
//! All helpers here work in memory. The root reconciler persists the status once
//! per pass with [`persist_status`].
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use dynakube_operator::reconcilers::status::{find_condition, set_condition};
//!
//! let mut conditions = Vec::new();
//! set_condition(&mut conditions, "Tokens", "True", "TokenReady", "Tokens are valid", Utc::now());
//! assert_eq!(find_condition(&conditions, "Tokens").unwrap().status, "True");
//! ```

use crate::context::Context;
use crate::crd::{Condition, DynaKube, DynaKubeStatus};
use crate::errors::Result;
use crate::kubeclient::api_resource;
use crate::status_reasons::{istio_condition_type, STATUS_TRUE};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Component name of the deprecated code-module Istio condition
const DEPRECATED_ISTIO_COMPONENT: &str = "CodeModule";

/// Component name that replaced [`DEPRECATED_ISTIO_COMPONENT`]
const ONEAGENT_ISTIO_COMPONENT: &str = "OneAgent";

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// `true` if the condition exists and has status `True`.
#[must_use]
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type).is_some_and(|c| c.status == STATUS_TRUE)
}

/// Update or add a condition in place.
///
/// `lastTransitionTime` is set to `now` only when the `{status, reason, message}`
/// tuple differs from the stored condition (or the condition is new). Returns
/// `true` if anything changed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> bool {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        let unchanged = existing.status == status
            && existing.reason.as_deref() == Some(reason)
            && existing.message.as_deref() == Some(message);
        if unchanged {
            return false;
        }
        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
        existing.last_transition_time = Some(now.to_rfc3339());
        return true;
    }

    conditions.push(Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(now.to_rfc3339()),
    });
    true
}

/// Remove a condition. Returns `true` if it existed.
pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.r#type != condition_type);
    conditions.len() != before
}

/// Rename the deprecated code-module Istio condition to the OneAgent one.
///
/// When both exist the OneAgent condition wins and the deprecated one is dropped.
pub fn migrate_deprecated_conditions(conditions: &mut Vec<Condition>) {
    let deprecated = istio_condition_type(DEPRECATED_ISTIO_COMPONENT);
    let Some(index) = conditions.iter().position(|c| c.r#type == deprecated) else {
        return;
    };

    let current = istio_condition_type(ONEAGENT_ISTIO_COMPONENT);
    if find_condition(conditions, &current).is_some() {
        conditions.remove(index);
    } else {
        let condition = &mut conditions[index];
        condition.r#type = current;
        if let Some(reason) = condition.reason.as_mut() {
            *reason = reason.replacen(DEPRECATED_ISTIO_COMPONENT, ONEAGENT_ISTIO_COMPONENT, 1);
        }
    }
    debug!("Migrated deprecated Istio code-module condition");
}

/// Parse an RFC3339 timestamp stored in status.
#[must_use]
pub fn parse_timestamp(timestamp: Option<&str>) -> Option<DateTime<Utc>> {
    timestamp
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// `true` if `last` is missing, unparseable, or at least `threshold` before `now`.
#[must_use]
pub fn is_outdated(last: Option<&str>, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
    parse_timestamp(last).is_none_or(|last| now - last >= threshold)
}

/// Structural hash of a status, used to detect material changes.
///
/// # Errors
///
/// Returns an error if the status cannot be serialized.
pub fn status_hash(status: &DynaKubeStatus) -> Result<String> {
    let json = serde_json::to_string(status)?;
    Ok(format!("{:x}", Sha256::digest(json.as_bytes())))
}

/// Write the status of `dk` to the status subresource.
///
/// A resource-version conflict is logged and swallowed; the next reconcile
/// writes the status again.
///
/// # Errors
///
/// Returns an error for failures other than a conflict.
pub async fn persist_status(ctx: &Context, dk: &DynaKube) -> Result<()> {
    let namespace = dk.namespace().unwrap_or_default();
    let name = dk.name_any();
    let status = serde_json::to_value(dk.status.clone().unwrap_or_default())?;

    match ctx
        .kube
        .patch_status(
            &api_resource::<DynaKube>(),
            &namespace,
            &name,
            dk.metadata.resource_version.as_deref(),
            status,
        )
        .await
    {
        Ok(()) => {
            debug!(namespace = %namespace, name = %name, "Updated DynaKube status");
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            warn!(
                namespace = %namespace,
                name = %name,
                "Conflict while updating DynaKube status, retrying on next reconcile"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
