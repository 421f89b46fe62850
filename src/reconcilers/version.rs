// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Version and image resolution per component.
//!
//! Sources, highest priority first:
//!
//! 1. an image pinned in the `DynaKube` (`custom-image`)
//! 2. a version pinned in the `DynaKube` (`custom-version`)
//! 3. the latest version from the tenant, served by the public registry when the
//!    `public-registry` feature flag is set (`public-registry`)
//! 4. the latest version from the tenant, served by the tenant registry (`tenant-registry`)
//!
//! Probed versions are cached in status and probed again only after the API
//! request threshold. A probe that would move to an older version is refused,
//! the cached version is kept and `{Component}Version` is set to
//! `VersionDowngradeRejected`. Pins bypass that check.

use crate::constants::{INSTALLER_TYPE_DEFAULT, INSTALLER_TYPE_PAAS, OS_UNIX, PUBLIC_REGISTRY};
use crate::crd::{CapabilityDisplayName, DynaKube, OneAgentMode, VersionSource, VersionStatus};
use crate::dtclient::DynatraceClient;
use crate::errors::Result;
use crate::feature_flags::FeatureFlags;
use crate::reconcilers::status::{is_outdated, remove_condition, set_condition};
use crate::reconcilers::PassContext;
use crate::status_reasons::{version_condition_type, REASON_VERSION_DOWNGRADE_REJECTED, STATUS_FALSE};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Component whose version is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Host agent
    OneAgent,
    /// ActiveGate
    ActiveGate,
    /// Code modules injected into application pods
    CodeModules,
    /// Synthetic ActiveGate
    Synthetic,
}

impl Component {
    /// Name used in conditions, e.g. `OneAgentVersion`.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::OneAgent => "OneAgent",
            Self::ActiveGate => "ActiveGate",
            Self::CodeModules => "CodeModules",
            Self::Synthetic => "Synthetic",
        }
    }

    fn repository(self) -> &'static str {
        match self {
            Self::OneAgent => "oneagent",
            Self::ActiveGate => "activegate",
            Self::CodeModules => "codemodules",
            Self::Synthetic => "synthetic",
        }
    }

    fn enabled(self, dk: &DynaKube) -> bool {
        match self {
            Self::OneAgent => dk.host_mode_enabled(),
            Self::ActiveGate => {
                dk.active_gate_enabled() && !dk.has_capability(CapabilityDisplayName::Synthetic)
            }
            Self::CodeModules => dk.code_modules_enabled(),
            Self::Synthetic => dk.has_capability(CapabilityDisplayName::Synthetic),
        }
    }

    /// Image and version pinned in the spec.
    fn pins(self, dk: &DynaKube) -> (Option<String>, Option<String>) {
        let non_empty = |v: Option<&String>| v.filter(|v| !v.is_empty()).cloned();
        match self {
            Self::OneAgent => dk.host_inject_spec().map_or((None, None), |s| {
                (non_empty(s.image.as_ref()), non_empty(s.version.as_ref()))
            }),
            Self::ActiveGate => dk.spec.active_gate.as_ref().map_or((None, None), |ag| {
                (non_empty(ag.image.as_ref()), non_empty(ag.version.as_ref()))
            }),
            Self::CodeModules => {
                let oa = dk.spec.one_agent.as_ref();
                match dk.one_agent_mode() {
                    Some(OneAgentMode::CloudNativeFullStack) => (
                        non_empty(
                            oa.and_then(|o| o.cloud_native_full_stack.as_ref())
                                .and_then(|s| s.code_modules_image.as_ref()),
                        ),
                        None,
                    ),
                    Some(OneAgentMode::ApplicationMonitoring) => {
                        let app = oa.and_then(|o| o.application_monitoring.as_ref());
                        (
                            non_empty(app.and_then(|a| a.code_modules_image.as_ref())),
                            non_empty(app.and_then(|a| a.version.as_ref())),
                        )
                    }
                    _ => (None, None),
                }
            }
            Self::Synthetic => (None, None),
        }
    }

    fn status_mut(self, dk: &mut DynaKube) -> &mut VersionStatus {
        let status = dk.status.get_or_insert_with(Default::default);
        match self {
            Self::OneAgent => &mut status.one_agent.version,
            Self::ActiveGate => &mut status.active_gate.version,
            Self::CodeModules => &mut status.code_modules,
            Self::Synthetic => &mut status.synthetic,
        }
    }

    async fn latest_version(self, client: &dyn DynatraceClient) -> Result<String> {
        match self {
            Self::OneAgent => client.get_latest_agent_version(OS_UNIX, INSTALLER_TYPE_DEFAULT).await,
            Self::CodeModules => client.get_latest_agent_version(OS_UNIX, INSTALLER_TYPE_PAAS).await,
            Self::ActiveGate | Self::Synthetic => client.get_latest_activegate_version(OS_UNIX).await,
        }
    }
}

/// Compare dotted numeric versions such as `1.290.0.20240101-000000`.
///
/// Dashes inside a segment are ignored and missing trailing segments count as 0.
/// Returns `None` if either side has a non-numeric segment.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    fn segments(v: &str) -> Option<Vec<u64>> {
        v.trim()
            .split('.')
            .map(|s| s.replace('-', "").parse::<u64>().ok())
            .collect()
    }
    let (a, b) = (segments(a)?, segments(b)?);
    let len = a.len().max(b.len());
    let at = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);
    Some(
        (0..len)
            .map(|i| at(&a, i).cmp(&at(&b, i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal),
    )
}

/// Tag of an image reference, if it has one.
#[must_use]
pub fn image_tag(image: &str) -> Option<String> {
    let image = image.split('@').next().unwrap_or(image);
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    last_segment
        .split_once(':')
        .map(|(_, tag)| tag.to_string())
        .filter(|t| !t.is_empty())
}

/// Image of `component` at `version`, from the public or the tenant registry.
///
/// # Errors
///
/// Returns an error if the API URL has no host.
pub fn registry_image(dk: &DynaKube, component: Component, version: &str) -> Result<String> {
    if FeatureFlags::new(dk).public_registry() {
        return Ok(format!(
            "{PUBLIC_REGISTRY}/dynatrace-{}:{version}",
            component.repository()
        ));
    }
    Ok(format!(
        "{}/linux/{}:{version}",
        dk.api_url_host()?,
        component.repository()
    ))
}

fn pinned_status(
    current: &VersionStatus,
    version: Option<String>,
    image_id: String,
    source: VersionSource,
    now: DateTime<Utc>,
) -> VersionStatus {
    let unchanged = current.source == Some(source)
        && current.image_id.as_deref() == Some(image_id.as_str())
        && current.version == version;
    VersionStatus {
        version,
        image_id: Some(image_id),
        source: Some(source),
        last_probe_timestamp: if unchanged {
            current.last_probe_timestamp.clone()
        } else {
            Some(now.to_rfc3339())
        },
    }
}

/// Resolve the version of `component` into status.
///
/// A disabled component has its version status and condition cleared.
///
/// # Errors
///
/// Returns the tenant error of the probe (including [`crate::errors::Error::Unreachable`]).
pub async fn reconcile(pass: &PassContext<'_>, dk: &mut DynaKube, component: Component) -> Result<()> {
    let condition_type = version_condition_type(component.display_name());
    let now = pass.now;

    if !component.enabled(dk) {
        if let Some(status) = dk.status.as_mut() {
            remove_condition(&mut status.conditions, &condition_type);
        }
        *component.status_mut(dk) = VersionStatus::default();
        return Ok(());
    }

    let current = component.status_mut(dk).clone();
    let (image_pin, version_pin) = component.pins(dk);

    if let Some(image) = image_pin {
        let version = version_pin.or_else(|| image_tag(&image));
        *component.status_mut(dk) =
            pinned_status(&current, version, image, VersionSource::CustomImage, now);
        remove_version_condition(dk, &condition_type);
        return Ok(());
    }

    if let Some(version) = version_pin {
        let image = registry_image(dk, component, &version)?;
        *component.status_mut(dk) =
            pinned_status(&current, Some(version), image, VersionSource::CustomVersion, now);
        remove_version_condition(dk, &condition_type);
        return Ok(());
    }

    let source = if FeatureFlags::new(dk).public_registry() {
        VersionSource::PublicRegistry
    } else {
        VersionSource::TenantRegistry
    };
    let threshold = FeatureFlags::new(dk).api_request_threshold();
    if current.source == Some(source)
        && current.version.is_some()
        && !is_outdated(current.last_probe_timestamp.as_deref(), now, threshold)
    {
        debug!(name = %dk.name_any(), component = component.display_name(), "Version is fresh, skipping probe");
        return Ok(());
    }

    let latest = component.latest_version(pass.client()).await?;

    let probed_before = matches!(
        current.source,
        Some(VersionSource::PublicRegistry | VersionSource::TenantRegistry)
    );
    if let Some(previous) = current.version.as_deref().filter(|_| probed_before) {
        if compare_versions(&latest, previous) == Some(Ordering::Less) {
            warn!(
                name = %dk.name_any(),
                component = component.display_name(),
                previous,
                latest = %latest,
                "Refusing to downgrade"
            );
            component.status_mut(dk).last_probe_timestamp = Some(now.to_rfc3339());
            let status = dk.status.get_or_insert_with(Default::default);
            set_condition(
                &mut status.conditions,
                &condition_type,
                STATUS_FALSE,
                REASON_VERSION_DOWNGRADE_REJECTED,
                &format!("latest version {latest} is older than the deployed version {previous}"),
                now,
            );
            return Ok(());
        }
    }

    let image = registry_image(dk, component, &latest)?;
    if current.version.as_deref() != Some(latest.as_str()) {
        info!(
            name = %dk.name_any(),
            component = component.display_name(),
            version = %latest,
            "Resolved version"
        );
    }
    *component.status_mut(dk) = VersionStatus {
        version: Some(latest),
        image_id: Some(image),
        source: Some(source),
        last_probe_timestamp: Some(now.to_rfc3339()),
    };
    remove_version_condition(dk, &condition_type);
    Ok(())
}

fn remove_version_condition(dk: &mut DynaKube, condition_type: &str) {
    if let Some(status) = dk.status.as_mut() {
        remove_condition(&mut status.conditions, condition_type);
    }
}

/// Image to deploy for `component`: the resolved image, else the latest tag of the
/// default registry.
///
/// # Errors
///
/// Returns an error if the API URL has no host.
pub fn deployed_image(dk: &DynaKube, component: Component) -> Result<String> {
    let resolved = dk.status.as_ref().and_then(|s| {
        match component {
            Component::OneAgent => &s.one_agent.version,
            Component::ActiveGate => &s.active_gate.version,
            Component::CodeModules => &s.code_modules,
            Component::Synthetic => &s.synthetic,
        }
        .image_id
        .clone()
    });
    match resolved {
        Some(image) => Ok(image),
        None => registry_image(dk, component, "latest"),
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod version_tests;
