// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Application namespace mapping and injection secrets.
//!
//! With code modules or metadata enrichment enabled, every selected application
//! namespace is labelled with `dynakube.internal.dynatrace.com/instance={dk}` and
//! receives two secrets read by the injection webhook:
//!
//! - `dynatrace-dynakube-config`: tenant, proxy and process-module config for code modules
//! - `dynatrace-data-ingest-endpoint`: metrics ingest URL and token for metadata enrichment
//!
//! A namespace labelled for another `DynaKube` is left alone. Namespaces that are
//! no longer selected, and all namespaces of a `DynaKube` that turned injection
//! off or was deleted, are unmapped: the label and both secrets are removed.
//!
//! The secrets live outside the `DynaKube` namespace, so they carry no owner
//! reference and are cleaned up explicitly.

use crate::constants::{
    ACTIVEGATE_NAME, INGEST_ENDPOINT_KEY, INGEST_ENDPOINT_SECRET_NAME, INJECTION_CONFIG_KEY,
    INJECTION_CONFIG_SECRET_NAME,
};
use crate::context::Context;
use crate::crd::{CapabilityDisplayName, DynaKube, OneAgentMode};
use crate::dtclient::ProcessModuleConfig;
use crate::errors::{join, Error, Result};
use crate::feature_flags::FeatureFlags;
use crate::labels::{build_app_labels, COMPONENT_INJECTION, NAMESPACE_INSTANCE_LABEL};
use crate::reconcilers::resources::{apply, delete_if_exists, list, replace, secret_data};
use crate::reconcilers::status::{remove_condition, set_condition};
use crate::reconcilers::token::{resolve_proxy, Tokens};
use crate::reconcilers::version::{self, Component};
use crate::reconcilers::{connectioninfo, istio, PassContext};
use crate::selector::{mapped_dynakube, namespace_selected};
use crate::status_reasons::{
    CONDITION_TYPE_CODE_MODULES_INJECTION, CONDITION_TYPE_METADATA_ENRICHMENT,
    REASON_SECRETS_CREATED, REASON_SECRETS_GENERATION_FAILED, STATUS_FALSE, STATUS_TRUE,
};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Content of the `config` key of the init secret.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitSecretConfig<'a> {
    api_url: &'a str,
    #[serde(rename = "tenantUUID")]
    tenant_uuid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    network_zone: Option<&'a str>,
    skip_cert_check: bool,
    has_host: bool,
    process_module_config: ProcessModuleConfig,
}

/// JSON of the init secret for `dk`.
///
/// # Errors
///
/// Returns a serialization error.
pub fn init_secret_config(
    dk: &DynaKube,
    proxy: Option<String>,
    process_module_config: ProcessModuleConfig,
) -> Result<String> {
    let tenant_uuid = dk
        .status
        .as_ref()
        .and_then(|s| s.one_agent.connection_info.tenant_uuid.as_deref())
        .unwrap_or_default();
    let config = InitSecretConfig {
        api_url: &dk.spec.api_url,
        tenant_uuid,
        proxy,
        network_zone: dk.spec.network_zone.as_deref().filter(|z| !z.is_empty()),
        skip_cert_check: dk.spec.skip_cert_check,
        has_host: dk.one_agent_mode() == Some(OneAgentMode::CloudNativeFullStack),
        process_module_config,
    };
    Ok(serde_json::to_string(&config)?)
}

/// Content of the `endpoint.properties` key of the ingest secret.
///
/// Metrics go through the in-cluster ActiveGate when it ingests metrics and its
/// tenant is known, otherwise straight to the tenant API.
#[must_use]
pub fn ingest_endpoint_properties(dk: &DynaKube, tokens: &Tokens) -> String {
    let activegate_tenant = dk
        .status
        .as_ref()
        .and_then(|s| s.active_gate.connection_info.tenant_uuid.as_deref())
        .filter(|u| !u.is_empty());
    let url = match activegate_tenant {
        Some(uuid) if dk.has_capability(CapabilityDisplayName::MetricsIngest) => format!(
            "http://{}.{}/e/{uuid}/api/v2/metrics/ingest",
            dk.name_with_suffix(ACTIVEGATE_NAME),
            dk.namespace().unwrap_or_default()
        ),
        _ => format!("{}/v2/metrics/ingest", dk.spec.api_url.trim_end_matches('/')),
    };

    let mut properties = format!("DT_METRICS_INGEST_URL={url}\n");
    if let Some(token) = tokens.data_ingest_token.as_deref() {
        properties.push_str(&format!("DT_METRICS_INGEST_API_TOKEN={token}\n"));
    }
    properties
}

fn namespace_secret(dk: &DynaKube, namespace: &str, name: &str, key: &str, value: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(build_app_labels(&dk.name_any(), COMPONENT_INJECTION)),
            ..Default::default()
        },
        data: Some(secret_data(BTreeMap::from([(
            key.to_string(),
            value.to_string(),
        )]))),
        ..Default::default()
    }
}

/// Map selected namespaces and write their secrets.
///
/// # Errors
///
/// Returns [`Error::NoOneAgentCommunicationHosts`] while code modules wait for
/// communication hosts, the tenant error, or the joined per-namespace errors.
pub async fn reconcile(pass: &PassContext<'_>, dk: &mut DynaKube) -> Result<()> {
    let name = dk.name_any();
    if !dk.injection_enabled() || !FeatureFlags::new(dk).automatic_injection() {
        debug!(name = %name, "Injection disabled");
        unmap_namespaces(pass.ctx, &name).await?;
        if let Some(status) = dk.status.as_mut() {
            remove_condition(&mut status.conditions, CONDITION_TYPE_CODE_MODULES_INJECTION);
            remove_condition(&mut status.conditions, CONDITION_TYPE_METADATA_ENRICHMENT);
        }
        if !dk.code_modules_enabled() && dk.status.is_some() {
            version::reconcile(pass, dk, Component::CodeModules).await?;
        }
        return Ok(());
    }

    if dk.code_modules_enabled() {
        connectioninfo::reconcile_oneagent(pass, dk).await?;
        if dk.spec.enable_istio {
            istio::reconcile_oneagent_hosts(pass, dk).await?;
        }
    }
    version::reconcile(pass, dk, Component::CodeModules).await?;

    let mapped = map_namespaces(pass, dk).await?;

    let init_config = if dk.code_modules_enabled() && !mapped.is_empty() {
        let proxy = resolve_proxy(pass.ctx, dk).await?;
        let process_module_config = pass.client().get_process_module_config(0).await?;
        Some(init_secret_config(dk, proxy, process_module_config)?)
    } else {
        None
    };
    let ingest = dk
        .metadata_enrichment_enabled()
        .then(|| ingest_endpoint_properties(dk, &pass.tokens));

    let mut errors = Vec::new();
    for namespace in &mapped {
        if let Err(e) =
            write_namespace_secrets(pass.ctx, dk, namespace, init_config.as_deref(), ingest.as_deref())
                .await
        {
            warn!(name = %name, namespace = %namespace, error = %e, "Failed to write injection secrets");
            errors.push(e.context(format!("namespace {namespace}")));
        }
    }

    let message = if errors.is_empty() {
        format!("Secrets are up to date in {} namespaces", mapped.len())
    } else {
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    };
    let code_modules_enabled = dk.code_modules_enabled();
    let status = dk.status.get_or_insert_with(Default::default);
    for (condition_type, enabled) in [
        (CONDITION_TYPE_CODE_MODULES_INJECTION, code_modules_enabled),
        (CONDITION_TYPE_METADATA_ENRICHMENT, ingest.is_some()),
    ] {
        if !enabled {
            remove_condition(&mut status.conditions, condition_type);
        } else if errors.is_empty() {
            set_condition(
                &mut status.conditions,
                condition_type,
                STATUS_TRUE,
                REASON_SECRETS_CREATED,
                &message,
                pass.now,
            );
        } else {
            set_condition(
                &mut status.conditions,
                condition_type,
                STATUS_FALSE,
                REASON_SECRETS_GENERATION_FAILED,
                &message,
                pass.now,
            );
        }
    }
    join(errors)
}

/// Label selected namespaces and unmap the ones that dropped out.
///
/// Returns the names of all namespaces mapped to `dk` afterwards.
async fn map_namespaces(pass: &PassContext<'_>, dk: &DynaKube) -> Result<Vec<String>> {
    let name = dk.name_any();
    let operator_namespace = pass.ctx.config.pod_namespace.as_str();
    let mut mapped = Vec::new();

    for mut namespace in list::<Namespace>(pass.ctx, None, None).await? {
        let namespace_name = namespace.name_any();
        let owner = mapped_dynakube(&namespace).map(ToString::to_string);

        if namespace_selected(dk, &namespace, operator_namespace) {
            match owner.as_deref() {
                Some(other) if other != name => {
                    warn!(
                        name = %name,
                        namespace = %namespace_name,
                        owner = %other,
                        "Namespace is already mapped to another DynaKube, skipping"
                    );
                    continue;
                }
                Some(_) => {}
                None => {
                    namespace
                        .labels_mut()
                        .insert(NAMESPACE_INSTANCE_LABEL.to_string(), name.clone());
                    replace(pass.ctx, &namespace).await?;
                    info!(name = %name, namespace = %namespace_name, "Mapped namespace");
                }
            }
            mapped.push(namespace_name);
        } else if owner.as_deref() == Some(name.as_str()) {
            unmap_namespace(pass.ctx, namespace).await?;
        }
    }
    Ok(mapped)
}

async fn write_namespace_secrets(
    ctx: &Context,
    dk: &DynaKube,
    namespace: &str,
    init_config: Option<&str>,
    ingest: Option<&str>,
) -> Result<()> {
    for (secret_name, key, value) in [
        (INJECTION_CONFIG_SECRET_NAME, INJECTION_CONFIG_KEY, init_config),
        (INGEST_ENDPOINT_SECRET_NAME, INGEST_ENDPOINT_KEY, ingest),
    ] {
        match value {
            Some(value) => {
                apply(ctx, &namespace_secret(dk, namespace, secret_name, key, value)).await?;
            }
            None => {
                delete_if_exists::<Secret>(ctx, Some(namespace), secret_name).await?;
            }
        }
    }
    Ok(())
}

async fn unmap_namespace(ctx: &Context, mut namespace: Namespace) -> Result<()> {
    let namespace_name = namespace.name_any();
    namespace.labels_mut().remove(NAMESPACE_INSTANCE_LABEL);
    replace(ctx, &namespace).await?;
    for secret_name in [INJECTION_CONFIG_SECRET_NAME, INGEST_ENDPOINT_SECRET_NAME] {
        delete_if_exists::<Secret>(ctx, Some(&namespace_name), secret_name).await?;
    }
    info!(namespace = %namespace_name, "Unmapped namespace");
    Ok(())
}

/// Remove the mapping label and the injection secrets from every namespace
/// mapped to the `DynaKube` named `dk_name`.
///
/// # Errors
///
/// Returns the joined Kubernetes errors.
pub async fn unmap_namespaces(ctx: &Context, dk_name: &str) -> Result<()> {
    let selector = format!("{NAMESPACE_INSTANCE_LABEL}={dk_name}");
    let mut errors: Vec<Error> = Vec::new();
    for namespace in list::<Namespace>(ctx, None, Some(&selector)).await? {
        let namespace_name = namespace.name_any();
        if let Err(e) = unmap_namespace(ctx, namespace).await {
            errors.push(e.context(format!("namespace {namespace_name}")));
        }
    }
    join(errors)
}

#[cfg(test)]
#[path = "injection_tests.rs"]
mod injection_tests;
