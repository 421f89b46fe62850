// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tokens of a `DynaKube` and the Dynatrace client built from them.
//!
//! The token secret named by `spec.tokens` (default: the `DynaKube` name) holds
//! `apiToken` and optionally `paasToken` and `dataIngestToken`. After the client is
//! built, [`verify_scopes`] checks that every token carries the scopes the enabled
//! features need. The check calls the tenant once per token, so it is throttled by
//! the API request threshold and skipped while the tokens are unchanged.

use crate::constants::{TOKEN_KEY_API, TOKEN_KEY_DATA_INGEST, TOKEN_KEY_PAAS};
use crate::context::Context;
use crate::crd::DynaKube;
use crate::dtclient::{
    ClientConfig, DynatraceClient, SCOPE_ACTIVEGATE_TOKEN_CREATE, SCOPE_INSTALLER_DOWNLOAD,
    SCOPE_METRICS_INGEST, SCOPE_SETTINGS_READ, SCOPE_SETTINGS_WRITE,
};
use crate::errors::{join, Error, Result};
use crate::feature_flags::FeatureFlags;
use crate::reconcilers::resources::{self, secret_string};
use crate::reconcilers::status::{is_condition_true, is_outdated, set_condition};
use crate::status_reasons::{
    CONDITION_TYPE_API_TOKEN_SETTINGS_READ, CONDITION_TYPE_API_TOKEN_SETTINGS_WRITE,
    CONDITION_TYPE_TOKENS, REASON_SCOPE_MISSING, REASON_SCOPE_PRESENT, STATUS_FALSE, STATUS_TRUE,
};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, info};

/// Key of the proxy URL inside a user supplied proxy secret
const PROXY_SECRET_KEY: &str = "proxy";

/// Key of the PEM bundle inside the trusted CAs config map
const TRUSTED_CAS_KEY: &str = "certs";

/// Credentials read from the token secret.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Tokens {
    /// API token, always present
    pub api_token: String,
    /// PaaS token
    pub paas_token: Option<String>,
    /// Data-ingest token
    pub data_ingest_token: Option<String>,
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("api_token", &"<redacted>")
            .field("paas_token", &self.paas_token.as_ref().map(|_| "<redacted>"))
            .field(
                "data_ingest_token",
                &self.data_ingest_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Tokens {
    /// Token used to download installers and images: PaaS token, else API token.
    #[must_use]
    pub fn installer_token(&self) -> &str {
        self.paas_token.as_deref().unwrap_or(&self.api_token)
    }

    /// Hash over all tokens, stored in status to notice token changes.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for token in [
            Some(self.api_token.as_str()),
            self.paas_token.as_deref(),
            self.data_ingest_token.as_deref(),
        ] {
            hasher.update(token.unwrap_or_default().as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// A feature and the scope it needs on a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScopeRequirement {
    feature: &'static str,
    scope: &'static str,
}

const FEATURE_ACTIVEGATE_TOKEN: ScopeRequirement = ScopeRequirement {
    feature: "Automatic ActiveGate Token Creation",
    scope: SCOPE_ACTIVEGATE_TOKEN_CREATE,
};

const FEATURE_DOWNLOAD_INSTALLER: ScopeRequirement = ScopeRequirement {
    feature: "Download Installer",
    scope: SCOPE_INSTALLER_DOWNLOAD,
};

const FEATURE_DATA_INGEST: ScopeRequirement = ScopeRequirement {
    feature: "Data Ingest",
    scope: SCOPE_METRICS_INGEST,
};

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read the token secret of `dk`.
///
/// # Errors
///
/// Returns [`Error::Token`] if the secret or its `apiToken` key is missing.
pub async fn read_tokens(ctx: &Context, dk: &DynaKube) -> Result<Tokens> {
    let namespace = dk.namespace().unwrap_or_default();
    let name = dk.tokens_secret_name();
    let secret: Secret = resources::get(ctx, Some(&namespace), &name)
        .await?
        .ok_or_else(|| {
            Error::Token(format!(
                "token secret '{name}' not found in namespace '{namespace}'"
            ))
        })?;

    let api_token = non_empty(secret_string(&secret, TOKEN_KEY_API)).ok_or_else(|| {
        Error::Token(format!(
            "token secret '{name}' is missing the '{TOKEN_KEY_API}' key"
        ))
    })?;

    Ok(Tokens {
        api_token,
        paas_token: non_empty(secret_string(&secret, TOKEN_KEY_PAAS)),
        data_ingest_token: non_empty(secret_string(&secret, TOKEN_KEY_DATA_INGEST)),
    })
}

/// Resolve the proxy URL of `dk`: inline value, else key `proxy` of the named secret.
///
/// # Errors
///
/// Returns [`Error::ConfigurationInvalid`] if the referenced secret or key is missing.
pub async fn resolve_proxy(ctx: &Context, dk: &DynaKube) -> Result<Option<String>> {
    let Some(proxy) = &dk.spec.proxy else {
        return Ok(None);
    };
    if let Some(value) = non_empty(proxy.value.clone()) {
        return Ok(Some(value));
    }
    let Some(secret_name) = non_empty(proxy.value_from.clone()) else {
        return Ok(None);
    };

    let namespace = dk.namespace().unwrap_or_default();
    let secret: Secret = resources::get(ctx, Some(&namespace), &secret_name)
        .await?
        .ok_or_else(|| Error::invalid(format!("proxy secret '{secret_name}' not found")))?;
    non_empty(secret_string(&secret, PROXY_SECRET_KEY))
        .map(Some)
        .ok_or_else(|| {
            Error::invalid(format!(
                "proxy secret '{secret_name}' has no '{PROXY_SECRET_KEY}' key"
            ))
        })
}

async fn trusted_certs(ctx: &Context, dk: &DynaKube) -> Result<Option<String>> {
    let Some(name) = non_empty(dk.spec.trusted_cas.clone()) else {
        return Ok(None);
    };
    let namespace = dk.namespace().unwrap_or_default();
    let config_map: ConfigMap = resources::get(ctx, Some(&namespace), &name)
        .await?
        .ok_or_else(|| Error::invalid(format!("trusted CAs config map '{name}' not found")))?;
    Ok(non_empty(
        config_map
            .data
            .and_then(|mut data| data.remove(TRUSTED_CAS_KEY)),
    ))
}

/// Everything the client factory needs for `dk`.
///
/// # Errors
///
/// Returns an error if the proxy secret or the trusted CAs cannot be read.
pub async fn client_config(ctx: &Context, dk: &DynaKube, tokens: &Tokens) -> Result<ClientConfig> {
    Ok(ClientConfig {
        api_url: dk.spec.api_url.clone(),
        api_token: tokens.api_token.clone(),
        paas_token: tokens.paas_token.clone(),
        proxy: resolve_proxy(ctx, dk).await?,
        trusted_certs: trusted_certs(ctx, dk).await?,
        network_zone: non_empty(dk.spec.network_zone.clone()),
        skip_cert_check: dk.spec.skip_cert_check,
    })
}

fn api_token_requirements(dk: &DynaKube, tokens: &Tokens) -> Vec<ScopeRequirement> {
    let mut requirements = Vec::new();
    if dk.active_gate_enabled() {
        requirements.push(FEATURE_ACTIVEGATE_TOKEN);
    }
    if dk.one_agent_mode().is_some() && tokens.paas_token.is_none() {
        requirements.push(FEATURE_DOWNLOAD_INSTALLER);
    }
    requirements
}

fn scope_errors(token_key: &str, scopes: &[String], requirements: &[ScopeRequirement]) -> Option<Error> {
    let missing: Vec<String> = requirements
        .iter()
        .filter(|r| !scopes.iter().any(|s| s == r.scope))
        .map(|r| format!("feature '{}' is missing scope '{}'", r.feature, r.scope))
        .collect();
    (!missing.is_empty()).then(|| {
        Error::Token(format!(
            "token '{token_key}' has scope errors: [{}]",
            missing.join(" ")
        ))
    })
}

fn set_optional_scope_condition(
    dk: &mut DynaKube,
    condition_type: &str,
    scope: &str,
    scopes: &[String],
    now: DateTime<Utc>,
) {
    let status = dk.status.get_or_insert_with(Default::default);
    if scopes.iter().any(|s| s == scope) {
        set_condition(
            &mut status.conditions,
            condition_type,
            STATUS_TRUE,
            REASON_SCOPE_PRESENT,
            &format!("{scope} scope is present on the API token"),
            now,
        );
    } else {
        set_condition(
            &mut status.conditions,
            condition_type,
            STATUS_FALSE,
            REASON_SCOPE_MISSING,
            &format!("{scope} scope is missing on the API token"),
            now,
        );
    }
}

/// `true` if the scopes were verified recently for the same tokens.
#[must_use]
pub fn scope_verification_throttled(dk: &DynaKube, tokens: &Tokens, now: DateTime<Utc>) -> bool {
    let Some(status) = &dk.status else {
        return false;
    };
    let threshold = FeatureFlags::new(dk).api_request_threshold();
    !is_outdated(
        status.dynatrace_api.last_token_scope_request.as_deref(),
        now,
        threshold,
    ) && status.dynatrace_api.token_hash.as_deref() == Some(tokens.hash().as_str())
        && is_condition_true(&status.conditions, CONDITION_TYPE_TOKENS)
}

/// Check every token for the scopes the enabled features need.
///
/// # Errors
///
/// Returns [`Error::Token`] naming every missing scope, or the client error if the
/// tenant could not be asked.
pub async fn verify_scopes(
    client: &dyn DynatraceClient,
    dk: &mut DynaKube,
    tokens: &Tokens,
    now: DateTime<Utc>,
) -> Result<()> {
    if scope_verification_throttled(dk, tokens, now) {
        debug!(name = %dk.name_any(), "Token scopes verified recently, skipping");
        return Ok(());
    }

    let api_scopes = client.get_token_scopes(&tokens.api_token).await?;
    let mut errors: Vec<Error> = scope_errors(TOKEN_KEY_API, &api_scopes, &api_token_requirements(dk, tokens))
        .into_iter()
        .collect();

    if let Some(paas_token) = &tokens.paas_token {
        let scopes = client.get_token_scopes(paas_token).await?;
        errors.extend(scope_errors(TOKEN_KEY_PAAS, &scopes, &[FEATURE_DOWNLOAD_INSTALLER]));
    }
    if let Some(data_ingest_token) = &tokens.data_ingest_token {
        let scopes = client.get_token_scopes(data_ingest_token).await?;
        errors.extend(scope_errors(TOKEN_KEY_DATA_INGEST, &scopes, &[FEATURE_DATA_INGEST]));
    }

    set_optional_scope_condition(
        dk,
        CONDITION_TYPE_API_TOKEN_SETTINGS_READ,
        SCOPE_SETTINGS_READ,
        &api_scopes,
        now,
    );
    set_optional_scope_condition(
        dk,
        CONDITION_TYPE_API_TOKEN_SETTINGS_WRITE,
        SCOPE_SETTINGS_WRITE,
        &api_scopes,
        now,
    );

    join(errors)?;

    let status = dk.status.get_or_insert_with(Default::default);
    status.dynatrace_api.last_token_scope_request = Some(now.to_rfc3339());
    status.dynatrace_api.token_hash = Some(tokens.hash());
    info!(name = %dk.name_any(), "Verified token scopes");
    Ok(())
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod token_tests;
