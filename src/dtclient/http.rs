// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `reqwest` implementation of [`DynatraceClient`].

use super::communication_host::{self, CommunicationHost};
use super::{
    ActiveGateAuthTokenInfo, ActiveGateConnectionInfo, ClientConfig, DynatraceClient,
    DynatraceClientFactory, GetSettingsResponse, MonitoredEntity, OneAgentConnectionInfo,
    ProcessModuleConfig,
};
use crate::constants::KUBERNETES_SETTINGS_SCHEMA_ID;
use crate::errors::{Error, Result};
use crate::http_errors::classify_status;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Timeout of a single Dynatrace API request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Schema version of the Kubernetes connection settings object
const KUBERNETES_SETTINGS_SCHEMA_VERSION: &str = "1.0.27";

/// Schema version of the Kubernetes app opt-in settings object
const APP_TRANSITION_SCHEMA_VERSION: &str = "1.0.1";

#[derive(Clone, Copy)]
enum TokenType {
    Api,
    Paas,
}

/// Dynatrace API client over HTTPS.
#[derive(Clone)]
pub struct HttpDynatraceClient {
    http: HttpClient,
    url: String,
    api_token: String,
    paas_token: Option<String>,
    network_zone: Option<String>,
    cancel: CancellationToken,
}

#[derive(Deserialize)]
struct ServerErrorResponse {
    error: ServerError,
}

#[derive(Deserialize)]
struct ServerError {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct TokenLookupRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct TokenScopesResponse {
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OneAgentConnectionInfoResponse {
    #[serde(rename = "tenantUUID", default)]
    tenant_uuid: String,
    #[serde(default)]
    tenant_token: String,
    #[serde(default)]
    formatted_communication_endpoints: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveGateConnectionInfoResponse {
    #[serde(rename = "tenantUUID", default)]
    tenant_uuid: String,
    #[serde(default)]
    tenant_token: String,
    #[serde(default)]
    communication_endpoints: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveGateAuthTokenRequest {
    name: String,
    seed_token: bool,
    expiration_date: String,
}

#[derive(Deserialize)]
struct ActiveGateAuthTokenResponse {
    id: String,
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentVersionResponse {
    latest_agent_version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayVersionResponse {
    latest_gateway_version: String,
}

#[derive(Deserialize)]
struct MonitoredEntitiesResponse {
    #[serde(default)]
    entities: Vec<MonitoredEntity>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KubernetesSettingsValue<'a> {
    enabled: bool,
    label: &'a str,
    cluster_id_enabled: bool,
    cluster_id: &'a str,
    cloud_application_pipeline_enabled: bool,
    open_metrics_pipeline_enabled: bool,
    event_processing_active: bool,
    event_processing_v2_active: bool,
    filter_events: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppTransitionValue {
    kubernetes_app_options: AppOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppOptions {
    enable_kubernetes_app: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsObject<'a, V> {
    schema_id: &'a str,
    schema_version: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    scope: &'a str,
    value: V,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsObjectResponse {
    object_id: String,
}

impl HttpDynatraceClient {
    /// Build a client from a [`ClientConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationInvalid`] if the proxy URL or the trusted
    /// certificates cannot be used.
    pub fn new(config: &ClientConfig, cancel: CancellationToken) -> Result<Self> {
        let mut builder = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.skip_cert_check);

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| Error::invalid(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        if let Some(pem) = config.trusted_certs.as_deref().filter(|p| !p.is_empty()) {
            let certs = reqwest::Certificate::from_pem_bundle(pem.as_bytes())
                .map_err(|e| Error::invalid(format!("invalid trusted CAs: {e}")))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let http = builder
            .build()
            .map_err(|e| Error::invalid(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: config.api_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            paas_token: config.paas_token.clone().filter(|t| !t.is_empty()),
            network_zone: config.network_zone.clone().filter(|z| !z.is_empty()),
            cancel,
        })
    }

    fn token(&self, token_type: TokenType) -> &str {
        match token_type {
            TokenType::Api => &self.api_token,
            TokenType::Paas => self.paas_token.as_deref().unwrap_or(&self.api_token),
        }
    }

    fn network_zone_query(&self) -> Vec<(&'static str, String)> {
        self.network_zone
            .iter()
            .map(|zone| ("networkZone", zone.clone()))
            .collect()
    }

    async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        token: &str,
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.url);
        debug!(method = %method, url = %url, "Dynatrace API request");

        let mut request = self
            .http
            .request(method.clone(), &url)
            .query(query)
            .header("Accept", "application/json")
            .header("Authorization", format!("Api-Token {token}"));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ServerErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            error!(
                method = %method,
                url = %url,
                status = %status,
                error = %message,
                "Dynatrace API request failed"
            );
            return Err(classify_status(status.as_u16(), &message));
        }

        Ok(serde_json::from_str(&text)?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        token_type: TokenType,
    ) -> Result<T> {
        self.request::<(), T>(Method::GET, path, query, self.token(token_type), None)
            .await
    }
}

#[async_trait]
impl DynatraceClient for HttpDynatraceClient {
    async fn get_token_scopes(&self, token: &str) -> Result<Vec<String>> {
        let response: TokenScopesResponse = self
            .request(
                Method::POST,
                "/v1/tokens/lookup",
                &[],
                token,
                Some(&TokenLookupRequest { token }),
            )
            .await?;
        Ok(response.scopes)
    }

    async fn get_communication_host_for_client(&self) -> Result<CommunicationHost> {
        communication_host::parse(&self.url)
    }

    async fn get_oneagent_connection_info(&self) -> Result<OneAgentConnectionInfo> {
        let response: OneAgentConnectionInfoResponse = self
            .get(
                "/v1/deployment/installer/agent/connectioninfo",
                &self.network_zone_query(),
                TokenType::Paas,
            )
            .await?;
        let communication_hosts =
            communication_host::parse_list(&response.formatted_communication_endpoints)?;
        Ok(OneAgentConnectionInfo {
            tenant_uuid: response.tenant_uuid,
            tenant_token: response.tenant_token,
            endpoints: response.formatted_communication_endpoints,
            communication_hosts,
        })
    }

    async fn get_activegate_connection_info(&self) -> Result<ActiveGateConnectionInfo> {
        let response: ActiveGateConnectionInfoResponse = self
            .get(
                "/v1/deployment/installer/gateway/connectioninfo",
                &self.network_zone_query(),
                TokenType::Paas,
            )
            .await?;
        Ok(ActiveGateConnectionInfo {
            tenant_uuid: response.tenant_uuid,
            tenant_token: response.tenant_token,
            endpoints: response.communication_endpoints,
        })
    }

    async fn get_activegate_auth_token(&self, dynakube_name: &str) -> Result<ActiveGateAuthTokenInfo> {
        let body = ActiveGateAuthTokenRequest {
            name: format!("dynatrace-operator-{dynakube_name}"),
            seed_token: false,
            expiration_date: "now+60d".to_string(),
        };
        let response: ActiveGateAuthTokenResponse = self
            .request(
                Method::POST,
                "/v2/activeGateTokens",
                &[],
                &self.api_token,
                Some(&body),
            )
            .await?;
        Ok(ActiveGateAuthTokenInfo {
            token_id: response.id,
            token: response.token,
        })
    }

    async fn get_latest_agent_version(&self, os: &str, installer_type: &str) -> Result<String> {
        let response: AgentVersionResponse = self
            .get(
                &format!("/v1/deployment/installer/agent/{os}/{installer_type}/latest/metainfo"),
                &[
                    ("flavor", "default".to_string()),
                    ("arch", "all".to_string()),
                ],
                TokenType::Paas,
            )
            .await?;
        Ok(response.latest_agent_version)
    }

    async fn get_latest_activegate_version(&self, os: &str) -> Result<String> {
        let response: GatewayVersionResponse = self
            .get(
                &format!("/v1/deployment/installer/gateway/{os}/latest/metainfo"),
                &[],
                TokenType::Paas,
            )
            .await?;
        Ok(response.latest_gateway_version)
    }

    async fn get_monitored_entities_for_kube_system_uuid(
        &self,
        kube_system_uuid: &str,
    ) -> Result<Vec<MonitoredEntity>> {
        if kube_system_uuid.is_empty() {
            return Err(Error::invalid("no kube-system namespace UUID given"));
        }
        let response: MonitoredEntitiesResponse = self
            .get(
                "/v2/entities",
                &[
                    ("pageSize", "500".to_string()),
                    (
                        "entitySelector",
                        format!("type(KUBERNETES_CLUSTER),kubernetesClusterId({kube_system_uuid})"),
                    ),
                    ("from", "-365d".to_string()),
                    ("fields", "+lastSeenTms".to_string()),
                ],
                TokenType::Api,
            )
            .await?;
        Ok(response.entities)
    }

    async fn get_settings_for_monitored_entity(
        &self,
        entity: Option<MonitoredEntity>,
        schema_id: &str,
    ) -> Result<GetSettingsResponse> {
        let Some(entity) = entity else {
            return Ok(GetSettingsResponse::default());
        };
        self.get(
            "/v2/settings/effectiveValues",
            &[
                ("schemaIds", schema_id.to_string()),
                ("scopes", entity.entity_id),
            ],
            TokenType::Api,
        )
        .await
    }

    async fn create_or_update_kubernetes_setting(
        &self,
        cluster_label: &str,
        kube_system_uuid: &str,
        monitored_entity_id: &str,
    ) -> Result<String> {
        if kube_system_uuid.is_empty() {
            return Err(Error::invalid("no kube-system namespace UUID given"));
        }
        let body = [SettingsObject {
            schema_id: KUBERNETES_SETTINGS_SCHEMA_ID,
            schema_version: KUBERNETES_SETTINGS_SCHEMA_VERSION,
            scope: monitored_entity_id,
            value: KubernetesSettingsValue {
                enabled: true,
                label: cluster_label,
                cluster_id_enabled: true,
                cluster_id: kube_system_uuid,
                cloud_application_pipeline_enabled: true,
                open_metrics_pipeline_enabled: false,
                event_processing_active: false,
                event_processing_v2_active: false,
                filter_events: false,
            },
        }];
        self.post_settings(&body).await
    }

    async fn create_or_update_kubernetes_app_setting(
        &self,
        monitored_entity_id: &str,
    ) -> Result<String> {
        let body = [SettingsObject {
            schema_id: crate::constants::APP_TRANSITION_SCHEMA_ID,
            schema_version: APP_TRANSITION_SCHEMA_VERSION,
            scope: monitored_entity_id,
            value: AppTransitionValue {
                kubernetes_app_options: AppOptions {
                    enable_kubernetes_app: true,
                },
            },
        }];
        self.post_settings(&body).await
    }

    async fn get_process_module_config(&self, revision: u64) -> Result<ProcessModuleConfig> {
        self.get(
            "/v1/deployment/installer/agent/processmoduleconfig",
            &[("revision", revision.to_string())],
            TokenType::Paas,
        )
        .await
    }
}

impl HttpDynatraceClient {
    async fn post_settings<B: Serialize + Sync>(&self, body: &B) -> Result<String> {
        let response: Vec<SettingsObjectResponse> = self
            .request(
                Method::POST,
                "/v2/settings/objects",
                &[],
                &self.api_token,
                Some(body),
            )
            .await?;
        match response.as_slice() {
            [single] => Ok(single.object_id.clone()),
            _ => Err(Error::DynatraceApi {
                status: 200,
                message: format!(
                    "settings response contains {} entries instead of exactly one",
                    response.len()
                ),
            }),
        }
    }
}

/// Builds [`HttpDynatraceClient`]s sharing the process cancellation token.
#[derive(Clone, Default)]
pub struct HttpClientFactory {
    cancel: CancellationToken,
}

impl HttpClientFactory {
    /// Factory whose clients abort once `cancel` fires.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

impl DynatraceClientFactory for HttpClientFactory {
    fn build(&self, config: &ClientConfig) -> Result<Arc<dyn DynatraceClient>> {
        Ok(Arc::new(HttpDynatraceClient::new(
            config,
            self.cancel.clone(),
        )?))
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod http_tests;
