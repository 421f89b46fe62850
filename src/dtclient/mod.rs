// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Dynatrace API adapter.
//!
//! The reconcilers depend on the [`DynatraceClient`] trait only. The production
//! implementation is [`http::HttpDynatraceClient`]; a fresh client is built for every
//! reconciliation by a [`DynatraceClientFactory`] because URL, tokens, proxy and
//! trusted CAs all come from the `DynaKube` being reconciled.
//!
//! Every non-success response is classified by
//! [`crate::http_errors::classify_status`], so throttling surfaces as
//! [`crate::errors::Error::Unreachable`].

pub mod communication_host;
pub mod http;

use crate::errors::Result;
use async_trait::async_trait;
pub use communication_host::CommunicationHost;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Token scope needed to create ActiveGate auth tokens
pub const SCOPE_ACTIVEGATE_TOKEN_CREATE: &str = "activeGateTokenManagement.create";

/// Token scope needed to download installers and images
pub const SCOPE_INSTALLER_DOWNLOAD: &str = "InstallerDownload";

/// Token scope needed to ingest metrics
pub const SCOPE_METRICS_INGEST: &str = "metrics.ingest";

/// Token scope needed to read settings
pub const SCOPE_SETTINGS_READ: &str = "settings.read";

/// Token scope needed to write settings
pub const SCOPE_SETTINGS_WRITE: &str = "settings.write";

/// OneAgent connection info as returned by the tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneAgentConnectionInfo {
    /// Tenant UUID
    pub tenant_uuid: String,
    /// Tenant token the agents authenticate with
    pub tenant_token: String,
    /// Comma separated endpoint list
    pub endpoints: String,
    /// Parsed, sorted, deduplicated endpoints
    pub communication_hosts: Vec<CommunicationHost>,
}

/// ActiveGate connection info as returned by the tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveGateConnectionInfo {
    /// Tenant UUID
    pub tenant_uuid: String,
    /// Tenant token the ActiveGate authenticates with
    pub tenant_token: String,
    /// Comma separated endpoint list
    pub endpoints: String,
}

/// Freshly created ActiveGate auth token.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ActiveGateAuthTokenInfo {
    /// Token id on the tenant
    pub token_id: String,
    /// Token value
    pub token: String,
}

impl fmt::Debug for ActiveGateAuthTokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveGateAuthTokenInfo")
            .field("token_id", &self.token_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Kubernetes cluster entity on the tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredEntity {
    /// Entity id, e.g. `KUBERNETES_CLUSTER-0123`
    pub entity_id: String,
    /// Display name
    #[serde(default)]
    pub display_name: String,
    /// Last seen, epoch milliseconds
    #[serde(rename = "lastSeenTms", default)]
    pub last_seen_timestamp: i64,
}

/// Pick the newest entity: maximum `last_seen_timestamp`, ties broken by `entity_id`.
#[must_use]
pub fn newest_entity(entities: &[MonitoredEntity]) -> Option<&MonitoredEntity> {
    entities.iter().max_by(|a, b| {
        a.last_seen_timestamp
            .cmp(&b.last_seen_timestamp)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    })
}

/// Result of a settings query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSettingsResponse {
    /// Number of matching settings objects
    pub total_count: i64,
}

/// One `section/key=value` entry of the process-module config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModuleProperty {
    /// Config section
    pub section: String,
    /// Key within the section
    pub key: String,
    /// Value
    pub value: String,
}

/// Process-module config embedded into the injection init secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModuleConfig {
    /// Config revision
    #[serde(default)]
    pub revision: u64,
    /// Properties
    #[serde(default)]
    pub properties: Vec<ProcessModuleProperty>,
}

/// Operations the reconcilers need from the Dynatrace API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DynatraceClient: Send + Sync {
    /// Scopes granted to `token`.
    async fn get_token_scopes(&self, token: &str) -> Result<Vec<String>>;

    /// Communication host the client itself talks to.
    async fn get_communication_host_for_client(&self) -> Result<CommunicationHost>;

    /// OneAgent connection info of the tenant.
    async fn get_oneagent_connection_info(&self) -> Result<OneAgentConnectionInfo>;

    /// ActiveGate connection info of the tenant.
    async fn get_activegate_connection_info(&self) -> Result<ActiveGateConnectionInfo>;

    /// Create an ActiveGate auth token for the `DynaKube`.
    async fn get_activegate_auth_token(&self, dynakube_name: &str) -> Result<ActiveGateAuthTokenInfo>;

    /// Latest OneAgent version for an OS and installer type.
    async fn get_latest_agent_version(&self, os: &str, installer_type: &str) -> Result<String>;

    /// Latest ActiveGate version for an OS.
    async fn get_latest_activegate_version(&self, os: &str) -> Result<String>;

    /// Kubernetes cluster entities tagged with the `kube-system` UUID.
    async fn get_monitored_entities_for_kube_system_uuid(
        &self,
        kube_system_uuid: &str,
    ) -> Result<Vec<MonitoredEntity>>;

    /// Settings objects of `schema_id` scoped to `entity`.
    async fn get_settings_for_monitored_entity(
        &self,
        entity: Option<MonitoredEntity>,
        schema_id: &str,
    ) -> Result<GetSettingsResponse>;

    /// Create the Kubernetes connection settings object. Returns its object id.
    async fn create_or_update_kubernetes_setting(
        &self,
        cluster_label: &str,
        kube_system_uuid: &str,
        monitored_entity_id: &str,
    ) -> Result<String>;

    /// Opt the cluster entity into the Kubernetes app. Returns the object id.
    async fn create_or_update_kubernetes_app_setting(&self, monitored_entity_id: &str)
        -> Result<String>;

    /// Process-module config newer than `revision`.
    async fn get_process_module_config(&self, revision: u64) -> Result<ProcessModuleConfig>;
}

/// Everything needed to build a client for one `DynaKube`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// API URL from the `DynaKube`
    pub api_url: String,
    /// API token
    pub api_token: String,
    /// Optional PaaS token; the API token is used when absent
    pub paas_token: Option<String>,
    /// Proxy URL
    pub proxy: Option<String>,
    /// PEM bundle of additional trusted CAs
    pub trusted_certs: Option<String>,
    /// Network zone
    pub network_zone: Option<String>,
    /// Skip TLS verification
    pub skip_cert_check: bool,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("paas_token", &self.paas_token.as_ref().map(|_| "<redacted>"))
            .field("proxy", &self.proxy.is_some())
            .field("trusted_certs", &self.trusted_certs.is_some())
            .field("network_zone", &self.network_zone)
            .field("skip_cert_check", &self.skip_cert_check)
            .finish_non_exhaustive()
    }
}

/// Builds [`DynatraceClient`]s.
pub trait DynatraceClientFactory: Send + Sync {
    /// Build a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy or certificates cannot be used.
    fn build(&self, config: &ClientConfig) -> Result<Arc<dyn DynatraceClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, seen: i64) -> MonitoredEntity {
        MonitoredEntity {
            entity_id: id.to_string(),
            display_name: String::new(),
            last_seen_timestamp: seen,
        }
    }

    #[test]
    fn test_newest_entity_by_last_seen() {
        let entities = vec![entity("A", 1), entity("B", 3), entity("C", 2)];
        assert_eq!(newest_entity(&entities).unwrap().entity_id, "B");
    }

    #[test]
    fn test_newest_entity_tiebreak_by_id() {
        let entities = vec![entity("B", 5), entity("A", 5)];
        assert_eq!(newest_entity(&entities).unwrap().entity_id, "B");
        assert!(newest_entity(&[]).is_none());
    }

    #[test]
    fn test_client_config_debug_hides_tokens() {
        let config = ClientConfig {
            api_url: "https://t.example/api".into(),
            api_token: "secret".into(),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("secret"));
    }
}
