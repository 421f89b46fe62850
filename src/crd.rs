// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definition for the `DynaKube` resource.
//!
//! A `DynaKube` describes how a Dynatrace observability stack is deployed into the
//! cluster: which tenant to talk to, which credentials to use, which ActiveGate
//! capabilities to run and which OneAgent deployment mode to use.
//!
//! # Resource Types
//!
//! - [`DynaKube`] - the single unit of reconciliation
//! - [`DynaKubeStatus`] - phase, conditions and the cached tenant data of a `DynaKube`
//!
//! # Example
//!
//! ```yaml
//! apiVersion: dynatrace.com/v1beta5
//! kind: DynaKube
//! metadata:
//!   name: dynakube
//!   namespace: dynatrace
//!   annotations:
//!     feature.dynatrace.com/automatic-kubernetes-api-monitoring: "true"
//! spec:
//!   apiUrl: https://abc12345.live.dynatrace.com/api
//!   activeGate:
//!     capabilities:
//!       - kubernetesMonitoring
//!       - routing
//!   oneAgent:
//!     cloudNativeFullStack: {}
//! ```

use crate::errors::{Error, Result};
use k8s_openapi::api::core::v1::{ResourceRequirements, Toleration};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Label selector to match Kubernetes resources.
///
/// A label selector is a label query over a set of resources. The result of matchLabels and
/// matchExpressions are `ANDed`. An empty label selector matches all objects.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Map of {key,value} pairs. A single {key,value} in the matchLabels map is equivalent
    /// to an element of matchExpressions, whose key field is "key", the operator is "In",
    /// and the values array contains only "value". All requirements must be satisfied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    /// List of label selector requirements. All requirements must be satisfied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Vec<LabelSelectorRequirement>>,
}

/// A label selector requirement is a selector that contains values, a key, and an operator
/// that relates the key and values.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to.
    pub key: String,

    /// Operator represents a key's relationship to a set of values.
    /// Valid operators are In, `NotIn`, Exists and `DoesNotExist`.
    pub operator: String,

    /// An array of string values. If the operator is In or `NotIn`,
    /// the values array must be non-empty. If the operator is Exists or `DoesNotExist`,
    /// the values array must be empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl LabelSelector {
    /// Check whether a label set satisfies this selector.
    ///
    /// Unknown operators never match.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_match = self.match_labels.as_ref().is_none_or(|wanted| {
            wanted
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
        });
        let expressions_match = self
            .match_expressions
            .as_ref()
            .is_none_or(|exprs| exprs.iter().all(|expr| expr.matches(labels)));
        labels_match && expressions_match
    }
}

impl LabelSelectorRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let values = self.values.as_deref().unwrap_or_default();
        match self.operator.as_str() {
            "In" => labels.get(&self.key).is_some_and(|v| values.contains(v)),
            "NotIn" => labels.get(&self.key).is_none_or(|v| !values.contains(v)),
            "Exists" => labels.contains_key(&self.key),
            "DoesNotExist" => !labels.contains_key(&self.key),
            _ => false,
        }
    }
}

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `Tokens` or `ActiveGateStatefulSet`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Proxy used for every connection to the tenant.
///
/// Exactly one of `value` and `valueFrom` should be set.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeProxy {
    /// Inline proxy URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Name of a secret in the `DynaKube` namespace holding the proxy URL under key `proxy`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<String>,
}

/// Display name of an ActiveGate capability.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityDisplayName {
    /// Routes OneAgent traffic through the ActiveGate
    #[serde(rename = "routing")]
    Routing,
    /// Monitors the Kubernetes API of this cluster
    #[serde(rename = "kubernetesMonitoring")]
    KubernetesMonitoring,
    /// Accepts metric ingestion
    #[serde(rename = "metricsIngest")]
    MetricsIngest,
    /// Exposes the Dynatrace API inside the cluster
    #[serde(rename = "dynatraceAPI")]
    DynatraceApi,
    /// Runs synthetic monitors; cannot be combined with any other capability
    #[serde(rename = "synthetic")]
    Synthetic,
}

impl CapabilityDisplayName {
    /// Display name as written in the `DynaKube`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::KubernetesMonitoring => "kubernetesMonitoring",
            Self::MetricsIngest => "metricsIngest",
            Self::DynatraceApi => "dynatraceAPI",
            Self::Synthetic => "synthetic",
        }
    }
}

/// Custom properties passed to the ActiveGate.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomProperties {
    /// Inline `custom.properties` content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Name of an existing secret holding the properties under key `customProperties`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<String>,
}

/// ActiveGate configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveGateSpec {
    /// Capabilities to run. Unique; `synthetic` must be the only entry when present.
    #[serde(default)]
    pub capabilities: Vec<CapabilityDisplayName>,

    /// Image to use instead of the tenant registry image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Version to pin instead of the latest one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Number of replicas, defaults to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0))]
    pub replicas: Option<i32>,

    /// Secret with the TLS certificate the ActiveGate serves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,

    /// Custom properties.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_properties: Option<CustomProperties>,

    /// Compute resources of the ActiveGate container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Tolerations of the ActiveGate pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Node selector of the ActiveGate pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// ActiveGate group the instances register in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Settings shared by the OneAgent host modes.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostInjectSpec {
    /// OneAgent image to use instead of the tenant registry image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// OneAgent version to pin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Code-modules image; only used by `cloudNativeFullStack`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_modules_image: Option<String>,

    /// Namespaces to inject into; only used by `cloudNativeFullStack`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    /// Extra installer arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Tolerations of the OneAgent pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Node selector of the OneAgent pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Compute resources of the OneAgent container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oneagent_resources: Option<ResourceRequirements>,
}

/// Settings of the `applicationMonitoring` mode.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMonitoringSpec {
    /// Code-modules version to pin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Code-modules image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_modules_image: Option<String>,

    /// Namespaces to inject into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

/// OneAgent configuration. At most one mode may be set.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentSpec {
    /// Full-stack monitoring with the host agent injecting into every process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classic_full_stack: Option<HostInjectSpec>,

    /// Host monitoring only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_monitoring: Option<HostInjectSpec>,

    /// Host agent plus code-module injection via webhook.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_native_full_stack: Option<HostInjectSpec>,

    /// Code-module injection only, no host agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_monitoring: Option<ApplicationMonitoringSpec>,
}

/// Metadata-enrichment configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEnrichment {
    /// Enables metadata enrichment of pods in mapped namespaces.
    #[serde(default)]
    pub enabled: bool,

    /// Namespaces to enrich.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

/// Extensions configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionsSpec {
    /// Enables the extension execution controller token.
    #[serde(default)]
    pub enabled: bool,
}

/// `DynaKube` describes the Dynatrace components deployed into this cluster.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dynatrace.com",
    version = "v1beta5",
    kind = "DynaKube",
    namespaced,
    shortname = "dk",
    doc = "DynaKube describes how Dynatrace OneAgent and ActiveGate are deployed into the cluster and which tenant they report to.",
    printcolumn = r#"{"name":"ApiUrl","type":"string","jsonPath":".spec.apiUrl"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "DynaKubeStatus")]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeSpec {
    /// Dynatrace API URL, e.g. `https://abc12345.live.dynatrace.com/api`.
    pub api_url: String,

    /// Name of the secret holding the tokens. Defaults to the `DynaKube` name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<String>,

    /// Proxy for tenant connections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<DynaKubeProxy>,

    /// Config map with additional trusted CA certificates under key `certs`.
    #[serde(rename = "trustedCAs", skip_serializing_if = "Option::is_none")]
    pub trusted_cas: Option<String>,

    /// Network zone the components connect through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_zone: Option<String>,

    /// Program Istio egress for the tenant endpoints.
    #[serde(default)]
    pub enable_istio: bool,

    /// Disable certificate validation for tenant connections.
    #[serde(default)]
    pub skip_cert_check: bool,

    /// Existing pull secret to use instead of the generated one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_pull_secret: Option<String>,

    /// ActiveGate configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_gate: Option<ActiveGateSpec>,

    /// OneAgent configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_agent: Option<OneAgentSpec>,

    /// Metadata-enrichment configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_enrichment: Option<MetadataEnrichment>,

    /// Extensions configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<ExtensionsSpec>,
}

/// Lifecycle phase of a `DynaKube`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum DynaKubePhase {
    /// Workloads are being rolled out
    Deploying,
    /// All workloads are ready
    Running,
    /// The last reconciliation failed
    Error,
}

/// Protocol/host/port triple as persisted in status.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq, Hash)]
pub struct CommunicationHostStatus {
    /// `http` or `https`
    pub protocol: String,
    /// DNS name or IPv4 address
    pub host: String,
    /// Port
    pub port: u32,
}

/// Snapshot of the tenant connection info of one component.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfoStatus {
    /// Tenant UUID
    #[serde(rename = "tenantUUID", skip_serializing_if = "Option::is_none")]
    pub tenant_uuid: Option<String>,

    /// Comma separated list of endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<String>,

    /// Parsed communication hosts; empty for ActiveGate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub communication_hosts: Vec<CommunicationHostStatus>,

    /// Time of the last successful fetch (RFC3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_request: Option<String>,
}

/// Where a component version was resolved from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum VersionSource {
    /// Explicit image in the `DynaKube`
    CustomImage,
    /// Explicit version in the `DynaKube`
    CustomVersion,
    /// Public registry (feature flag)
    PublicRegistry,
    /// Tenant registry
    TenantRegistry,
}

/// Resolved version of one component.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionStatus {
    /// Resolved version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Image reference the version maps to
    #[serde(rename = "imageID", skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    /// Where the version came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<VersionSource>,

    /// Time of the last probe (RFC3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe_timestamp: Option<String>,
}

/// ActiveGate part of the status.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveGateStatus {
    /// Tenant connection info
    #[serde(default)]
    pub connection_info: ConnectionInfoStatus,

    /// Resolved ActiveGate version
    #[serde(default)]
    pub version: VersionStatus,
}

/// Node-local OneAgent pod.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentInstance {
    /// Name of the OneAgent pod on the node
    pub pod_name: String,
    /// Host IP of the node
    #[serde(rename = "ipAddress")]
    pub host_ip: String,
}

/// OneAgent part of the status.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentStatus {
    /// Tenant connection info
    #[serde(default)]
    pub connection_info: ConnectionInfoStatus,

    /// Resolved OneAgent version
    #[serde(default)]
    pub version: VersionStatus,

    /// Node name to OneAgent pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instances: BTreeMap<String, OneAgentInstance>,

    /// Time the instance map last changed (RFC3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_instance_status_update: Option<String>,
}

/// Bookkeeping of Dynatrace API calls that are throttled across passes.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DynatraceApiStatus {
    /// Time of the last token scope verification (RFC3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_token_scope_request: Option<String>,

    /// Hash of the tokens verified at that time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_hash: Option<String>,
}

/// `DynaKube` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeStatus {
    /// Lifecycle phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<DynaKubePhase>,

    /// UID of the `kube-system` namespace; write-once
    #[serde(rename = "kubeSystemUUID", skip_serializing_if = "Option::is_none")]
    pub kube_system_uuid: Option<String>,

    /// Monitored entity id of this cluster on the tenant
    #[serde(rename = "monitoredEntityID", skip_serializing_if = "Option::is_none")]
    pub monitored_entity_id: Option<String>,

    /// Conditions keyed by type
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Dynatrace API bookkeeping
    #[serde(default)]
    pub dynatrace_api: DynatraceApiStatus,

    /// ActiveGate status
    #[serde(default)]
    pub active_gate: ActiveGateStatus,

    /// OneAgent status
    #[serde(default)]
    pub one_agent: OneAgentStatus,

    /// Resolved code-modules version
    #[serde(default)]
    pub code_modules: VersionStatus,

    /// Resolved synthetic version
    #[serde(default)]
    pub synthetic: VersionStatus,
}

/// OneAgent deployment mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OneAgentMode {
    /// `classicFullStack`
    ClassicFullStack,
    /// `hostMonitoring`
    HostMonitoring,
    /// `cloudNativeFullStack`
    CloudNativeFullStack,
    /// `applicationMonitoring`
    ApplicationMonitoring,
}

impl OneAgentMode {
    /// `true` for the modes that run a host agent on every node.
    #[must_use]
    pub fn is_host_mode(self) -> bool {
        !matches!(self, Self::ApplicationMonitoring)
    }

    /// Mode name used in deployment metadata.
    #[must_use]
    pub fn metadata_name(self) -> &'static str {
        match self {
            Self::ClassicFullStack => "classic_fullstack",
            Self::HostMonitoring => "host_monitoring",
            Self::CloudNativeFullStack => "cloud_native_fullstack",
            Self::ApplicationMonitoring => "application_monitoring",
        }
    }
}

impl DynaKube {
    /// `{name}-{suffix}`, the naming scheme of every object the operator owns.
    #[must_use]
    pub fn name_with_suffix(&self, suffix: &str) -> String {
        format!("{}-{suffix}", self.name_any())
    }

    /// Name of the secret holding the tokens.
    #[must_use]
    pub fn tokens_secret_name(&self) -> String {
        self.spec
            .tokens
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    /// Configured ActiveGate capabilities, in declaration order.
    #[must_use]
    pub fn capabilities(&self) -> &[CapabilityDisplayName] {
        self.spec
            .active_gate
            .as_ref()
            .map_or(&[], |ag| ag.capabilities.as_slice())
    }

    /// `true` if at least one ActiveGate capability is configured.
    #[must_use]
    pub fn active_gate_enabled(&self) -> bool {
        !self.capabilities().is_empty()
    }

    /// `true` if the given capability is configured.
    #[must_use]
    pub fn has_capability(&self, capability: CapabilityDisplayName) -> bool {
        self.capabilities().contains(&capability)
    }

    /// `true` if the Kubernetes monitoring capability is configured.
    #[must_use]
    pub fn kube_mon_enabled(&self) -> bool {
        self.has_capability(CapabilityDisplayName::KubernetesMonitoring)
    }

    /// Configured OneAgent mode, if any. The first set mode wins; see [`Self::validate`].
    #[must_use]
    pub fn one_agent_mode(&self) -> Option<OneAgentMode> {
        let oa = self.spec.one_agent.as_ref()?;
        if oa.classic_full_stack.is_some() {
            Some(OneAgentMode::ClassicFullStack)
        } else if oa.host_monitoring.is_some() {
            Some(OneAgentMode::HostMonitoring)
        } else if oa.cloud_native_full_stack.is_some() {
            Some(OneAgentMode::CloudNativeFullStack)
        } else if oa.application_monitoring.is_some() {
            Some(OneAgentMode::ApplicationMonitoring)
        } else {
            None
        }
    }

    /// `true` if a host agent workload is wanted.
    #[must_use]
    pub fn host_mode_enabled(&self) -> bool {
        self.one_agent_mode().is_some_and(OneAgentMode::is_host_mode)
    }

    /// Settings of the configured host mode.
    #[must_use]
    pub fn host_inject_spec(&self) -> Option<&HostInjectSpec> {
        let oa = self.spec.one_agent.as_ref()?;
        oa.classic_full_stack
            .as_ref()
            .or(oa.host_monitoring.as_ref())
            .or(oa.cloud_native_full_stack.as_ref())
    }

    /// `true` if code modules are injected into application pods.
    #[must_use]
    pub fn code_modules_enabled(&self) -> bool {
        matches!(
            self.one_agent_mode(),
            Some(OneAgentMode::CloudNativeFullStack | OneAgentMode::ApplicationMonitoring)
        )
    }

    /// Namespace selector for code-module injection.
    #[must_use]
    pub fn code_modules_namespace_selector(&self) -> Option<&LabelSelector> {
        let oa = self.spec.one_agent.as_ref()?;
        match self.one_agent_mode()? {
            OneAgentMode::CloudNativeFullStack => oa
                .cloud_native_full_stack
                .as_ref()
                .and_then(|s| s.namespace_selector.as_ref()),
            OneAgentMode::ApplicationMonitoring => oa
                .application_monitoring
                .as_ref()
                .and_then(|s| s.namespace_selector.as_ref()),
            _ => None,
        }
    }

    /// `true` if metadata enrichment is enabled.
    #[must_use]
    pub fn metadata_enrichment_enabled(&self) -> bool {
        self.spec
            .metadata_enrichment
            .as_ref()
            .is_some_and(|m| m.enabled)
    }

    /// `true` if extensions are enabled.
    #[must_use]
    pub fn extensions_enabled(&self) -> bool {
        self.spec.extensions.as_ref().is_some_and(|e| e.enabled)
    }

    /// `true` if anything needs application namespaces to be mapped.
    #[must_use]
    pub fn injection_enabled(&self) -> bool {
        self.code_modules_enabled() || self.metadata_enrichment_enabled()
    }

    /// Inline proxy value or the name of the secret holding it.
    #[must_use]
    pub fn has_proxy(&self) -> bool {
        self.spec.proxy.as_ref().is_some_and(|p| {
            p.value.as_deref().is_some_and(|v| !v.is_empty())
                || p.value_from.as_deref().is_some_and(|v| !v.is_empty())
        })
    }

    /// Host part of the API URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationInvalid`] if the URL cannot be parsed.
    pub fn api_url_host(&self) -> Result<String> {
        let url = parse_api_url(&self.spec.api_url)?;
        url.host_str()
            .map(ToString::to_string)
            .ok_or_else(|| Error::invalid(format!("api url '{}' has no host", self.spec.api_url)))
    }

    /// Validate the parts of the spec the reconciler depends on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationInvalid`] for more than one OneAgent mode,
    /// duplicate capabilities, synthetic combined with other capabilities, or an
    /// API URL that is empty or not `http(s)`.
    pub fn validate(&self) -> Result<()> {
        parse_api_url(&self.spec.api_url)?;

        if let Some(oa) = &self.spec.one_agent {
            let modes = [
                oa.classic_full_stack.is_some(),
                oa.host_monitoring.is_some(),
                oa.cloud_native_full_stack.is_some(),
                oa.application_monitoring.is_some(),
            ];
            if modes.iter().filter(|set| **set).count() > 1 {
                return Err(Error::invalid(
                    "only one OneAgent mode can be configured at a time",
                ));
            }
        }

        validate_capabilities(self.capabilities())
    }
}

/// Check the capability list: unique entries, synthetic alone.
///
/// # Errors
///
/// Returns [`Error::ConfigurationInvalid`] naming the offending capability.
pub fn validate_capabilities(capabilities: &[CapabilityDisplayName]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for capability in capabilities {
        if !seen.insert(*capability) {
            return Err(Error::invalid(format!(
                "capability '{}' is listed more than once",
                capability.as_str()
            )));
        }
    }
    if seen.contains(&CapabilityDisplayName::Synthetic) && seen.len() > 1 {
        return Err(Error::invalid(
            "the synthetic capability cannot be combined with other capabilities",
        ));
    }
    Ok(())
}

fn parse_api_url(api_url: &str) -> Result<url::Url> {
    if api_url.trim().is_empty() {
        return Err(Error::invalid("api url must not be empty"));
    }
    let url = url::Url::parse(api_url)
        .map_err(|e| Error::invalid(format!("api url '{api_url}' is malformed: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::invalid(format!(
            "api url '{api_url}' must use http or https"
        )));
    }
    Ok(url)
}
