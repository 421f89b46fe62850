// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the DynaKube operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// API Constants
// ============================================================================

/// API group of the `DynaKube` CRD
pub const API_GROUP: &str = "dynatrace.com";

/// API version of the `DynaKube` CRD
pub const API_VERSION: &str = "v1beta5";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "dynatrace.com/v1beta5";

/// Kind name for `DynaKube` resource
pub const KIND_DYNAKUBE: &str = "DynaKube";

/// Field manager used for all writes issued by the operator
pub const FIELD_MANAGER: &str = "dynakube-operator";

/// Version of this operator, reported in deployment metadata
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Requeue Intervals
// ============================================================================

/// Requeue after an error or while waiting for something to become ready (1 minute)
pub const FAST_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Requeue after the status of a `DynaKube` changed (5 minutes)
pub const CHANGES_UPDATE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Requeue when nothing happened (30 minutes)
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Requeue used by the controller error policy for unclassified failures
pub const ERROR_POLICY_REQUEUE: Duration = FAST_UPDATE_INTERVAL;

// ============================================================================
// Thresholds
// ============================================================================

/// Default minimum time between two calls to the same Dynatrace API endpoint (minutes)
pub const DEFAULT_API_REQUEST_THRESHOLD_MINUTES: i64 = 15;

/// Default interval between OneAgent instance status refreshes (minutes)
pub const DEFAULT_ONEAGENT_INSTANCE_UPDATE_MINUTES: u64 = 5;

/// Age after which the ActiveGate auth token is regenerated (days)
pub const ACTIVEGATE_AUTH_TOKEN_ROTATION_DAYS: i64 = 30;

// ============================================================================
// Environment Variables
// ============================================================================

/// Namespace the operator runs in
pub const ENV_POD_NAMESPACE: &str = "POD_NAMESPACE";

/// Minutes between OneAgent instance status refreshes
pub const ENV_ONEAGENT_UPDATE_INTERVAL: &str = "ONEAGENT_OPERATOR_UPDATE_INTERVAL";

// ============================================================================
// Credentials
// ============================================================================

/// Secret key holding the API token
pub const TOKEN_KEY_API: &str = "apiToken";

/// Secret key holding the optional PaaS token
pub const TOKEN_KEY_PAAS: &str = "paasToken";

/// Secret key holding the optional data-ingest token
pub const TOKEN_KEY_DATA_INGEST: &str = "dataIngestToken";

// ============================================================================
// Object Name Suffixes
// ============================================================================

/// Short name shared by the multi-capability ActiveGate workload and its service
pub const ACTIVEGATE_NAME: &str = "activegate";

/// Short name of the synthetic ActiveGate workload
pub const SYNTHETIC_NAME: &str = "synthetic";

/// Suffix of the OneAgent daemon workload
pub const ONEAGENT_NAME: &str = "oneagent";

/// Suffix of the pre-rename OneAgent daemon workload
pub const LEGACY_ONEAGENT_NAME: &str = "classic";

/// Suffix of the ActiveGate auth-token secret
pub const ACTIVEGATE_AUTH_TOKEN_SECRET_SUFFIX: &str = "activegate-authtoken-secret";

/// Key inside the ActiveGate auth-token secret
pub const ACTIVEGATE_AUTH_TOKEN_KEY: &str = "auth-token";

/// Suffix of the ActiveGate connection-info config map
pub const ACTIVEGATE_CONNECTION_INFO_SUFFIX: &str = "activegate-connection-info";

/// Suffix of the ActiveGate tenant secret
pub const ACTIVEGATE_TENANT_SECRET_SUFFIX: &str = "activegate-tenant-secret";

/// Suffix of the ActiveGate custom-properties secret
pub const ACTIVEGATE_CUSTOM_PROPERTIES_SUFFIX: &str = "activegate-custom-properties";

/// Key inside the custom-properties secret
pub const CUSTOM_PROPERTIES_KEY: &str = "customProperties";

/// Suffix of the OneAgent connection-info config map
pub const ONEAGENT_CONNECTION_INFO_SUFFIX: &str = "oneagent-connection-info";

/// Suffix of the OneAgent tenant secret
pub const ONEAGENT_TENANT_SECRET_SUFFIX: &str = "oneagent-tenant-secret";

/// Key for the tenant UUID in connection-info config maps
pub const TENANT_UUID_KEY: &str = "tenant-uuid";

/// Key for the comma separated endpoints in connection-info config maps
pub const COMMUNICATION_ENDPOINTS_KEY: &str = "communication-endpoints";

/// Key for the tenant token in tenant secrets
pub const TENANT_TOKEN_KEY: &str = "tenant-token";

/// Suffix of the deployment-metadata config map
pub const DEPLOYMENT_METADATA_SUFFIX: &str = "deployment-metadata";

/// Suffix of the generated image pull secret
pub const PULL_SECRET_SUFFIX: &str = "pull-secret";

/// Key of the docker config inside a pull secret
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Suffix of the proxy secret
pub const PROXY_SECRET_SUFFIX: &str = "internal-proxy";

/// Key inside the proxy secret
pub const PROXY_KEY: &str = "proxy";

/// Suffix of the extensions token secret
pub const EXTENSIONS_TOKEN_SUFFIX: &str = "extensions-token";

/// Key inside the extensions token secret
pub const EXTENSIONS_TOKEN_KEY: &str = "eec.token";

/// Name of the injection config secret created in every mapped namespace
pub const INJECTION_CONFIG_SECRET_NAME: &str = "dynatrace-dynakube-config";

/// Key of the injection config secret
pub const INJECTION_CONFIG_KEY: &str = "config";

/// Name of the data-ingest endpoint secret created in every mapped namespace
pub const INGEST_ENDPOINT_SECRET_NAME: &str = "dynatrace-data-ingest-endpoint";

/// Key of the data-ingest endpoint secret
pub const INGEST_ENDPOINT_KEY: &str = "endpoint.properties";

// ============================================================================
// ActiveGate Workload
// ============================================================================

/// Default number of ActiveGate replicas
pub const DEFAULT_ACTIVEGATE_REPLICAS: i32 = 1;

/// HTTPS port exposed by the ActiveGate service
pub const ACTIVEGATE_HTTPS_PORT: i32 = 443;

/// HTTP port exposed by the ActiveGate service
pub const ACTIVEGATE_HTTP_PORT: i32 = 80;

/// Container port the ActiveGate listens on for HTTPS
pub const ACTIVEGATE_HTTPS_TARGET_PORT: i32 = 9999;

/// Container port the ActiveGate listens on for HTTP
pub const ACTIVEGATE_HTTP_TARGET_PORT: i32 = 9998;

// ============================================================================
// Istio
// ============================================================================

/// API group of the Istio networking resources
pub const ISTIO_GROUP: &str = "networking.istio.io";

/// API version of the Istio networking resources
pub const ISTIO_VERSION: &str = "v1beta1";

/// Fully qualified Istio networking group version
pub const ISTIO_GROUP_VERSION: &str = "networking.istio.io/v1beta1";

/// Placeholder host used by IP based service entries
pub const ISTIO_IGNORED_SUBDOMAIN: &str = "ignored.subdomain";

// ============================================================================
// Dynatrace API
// ============================================================================

/// Operating system used when asking for agent versions
pub const OS_UNIX: &str = "unix";

/// Installer flavour for the host agent
pub const INSTALLER_TYPE_DEFAULT: &str = "default";

/// Installer flavour for code modules
pub const INSTALLER_TYPE_PAAS: &str = "paas";

/// Registry serving public images when the public-registry feature flag is set
pub const PUBLIC_REGISTRY: &str = "public.ecr.aws/dynatrace";
/// Settings schema of the Kubernetes connection settings object
pub const KUBERNETES_SETTINGS_SCHEMA_ID: &str = "builtin:cloud.kubernetes";

/// Settings schema of the Kubernetes app opt-in
pub const APP_TRANSITION_SCHEMA_ID: &str = "builtin:app-transition.kubernetes";
