// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Condition types and reasons written to `DynaKube` status.
//!
//! Conditions are keyed by `type`; every area of the reconciler owns one or more
//! types and is the only writer of them. Reasons are programmatic identifiers in
//! CamelCase that explain why a condition has a particular status.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   phase: Running
//!   conditions:
//!     - type: Tokens
//!       status: "True"
//!       reason: TokenReady
//!       message: "Tokens are valid"
//!     - type: IstioServiceConfigurationForOneAgent
//!       status: "True"
//!       reason: IstioServiceConfigurationForOneAgentChanged
//!       message: "Istio service configuration for OneAgent updated"
//! ```

// ============================================================================
// Condition Status Values
// ============================================================================

/// Condition is satisfied
pub const STATUS_TRUE: &str = "True";

/// Condition is not satisfied
pub const STATUS_FALSE: &str = "False";

// ============================================================================
// Condition Types
// ============================================================================

/// Validity of the referenced tokens
pub const CONDITION_TYPE_TOKENS: &str = "Tokens";

/// State of the OneAgent daemon workload
pub const CONDITION_TYPE_ONEAGENT_DAEMONSET: &str = "OneAgentDaemonSet";

/// State of the ActiveGate stateful workload
pub const CONDITION_TYPE_ACTIVEGATE_STATEFULSET: &str = "ActiveGateStatefulSet";

/// Secrets needed for metadata enrichment in mapped namespaces
pub const CONDITION_TYPE_METADATA_ENRICHMENT: &str = "MetadataEnrichment";

/// Secrets needed for code-module injection in mapped namespaces
pub const CONDITION_TYPE_CODE_MODULES_INJECTION: &str = "CodeModulesInjection";

/// Optional `settings.read` scope on the API token
pub const CONDITION_TYPE_API_TOKEN_SETTINGS_READ: &str = "APITokenSettingsRead";

/// Optional `settings.write` scope on the API token
pub const CONDITION_TYPE_API_TOKEN_SETTINGS_WRITE: &str = "APITokenSettingsWrite";

/// Prefix of the per-component Istio condition types
pub const CONDITION_TYPE_ISTIO_PREFIX: &str = "IstioServiceConfigurationFor";

/// Suffix of the per-component version condition types (e.g. `OneAgentVersion`)
pub const CONDITION_TYPE_VERSION_SUFFIX: &str = "Version";

// ============================================================================
// Reasons
// ============================================================================

/// Tokens were read and carry all required scopes
pub const REASON_TOKEN_READY: &str = "TokenReady";

/// Tokens are missing or lack required scopes
pub const REASON_TOKEN_ERROR: &str = "TokenError";

/// Daemon workload created or updated
pub const REASON_DAEMONSET_CREATED: &str = "DaemonSetCreated";

/// Daemon workload could not be built or written
pub const REASON_DAEMONSET_GENERATION_FAILED: &str = "DaemonSetGenerationFailed";

/// Stateful workload created or updated
pub const REASON_STATEFULSET_CREATED: &str = "StatefulSetCreated";

/// Stateful workload could not be built or written
pub const REASON_STATEFULSET_GENERATION_FAILED: &str = "StatefulSetGenerationFailed";

/// Secrets were created in every mapped namespace
pub const REASON_SECRETS_CREATED: &str = "SecretsCreated";

/// Secrets could not be created in at least one mapped namespace
pub const REASON_SECRETS_GENERATION_FAILED: &str = "SecretsGenerationFailed";

/// Optional scope is present on the token
pub const REASON_SCOPE_PRESENT: &str = "ScopePresent";

/// Optional scope is missing on the token
pub const REASON_SCOPE_MISSING: &str = "ScopeMissing";

/// A resolved version would have been older than the current one
pub const REASON_VERSION_DOWNGRADE_REJECTED: &str = "VersionDowngradeRejected";

/// Suffix of the Istio reason when the mesh objects were written
pub const REASON_ISTIO_CHANGED_SUFFIX: &str = "Changed";

/// Suffix of the Istio reason when writing the mesh objects failed
pub const REASON_ISTIO_FAILED_SUFFIX: &str = "Failed";

/// Build the Istio condition type for a component display name.
///
/// ```rust
/// use dynakube_operator::status_reasons::istio_condition_type;
/// assert_eq!(istio_condition_type("OneAgent"), "IstioServiceConfigurationForOneAgent");
/// ```
#[must_use]
pub fn istio_condition_type(component: &str) -> String {
    format!("{CONDITION_TYPE_ISTIO_PREFIX}{component}")
}

/// Build the Istio reason for a component display name and outcome suffix.
#[must_use]
pub fn istio_reason(component: &str, suffix: &str) -> String {
    format!("{CONDITION_TYPE_ISTIO_PREFIX}{component}{suffix}")
}

/// Build the version condition type for a component display name.
#[must_use]
pub fn version_condition_type(component: &str) -> String {
    format!("{component}{CONDITION_TYPE_VERSION_SUFFIX}")
}
