// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and operator-specific labels/annotations
//! to ensure consistency across all resources created by the controller.

use std::collections::BTreeMap;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture (e.g., "activegate", "oneagent")
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard label for the current version of the application
pub const K8S_VERSION: &str = "app.kubernetes.io/version";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/name` on every workload created by the operator
pub const APP_NAME: &str = "dynatrace-operator";

/// Value for `app.kubernetes.io/managed-by`
pub const MANAGED_BY_OPERATOR: &str = "dynatrace-operator";

/// Component value for ActiveGate workloads
pub const COMPONENT_ACTIVEGATE: &str = "activegate";

/// Component value for OneAgent workloads
pub const COMPONENT_ONEAGENT: &str = "oneagent";

/// Component value for secrets written into mapped namespaces
pub const COMPONENT_INJECTION: &str = "injection";

// ============================================================================
// Operator-Specific Labels and Annotations
// ============================================================================

/// Label set on application namespaces that are mapped to a `DynaKube`
pub const NAMESPACE_INSTANCE_LABEL: &str = "dynakube.internal.dynatrace.com/instance";

/// Annotation holding the structural hash of the desired object
pub const ANNOTATION_HASH: &str = "internal.operator.dynatrace.com/hash";

/// Annotation on ActiveGate pods with the hash of the mounted auth token and properties
pub const ANNOTATION_ACTIVEGATE_CONFIG_HASH: &str =
    "internal.operator.dynatrace.com/activegate-configuration-hash";

/// Label on ActiveGate workloads naming the capability set they serve
pub const ACTIVEGATE_CAPABILITY_LABEL: &str = "activegate.dynatrace.com/capability";

/// Namespaces whose name starts with one of these prefixes are never mapped
pub const SYSTEM_NAMESPACE_PREFIXES: &[&str] = &["kube-", "openshift"];

/// Build the labels shared by every object of a component.
///
/// The result is also used as the pod selector, so it must not contain
/// values that change between operator versions.
#[must_use]
pub fn build_app_labels(dynakube_name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_NAME.to_string(), APP_NAME.to_string());
    labels.insert(K8S_COMPONENT.to_string(), component.to_string());
    labels.insert(K8S_INSTANCE.to_string(), dynakube_name.to_string());
    labels.insert(K8S_MANAGED_BY.to_string(), MANAGED_BY_OPERATOR.to_string());
    labels
}

/// Render a label map as a Kubernetes label selector string (`k1=v1,k2=v2`).
#[must_use]
pub fn to_selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
