// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Feature flags read from `DynaKube` annotations.
//!
//! All flags live under the `feature.dynatrace.com/` prefix. Unparseable values fall
//! back to the default of the flag.

use crate::constants::DEFAULT_API_REQUEST_THRESHOLD_MINUTES;
use crate::crd::DynaKube;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::warn;

/// Prefix of every feature flag annotation
pub const FEATURE_FLAG_PREFIX: &str = "feature.dynatrace.com/";

/// Toggle automatic Kubernetes API monitoring (default `true`)
pub const FF_AUTOMATIC_K8S_API_MONITORING: &str =
    "feature.dynatrace.com/automatic-kubernetes-api-monitoring";

/// Cluster name used for automatic Kubernetes API monitoring (default: `DynaKube` name)
pub const FF_AUTOMATIC_K8S_API_MONITORING_CLUSTER_NAME: &str =
    "feature.dynatrace.com/automatic-kubernetes-api-monitoring-cluster-name";

/// Opt into the Kubernetes app (default `false`)
pub const FF_K8S_APP_ENABLED: &str = "feature.dynatrace.com/k8s-app-enabled";

/// Resolve images from the public registry (default `false`)
pub const FF_PUBLIC_REGISTRY: &str = "feature.dynatrace.com/public-registry";

/// Minimum minutes between two calls to the same Dynatrace endpoint (default 15)
pub const FF_API_REQUEST_THRESHOLD: &str = "feature.dynatrace.com/api-request-threshold";

/// Map namespaces for injection automatically (default `true`)
pub const FF_AUTOMATIC_INJECTION: &str = "feature.dynatrace.com/automatic-injection";

/// Typed view over the feature flag annotations of a `DynaKube`.
#[derive(Debug, Clone, Copy)]
pub struct FeatureFlags<'a> {
    dynakube_name: &'a str,
    annotations: &'a BTreeMap<String, String>,
}

impl<'a> FeatureFlags<'a> {
    /// Build the view for a `DynaKube`.
    #[must_use]
    pub fn new(dk: &'a DynaKube) -> Self {
        Self {
            dynakube_name: dk.metadata.name.as_deref().unwrap_or_default(),
            annotations: dk.annotations(),
        }
    }

    fn bool_flag(&self, key: &str, default: bool) -> bool {
        match self.annotations.get(key).map(|v| v.trim().to_lowercase()) {
            None => default,
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            Some(v) => {
                warn!(flag = key, value = %v, "Ignoring invalid boolean feature flag");
                default
            }
        }
    }

    /// Automatic Kubernetes API monitoring.
    #[must_use]
    pub fn automatic_kubernetes_api_monitoring(&self) -> bool {
        self.bool_flag(FF_AUTOMATIC_K8S_API_MONITORING, true)
    }

    /// Cluster label for automatic Kubernetes API monitoring.
    #[must_use]
    pub fn automatic_kubernetes_api_monitoring_cluster_name(&self) -> String {
        self.annotations
            .get(FF_AUTOMATIC_K8S_API_MONITORING_CLUSTER_NAME)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| self.dynakube_name.to_string())
    }

    /// Kubernetes app opt-in.
    #[must_use]
    pub fn k8s_app_enabled(&self) -> bool {
        self.bool_flag(FF_K8S_APP_ENABLED, false)
    }

    /// Public registry image resolution.
    #[must_use]
    pub fn public_registry(&self) -> bool {
        self.bool_flag(FF_PUBLIC_REGISTRY, false)
    }

    /// Automatic namespace mapping for injection.
    #[must_use]
    pub fn automatic_injection(&self) -> bool {
        self.bool_flag(FF_AUTOMATIC_INJECTION, true)
    }

    /// API request threshold as a duration. Negative or invalid values use the default.
    #[must_use]
    pub fn api_request_threshold(&self) -> chrono::Duration {
        let minutes = self
            .annotations
            .get(FF_API_REQUEST_THRESHOLD)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|m| *m >= 0)
            .unwrap_or(DEFAULT_API_REQUEST_THRESHOLD_MINUTES);
        chrono::Duration::minutes(minutes)
    }
}
