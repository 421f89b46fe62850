// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the `DynaKube` controller.
//!
//! The controller hands every reconciliation an `Arc<Context>` that contains:
//! - the Kubernetes adapter ([`KubeClient`])
//! - the factory building Dynatrace API clients per `DynaKube`
//! - the startup configuration and the metrics registry
//! - the process-wide cancellation token
//! - the [`Clock`] a pass freezes its wall-clock time from
//! - the in-memory [`InstanceProbes`] bookkeeping

use crate::config::OperatorConfig;
use crate::dtclient::DynatraceClientFactory;
use crate::kubeclient::KubeClient;
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Source of wall-clock time.
///
/// A reconciliation pass reads the clock once and works with that instant, so every
/// throttling and freshness decision inside the pass is consistent. Tests pin the
/// clock with [`Clock::fixed`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Clock {
    fixed: Option<DateTime<Utc>>,
}

impl Clock {
    /// Clock following the system time.
    #[must_use]
    pub fn system() -> Self {
        Self { fixed: None }
    }

    /// Clock that always returns `at`.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self { fixed: Some(at) }
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.fixed.unwrap_or_else(Utc::now)
    }
}

/// Last time the OneAgent pods of each `DynaKube` were listed.
///
/// Kept out of the status so an unchanged pod set does not produce a status write.
/// Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct InstanceProbes {
    probes: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl InstanceProbes {
    /// Time of the last list for `key`, if any.
    pub async fn last(&self, key: &str) -> Option<DateTime<Utc>> {
        self.probes.read().await.get(key).copied()
    }

    /// Remember that the pods of `key` were listed at `at`.
    pub async fn record(&self, key: &str, at: DateTime<Utc>) {
        self.probes.write().await.insert(key.to_string(), at);
    }

    /// Drop the entry of `key`.
    pub async fn forget(&self, key: &str) {
        self.probes.write().await.remove(key);
    }
}

/// Shared context passed to the controller.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes adapter
    pub kube: Arc<dyn KubeClient>,

    /// Builds a Dynatrace API client for the `DynaKube` being reconciled
    pub dynatrace: Arc<dyn DynatraceClientFactory>,

    /// Startup configuration
    pub config: OperatorConfig,

    /// Metrics registry for observability
    pub metrics: Metrics,

    /// Fires on shutdown; every outbound call races it
    pub cancel: CancellationToken,

    /// Wall clock
    pub clock: Clock,

    /// When the OneAgent pods were last listed, per `DynaKube`
    pub instance_probes: InstanceProbes,
}

impl Context {
    /// Build a context using the system clock.
    #[must_use]
    pub fn new(
        kube: Arc<dyn KubeClient>,
        dynatrace: Arc<dyn DynatraceClientFactory>,
        config: OperatorConfig,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kube,
            dynatrace,
            config,
            metrics,
            cancel,
            clock: Clock::system(),
            instance_probes: InstanceProbes::default(),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
