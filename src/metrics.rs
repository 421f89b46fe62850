// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the DynaKube operator.
//!
//! All metrics carry the namespace prefix `dynakube_operator_` and live in a
//! registry owned by [`Metrics`], which the controller context shares.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - outcome and duration of every reconciliation
//! - **Requeue Metrics** - why a `DynaKube` was requeued early
//! - **Resource Metrics** - writes issued against the Kubernetes API
//!
//! # Example
//!
//! ```rust
//! use dynakube_operator::metrics::Metrics;
//!
//! let metrics = Metrics::new().unwrap();
//! metrics.record_reconciliation("success", std::time::Duration::from_millis(10));
//! assert!(metrics.gather().unwrap().contains("dynakube_operator_reconciliations_total"));
//! ```

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Namespace prefix for all metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "dynakube_operator";

/// Metrics registry and collectors of the operator.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// Total number of reconciliations by outcome
    ///
    /// Labels:
    /// - `status`: `success`, `error`, `unreachable`
    reconciliations: CounterVec,

    /// Duration of reconciliations in seconds
    reconciliation_duration: HistogramVec,

    /// Early requeues by reason
    ///
    /// Labels:
    /// - `reason`: `unreachable`, `error`, `not_ready`, `status_changed`
    requeues: CounterVec,

    /// Kubernetes writes by kind and verb
    ///
    /// Labels:
    /// - `kind`: object kind (e.g. `StatefulSet`)
    /// - `verb`: `create`, `update`, `delete`
    resource_writes: CounterVec,
}

impl Metrics {
    /// Create the collectors and register them in a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be created or registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = CounterVec::new(
            Opts::new(
                format!("{METRICS_NAMESPACE}_reconciliations_total"),
                "Total number of DynaKube reconciliations by outcome",
            ),
            &["status"],
        )?;
        let reconciliation_duration = HistogramVec::new(
            HistogramOpts::new(
                format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
                "Duration of DynaKube reconciliations in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
            &["status"],
        )?;
        let requeues = CounterVec::new(
            Opts::new(
                format!("{METRICS_NAMESPACE}_requeues_total"),
                "Early requeues of DynaKube reconciliations by reason",
            ),
            &["reason"],
        )?;
        let resource_writes = CounterVec::new(
            Opts::new(
                format!("{METRICS_NAMESPACE}_resource_writes_total"),
                "Kubernetes writes issued by the operator by kind and verb",
            ),
            &["kind", "verb"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconciliation_duration.clone()))?;
        registry.register(Box::new(requeues.clone()))?;
        registry.register(Box::new(resource_writes.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconciliation_duration,
            requeues,
            resource_writes,
        })
    }

    /// Record a finished reconciliation
    ///
    /// # Arguments
    /// * `status` - Outcome label
    /// * `duration` - Duration of the reconciliation
    pub fn record_reconciliation(&self, status: &str, duration: Duration) {
        self.reconciliations.with_label_values(&[status]).inc();
        self.reconciliation_duration
            .with_label_values(&[status])
            .observe(duration.as_secs_f64());
    }

    /// Record an early requeue
    pub fn record_requeue(&self, reason: &str) {
        self.requeues.with_label_values(&[reason]).inc();
    }

    /// Record a Kubernetes write
    pub fn record_resource_write(&self, kind: &str, verb: &str) {
        self.resource_writes.with_label_values(&[kind, verb]).inc();
    }

    /// Gather and encode all metrics in Prometheus text format
    ///
    /// # Errors
    /// Returns error if encoding fails
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reconciliation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconciliation("success", Duration::from_millis(500));
        metrics.record_reconciliation("success", Duration::from_millis(100));

        let counter = metrics.reconciliations.with_label_values(&["success"]);
        assert!((counter.get() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_gather_contains_writes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_resource_write("StatefulSet", "create");
        metrics.record_requeue("unreachable");

        let text = metrics.gather().unwrap();
        assert!(text.contains("dynakube_operator_resource_writes_total"));
        assert!(text.contains("kind=\"StatefulSet\""));
        assert!(text.contains("dynakube_operator_requeues_total"));
    }
}
