// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator configuration.
//!
//! Configuration is read once at startup from command line flags, each of which can
//! also be set through the environment. There is no other process-wide mutable state.

use crate::constants::{
    DEFAULT_ONEAGENT_INSTANCE_UPDATE_MINUTES, ENV_ONEAGENT_UPDATE_INTERVAL, ENV_POD_NAMESPACE,
};
use clap::Parser;
use std::time::Duration;
use tracing::warn;

/// Startup configuration of the operator.
#[derive(Debug, Clone, Parser)]
#[command(name = "dynakube-operator", version, about = "Reconciles Dynatrace DynaKube resources")]
pub struct OperatorConfig {
    /// Namespace the operator runs in
    #[arg(long, env = ENV_POD_NAMESPACE, default_value = "dynatrace")]
    pub pod_namespace: String,

    /// Namespace to watch for `DynaKube` resources (defaults to the pod namespace)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Minutes between OneAgent instance status refreshes
    #[arg(long = "oneagent-update-interval", env = ENV_ONEAGENT_UPDATE_INTERVAL)]
    pub oneagent_update_interval_minutes: Option<String>,

    /// Port of the metrics and health endpoints
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    #[arg(skip)]
    oneagent_update_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pod_namespace: "dynatrace".to_string(),
            watch_namespace: None,
            oneagent_update_interval_minutes: None,
            metrics_port: 8080,
            oneagent_update_interval: default_update_interval(),
        }
    }
}

impl OperatorConfig {
    /// Parse flags and environment.
    #[must_use]
    pub fn load() -> Self {
        Self::parse().resolved()
    }

    /// Finish parsing of values that are read leniently.
    #[must_use]
    pub fn resolved(mut self) -> Self {
        self.oneagent_update_interval =
            parse_update_interval(self.oneagent_update_interval_minutes.as_deref());
        self
    }

    /// Namespace the controller watches.
    #[must_use]
    pub fn watch_namespace(&self) -> &str {
        self.watch_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.pod_namespace)
    }

    /// Interval between OneAgent instance status refreshes.
    #[must_use]
    pub fn oneagent_update_interval(&self) -> Duration {
        self.oneagent_update_interval
    }

    /// Override the OneAgent instance refresh interval.
    #[must_use]
    pub fn with_oneagent_update_interval(mut self, interval: Duration) -> Self {
        self.oneagent_update_interval = interval;
        self
    }
}

fn default_update_interval() -> Duration {
    Duration::from_secs(DEFAULT_ONEAGENT_INSTANCE_UPDATE_MINUTES * 60)
}

/// Parse the OneAgent update interval in minutes. Invalid values use the default.
#[must_use]
pub fn parse_update_interval(raw: Option<&str>) -> Duration {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return default_update_interval();
    };
    match raw.parse::<u64>() {
        Ok(minutes) => match minutes.checked_mul(60) {
            Some(secs) => Duration::from_secs(secs),
            None => {
                warn!(
                    value = raw,
                    "{ENV_ONEAGENT_UPDATE_INTERVAL} is too large, using default of {DEFAULT_ONEAGENT_INSTANCE_UPDATE_MINUTES} minutes"
                );
                default_update_interval()
            }
        },
        Err(e) => {
            warn!(
                value = raw,
                error = %e,
                "Invalid {ENV_ONEAGENT_UPDATE_INTERVAL}, using default of {DEFAULT_ONEAGENT_INSTANCE_UPDATE_MINUTES} minutes"
            );
            default_update_interval()
        }
    }
}
