// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Mapping of capability display names onto ActiveGate workloads.
//!
//! Every capability knows its short name, the argument the ActiveGate expects in
//! `DT_CAPABILITIES` and the service ports it needs. Every non-synthetic
//! capability runs in one shared workload `{dk}-activegate`; the synthetic
//! capability runs alone in `{dk}-synthetic`. A workload gets a service only when
//! one of its capabilities exposes a port.

use crate::constants::{ACTIVEGATE_NAME, SYNTHETIC_NAME};
use crate::crd::{CapabilityDisplayName, DynaKube};
use crate::reconcilers::version::Component;

/// Ports a capability exposes through the ActiveGate service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServicePorts {
    /// HTTPS and HTTP webserver ports
    pub webserver: bool,
}

impl ServicePorts {
    /// `true` if any port is exposed.
    #[must_use]
    pub fn has_ports(self) -> bool {
        self.webserver
    }

    /// Ports exposed by either side.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            webserver: self.webserver || other.webserver,
        }
    }
}

/// Static attributes of one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    /// Display name as written in the `DynaKube`
    pub display_name: CapabilityDisplayName,
    /// Short name used in logs and conditions
    pub short_name: &'static str,
    /// Value the ActiveGate expects in `DT_CAPABILITIES`
    pub argument_name: &'static str,
    /// Ports the capability needs on the service
    pub service_ports: ServicePorts,
}

impl Capability {
    /// Attributes of `display_name`.
    #[must_use]
    pub fn of(display_name: CapabilityDisplayName) -> Self {
        let webserver = ServicePorts { webserver: true };
        let (short_name, argument_name, service_ports) = match display_name {
            CapabilityDisplayName::Routing => ("routing", "MSGrouter", webserver),
            CapabilityDisplayName::KubernetesMonitoring => {
                ("kubemon", "kubernetes_monitoring", webserver)
            }
            CapabilityDisplayName::MetricsIngest => ("metrics-ingest", "metrics_ingest", webserver),
            CapabilityDisplayName::DynatraceApi => ("dynatrace-api", "restInterface", webserver),
            CapabilityDisplayName::Synthetic => (
                "synthetic",
                "synthetic,beacon_forwarder,beacon_forwarder_synthetic",
                ServicePorts::default(),
            ),
        };
        Self {
            display_name,
            short_name,
            argument_name,
            service_ports,
        }
    }

    /// `true` if the capability needs a service.
    #[must_use]
    pub fn should_create_service(self) -> bool {
        self.service_ports.has_ports()
    }
}

/// A StatefulSet the ActiveGate reconciler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Shared workload for routing, Kubernetes monitoring, metrics ingest and API
    MultiCapability,
    /// Synthetic monitoring workload
    Synthetic,
}

impl Unit {
    /// Every unit, in reconcile order.
    pub const ALL: [Self; 2] = [Self::MultiCapability, Self::Synthetic];

    /// Short name, used as object suffix and capability label value.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            Self::MultiCapability => ACTIVEGATE_NAME,
            Self::Synthetic => SYNTHETIC_NAME,
        }
    }

    /// `{dk}-{short name}`, shared by the StatefulSet and its service.
    #[must_use]
    pub fn object_name(self, dk: &DynaKube) -> String {
        dk.name_with_suffix(self.short_name())
    }

    /// Component whose resolved image the unit runs.
    #[must_use]
    pub fn component(self) -> Component {
        match self {
            Self::MultiCapability => Component::ActiveGate,
            Self::Synthetic => Component::Synthetic,
        }
    }

    /// Capabilities of `dk` served by this unit, in declaration order.
    #[must_use]
    pub fn capabilities(self, dk: &DynaKube) -> Vec<Capability> {
        dk.capabilities()
            .iter()
            .copied()
            .filter(|c| (*c == CapabilityDisplayName::Synthetic) == (self == Self::Synthetic))
            .map(Capability::of)
            .collect()
    }

    /// `true` if `dk` enables at least one capability of this unit.
    #[must_use]
    pub fn enabled(self, dk: &DynaKube) -> bool {
        !self.capabilities(dk).is_empty()
    }

    /// Ports of all capabilities of `dk` served by this unit.
    #[must_use]
    pub fn service_ports(self, dk: &DynaKube) -> ServicePorts {
        self.capabilities(dk)
            .iter()
            .fold(ServicePorts::default(), |ports, c| ports.union(c.service_ports))
    }

    /// `true` if the unit needs a service for the capabilities of `dk`.
    #[must_use]
    pub fn should_create_service(self, dk: &DynaKube) -> bool {
        self.capabilities(dk).iter().any(|c| c.should_create_service())
    }
}

/// Comma separated `DT_CAPABILITIES` value of a unit.
#[must_use]
pub fn capabilities_argument(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(|c| c.argument_name)
        .collect::<Vec<_>>()
        .join(",")
}
