// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Builders for Istio `ServiceEntry` and `VirtualService` objects.
//!
//! Istio has no Rust types in this crate, so the objects are built as
//! [`DynamicObject`]s. Inputs are expected in canonical order (see
//! [`crate::dtclient::communication_host::parse_list`]); the builders keep that
//! order so the same hosts always produce the same object and hash.

use crate::constants::{ISTIO_GROUP, ISTIO_IGNORED_SUBDOMAIN, ISTIO_VERSION};
use crate::crd::DynaKube;
use crate::dtclient::CommunicationHost;
use crate::labels::build_app_labels;
use crate::reconcilers::resources::owner_reference;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use serde_json::{json, Value};

/// Kind of the Istio service entry
pub const SERVICE_ENTRY_KIND: &str = "ServiceEntry";

/// Kind of the Istio virtual service
pub const VIRTUAL_SERVICE_KIND: &str = "VirtualService";

/// `ServiceEntry` API resource.
#[must_use]
pub fn service_entry_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(ISTIO_GROUP, ISTIO_VERSION, SERVICE_ENTRY_KIND),
        "serviceentries",
    )
}

/// `VirtualService` API resource.
#[must_use]
pub fn virtual_service_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(ISTIO_GROUP, ISTIO_VERSION, VIRTUAL_SERVICE_KIND),
        "virtualservices",
    )
}

/// `{dk}-ip-{component}`
#[must_use]
pub fn ip_entry_name(dk_name: &str, component: &str) -> String {
    format!("{dk_name}-ip-{component}")
}

/// `{dk}-fqdn-{component}`
#[must_use]
pub fn fqdn_entry_name(dk_name: &str, component: &str) -> String {
    format!("{dk_name}-fqdn-{component}")
}

/// Split hosts into IP literals and DNS names.
#[must_use]
pub fn split_hosts(hosts: &[CommunicationHost]) -> (Vec<&CommunicationHost>, Vec<&CommunicationHost>) {
    hosts.iter().partition(|h| h.is_ip())
}

fn dedup_ports<'a>(hosts: &[&'a CommunicationHost]) -> Vec<&'a CommunicationHost> {
    let mut seen = Vec::new();
    let mut unique = Vec::new();
    for host in hosts {
        if !seen.contains(&host.port) {
            seen.push(host.port);
            unique.push(*host);
        }
    }
    unique
}

fn dedup_hosts(hosts: &[&CommunicationHost]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for host in hosts {
        if !unique.contains(&host.host) {
            unique.push(host.host.clone());
        }
    }
    unique
}

fn mesh_object(dk: &DynaKube, resource: &ApiResource, name: &str, component: &str, spec: Value) -> DynamicObject {
    let mut object = DynamicObject::new(name, resource);
    object.metadata.namespace = dk.namespace();
    object.metadata.owner_references = Some(vec![owner_reference(dk)]);
    object.metadata.labels = Some(build_app_labels(&dk.name_any(), component));
    object.data = json!({ "spec": spec });
    object
}

/// Service entry for IP hosts: one host-prefix address per IP (`/32` or `/128`), TCP ports, no resolution.
#[must_use]
pub fn build_ip_service_entry(dk: &DynaKube, component: &str, hosts: &[&CommunicationHost]) -> DynamicObject {
    let mut addresses: Vec<String> = Vec::new();
    for host in hosts {
        let prefix = if host.is_ipv6() { 128 } else { 32 };
        let address = format!("{}/{prefix}", host.host);
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    let ports: Vec<Value> = dedup_ports(hosts)
        .iter()
        .map(|h| {
            json!({
                "name": format!("TCP-{}", h.port),
                "number": h.port,
                "protocol": "TCP",
            })
        })
        .collect();

    mesh_object(
        dk,
        &service_entry_resource(),
        &ip_entry_name(&dk.name_any(), component),
        component,
        json!({
            "hosts": [ISTIO_IGNORED_SUBDOMAIN],
            "addresses": addresses,
            "ports": ports,
            "location": "MESH_EXTERNAL",
            "resolution": "NONE",
        }),
    )
}

/// Service entry for DNS hosts, resolved by DNS.
#[must_use]
pub fn build_fqdn_service_entry(dk: &DynaKube, component: &str, hosts: &[&CommunicationHost]) -> DynamicObject {
    let ports: Vec<Value> = dedup_ports(hosts)
        .iter()
        .map(|h| {
            json!({
                "name": format!("{}-{}", h.protocol, h.port),
                "number": h.port,
                "protocol": h.protocol.to_uppercase(),
            })
        })
        .collect();

    mesh_object(
        dk,
        &service_entry_resource(),
        &fqdn_entry_name(&dk.name_any(), component),
        component,
        json!({
            "hosts": dedup_hosts(hosts),
            "ports": ports,
            "location": "MESH_EXTERNAL",
            "resolution": "DNS",
        }),
    )
}

/// Virtual service routing every DNS host: HTTP routes for `http`, TLS routes with
/// SNI matching for `https`.
#[must_use]
pub fn build_virtual_service(dk: &DynaKube, component: &str, hosts: &[&CommunicationHost]) -> DynamicObject {
    let destination = |h: &CommunicationHost| {
        json!([{ "destination": { "host": h.host, "port": { "number": h.port } } }])
    };

    let mut http = Vec::new();
    let mut tls = Vec::new();
    for host in hosts {
        match host.protocol.as_str() {
            "http" => http.push(json!({
                "match": [{ "port": host.port }],
                "route": destination(host),
            })),
            "https" => tls.push(json!({
                "match": [{ "port": host.port, "sniHosts": [host.host] }],
                "route": destination(host),
            })),
            _ => {}
        }
    }

    let mut spec = json!({ "hosts": dedup_hosts(hosts) });
    if !http.is_empty() {
        spec["http"] = Value::Array(http);
    }
    if !tls.is_empty() {
        spec["tls"] = Value::Array(tls);
    }

    mesh_object(
        dk,
        &virtual_service_resource(),
        &fqdn_entry_name(&dk.name_any(), component),
        component,
        spec,
    )
}
