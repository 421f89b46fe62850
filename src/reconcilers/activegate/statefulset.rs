// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Builders for the ActiveGate StatefulSets and service.

use super::capability::{capabilities_argument, Unit};
use crate::constants::{
    ACTIVEGATE_AUTH_TOKEN_SECRET_SUFFIX, ACTIVEGATE_CUSTOM_PROPERTIES_SUFFIX, ACTIVEGATE_HTTPS_PORT,
    ACTIVEGATE_HTTPS_TARGET_PORT, ACTIVEGATE_HTTP_PORT, ACTIVEGATE_HTTP_TARGET_PORT,
    ACTIVEGATE_TENANT_SECRET_SUFFIX, CUSTOM_PROPERTIES_KEY,
    DEFAULT_ACTIVEGATE_REPLICAS, DEPLOYMENT_METADATA_SUFFIX,
};
use crate::crd::{ActiveGateSpec, DynaKube};
use crate::labels::{
    build_app_labels, ACTIVEGATE_CAPABILITY_LABEL, ANNOTATION_ACTIVEGATE_CONFIG_HASH,
    COMPONENT_ACTIVEGATE,
};
use crate::reconcilers::deploymentmetadata::ACTIVEGATE_KEY;
use crate::reconcilers::pullsecret::pull_secret_name;
use crate::reconcilers::resources::object_meta;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, Container, ContainerPort, EnvVar, EnvVarSource, LocalObjectReference,
    PodSpec, PodTemplateSpec, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;

/// Name of the ActiveGate container
pub const CONTAINER_NAME: &str = "activegate";

const HTTPS_PORT_NAME: &str = "https";
const HTTP_PORT_NAME: &str = "http";

const ENV_CAPABILITIES: &str = "DT_CAPABILITIES";
const ENV_ID_SEED_NAMESPACE: &str = "DT_ID_SEED_NAMESPACE";
const ENV_ID_SEED_CLUSTER_ID: &str = "DT_ID_SEED_K8S_CLUSTER_ID";
const ENV_DEPLOYMENT_METADATA: &str = "DT_DEPLOYMENT_METADATA";
const ENV_NETWORK_ZONE: &str = "DT_NETWORK_ZONE";
const ENV_GROUP: &str = "DT_GROUP";

const AUTH_TOKEN_VOLUME: &str = "ag-authtoken";
const AUTH_TOKEN_MOUNT: &str = "/var/lib/dynatrace/secrets/ag-authtoken";
const TENANT_SECRET_VOLUME: &str = "ag-tenant-secret";
const TENANT_SECRET_MOUNT: &str = "/var/lib/dynatrace/secrets/tokens";
const CUSTOM_PROPERTIES_VOLUME: &str = "custom-properties";
const CUSTOM_PROPERTIES_MOUNT: &str = "/var/lib/dynatrace/gateway/config_template/custom.properties";
const TLS_VOLUME: &str = "server-certs";
const TLS_MOUNT: &str = "/var/lib/dynatrace/gateway/ssl";

/// Labels selecting the pods of a unit.
#[must_use]
pub fn selector_labels(dk: &DynaKube, unit: Unit) -> BTreeMap<String, String> {
    let mut labels = build_app_labels(&dk.name_any(), COMPONENT_ACTIVEGATE);
    labels.insert(
        ACTIVEGATE_CAPABILITY_LABEL.to_string(),
        unit.short_name().to_string(),
    );
    labels
}

/// Secret holding the custom properties of `dk`, if any are configured.
#[must_use]
pub fn custom_properties_secret_name(dk: &DynaKube) -> Option<String> {
    let properties = dk.spec.active_gate.as_ref()?.custom_properties.as_ref()?;
    if let Some(name) = properties.value_from.as_deref().filter(|n| !n.is_empty()) {
        return Some(name.to_string());
    }
    properties
        .value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|_| dk.name_with_suffix(ACTIVEGATE_CUSTOM_PROPERTIES_SUFFIX))
}

fn env(dk: &DynaKube, unit: Unit, ag: &ActiveGateSpec) -> Vec<EnvVar> {
    let value = |name: &str, value: String| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    };
    let kube_system_uuid = dk
        .status
        .as_ref()
        .and_then(|s| s.kube_system_uuid.clone())
        .unwrap_or_default();

    let mut env = vec![
        value(ENV_CAPABILITIES, capabilities_argument(&unit.capabilities(dk))),
        value(ENV_ID_SEED_NAMESPACE, dk.namespace().unwrap_or_default()),
        value(ENV_ID_SEED_CLUSTER_ID, kube_system_uuid),
        EnvVar {
            name: ENV_DEPLOYMENT_METADATA.to_string(),
            value_from: Some(EnvVarSource {
                config_map_key_ref: Some(ConfigMapKeySelector {
                    name: dk.name_with_suffix(DEPLOYMENT_METADATA_SUFFIX),
                    key: ACTIVEGATE_KEY.to_string(),
                    optional: Some(true),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if let Some(zone) = dk.spec.network_zone.as_deref().filter(|z| !z.is_empty()) {
        env.push(value(ENV_NETWORK_ZONE, zone.to_string()));
    }
    if let Some(group) = ag.group.as_deref().filter(|g| !g.is_empty()) {
        env.push(value(ENV_GROUP, group.to_string()));
    }
    env
}

fn secret_volume(name: &str, secret_name: String) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        sub_path: sub_path.map(ToString::to_string),
        read_only: Some(true),
        ..Default::default()
    }
}

fn volumes(dk: &DynaKube, ag: &ActiveGateSpec) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = vec![
        secret_volume(
            AUTH_TOKEN_VOLUME,
            dk.name_with_suffix(ACTIVEGATE_AUTH_TOKEN_SECRET_SUFFIX),
        ),
        secret_volume(
            TENANT_SECRET_VOLUME,
            dk.name_with_suffix(ACTIVEGATE_TENANT_SECRET_SUFFIX),
        ),
    ];
    let mut mounts = vec![
        mount(AUTH_TOKEN_VOLUME, AUTH_TOKEN_MOUNT, None),
        mount(TENANT_SECRET_VOLUME, TENANT_SECRET_MOUNT, None),
    ];

    if let Some(secret_name) = custom_properties_secret_name(dk) {
        volumes.push(secret_volume(CUSTOM_PROPERTIES_VOLUME, secret_name));
        mounts.push(mount(
            CUSTOM_PROPERTIES_VOLUME,
            CUSTOM_PROPERTIES_MOUNT,
            Some(CUSTOM_PROPERTIES_KEY),
        ));
    }
    if let Some(tls) = ag.tls_secret_name.as_deref().filter(|s| !s.is_empty()) {
        volumes.push(secret_volume(TLS_VOLUME, tls.to_string()));
        mounts.push(mount(TLS_VOLUME, TLS_MOUNT, None));
    }
    (volumes, mounts)
}

/// Desired StatefulSet of a unit.
///
/// `config_hash` lands on the pod template so pods roll when the auth token or the
/// custom properties change.
#[must_use]
pub fn build_statefulset(dk: &DynaKube, unit: Unit, image: &str, config_hash: &str) -> StatefulSet {
    let ag = dk.spec.active_gate.clone().unwrap_or_default();
    let labels = selector_labels(dk, unit);
    let replicas = ag.replicas.unwrap_or(DEFAULT_ACTIVEGATE_REPLICAS);
    debug!(name = %unit.object_name(dk), replicas, image, "Building ActiveGate StatefulSet");

    let (volumes, volume_mounts) = volumes(dk, &ag);
    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        env: Some(env(dk, unit, &ag)),
        ports: Some(vec![
            ContainerPort {
                name: Some(HTTPS_PORT_NAME.to_string()),
                container_port: ACTIVEGATE_HTTPS_TARGET_PORT,
                ..Default::default()
            },
            ContainerPort {
                name: Some(HTTP_PORT_NAME.to_string()),
                container_port: ACTIVEGATE_HTTP_TARGET_PORT,
                ..Default::default()
            },
        ]),
        volume_mounts: Some(volume_mounts),
        resources: ag.resources.clone(),
        ..Default::default()
    };

    StatefulSet {
        metadata: object_meta(dk, &unit.object_name(dk), labels.clone()),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: Some(unit.object_name(dk)),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([(
                        ANNOTATION_ACTIVEGATE_CONFIG_HASH.to_string(),
                        config_hash.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    image_pull_secrets: Some(vec![LocalObjectReference {
                        name: pull_secret_name(dk),
                    }]),
                    tolerations: ag.tolerations.clone(),
                    node_selector: ag.node_selector.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Desired service in front of `unit`, exposing the ports its capabilities need.
#[must_use]
pub fn build_service(dk: &DynaKube, unit: Unit) -> Service {
    let labels = selector_labels(dk, unit);
    let port = |name: &str, port: i32, target: i32| ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    };
    let mut ports = Vec::new();
    if unit.service_ports(dk).webserver {
        ports.push(port(HTTPS_PORT_NAME, ACTIVEGATE_HTTPS_PORT, ACTIVEGATE_HTTPS_TARGET_PORT));
        ports.push(port(HTTP_PORT_NAME, ACTIVEGATE_HTTP_PORT, ACTIVEGATE_HTTP_TARGET_PORT));
    }
    Service {
        metadata: object_meta(dk, &unit.object_name(dk), labels.clone()),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `true` if the selector of `current` differs from the desired one.
///
/// The selector of a StatefulSet is immutable, so such a set must be recreated.
#[must_use]
pub fn selector_changed(current: &StatefulSet, desired: &StatefulSet) -> bool {
    let selector = |sts: &StatefulSet| sts.spec.as_ref().map(|s| s.selector.clone());
    selector(current) != selector(desired)
}

#[cfg(test)]
#[path = "statefulset_tests.rs"]
mod statefulset_tests;
