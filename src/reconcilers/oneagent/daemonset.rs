// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Builder for the OneAgent DaemonSet.

use crate::constants::{
    COMMUNICATION_ENDPOINTS_KEY, DEPLOYMENT_METADATA_SUFFIX, ONEAGENT_CONNECTION_INFO_SUFFIX,
    ONEAGENT_NAME, ONEAGENT_TENANT_SECRET_SUFFIX, TENANT_TOKEN_KEY, TENANT_UUID_KEY,
};
use crate::crd::{DynaKube, HostInjectSpec};
use crate::labels::{build_app_labels, COMPONENT_ONEAGENT};
use crate::reconcilers::deploymentmetadata::ONEAGENT_KEY;
use crate::reconcilers::pullsecret::pull_secret_name;
use crate::reconcilers::resources::object_meta;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, Container, EnvVar, EnvVarSource, HostPathVolumeSource,
    LocalObjectReference, ObjectFieldSelector, PodSpec, PodTemplateSpec, SecretKeySelector,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Name of the OneAgent container
pub const CONTAINER_NAME: &str = "dynatrace-oneagent";

const HOST_ROOT_VOLUME: &str = "host-root";
const HOST_ROOT_MOUNT: &str = "/mnt/root";
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 80;

const ENV_CLUSTER_ID: &str = "DT_K8S_CLUSTER_ID";
const ENV_NODE_NAME: &str = "DT_K8S_NODE_NAME";
const ENV_DEPLOYMENT_METADATA: &str = "DT_DEPLOYMENT_METADATA";
const ENV_TENANT: &str = "DT_TENANT";
const ENV_SERVER: &str = "DT_SERVER";
const ENV_TENANT_TOKEN: &str = "DT_TENANT_TOKEN";
const ENV_NETWORK_ZONE: &str = "DT_NETWORK_ZONE";

/// Labels selecting the OneAgent pods of `dk`.
#[must_use]
pub fn selector_labels(dk: &DynaKube) -> BTreeMap<String, String> {
    build_app_labels(&dk.name_any(), COMPONENT_ONEAGENT)
}

fn config_map_env(name: &str, config_map: String, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            config_map_key_ref: Some(ConfigMapKeySelector {
                name: config_map,
                key: key.to_string(),
                optional: Some(true),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env(dk: &DynaKube) -> Vec<EnvVar> {
    let connection_info = dk.name_with_suffix(ONEAGENT_CONNECTION_INFO_SUFFIX);
    let mut env = vec![
        EnvVar {
            name: ENV_CLUSTER_ID.to_string(),
            value: Some(
                dk.status
                    .as_ref()
                    .and_then(|s| s.kube_system_uuid.clone())
                    .unwrap_or_default(),
            ),
            ..Default::default()
        },
        EnvVar {
            name: ENV_NODE_NAME.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "spec.nodeName".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        config_map_env(
            ENV_DEPLOYMENT_METADATA,
            dk.name_with_suffix(DEPLOYMENT_METADATA_SUFFIX),
            ONEAGENT_KEY,
        ),
        config_map_env(ENV_TENANT, connection_info.clone(), TENANT_UUID_KEY),
        config_map_env(ENV_SERVER, connection_info, COMMUNICATION_ENDPOINTS_KEY),
        EnvVar {
            name: ENV_TENANT_TOKEN.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: dk.name_with_suffix(ONEAGENT_TENANT_SECRET_SUFFIX),
                    key: TENANT_TOKEN_KEY.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if let Some(zone) = dk.spec.network_zone.as_deref().filter(|z| !z.is_empty()) {
        env.push(EnvVar {
            name: ENV_NETWORK_ZONE.to_string(),
            value: Some(zone.to_string()),
            ..Default::default()
        });
    }
    env
}

/// Desired DaemonSet `{dk}-oneagent` running `image` on every matching node.
#[must_use]
pub fn build_daemonset(dk: &DynaKube, image: &str) -> DaemonSet {
    let host = dk.host_inject_spec().cloned().unwrap_or_default();
    let labels = selector_labels(dk);
    let HostInjectSpec {
        args,
        tolerations,
        node_selector,
        oneagent_resources,
        ..
    } = host;

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        args: (!args.is_empty()).then_some(args),
        env: Some(env(dk)),
        volume_mounts: Some(vec![VolumeMount {
            name: HOST_ROOT_VOLUME.to_string(),
            mount_path: HOST_ROOT_MOUNT.to_string(),
            ..Default::default()
        }]),
        resources: oneagent_resources,
        ..Default::default()
    };

    DaemonSet {
        metadata: object_meta(dk, &dk.name_with_suffix(ONEAGENT_NAME), labels.clone()),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    host_network: Some(true),
                    host_pid: Some(true),
                    dns_policy: Some("ClusterFirstWithHostNet".to_string()),
                    termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
                    volumes: Some(vec![Volume {
                        name: HOST_ROOT_VOLUME.to_string(),
                        host_path: Some(HostPathVolumeSource {
                            path: "/".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    image_pull_secrets: Some(vec![LocalObjectReference {
                        name: pull_secret_name(dk),
                    }]),
                    tolerations,
                    node_selector,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `true` if the selector of `current` differs from the desired one.
#[must_use]
pub fn selector_changed(current: &DaemonSet, desired: &DaemonSet) -> bool {
    let selector = |ds: &DaemonSet| ds.spec.as_ref().map(|s| s.selector.clone());
    selector(current) != selector(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DynaKubeStatus, OneAgentSpec};
    use crate::testing::{dynakube, minimal_spec};

    fn classic(args: Vec<String>) -> DynaKube {
        let mut spec = minimal_spec();
        spec.network_zone = Some("zone-a".into());
        spec.one_agent = Some(OneAgentSpec {
            classic_full_stack: Some(HostInjectSpec {
                args,
                node_selector: Some(BTreeMap::from([("os".to_string(), "linux".to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        });
        let mut dk = dynakube("d", "x", spec);
        dk.status = Some(DynaKubeStatus {
            kube_system_uuid: Some("U".into()),
            ..Default::default()
        });
        dk
    }

    #[test]
    fn test_daemonset_runs_on_host_namespaces() {
        let ds = build_daemonset(&classic(vec!["--set-host-group=g".into()]), "img:1");
        assert_eq!(ds.metadata.name.as_deref(), Some("x-oneagent"));
        assert_eq!(ds.metadata.owner_references.as_ref().map(Vec::len), Some(1));

        let pod = ds.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.host_network, Some(true));
        assert_eq!(pod.host_pid, Some(true));
        assert_eq!(pod.dns_policy.as_deref(), Some("ClusterFirstWithHostNet"));
        assert_eq!(pod.node_selector.unwrap()["os"], "linux");
        assert_eq!(pod.image_pull_secrets.unwrap()[0].name, "x-pull-secret");

        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("img:1"));
        assert_eq!(container.args.as_deref(), Some(&["--set-host-group=g".to_string()][..]));
        let env = container.env.clone().unwrap();
        let value = |name: &str| env.iter().find(|e| e.name == name).and_then(|e| e.value.clone());
        assert_eq!(value(ENV_CLUSTER_ID).as_deref(), Some("U"));
        assert_eq!(value(ENV_NETWORK_ZONE).as_deref(), Some("zone-a"));
        let metadata = env.iter().find(|e| e.name == ENV_DEPLOYMENT_METADATA).unwrap();
        let reference = metadata.value_from.clone().unwrap().config_map_key_ref.unwrap();
        assert_eq!(reference.name, "x-deployment-metadata");
        assert_eq!(reference.key, ONEAGENT_KEY);
    }

    #[test]
    fn test_empty_args_are_omitted() {
        let ds = build_daemonset(&classic(Vec::new()), "img:1");
        let pod = ds.spec.unwrap().template.spec.unwrap();
        assert!(pod.containers[0].args.is_none());
    }

    #[test]
    fn test_selector_change_detection() {
        let dk = classic(Vec::new());
        let desired = build_daemonset(&dk, "img:1");
        let mut current = desired.clone();
        assert!(!selector_changed(&current, &desired));
        if let Some(spec) = current.spec.as_mut() {
            spec.selector.match_labels = Some(BTreeMap::from([("app".to_string(), "old".to_string())]));
        }
        assert!(selector_changed(&current, &desired));
    }
}
