// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for statefulset.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{CapabilityDisplayName, CustomProperties, DynaKubeStatus};
    use crate::testing::{dynakube, minimal_spec};

    fn activegate(capabilities: Vec<CapabilityDisplayName>) -> DynaKube {
        let mut spec = minimal_spec();
        spec.network_zone = Some("zone-a".into());
        spec.active_gate = Some(ActiveGateSpec {
            capabilities,
            replicas: Some(2),
            group: Some("g1".into()),
            ..Default::default()
        });
        let mut dk = dynakube("d", "x", spec);
        dk.status = Some(DynaKubeStatus {
            kube_system_uuid: Some("U".into()),
            ..Default::default()
        });
        dk
    }

    fn env_value(sts: &StatefulSet, name: &str) -> Option<String> {
        sts.spec.as_ref()?.template.spec.as_ref()?.containers[0]
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)?
            .value
            .clone()
    }

    #[test]
    fn test_build_statefulset() {
        let dk = activegate(vec![
            CapabilityDisplayName::KubernetesMonitoring,
            CapabilityDisplayName::Routing,
        ]);
        let sts = build_statefulset(&dk, Unit::MultiCapability, "t.example/linux/activegate:1.0", "h1");

        assert_eq!(sts.metadata.name.as_deref(), Some("x-activegate"));
        assert_eq!(sts.metadata.owner_references.as_ref().unwrap()[0].uid, "x-uid");
        let spec = sts.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap()[ACTIVEGATE_CAPABILITY_LABEL],
            "activegate"
        );

        let template = spec.template.metadata.as_ref().unwrap();
        assert_eq!(
            template.annotations.as_ref().unwrap()[ANNOTATION_ACTIVEGATE_CONFIG_HASH],
            "h1"
        );

        assert_eq!(
            env_value(&sts, ENV_CAPABILITIES).as_deref(),
            Some("kubernetes_monitoring,MSGrouter")
        );
        assert_eq!(env_value(&sts, ENV_ID_SEED_NAMESPACE).as_deref(), Some("d"));
        assert_eq!(env_value(&sts, ENV_ID_SEED_CLUSTER_ID).as_deref(), Some("U"));
        assert_eq!(env_value(&sts, ENV_NETWORK_ZONE).as_deref(), Some("zone-a"));
        assert_eq!(env_value(&sts, ENV_GROUP).as_deref(), Some("g1"));

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(
            pod.image_pull_secrets.as_ref().unwrap()[0].name,
            "x-pull-secret"
        );
        let volumes: Vec<_> = pod.volumes.as_ref().unwrap().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(volumes, vec![AUTH_TOKEN_VOLUME, TENANT_SECRET_VOLUME]);
    }

    #[test]
    fn test_custom_properties_and_tls_are_mounted() {
        let mut dk = activegate(vec![CapabilityDisplayName::Routing]);
        let ag = dk.spec.active_gate.as_mut().unwrap();
        ag.custom_properties = Some(CustomProperties {
            value: Some("a=b".into()),
            value_from: None,
        });
        ag.tls_secret_name = Some("tls".into());

        let sts = build_statefulset(&dk, Unit::MultiCapability, "img", "h");
        let pod = sts.spec.unwrap().template.spec.unwrap();
        let volumes = pod.volumes.unwrap();
        let properties = volumes.iter().find(|v| v.name == CUSTOM_PROPERTIES_VOLUME).unwrap();
        assert_eq!(
            properties.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("x-activegate-custom-properties")
        );
        assert!(volumes.iter().any(|v| v.name == TLS_VOLUME));
        let mounts = pod.containers[0].volume_mounts.clone().unwrap();
        let properties_mount = mounts.iter().find(|m| m.name == CUSTOM_PROPERTIES_VOLUME).unwrap();
        assert_eq!(properties_mount.sub_path.as_deref(), Some(CUSTOM_PROPERTIES_KEY));
    }

    #[test]
    fn test_custom_properties_from_existing_secret() {
        let mut dk = activegate(vec![CapabilityDisplayName::Routing]);
        dk.spec.active_gate.as_mut().unwrap().custom_properties = Some(CustomProperties {
            value: None,
            value_from: Some("mine".into()),
        });
        assert_eq!(custom_properties_secret_name(&dk).as_deref(), Some("mine"));
    }

    #[test]
    fn test_build_service() {
        let dk = activegate(vec![CapabilityDisplayName::Routing]);
        let service = build_service(&dk, Unit::MultiCapability);
        assert_eq!(service.metadata.name.as_deref(), Some("x-activegate"));
        let ports = service.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 443);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(9999)));
        assert_eq!(ports[1].port, 80);
        assert_eq!(ports[1].target_port, Some(IntOrString::Int(9998)));
    }

    #[test]
    fn test_build_service_without_ports_for_synthetic() {
        let dk = activegate(vec![CapabilityDisplayName::Synthetic]);
        let service = build_service(&dk, Unit::Synthetic);
        assert_eq!(service.metadata.name.as_deref(), Some("x-synthetic"));
        assert!(service.spec.unwrap().ports.unwrap().is_empty());
    }

    #[test]
    fn test_selector_changed() {
        let dk = activegate(vec![CapabilityDisplayName::Routing]);
        let desired = build_statefulset(&dk, Unit::MultiCapability, "img", "h");
        let mut current = desired.clone();
        assert!(!selector_changed(&current, &desired));

        current
            .spec
            .as_mut()
            .unwrap()
            .selector
            .match_labels
            .as_mut()
            .unwrap()
            .insert("old".into(), "label".into());
        assert!(selector_changed(&current, &desired));
    }
}
