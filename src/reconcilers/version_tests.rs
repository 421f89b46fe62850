// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for version.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{ActiveGateSpec, HostInjectSpec, OneAgentSpec};
    use crate::dtclient::MockDynatraceClient;
    use crate::feature_flags::FF_PUBLIC_REGISTRY;
    use crate::reconcilers::status::find_condition;
    use crate::testing::{dynakube, minimal_spec, pass_context, test_context, FakeKubeClient};
    use std::sync::Arc;

    fn host_monitoring(image: Option<&str>, version: Option<&str>) -> DynaKube {
        let mut spec = minimal_spec();
        spec.one_agent = Some(OneAgentSpec {
            host_monitoring: Some(HostInjectSpec {
                image: image.map(String::from),
                version: version.map(String::from),
                ..Default::default()
            }),
            ..Default::default()
        });
        dynakube("d", "x", spec)
    }

    fn agent_client(versions: &'static [&'static str]) -> Arc<dyn DynatraceClient> {
        let mut client = MockDynatraceClient::new();
        let mut sequence = versions.iter();
        client
            .expect_get_latest_agent_version()
            .withf(|os, installer| os == "unix" && installer == "default")
            .times(versions.len())
            .returning(move |_, _| Ok((*sequence.next().unwrap_or(&"")).to_string()));
        Arc::new(client)
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Some(Ordering::Equal));
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Some(Ordering::Greater));
        assert_eq!(
            compare_versions("1.290.0.20240101-000000", "1.290.0.20240102-000000"),
            Some(Ordering::Less)
        );
        assert_eq!(compare_versions("1.2", "1.2.0"), Some(Ordering::Equal));
        assert_eq!(compare_versions("latest", "1.2.0"), None);
    }

    #[test]
    fn test_image_tag() {
        assert_eq!(image_tag("reg:5000/repo/oneagent:1.2.3").as_deref(), Some("1.2.3"));
        assert_eq!(image_tag("reg:5000/repo/oneagent"), None);
        assert_eq!(image_tag("repo/oneagent:1.0@sha256:abc").as_deref(), Some("1.0"));
    }

    #[tokio::test]
    async fn test_tenant_registry_probe_is_cached() {
        let kube = FakeKubeClient::new();
        let client = agent_client(&["1.290.0"]);
        let ctx = test_context(&kube, Arc::clone(&client));
        let mut pass = pass_context(&ctx, client);
        let mut dk = host_monitoring(None, None);

        reconcile(&pass, &mut dk, Component::OneAgent).await.unwrap();
        let status = dk.status.as_ref().unwrap().one_agent.version.clone();
        assert_eq!(status.version.as_deref(), Some("1.290.0"));
        assert_eq!(status.image_id.as_deref(), Some("t.example/linux/oneagent:1.290.0"));
        assert_eq!(status.source, Some(VersionSource::TenantRegistry));

        pass.now += chrono::Duration::minutes(10);
        reconcile(&pass, &mut dk, Component::OneAgent).await.unwrap();
        assert_eq!(dk.status.as_ref().unwrap().one_agent.version, status);
    }

    #[tokio::test]
    async fn test_downgrade_is_rejected_and_then_cleared() {
        let kube = FakeKubeClient::new();
        let client = agent_client(&["1.290.0", "1.280.0", "1.300.0"]);
        let ctx = test_context(&kube, Arc::clone(&client));
        let mut pass = pass_context(&ctx, client);
        let mut dk = host_monitoring(None, None);

        reconcile(&pass, &mut dk, Component::OneAgent).await.unwrap();

        pass.now += chrono::Duration::minutes(20);
        reconcile(&pass, &mut dk, Component::OneAgent).await.unwrap();
        let status = dk.status.as_ref().unwrap();
        assert_eq!(status.one_agent.version.version.as_deref(), Some("1.290.0"));
        let condition = find_condition(&status.conditions, "OneAgentVersion").unwrap();
        assert_eq!(condition.reason.as_deref(), Some(REASON_VERSION_DOWNGRADE_REJECTED));

        pass.now += chrono::Duration::minutes(20);
        reconcile(&pass, &mut dk, Component::OneAgent).await.unwrap();
        let status = dk.status.as_ref().unwrap();
        assert_eq!(status.one_agent.version.version.as_deref(), Some("1.300.0"));
        assert!(find_condition(&status.conditions, "OneAgentVersion").is_none());
    }

    #[tokio::test]
    async fn test_pinned_version_skips_probe_and_downgrade_check() {
        let kube = FakeKubeClient::new();
        let client = agent_client(&["1.290.0"]);
        let ctx = test_context(&kube, Arc::clone(&client));
        let mut pass = pass_context(&ctx, client);
        let mut dk = host_monitoring(None, None);
        reconcile(&pass, &mut dk, Component::OneAgent).await.unwrap();

        dk.spec.one_agent.as_mut().unwrap().host_monitoring.as_mut().unwrap().version =
            Some("1.100.0".into());
        pass.now += chrono::Duration::minutes(1);
        reconcile(&pass, &mut dk, Component::OneAgent).await.unwrap();

        let version = &dk.status.as_ref().unwrap().one_agent.version;
        assert_eq!(version.version.as_deref(), Some("1.100.0"));
        assert_eq!(version.source, Some(VersionSource::CustomVersion));
        assert_eq!(version.image_id.as_deref(), Some("t.example/linux/oneagent:1.100.0"));
    }

    #[tokio::test]
    async fn test_custom_image_wins_and_is_stable() {
        let kube = FakeKubeClient::new();
        let client: Arc<dyn DynatraceClient> = Arc::new(MockDynatraceClient::new());
        let ctx = test_context(&kube, Arc::clone(&client));
        let mut pass = pass_context(&ctx, client);
        let mut dk = host_monitoring(Some("my.registry/oneagent:1.5.0"), Some("1.4.0"));

        reconcile(&pass, &mut dk, Component::OneAgent).await.unwrap();
        let first = dk.status.as_ref().unwrap().one_agent.version.clone();
        assert_eq!(first.source, Some(VersionSource::CustomImage));
        assert_eq!(first.image_id.as_deref(), Some("my.registry/oneagent:1.5.0"));
        assert_eq!(first.version.as_deref(), Some("1.4.0"));

        pass.now += chrono::Duration::hours(2);
        reconcile(&pass, &mut dk, Component::OneAgent).await.unwrap();
        assert_eq!(dk.status.as_ref().unwrap().one_agent.version, first);
    }

    #[tokio::test]
    async fn test_public_registry_image() {
        let kube = FakeKubeClient::new();
        let mut client = MockDynatraceClient::new();
        client
            .expect_get_latest_activegate_version()
            .returning(|_| Ok("1.281.0".into()));
        let client: Arc<dyn DynatraceClient> = Arc::new(client);
        let ctx = test_context(&kube, Arc::clone(&client));
        let pass = pass_context(&ctx, client);
        let mut spec = minimal_spec();
        spec.active_gate = Some(ActiveGateSpec {
            capabilities: vec![CapabilityDisplayName::Routing],
            ..Default::default()
        });
        let mut dk = dynakube("d", "x", spec);
        dk.metadata.annotations = Some([(FF_PUBLIC_REGISTRY.to_string(), "true".to_string())].into());

        reconcile(&pass, &mut dk, Component::ActiveGate).await.unwrap();
        let version = &dk.status.as_ref().unwrap().active_gate.version;
        assert_eq!(version.source, Some(VersionSource::PublicRegistry));
        assert_eq!(
            version.image_id.as_deref(),
            Some("public.ecr.aws/dynatrace/dynatrace-activegate:1.281.0")
        );
    }

    #[tokio::test]
    async fn test_disabled_component_is_cleared() {
        let kube = FakeKubeClient::new();
        let client: Arc<dyn DynatraceClient> = Arc::new(MockDynatraceClient::new());
        let ctx = test_context(&kube, Arc::clone(&client));
        let pass = pass_context(&ctx, client);
        let mut dk = dynakube("d", "x", minimal_spec());
        let mut status = crate::crd::DynaKubeStatus::default();
        status.one_agent.version.version = Some("1.0.0".into());
        dk.status = Some(status);

        reconcile(&pass, &mut dk, Component::OneAgent).await.unwrap();
        assert_eq!(
            dk.status.as_ref().unwrap().one_agent.version,
            VersionStatus::default()
        );
    }

    #[test]
    fn test_deployed_image_falls_back_to_latest() {
        let dk = host_monitoring(None, None);
        assert_eq!(
            deployed_image(&dk, Component::OneAgent).unwrap(),
            "t.example/linux/oneagent:latest"
        );
    }
}
