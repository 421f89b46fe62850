// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! End-to-end tests for the root `DynaKube` reconciler

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{ActiveGateSpec, CapabilityDisplayName, HostInjectSpec, OneAgentSpec};
    use crate::dtclient::{
        ActiveGateAuthTokenInfo, ActiveGateConnectionInfo, DynatraceClient, MockDynatraceClient,
        OneAgentConnectionInfo, SCOPE_ACTIVEGATE_TOKEN_CREATE, SCOPE_INSTALLER_DOWNLOAD,
    };
    use crate::labels::NAMESPACE_INSTANCE_LABEL;
    use crate::reconcilers::status::find_condition;
    use crate::status_reasons::CONDITION_TYPE_ACTIVEGATE_STATEFULSET;
    use crate::testing::{
        dynakube, minimal_spec, namespace, secret, test_context, test_now, FakeKubeClient,
    };
    use k8s_openapi::api::core::v1::Namespace;

    fn seed(kube: &FakeKubeClient, dk: &DynaKube) {
        kube.insert(dk);
        kube.insert(&secret("d", "x", &[("apiToken", "T")]));
        kube.insert(&namespace("kube-system", &[]));
    }

    fn scopes_client(scopes: &'static [&'static str]) -> MockDynatraceClient {
        let mut client = MockDynatraceClient::new();
        client
            .expect_get_token_scopes()
            .returning(move |_| Ok(scopes.iter().map(ToString::to_string).collect()));
        client
    }

    fn context(kube: &FakeKubeClient, client: MockDynatraceClient) -> Arc<Context> {
        let client: Arc<dyn DynatraceClient> = Arc::new(client);
        Arc::new(test_context(kube, client))
    }

    fn stored(kube: &FakeKubeClient) -> DynaKube {
        kube.get_typed(Some("d"), "x").unwrap()
    }

    fn condition<'a>(dk: &'a DynaKube, condition_type: &str) -> Option<&'a crate::crd::Condition> {
        find_condition(&dk.status.as_ref()?.conditions, condition_type)
    }

    fn status_writes(kube: &FakeKubeClient) -> usize {
        kube.writes().iter().filter(|w| w.verb == "status").count()
    }

    #[tokio::test]
    async fn test_minimal_dynakube_runs_and_settles() {
        let kube = FakeKubeClient::new();
        let dk = dynakube("d", "x", minimal_spec());
        seed(&kube, &dk);
        let ctx = context(&kube, scopes_client(&[]));

        let action = reconcile_dynakube(Arc::new(dk.clone()), Arc::clone(&ctx))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(CHANGES_UPDATE_INTERVAL));

        let current = stored(&kube);
        let status = current.status.clone().unwrap();
        assert_eq!(status.phase, Some(DynaKubePhase::Running));
        assert_eq!(status.kube_system_uuid.as_deref(), Some("kube-system-uid"));
        let tokens = condition(&current, CONDITION_TYPE_TOKENS).unwrap();
        assert_eq!(tokens.status, STATUS_TRUE);
        assert_eq!(tokens.reason.as_deref(), Some(REASON_TOKEN_READY));
        assert!(kube.names("StatefulSet", "d").is_empty());
        assert!(kube.names("DaemonSet", "d").is_empty());

        kube.clear_writes();
        let action = reconcile_dynakube(Arc::new(dk), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(DEFAULT_UPDATE_INTERVAL));
        assert!(kube.writes().is_empty(), "{:?}", kube.writes());
    }

    #[tokio::test]
    async fn test_existing_kube_system_uuid_is_kept() {
        let kube = FakeKubeClient::new();
        let mut dk = dynakube("d", "x", minimal_spec());
        dk.status = Some(crate::crd::DynaKubeStatus {
            kube_system_uuid: Some("seeded-uuid".into()),
            ..Default::default()
        });
        seed(&kube, &dk);
        let ctx = context(&kube, scopes_client(&[]));

        reconcile_dynakube(Arc::new(dk), ctx).await.unwrap();

        let status = stored(&kube).status.unwrap();
        assert_eq!(status.kube_system_uuid.as_deref(), Some("seeded-uuid"));
        assert_eq!(status.phase, Some(DynaKubePhase::Running));
    }

    fn kube_mon_client() -> MockDynatraceClient {
        let mut client = scopes_client(&[SCOPE_ACTIVEGATE_TOKEN_CREATE]);
        client.expect_get_activegate_connection_info().returning(|| {
            Ok(ActiveGateConnectionInfo {
                tenant_uuid: "abc".into(),
                tenant_token: "tt".into(),
                endpoints: "https://ag.example/communication".into(),
            })
        });
        client
            .expect_get_latest_activegate_version()
            .returning(|_| Ok("1.281.0".into()));
        client.expect_get_activegate_auth_token().returning(|_| {
            Ok(ActiveGateAuthTokenInfo {
                token_id: "id".into(),
                token: "auth".into(),
            })
        });
        client
    }

    #[tokio::test]
    async fn test_enable_then_disable_kube_mon() {
        let kube = FakeKubeClient::new();
        let mut spec = minimal_spec();
        spec.active_gate = Some(ActiveGateSpec {
            capabilities: vec![CapabilityDisplayName::KubernetesMonitoring],
            ..Default::default()
        });
        let dk = dynakube("d", "x", spec);
        seed(&kube, &dk);
        let ctx = context(&kube, kube_mon_client());

        let action = reconcile_dynakube(Arc::new(dk.clone()), Arc::clone(&ctx))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(FAST_UPDATE_INTERVAL));
        assert_eq!(kube.names("StatefulSet", "d"), vec!["x-activegate"]);
        assert_eq!(kube.names("Service", "d"), vec!["x-activegate"]);
        assert!(kube.exists("ConfigMap", Some("d"), "x-activegate-connection-info"));
        let current = stored(&kube);
        assert_eq!(
            current.status.as_ref().unwrap().phase,
            Some(DynaKubePhase::Deploying)
        );

        let mut disabled = current;
        disabled.spec.active_gate = None;
        kube.insert(&disabled);
        reconcile_dynakube(Arc::new(dk), ctx).await.unwrap();

        assert!(kube.names("StatefulSet", "d").is_empty());
        assert!(kube.names("Service", "d").is_empty());
        let current = stored(&kube);
        assert!(condition(&current, CONDITION_TYPE_ACTIVEGATE_STATEFULSET).is_none());
        assert_eq!(
            current.status.as_ref().unwrap().phase,
            Some(DynaKubePhase::Running)
        );
    }

    #[tokio::test]
    async fn test_disable_without_stored_status_still_removes_activegate() {
        let kube = FakeKubeClient::new();
        let mut spec = minimal_spec();
        spec.active_gate = Some(ActiveGateSpec {
            capabilities: vec![CapabilityDisplayName::KubernetesMonitoring],
            ..Default::default()
        });
        let dk = dynakube("d", "x", spec);
        seed(&kube, &dk);
        let ctx = context(&kube, kube_mon_client());

        reconcile_dynakube(Arc::new(dk.clone()), Arc::clone(&ctx))
            .await
            .unwrap();
        assert_eq!(kube.names("StatefulSet", "d"), vec!["x-activegate"]);

        let mut disabled = stored(&kube);
        disabled.status = None;
        disabled.spec.active_gate = None;
        kube.insert(&disabled);
        reconcile_dynakube(Arc::new(dk), ctx).await.unwrap();

        assert!(kube.names("StatefulSet", "d").is_empty());
        assert!(kube.names("Service", "d").is_empty());
        assert!(!kube.exists("ConfigMap", Some("d"), "x-activegate-connection-info"));
    }

    #[tokio::test]
    async fn test_rate_limited_tenant_keeps_phase_and_condition() {
        let kube = FakeKubeClient::new();
        let mut dk = dynakube("d", "x", minimal_spec());
        let mut status = crate::crd::DynaKubeStatus {
            phase: Some(DynaKubePhase::Running),
            ..Default::default()
        };
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_TOKENS,
            STATUS_TRUE,
            REASON_TOKEN_READY,
            "Tokens are valid",
            test_now(),
        );
        dk.status = Some(status);
        seed(&kube, &dk);
        let mut client = MockDynatraceClient::new();
        client
            .expect_get_token_scopes()
            .returning(|_| Err(Error::unreachable(503, "Service Unavailable")));
        let ctx = context(&kube, client);

        let action = reconcile_dynakube(Arc::new(dk), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(FAST_UPDATE_INTERVAL));
        let current = stored(&kube);
        assert_eq!(
            current.status.as_ref().unwrap().phase,
            Some(DynaKubePhase::Running)
        );
        assert_eq!(condition(&current, CONDITION_TYPE_TOKENS).unwrap().status, STATUS_TRUE);
        assert_eq!(status_writes(&kube), 0);
    }

    #[tokio::test]
    async fn test_missing_token_secret_sets_error() {
        let kube = FakeKubeClient::new();
        let dk = dynakube("d", "x", minimal_spec());
        kube.insert(&dk);
        let ctx = context(&kube, MockDynatraceClient::new());

        let err = reconcile_dynakube(Arc::new(dk), ctx).await.unwrap_err();

        assert!(!err.is_unreachable());
        let current = stored(&kube);
        assert_eq!(
            current.status.as_ref().unwrap().phase,
            Some(DynaKubePhase::Error)
        );
        let tokens = condition(&current, CONDITION_TYPE_TOKENS).unwrap();
        assert_eq!(tokens.status, STATUS_FALSE);
        assert_eq!(tokens.reason.as_deref(), Some(REASON_TOKEN_ERROR));
    }

    #[tokio::test]
    async fn test_invalid_capabilities_fail_before_tenant_calls() {
        let kube = FakeKubeClient::new();
        let mut spec = minimal_spec();
        spec.active_gate = Some(ActiveGateSpec {
            capabilities: vec![
                CapabilityDisplayName::Synthetic,
                CapabilityDisplayName::KubernetesMonitoring,
            ],
            ..Default::default()
        });
        let dk = dynakube("d", "x", spec);
        seed(&kube, &dk);
        let ctx = context(&kube, MockDynatraceClient::new());

        let err = reconcile_dynakube(Arc::new(dk), ctx).await.unwrap_err();

        assert!(matches!(err, Error::ConfigurationInvalid(_)));
        assert_eq!(
            stored(&kube).status.unwrap().phase,
            Some(DynaKubePhase::Error)
        );
    }

    #[tokio::test]
    async fn test_missing_communication_hosts_requeue_fast() {
        let kube = FakeKubeClient::new();
        let mut spec = minimal_spec();
        spec.one_agent = Some(OneAgentSpec {
            classic_full_stack: Some(HostInjectSpec::default()),
            ..Default::default()
        });
        let dk = dynakube("d", "x", spec);
        seed(&kube, &dk);
        let mut client = scopes_client(&[SCOPE_INSTALLER_DOWNLOAD]);
        client.expect_get_oneagent_connection_info().returning(|| {
            Ok(OneAgentConnectionInfo {
                tenant_uuid: "abc".into(),
                tenant_token: "tok".into(),
                endpoints: String::new(),
                communication_hosts: Vec::new(),
            })
        });
        let ctx = context(&kube, client);

        let action = reconcile_dynakube(Arc::new(dk), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(FAST_UPDATE_INTERVAL));
        assert!(kube.names("DaemonSet", "d").is_empty());
        let status = stored(&kube).status.unwrap();
        assert_eq!(status.phase, Some(DynaKubePhase::Deploying));
        assert!(status.one_agent.connection_info.last_request.is_none());
    }

    #[tokio::test]
    async fn test_deleted_dynakube_unmaps_namespaces() {
        let kube = FakeKubeClient::new();
        kube.insert(&namespace("shop", &[(NAMESPACE_INSTANCE_LABEL, "x")]));
        let ctx = context(&kube, MockDynatraceClient::new());

        let action = reconcile_dynakube(Arc::new(dynakube("d", "x", minimal_spec())), ctx)
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_UPDATE_INTERVAL));
        let shop: Namespace = kube.get_typed(None, "shop").unwrap();
        assert!(!shop.labels().contains_key(NAMESPACE_INSTANCE_LABEL));
    }

    #[tokio::test]
    async fn test_cancelled_pass_writes_nothing() {
        let kube = FakeKubeClient::new();
        let dk = dynakube("d", "x", minimal_spec());
        seed(&kube, &dk);
        let ctx = context(&kube, MockDynatraceClient::new());
        ctx.cancel.cancel();

        let err = reconcile_dynakube(Arc::new(dk.clone()), Arc::clone(&ctx))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(kube.writes().is_empty());
        assert_eq!(error_policy(Arc::new(dk), &err, ctx), Action::await_change());
    }

    #[tokio::test]
    async fn test_status_conflict_is_swallowed() {
        let kube = FakeKubeClient::new();
        let dk = dynakube("d", "x", minimal_spec());
        seed(&kube, &dk);
        kube.fail_status_updates_with_conflict(true);
        let ctx = context(&kube, scopes_client(&[]));

        let action = reconcile_dynakube(Arc::new(dk), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(CHANGES_UPDATE_INTERVAL));
        assert!(stored(&kube).status.is_none());
    }

    #[test]
    fn test_error_policy_requeues_fast() {
        let kube = FakeKubeClient::new();
        let ctx = context(&kube, MockDynatraceClient::new());
        let action = error_policy(
            Arc::new(dynakube("d", "x", minimal_spec())),
            &Error::Transient("boom".into()),
            ctx,
        );
        assert_eq!(action, Action::requeue(ERROR_POLICY_REQUEUE));
    }
}
