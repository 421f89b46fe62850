// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for connectioninfo.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{ActiveGateSpec, CapabilityDisplayName};
    use crate::dtclient::communication_host::parse_list;
    use crate::dtclient::{ActiveGateConnectionInfo, MockDynatraceClient, OneAgentConnectionInfo};
    use crate::testing::{dynakube, minimal_spec, pass_context, test_context, FakeKubeClient};
    use std::sync::Arc;

    fn activegate_client(times: usize) -> MockDynatraceClient {
        let mut client = MockDynatraceClient::new();
        client
            .expect_get_activegate_connection_info()
            .times(times)
            .returning(|| {
                Ok(ActiveGateConnectionInfo {
                    tenant_uuid: "abc".into(),
                    tenant_token: "tok".into(),
                    endpoints: "https://abc.live/communication".into(),
                })
            });
        client
    }

    fn oneagent_client(endpoints: &'static str) -> MockDynatraceClient {
        let mut client = MockDynatraceClient::new();
        client
            .expect_get_oneagent_connection_info()
            .times(1)
            .returning(move || {
                Ok(OneAgentConnectionInfo {
                    tenant_uuid: "abc".into(),
                    tenant_token: "tok".into(),
                    endpoints: endpoints.into(),
                    communication_hosts: parse_list(endpoints).unwrap(),
                })
            });
        client
    }

    #[tokio::test]
    async fn test_activegate_fetch_writes_secret_and_status() {
        let kube = FakeKubeClient::new();
        let client: Arc<dyn crate::dtclient::DynatraceClient> = Arc::new(activegate_client(1));
        let ctx = test_context(&kube, Arc::clone(&client));
        let pass = pass_context(&ctx, client);
        let mut dk = dynakube("d", "x", minimal_spec());

        reconcile_activegate(&pass, &mut dk).await.unwrap();

        let secret: Secret = kube
            .get_typed(Some("d"), "x-activegate-tenant-secret")
            .unwrap();
        assert_eq!(
            resources::secret_string(&secret, TENANT_TOKEN_KEY).as_deref(),
            Some("tok")
        );
        let info = &dk.status.as_ref().unwrap().active_gate.connection_info;
        assert_eq!(info.tenant_uuid.as_deref(), Some("abc"));
        assert_eq!(info.last_request, Some(pass.now.to_rfc3339()));

        // fresh: the mock allows exactly one fetch
        reconcile_activegate(&pass, &mut dk).await.unwrap();
    }

    #[tokio::test]
    async fn test_activegate_refetch_after_threshold() {
        let kube = FakeKubeClient::new();
        let client: Arc<dyn crate::dtclient::DynatraceClient> = Arc::new(activegate_client(2));
        let ctx = test_context(&kube, Arc::clone(&client));
        let mut pass = pass_context(&ctx, client);
        let mut dk = dynakube("d", "x", minimal_spec());

        reconcile_activegate(&pass, &mut dk).await.unwrap();
        pass.now += chrono::Duration::minutes(15);
        reconcile_activegate(&pass, &mut dk).await.unwrap();
    }

    #[tokio::test]
    async fn test_activegate_refetch_when_secret_missing() {
        let kube = FakeKubeClient::new();
        let client: Arc<dyn crate::dtclient::DynatraceClient> = Arc::new(activegate_client(2));
        let ctx = test_context(&kube, Arc::clone(&client));
        let pass = pass_context(&ctx, client);
        let mut dk = dynakube("d", "x", minimal_spec());

        reconcile_activegate(&pass, &mut dk).await.unwrap();
        resources::delete_if_exists::<Secret>(&ctx, Some("d"), "x-activegate-tenant-secret")
            .await
            .unwrap();
        reconcile_activegate(&pass, &mut dk).await.unwrap();
    }

    #[tokio::test]
    async fn test_oneagent_hosts_are_cached_sorted() {
        let kube = FakeKubeClient::new();
        let client: Arc<dyn crate::dtclient::DynatraceClient> = Arc::new(oneagent_client(
            "https://b.example:443,https://1.2.3.4,https://b.example",
        ));
        let ctx = test_context(&kube, Arc::clone(&client));
        let pass = pass_context(&ctx, client);
        let mut dk = dynakube("d", "x", minimal_spec());

        reconcile_oneagent(&pass, &mut dk).await.unwrap();

        let info = &dk.status.as_ref().unwrap().one_agent.connection_info;
        let hosts: Vec<&str> = info.communication_hosts.iter().map(|h| h.host.as_str()).collect();
        assert_eq!(hosts, vec!["1.2.3.4", "b.example"]);
        assert!(info.last_request.is_some());
        assert!(kube.exists("Secret", Some("d"), "x-oneagent-tenant-secret"));
    }

    #[tokio::test]
    async fn test_oneagent_without_hosts_is_not_ready() {
        let kube = FakeKubeClient::new();
        let client: Arc<dyn crate::dtclient::DynatraceClient> = Arc::new(oneagent_client(""));
        let ctx = test_context(&kube, Arc::clone(&client));
        let pass = pass_context(&ctx, client);
        let mut dk = dynakube("d", "x", minimal_spec());

        let err = reconcile_oneagent(&pass, &mut dk).await.unwrap_err();
        assert!(err.is_no_communication_hosts());
        let info = &dk.status.as_ref().unwrap().one_agent.connection_info;
        assert_eq!(info.tenant_uuid.as_deref(), Some("abc"));
        assert_eq!(info.last_request, None);
    }

    #[tokio::test]
    async fn test_oneagent_without_hosts_but_routing_is_clear() {
        let kube = FakeKubeClient::new();
        let client: Arc<dyn crate::dtclient::DynatraceClient> = Arc::new(oneagent_client(""));
        let ctx = test_context(&kube, Arc::clone(&client));
        let pass = pass_context(&ctx, client);
        let mut spec = minimal_spec();
        spec.active_gate = Some(ActiveGateSpec {
            capabilities: vec![CapabilityDisplayName::Routing],
            ..Default::default()
        });
        let mut dk = dynakube("d", "x", spec);

        reconcile_oneagent(&pass, &mut dk).await.unwrap();
    }

    #[test]
    fn test_config_map_keys() {
        let dk = dynakube("d", "x", minimal_spec());
        let info = ConnectionInfoStatus {
            tenant_uuid: Some("abc".into()),
            endpoints: Some("https://e".into()),
            ..Default::default()
        };
        let cm = connection_info_config_map(&dk, "activegate-connection-info", &info);
        assert_eq!(cm.metadata.name.as_deref(), Some("x-activegate-connection-info"));
        let data = cm.data.unwrap();
        assert_eq!(data[TENANT_UUID_KEY], "abc");
        assert_eq!(data[COMMUNICATION_ENDPOINTS_KEY], "https://e");
    }
}
