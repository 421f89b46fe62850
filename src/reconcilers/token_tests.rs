// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for token.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{ActiveGateSpec, CapabilityDisplayName, DynaKubeProxy, OneAgentSpec};
    use crate::dtclient::MockDynatraceClient;
    use crate::reconcilers::status::find_condition;
    use crate::testing::{dynakube, kube_only_context, minimal_spec, secret, test_now, FakeKubeClient};
    use std::collections::BTreeMap;

    fn kubemon_dynakube() -> DynaKube {
        let mut spec = minimal_spec();
        spec.active_gate = Some(ActiveGateSpec {
            capabilities: vec![CapabilityDisplayName::KubernetesMonitoring],
            ..Default::default()
        });
        dynakube("d", "x", spec)
    }

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_read_tokens_missing_secret() {
        let kube = FakeKubeClient::new();
        let ctx = kube_only_context(&kube);
        let dk = dynakube("d", "x", minimal_spec());

        let err = read_tokens(&ctx, &dk).await.unwrap_err();
        assert!(matches!(err, Error::Token(_)));
        assert!(err.to_string().contains("'x'"));
    }

    #[tokio::test]
    async fn test_read_tokens_requires_api_token() {
        let kube = FakeKubeClient::new();
        kube.insert(&secret("d", "x", &[("paasToken", "P")]));
        let ctx = kube_only_context(&kube);
        let dk = dynakube("d", "x", minimal_spec());

        let err = read_tokens(&ctx, &dk).await.unwrap_err();
        assert!(err.to_string().contains("apiToken"));
    }

    #[tokio::test]
    async fn test_read_tokens_from_named_secret() {
        let kube = FakeKubeClient::new();
        kube.insert(&secret(
            "d",
            "creds",
            &[("apiToken", " T \n"), ("paasToken", "P"), ("dataIngestToken", "")],
        ));
        let ctx = kube_only_context(&kube);
        let mut spec = minimal_spec();
        spec.tokens = Some("creds".into());
        let dk = dynakube("d", "x", spec);

        let tokens = read_tokens(&ctx, &dk).await.unwrap();
        assert_eq!(tokens.api_token, "T");
        assert_eq!(tokens.paas_token.as_deref(), Some("P"));
        assert_eq!(tokens.data_ingest_token, None);
        assert_eq!(tokens.installer_token(), "P");
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let tokens = Tokens {
            api_token: "secret-api".into(),
            paas_token: Some("secret-paas".into()),
            data_ingest_token: None,
        };
        let rendered = format!("{tokens:?}");
        assert!(!rendered.contains("secret-api"));
        assert!(!rendered.contains("secret-paas"));
    }

    #[test]
    fn test_hash_changes_with_any_token() {
        let a = Tokens {
            api_token: "T".into(),
            ..Default::default()
        };
        let mut b = a.clone();
        b.data_ingest_token = Some("I".into());
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }

    #[tokio::test]
    async fn test_client_config_resolves_proxy_secret_and_certs() {
        let kube = FakeKubeClient::new();
        kube.insert(&secret("d", "proxy-secret", &[("proxy", "http://proxy:3128")]));
        kube.insert(&ConfigMap {
            metadata: kube::api::ObjectMeta {
                name: Some("cas".into()),
                namespace: Some("d".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("certs".to_string(), "PEM".to_string())])),
            ..Default::default()
        });
        let ctx = kube_only_context(&kube);
        let mut spec = minimal_spec();
        spec.proxy = Some(DynaKubeProxy {
            value: None,
            value_from: Some("proxy-secret".into()),
        });
        spec.trusted_cas = Some("cas".into());
        spec.network_zone = Some("zone-a".into());
        let dk = dynakube("d", "x", spec);
        let tokens = Tokens {
            api_token: "T".into(),
            ..Default::default()
        };

        let config = client_config(&ctx, &dk, &tokens).await.unwrap();
        assert_eq!(config.proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(config.trusted_certs.as_deref(), Some("PEM"));
        assert_eq!(config.network_zone.as_deref(), Some("zone-a"));
        assert_eq!(config.api_token, "T");
    }

    #[tokio::test]
    async fn test_client_config_missing_proxy_secret_is_invalid() {
        let kube = FakeKubeClient::new();
        let ctx = kube_only_context(&kube);
        let mut spec = minimal_spec();
        spec.proxy = Some(DynaKubeProxy {
            value: None,
            value_from: Some("nope".into()),
        });
        let dk = dynakube("d", "x", spec);

        let err = client_config(&ctx, &dk, &Tokens::default()).await.unwrap_err();
        assert!(matches!(err, Error::ConfigurationInvalid(_)));
    }

    #[tokio::test]
    async fn test_missing_scopes_are_listed() {
        let mut spec = kubemon_dynakube().spec;
        spec.one_agent = Some(OneAgentSpec {
            host_monitoring: Some(Default::default()),
            ..Default::default()
        });
        let mut dk = dynakube("d", "x", spec);
        let mut client = MockDynatraceClient::new();
        client
            .expect_get_token_scopes()
            .returning(|_| Ok(vec!["settings.read".to_string()]));
        let tokens = Tokens {
            api_token: "T".into(),
            ..Default::default()
        };

        let err = verify_scopes(&client, &mut dk, &tokens, test_now())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "token 'apiToken' has scope errors: [feature 'Automatic ActiveGate Token Creation' is missing scope 'activeGateTokenManagement.create' feature 'Download Installer' is missing scope 'InstallerDownload']"
        );

        let conditions = &dk.status.unwrap().conditions;
        assert_eq!(
            find_condition(conditions, CONDITION_TYPE_API_TOKEN_SETTINGS_READ)
                .unwrap()
                .reason
                .as_deref(),
            Some(REASON_SCOPE_PRESENT)
        );
        assert_eq!(
            find_condition(conditions, CONDITION_TYPE_API_TOKEN_SETTINGS_WRITE)
                .unwrap()
                .status,
            STATUS_FALSE
        );
    }

    #[tokio::test]
    async fn test_data_ingest_token_needs_metrics_ingest() {
        let mut dk = dynakube("d", "x", minimal_spec());
        let mut client = MockDynatraceClient::new();
        client
            .expect_get_token_scopes()
            .withf(|t| t == "T")
            .returning(|_| Ok(Vec::new()));
        client
            .expect_get_token_scopes()
            .withf(|t| t == "I")
            .returning(|_| Ok(Vec::new()));
        let tokens = Tokens {
            api_token: "T".into(),
            paas_token: None,
            data_ingest_token: Some("I".into()),
        };

        let err = verify_scopes(&client, &mut dk, &tokens, test_now())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "token 'dataIngestToken' has scope errors: [feature 'Data Ingest' is missing scope 'metrics.ingest']"
        );
    }

    #[tokio::test]
    async fn test_verification_is_throttled_while_tokens_unchanged() {
        let mut dk = kubemon_dynakube();
        let mut client = MockDynatraceClient::new();
        client
            .expect_get_token_scopes()
            .times(1)
            .returning(|_| Ok(scopes(&["activeGateTokenManagement.create"])));
        let tokens = Tokens {
            api_token: "T".into(),
            ..Default::default()
        };

        verify_scopes(&client, &mut dk, &tokens, test_now())
            .await
            .unwrap();
        let status = dk.status.as_mut().unwrap();
        assert_eq!(status.dynatrace_api.token_hash, Some(tokens.hash()));
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_TOKENS,
            STATUS_TRUE,
            "TokenReady",
            "ok",
            test_now(),
        );

        let later = test_now() + chrono::Duration::minutes(5);
        verify_scopes(&client, &mut dk, &tokens, later).await.unwrap();
    }

    #[tokio::test]
    async fn test_changed_tokens_are_verified_again() {
        let mut dk = kubemon_dynakube();
        let mut client = MockDynatraceClient::new();
        client
            .expect_get_token_scopes()
            .times(2)
            .returning(|_| Ok(scopes(&["activeGateTokenManagement.create"])));
        let first = Tokens {
            api_token: "T".into(),
            ..Default::default()
        };
        verify_scopes(&client, &mut dk, &first, test_now())
            .await
            .unwrap();
        set_condition(
            &mut dk.status.as_mut().unwrap().conditions,
            CONDITION_TYPE_TOKENS,
            STATUS_TRUE,
            "TokenReady",
            "ok",
            test_now(),
        );

        let second = Tokens {
            api_token: "T2".into(),
            ..Default::default()
        };
        verify_scopes(&client, &mut dk, &second, test_now())
            .await
            .unwrap();
    }
}
