// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! ActiveGate auth token secret.
//!
//! The token is created on the tenant once and kept in `{dk}-activegate-authtoken-secret`.
//! It is regenerated when the secret is older than the rotation period.

use crate::constants::{
    ACTIVEGATE_AUTH_TOKEN_KEY, ACTIVEGATE_AUTH_TOKEN_ROTATION_DAYS,
    ACTIVEGATE_AUTH_TOKEN_SECRET_SUFFIX,
};
use crate::crd::DynaKube;
use crate::errors::Result;
use crate::reconcilers::resources::{self, delete_if_exists, object_meta, secret_data, secret_string};
use crate::reconcilers::PassContext;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::info;

fn is_expired(secret: &Secret, now: DateTime<Utc>) -> bool {
    secret
        .metadata
        .creation_timestamp
        .as_ref()
        .is_some_and(|created| now - DateTime::<Utc>::from_timestamp_nanos(created.0.as_nanosecond() as i64) > chrono::Duration::days(ACTIVEGATE_AUTH_TOKEN_ROTATION_DAYS))
}

/// SHA-256 hex of the token, used to roll pods when the token changes.
#[must_use]
pub fn token_hash(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Ensure a valid auth token secret exists. Returns the hash of the token.
///
/// # Errors
///
/// Returns the tenant error (including [`crate::errors::Error::Unreachable`]) or a
/// Kubernetes error.
pub async fn reconcile(pass: &PassContext<'_>, dk: &DynaKube) -> Result<String> {
    let namespace = dk.namespace().unwrap_or_default();
    let name = dk.name_with_suffix(ACTIVEGATE_AUTH_TOKEN_SECRET_SUFFIX);

    if let Some(secret) = resources::get::<Secret>(pass.ctx, Some(&namespace), &name).await? {
        match secret_string(&secret, ACTIVEGATE_AUTH_TOKEN_KEY) {
            Some(token) if !is_expired(&secret, pass.now) => return Ok(token_hash(&token)),
            _ => {
                info!(namespace = %namespace, name = %name, "Rotating ActiveGate auth token");
                delete_if_exists::<Secret>(pass.ctx, Some(&namespace), &name).await?;
            }
        }
    }

    let info = pass.client().get_activegate_auth_token(&dk.name_any()).await?;
    let secret = Secret {
        metadata: object_meta(dk, &name, BTreeMap::new()),
        data: Some(secret_data(BTreeMap::from([(
            ACTIVEGATE_AUTH_TOKEN_KEY.to_string(),
            info.token.clone(),
        )]))),
        ..Default::default()
    };
    resources::apply(pass.ctx, &secret).await?;
    info!(namespace = %namespace, name = %name, token_id = %info.token_id, "Created ActiveGate auth token");
    Ok(token_hash(&info.token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtclient::{ActiveGateAuthTokenInfo, DynatraceClient, MockDynatraceClient};
    use crate::testing::{dynakube, minimal_spec, pass_context, secret, test_context, test_now, FakeKubeClient};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::Arc;

    fn token_client(times: usize) -> Arc<dyn DynatraceClient> {
        let mut client = MockDynatraceClient::new();
        client
            .expect_get_activegate_auth_token()
            .withf(|name| name == "x")
            .times(times)
            .returning(|_| {
                Ok(ActiveGateAuthTokenInfo {
                    token_id: "id".into(),
                    token: "fresh".into(),
                })
            });
        Arc::new(client)
    }

    #[tokio::test]
    async fn test_creates_secret_once() {
        let kube = FakeKubeClient::new();
        let client = token_client(1);
        let ctx = test_context(&kube, Arc::clone(&client));
        let pass = pass_context(&ctx, client);
        let dk = dynakube("d", "x", minimal_spec());

        let first = reconcile(&pass, &dk).await.unwrap();
        let second = reconcile(&pass, &dk).await.unwrap();
        assert_eq!(first, token_hash("fresh"));
        assert_eq!(first, second);

        let stored: Secret = kube.get_typed(Some("d"), "x-activegate-authtoken-secret").unwrap();
        assert_eq!(secret_string(&stored, ACTIVEGATE_AUTH_TOKEN_KEY).as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_rotates_expired_secret() {
        let kube = FakeKubeClient::new();
        let mut old = secret("d", "x-activegate-authtoken-secret", &[(ACTIVEGATE_AUTH_TOKEN_KEY, "old")]);
        old.metadata.creation_timestamp = Some(Time(k8s_openapi::jiff::Timestamp::from_nanosecond(i128::from((test_now() - chrono::Duration::days(31)).timestamp_nanos_opt().unwrap())).unwrap()));
        kube.insert(&old);
        let client = token_client(1);
        let ctx = test_context(&kube, Arc::clone(&client));
        let pass = pass_context(&ctx, client);
        let dk = dynakube("d", "x", minimal_spec());

        assert_eq!(reconcile(&pass, &dk).await.unwrap(), token_hash("fresh"));
    }

    #[tokio::test]
    async fn test_keeps_young_secret() {
        let kube = FakeKubeClient::new();
        let mut young = secret("d", "x-activegate-authtoken-secret", &[(ACTIVEGATE_AUTH_TOKEN_KEY, "young")]);
        young.metadata.creation_timestamp = Some(Time(k8s_openapi::jiff::Timestamp::from_nanosecond(i128::from((test_now() - chrono::Duration::days(29)).timestamp_nanos_opt().unwrap())).unwrap()));
        kube.insert(&young);
        let client = token_client(0);
        let ctx = test_context(&kube, Arc::clone(&client));
        let pass = pass_context(&ctx, client);
        let dk = dynakube("d", "x", minimal_spec());

        assert_eq!(reconcile(&pass, &dk).await.unwrap(), token_hash("young"));
        assert!(kube.writes().is_empty());
    }
}
