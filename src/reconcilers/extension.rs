// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Extensions token secret.
//!
//! The token is random and created once; it is never regenerated while the secret
//! exists, since the extension controller and the ActiveGate both hold it.

use crate::constants::{EXTENSIONS_TOKEN_KEY, EXTENSIONS_TOKEN_SUFFIX};
use crate::crd::DynaKube;
use crate::errors::Result;
use crate::reconcilers::resources::{create_if_absent, delete_if_exists, object_meta, secret_data};
use crate::reconcilers::PassContext;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::info;

fn random_token() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

/// Create `{dk}-extensions-token` when extensions are enabled, delete it otherwise.
///
/// # Errors
///
/// Returns a Kubernetes error.
pub async fn reconcile(pass: &PassContext<'_>, dk: &DynaKube) -> Result<()> {
    let name = dk.name_with_suffix(EXTENSIONS_TOKEN_SUFFIX);
    if !dk.extensions_enabled() {
        delete_if_exists::<Secret>(pass.ctx, dk.namespace().as_deref(), &name).await?;
        return Ok(());
    }
    let secret = Secret {
        metadata: object_meta(dk, &name, BTreeMap::new()),
        data: Some(secret_data(BTreeMap::from([(
            EXTENSIONS_TOKEN_KEY.to_string(),
            random_token(),
        )]))),
        ..Default::default()
    };
    if create_if_absent(pass.ctx, &secret).await? {
        info!(name = %dk.name_any(), "Created extensions token");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ExtensionsSpec;
    use crate::dtclient::MockDynatraceClient;
    use crate::reconcilers::resources::secret_string;
    use crate::testing::{dynakube, kube_only_context, minimal_spec, pass_context, FakeKubeClient};
    use std::sync::Arc;

    #[test]
    fn test_random_token_is_random() {
        let token = random_token();
        assert_eq!(token.len(), 43);
        assert_ne!(token, random_token());
    }

    #[tokio::test]
    async fn test_token_is_stable_and_removed_when_disabled() {
        let kube = FakeKubeClient::new();
        let ctx = kube_only_context(&kube);
        let pass = pass_context(&ctx, Arc::new(MockDynatraceClient::new()));
        let mut spec = minimal_spec();
        spec.extensions = Some(ExtensionsSpec { enabled: true });
        let mut dk = dynakube("d", "x", spec);

        reconcile(&pass, &dk).await.unwrap();
        let first: Secret = kube.get_typed(Some("d"), "x-extensions-token").unwrap();
        reconcile(&pass, &dk).await.unwrap();
        let second: Secret = kube.get_typed(Some("d"), "x-extensions-token").unwrap();
        assert_eq!(
            secret_string(&first, EXTENSIONS_TOKEN_KEY),
            secret_string(&second, EXTENSIONS_TOKEN_KEY)
        );

        dk.spec.extensions = None;
        reconcile(&pass, &dk).await.unwrap();
        assert!(!kube.exists("Secret", Some("d"), "x-extensions-token"));
    }
}
