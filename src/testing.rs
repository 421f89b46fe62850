// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory test doubles.
//!
//! [`FakeKubeClient`] keeps objects in a map keyed by kind/namespace/name and
//! records every write, so tests can assert both the resulting cluster state and
//! that a second pass issues no writes at all.

use crate::config::OperatorConfig;
use crate::context::{Clock, Context};
use crate::crd::{DynaKube, DynaKubeSpec};
use crate::dtclient::{ClientConfig, DynatraceClient, DynatraceClientFactory, MockDynatraceClient};
use crate::errors::{Error, Result};
use crate::kubeclient::{api_resource, from_dynamic, to_dynamic, KubeClient};
use crate::metrics::Metrics;
use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

type ObjectKey = (String, String, String);

/// A single write issued against the fake API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    /// `create`, `replace`, `delete` or `status`
    pub verb: &'static str,
    /// Object kind
    pub kind: String,
    /// Object namespace (empty for cluster scoped objects)
    pub namespace: String,
    /// Object name
    pub name: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    writes: Vec<RecordedWrite>,
    api_groups: BTreeSet<String>,
    next_resource_version: u64,
    status_conflict: bool,
}

/// In-memory [`KubeClient`].
#[derive(Default, Clone)]
pub struct FakeKubeClient {
    state: Arc<Mutex<State>>,
}

fn key(kind: &str, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        kind.to_string(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn matches_selector(object: &DynamicObject, selector: &str) -> bool {
    let labels = object.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).is_some_and(|actual| actual == v),
            None => labels.contains_key(term),
        })
}

impl FakeKubeClient {
    /// Empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed a typed object without recording a write.
    pub fn insert<K>(&self, object: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let mut dynamic = to_dynamic(object).unwrap();
        let mut state = self.lock();
        state.next_resource_version += 1;
        dynamic.metadata.resource_version = Some(state.next_resource_version.to_string());
        let k = key(
            &K::kind(&()),
            dynamic.metadata.namespace.as_deref(),
            dynamic.metadata.name.as_deref().unwrap_or_default(),
        );
        state.objects.insert(k, dynamic);
    }

    /// Seed a dynamic object of the given resource without recording a write.
    pub fn insert_dynamic(&self, resource: &ApiResource, mut object: DynamicObject) {
        let mut state = self.lock();
        state.next_resource_version += 1;
        object.metadata.resource_version = Some(state.next_resource_version.to_string());
        let k = key(
            &resource.kind,
            object.metadata.namespace.as_deref(),
            object.metadata.name.as_deref().unwrap_or_default(),
        );
        state.objects.insert(k, object);
    }

    /// Read a typed object.
    #[must_use]
    pub fn get_typed<K>(&self, namespace: Option<&str>, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let object = self
            .lock()
            .objects
            .get(&key(&K::kind(&()), namespace, name))
            .cloned()?;
        Some(from_dynamic(object).unwrap())
    }

    /// Read a dynamic object by kind.
    #[must_use]
    pub fn get_dynamic(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.lock().objects.get(&key(kind, namespace, name)).cloned()
    }

    /// `true` if an object of `kind` exists.
    #[must_use]
    pub fn exists(&self, kind: &str, namespace: Option<&str>, name: &str) -> bool {
        self.lock().objects.contains_key(&key(kind, namespace, name))
    }

    /// Names of all objects of `kind` in `namespace`.
    #[must_use]
    pub fn names(&self, kind: &str, namespace: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(k, ns, _)| k == kind && ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Every write recorded so far.
    #[must_use]
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    /// Forget recorded writes.
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Register an API group as served.
    pub fn add_api_group(&self, group: &str) {
        self.lock().api_groups.insert(group.to_string());
    }

    /// Make every status write fail with a conflict.
    pub fn fail_status_updates_with_conflict(&self, fail: bool) {
        self.lock().status_conflict = fail;
    }

    /// Read a typed resource through the trait, for assertions that need status.
    #[must_use]
    pub fn resource<K>(&self) -> ApiResource
    where
        K: Resource<DynamicType = ()>,
    {
        api_resource::<K>()
    }
}

#[async_trait]
impl KubeClient for FakeKubeClient {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self
            .lock()
            .objects
            .get(&key(&resource.kind, namespace, name))
            .cloned())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|((kind, ns, _), _)| {
                kind == &resource.kind && namespace.is_none_or(|wanted| wanted == ns.as_str())
            })
            .map(|(_, obj)| obj)
            .filter(|obj| label_selector.is_none_or(|s| matches_selector(obj, s)))
            .cloned()
            .collect())
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object.metadata.name.clone().unwrap_or_default();
        let k = key(&resource.kind, object.metadata.namespace.as_deref(), &name);
        let mut state = self.lock();
        if state.objects.contains_key(&k) {
            return Err(Error::Transient(format!(
                "{} {name} already exists",
                resource.kind
            )));
        }
        state.next_resource_version += 1;
        let mut stored = object.clone();
        stored.metadata.resource_version = Some(state.next_resource_version.to_string());
        if stored.metadata.uid.is_none() {
            stored.metadata.uid = Some(format!("uid-{}", state.next_resource_version));
        }
        state.writes.push(RecordedWrite {
            verb: "create",
            kind: resource.kind.clone(),
            namespace: k.1.clone(),
            name,
        });
        state.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = object.metadata.name.clone().unwrap_or_default();
        let k = key(&resource.kind, object.metadata.namespace.as_deref(), &name);
        let mut state = self.lock();
        let Some(current) = state.objects.get(&k) else {
            return Err(Error::Transient(format!("{} {name} not found", resource.kind)));
        };
        if object.metadata.resource_version.is_some()
            && object.metadata.resource_version != current.metadata.resource_version
        {
            return Err(Error::Conflict {
                kind: resource.kind.clone(),
                name,
            });
        }
        let uid = current.metadata.uid.clone();
        state.next_resource_version += 1;
        let mut stored = object.clone();
        stored.metadata.resource_version = Some(state.next_resource_version.to_string());
        stored.metadata.uid = uid;
        state.writes.push(RecordedWrite {
            verb: "replace",
            kind: resource.kind.clone(),
            namespace: k.1.clone(),
            name,
        });
        state.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        let k = key(&resource.kind, namespace, name);
        let mut state = self.lock();
        let existed = state.objects.remove(&k).is_some();
        state.writes.push(RecordedWrite {
            verb: "delete",
            kind: resource.kind.clone(),
            namespace: k.1,
            name: name.to_string(),
        });
        Ok(existed)
    }

    async fn api_group_available(&self, group: &str) -> Result<bool> {
        Ok(self.lock().api_groups.contains(group))
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: serde_json::Value,
    ) -> Result<()> {
        let k = key(&resource.kind, Some(namespace), name);
        let mut state = self.lock();
        if state.status_conflict {
            return Err(Error::Conflict {
                kind: resource.kind.clone(),
                name: name.to_string(),
            });
        }
        let next = state.next_resource_version + 1;
        let Some(current) = state.objects.get_mut(&k) else {
            return Err(Error::Transient(format!("{} {name} not found", resource.kind)));
        };
        if resource_version.is_some() && resource_version != current.metadata.resource_version.as_deref() {
            return Err(Error::Conflict {
                kind: resource.kind.clone(),
                name: name.to_string(),
            });
        }
        if let Some(map) = current.data.as_object_mut() {
            map.insert("status".to_string(), status);
        }
        current.metadata.resource_version = Some(next.to_string());
        state.next_resource_version = next;
        state.writes.push(RecordedWrite {
            verb: "status",
            kind: resource.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }
}

/// [`DynatraceClientFactory`] handing out one prepared client and recording configs.
pub struct StaticClientFactory {
    client: Arc<dyn DynatraceClient>,
    configs: Mutex<Vec<ClientConfig>>,
}

impl StaticClientFactory {
    /// Factory that always returns `client`.
    #[must_use]
    pub fn new(client: Arc<dyn DynatraceClient>) -> Self {
        Self {
            client,
            configs: Mutex::new(Vec::new()),
        }
    }

    /// Configs the factory was asked to build clients for.
    #[must_use]
    pub fn configs(&self) -> Vec<ClientConfig> {
        self.configs
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

impl DynatraceClientFactory for StaticClientFactory {
    fn build(&self, config: &ClientConfig) -> Result<Arc<dyn DynatraceClient>> {
        if let Ok(mut configs) = self.configs.lock() {
            configs.push(config.clone());
        }
        Ok(Arc::clone(&self.client))
    }
}

/// Fixed instant used by tests that depend on wall-clock time.
#[must_use]
pub fn test_now() -> chrono::DateTime<chrono::Utc> {
    use chrono::TimeZone;
    chrono::Utc
        .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Context over a fake cluster and a prepared Dynatrace client, with a frozen clock.
#[must_use]
pub fn test_context(kube: &FakeKubeClient, dynatrace: Arc<dyn DynatraceClient>) -> Context {
    Context::new(
        Arc::new(kube.clone()),
        Arc::new(StaticClientFactory::new(dynatrace)),
        OperatorConfig::default(),
        Metrics::new().unwrap(),
        CancellationToken::new(),
    )
    .with_clock(Clock::fixed(test_now()))
}

/// Context whose Dynatrace client must not be used.
#[must_use]
pub fn kube_only_context(kube: &FakeKubeClient) -> Context {
    test_context(kube, Arc::new(MockDynatraceClient::new()))
}

/// `DynaKube` `{namespace}/{name}` with the given spec and a uid.
#[must_use]
pub fn dynakube(namespace: &str, name: &str, spec: DynaKubeSpec) -> DynaKube {
    let mut dk = DynaKube::new(name, spec);
    dk.metadata.namespace = Some(namespace.to_string());
    dk.metadata.uid = Some(format!("{name}-uid"));
    dk
}

/// Spec with only the API URL set.
#[must_use]
pub fn minimal_spec() -> DynaKubeSpec {
    DynaKubeSpec {
        api_url: "https://t.example/api".to_string(),
        tokens: None,
        proxy: None,
        trusted_cas: None,
        network_zone: None,
        enable_istio: false,
        skip_cert_check: false,
        custom_pull_secret: None,
        active_gate: None,
        one_agent: None,
        metadata_enrichment: None,
        extensions: None,
    }
}

/// Secret `{namespace}/{name}` with string entries.
#[must_use]
pub fn secret(namespace: &str, name: &str, entries: &[(&str, &str)]) -> k8s_openapi::api::core::v1::Secret {
    k8s_openapi::api::core::v1::Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), k8s_openapi::ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Namespace with labels and a uid derived from its name.
#[must_use]
pub fn namespace(name: &str, labels: &[(&str, &str)]) -> k8s_openapi::api::core::v1::Namespace {
    k8s_openapi::api::core::v1::Namespace {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(format!("{name}-uid")),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Pass state over `ctx` with API token `T` at [`test_now`].
#[must_use]
pub fn pass_context(
    ctx: &Context,
    dynatrace: Arc<dyn DynatraceClient>,
) -> crate::reconcilers::PassContext<'_> {
    crate::reconcilers::PassContext {
        ctx,
        dynatrace,
        tokens: crate::reconcilers::token::Tokens {
            api_token: "T".to_string(),
            paas_token: None,
            data_ingest_token: None,
        },
        now: test_now(),
    }
}
