// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Namespace selection for injection.
//!
//! A `DynaKube` with code modules or metadata enrichment maps application
//! namespaces: a namespace is selected when it is not a system namespace, not the
//! operator namespace, and matches the namespace selector of at least one enabled
//! feature. A feature without a selector selects every namespace.
//!
//! # Architecture
//!
//! The controller keeps a reflector store of `DynaKube` resources. When a
//! namespace changes, the watch mapper synchronously queries this store for the
//! `DynaKube`s that select the namespace, or that mapped it before, and queues them.
//!
//! # Example
//!
//! ```rust,no_run
//! use dynakube_operator::crd::DynaKube;
//! use dynakube_operator::selector::find_dynakubes_for_namespace;
//! use k8s_openapi::api::core::v1::Namespace;
//! use kube::runtime::reflector::Store;
//!
//! # fn example(store: Store<DynaKube>, namespace: Namespace) {
//! for dk in find_dynakubes_for_namespace(&store, &namespace, "dynatrace") {
//!     println!("DynaKube {} wants to see namespace changes", dk.name);
//! }
//! # }
//! ```

use crate::crd::{DynaKube, LabelSelector};
use crate::labels::{NAMESPACE_INSTANCE_LABEL, SYSTEM_NAMESPACE_PREFIXES};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;

/// `true` for namespaces that are never mapped.
#[must_use]
pub fn is_system_namespace(name: &str) -> bool {
    SYSTEM_NAMESPACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Selectors of the enabled injection features. `None` selects everything.
fn injection_selectors(dk: &DynaKube) -> Vec<Option<&LabelSelector>> {
    let mut selectors = Vec::new();
    if dk.code_modules_enabled() {
        selectors.push(dk.code_modules_namespace_selector());
    }
    if let Some(enrichment) = dk.spec.metadata_enrichment.as_ref().filter(|m| m.enabled) {
        selectors.push(enrichment.namespace_selector.as_ref());
    }
    selectors
}

/// `true` if `namespace` should be mapped to `dk`.
#[must_use]
pub fn namespace_selected(dk: &DynaKube, namespace: &Namespace, operator_namespace: &str) -> bool {
    let name = namespace.name_any();
    if name == operator_namespace || is_system_namespace(&name) {
        return false;
    }
    let labels = namespace.labels();
    injection_selectors(dk)
        .into_iter()
        .any(|selector| selector.is_none_or(|s| s.matches(labels)))
}

/// Name of the `DynaKube` a namespace is currently mapped to.
#[must_use]
pub fn mapped_dynakube(namespace: &Namespace) -> Option<&str> {
    namespace
        .labels()
        .get(NAMESPACE_INSTANCE_LABEL)
        .map(String::as_str)
}

/// Find all `DynaKube`s in the store that select `namespace` or have mapped it.
///
/// Called by the controller's watch mapper when a namespace changes.
pub fn find_dynakubes_for_namespace(
    store: &Store<DynaKube>,
    namespace: &Namespace,
    operator_namespace: &str,
) -> Vec<ObjectRef<DynaKube>> {
    let mapped = mapped_dynakube(namespace);
    store
        .state()
        .iter()
        .filter(|dk| {
            mapped == Some(dk.name_any().as_str())
                || namespace_selected(dk, namespace, operator_namespace)
        })
        .map(|dk| ObjectRef::from_obj(&**dk))
        .collect()
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod selector_tests;
