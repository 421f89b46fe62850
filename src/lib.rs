// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # DynaKube Operator - Dynatrace monitoring for Kubernetes
//!
//! A Kubernetes operator that turns a `DynaKube` custom resource into the
//! Dynatrace workloads of a cluster: ActiveGate StatefulSets, the OneAgent
//! DaemonSet, per-namespace injection secrets and the tenant connection objects
//! they depend on.
//!
//! ## Overview
//!
//! This library provides the core of the operator:
//!
//! - The `DynaKube` Custom Resource Definition and its validation
//! - A Dynatrace API client behind a mockable trait
//! - One reconciliation pass per `DynaKube`, with a single status write at the end
//! - Namespace selection for code module injection and metadata enrichment
//!
//! ## Modules
//!
//! - [`crd`] - `DynaKube` resource types
//! - [`reconcilers`] - Reconciliation logic for each component
//! - [`dtclient`] - Dynatrace API client
//! - [`kubeclient`] - Kubernetes adapter used by the reconcilers
//! - [`context`] - Shared controller context
//! - [`selector`] - Namespace selection and watch mapping
//!
//! ## Example
//!
//! ```rust,no_run
//! use dynakube_operator::crd::DynaKube;
//!
//! let dk: DynaKube = serde_json::from_value(serde_json::json!({
//!     "apiVersion": "dynatrace.com/v1beta5",
//!     "kind": "DynaKube",
//!     "metadata": { "name": "dynakube", "namespace": "dynatrace" },
//!     "spec": { "apiUrl": "https://abc123.live.dynatrace.com/api" }
//! }))
//! .unwrap();
//! assert!(!dk.active_gate_enabled());
//! ```
//!
//! ## Features
//!
//! - **Level triggered** - every pass converges from the observed state
//! - **Rate-limit aware** - an unreachable tenant only shortens the requeue
//! - **Status tracking** - conditions and phase on the status subresource

pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod dtclient;
pub mod errors;
pub mod feature_flags;
pub mod http_errors;
pub mod kubeclient;
pub mod labels;
pub mod metrics;
pub mod reconcilers;
pub mod selector;
pub mod status_reasons;

#[cfg(test)]
pub mod testing;

#[cfg(test)]
mod status_reasons_tests;
