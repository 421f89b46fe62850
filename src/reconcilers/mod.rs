// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for `DynaKube` resources.
//!
//! A reconciliation pass is driven by [`reconcile_dynakube`], which runs the
//! component reconcilers below in a fixed order against an in-memory copy of the
//! `DynaKube` and persists the status once at the end.
//!
//! # Reconciliation Architecture
//!
//! 1. **Prepare** - migrate deprecated conditions, validate, set up Istio for the API URL
//! 2. **Authenticate** - read tokens, build the Dynatrace client, verify scopes
//! 3. **Cluster facts** - `kube-system` UUID, deployment metadata, proxy secret
//! 4. **Components** - ActiveGate, extensions, injection, OneAgent
//! 5. **Status** - derive the phase and write the status if it changed
//!
//! # Component Reconcilers
//!
//! - [`activegate`] - ActiveGate workloads, services, auth token and API monitoring
//! - [`oneagent`] - OneAgent daemon workload and instance status
//! - [`injection`] - namespace mapping and injection secrets
//! - [`istio`] - mesh egress objects for tenant endpoints
//! - [`connectioninfo`] - cached tenant connection info
//! - [`version`] - resolved component versions
//! - [`token`] - token secret and scope verification
//!
//! Every sub-reconciler receives the pass state ([`PassContext`]) and a mutable
//! `DynaKube`. None of them writes status; they only change the in-memory copy.

pub mod activegate;
pub mod connectioninfo;
pub mod deploymentmetadata;
pub mod dynakube;
pub mod extension;
pub mod injection;
pub mod istio;
pub mod monitoredentities;
pub mod oneagent;
pub mod proxy;
pub mod pullsecret;
pub mod resources;
pub mod status;
pub mod token;
pub mod version;

pub use dynakube::{error_policy, reconcile_dynakube};

use crate::context::Context;
use crate::dtclient::DynatraceClient;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use token::Tokens;

/// State shared by the component reconcilers of one pass.
pub struct PassContext<'a> {
    /// Controller context
    pub ctx: &'a Context,
    /// Dynatrace client built for this `DynaKube`
    pub dynatrace: Arc<dyn DynatraceClient>,
    /// Tokens read at the start of the pass
    pub tokens: Tokens,
    /// Wall-clock time of the pass, read once
    pub now: DateTime<Utc>,
}

impl PassContext<'_> {
    /// Dynatrace client as a trait object reference.
    #[must_use]
    pub fn client(&self) -> &dyn DynatraceClient {
        self.dynatrace.as_ref()
    }
}
